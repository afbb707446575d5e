//! Three-tier variable mutation
//!
//! Tiers are tried in order and the first success wins:
//!
//! 1. `setVariable` against the owning container
//! 2. `setExpression` keyed by frame and access path
//! 3. `evaluate` of a generated `path = literal` assignment
//!
//! Only the last tier builds source text, so it only accepts a restricted
//! path grammar and always re-encodes the value as a literal.

use tokio_util::sync::CancellationToken;

use crate::common::Error;
use crate::dap::SetValueResponseBody;
use crate::runtime::{is_identifier, LiteralSpelling};

use super::capabilities::CapabilityDescriptor;
use super::channel::{cancellable, DebugChannel};
use super::error::{ErrorCode, InspectError, InspectResult};
use super::variable::{MutationTier, SetVariableOutcome};

/// Evaluate context used for the assignment tier
pub const ASSIGN_CONTEXT: &str = "repl";

/// One step of an access path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(u64),
    /// Quoted key, stored with its quotes
    Key(String),
}

/// Parse `ident(.ident | [int] | ["str"] | ['str'] | [ident])*`
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, String> {
    let mut segments = Vec::new();
    let mut rest = path;

    let head_len = rest.find(['.', '[']).unwrap_or(rest.len());
    let head = &rest[..head_len];
    if !is_identifier(head) {
        return Err(format!("'{head}' is not an identifier"));
    }
    segments.push(PathSegment::Field(head.to_string()));
    rest = &rest[head_len..];

    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let len = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
            let field = &after_dot[..len];
            if !is_identifier(field) {
                return Err(format!("'{field}' is not an identifier"));
            }
            segments.push(PathSegment::Field(field.to_string()));
            rest = &after_dot[len..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let (segment, consumed) = parse_bracket(after_bracket)?;
            segments.push(segment);
            rest = &after_bracket[consumed..];
        } else {
            return Err(format!("unexpected '{}'", rest.chars().next().unwrap_or(' ')));
        }
    }
    Ok(segments)
}

/// Parse the inside of `[...]`; returns the segment and bytes consumed
/// including the closing bracket
fn parse_bracket(input: &str) -> Result<(PathSegment, usize), String> {
    let close = input.find(']').ok_or("unterminated '['")?;
    let inner = &input[..close];

    let segment = if let Some(quote) = inner.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let body = inner
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
            .ok_or("unterminated string key")?;
        if body.contains([quote, '\\', '\n', '\r']) {
            return Err("string keys may not contain quotes, escapes or newlines".to_string());
        }
        PathSegment::Key(inner.to_string())
    } else if let Ok(index) = inner.parse::<u64>() {
        PathSegment::Index(index)
    } else if is_identifier(inner) {
        PathSegment::Field(inner.to_string())
    } else {
        return Err(format!("'[{inner}]' is not an index, string or identifier"));
    };

    Ok((segment, close + 1))
}

pub fn is_safe_path(path: &str) -> bool {
    parse_path(path).is_ok()
}

fn is_number(value: &str) -> bool {
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let unsigned = value.strip_prefix('-').unwrap_or(value);

    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (&unsigned[..at], Some(&unsigned[at + 1..])),
        None => (unsigned, None),
    };
    let mantissa_ok = match mantissa.split_once('.') {
        Some((int, frac)) => digits(int) && digits(frac),
        None => digits(mantissa),
    };
    let exponent_ok = exponent.map_or(true, |e| {
        digits(e.strip_prefix(['+', '-']).unwrap_or(e))
    });
    mantissa_ok && exponent_ok
}

fn is_bigint(value: &str) -> bool {
    let unsigned = value.strip_prefix('-').unwrap_or(value);
    unsigned
        .strip_suffix('n')
        .is_some_and(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
}

fn string_literal(text: &str, spelling: &LiteralSpelling) -> String {
    // JSON string escaping is valid in every supported language
    let quoted = serde_json::Value::String(text.to_string()).to_string();
    if spelling.interpolating_strings {
        quoted.replace('$', "\\$")
    } else {
        quoted
    }
}

/// Encode a user-supplied value as a literal in the runtime's syntax
///
/// Anything not recognised as a keyword or number becomes a string literal.
pub fn encode_literal(value: &str, spelling: &LiteralSpelling) -> String {
    let value = value.trim();
    match value {
        "NaN" => return spelling.nan.to_string(),
        "Infinity" | "+Infinity" => return spelling.infinity.to_string(),
        "-Infinity" => return spelling.neg_infinity.to_string(),
        _ => {}
    }
    if value == "true" || value == spelling.true_ {
        return spelling.true_.to_string();
    }
    if value == "false" || value == spelling.false_ {
        return spelling.false_.to_string();
    }
    if value == "null" || value == spelling.null {
        return spelling.null.to_string();
    }
    if let Some(undefined) = spelling.undefined.filter(|u| *u == value) {
        return undefined.to_string();
    }
    if (spelling.bigint && is_bigint(value)) || is_number(value) {
        return value.to_string();
    }

    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        string_literal(&value[1..value.len() - 1], spelling)
    } else {
        string_literal(value, spelling)
    }
}

/// Build `path = literal`, rejecting paths outside the safe grammar
pub fn build_assignment(
    path: &str,
    value: &str,
    spelling: &LiteralSpelling,
) -> InspectResult<String> {
    parse_path(path).map_err(|reason| {
        InspectError::invalid_params(format!(
            "Invalid target path \"{path}\": {reason}. Use identifiers, dot access or bracket access."
        ))
    })?;
    Ok(format!("{path} = {}", encode_literal(value, spelling)))
}

/// What to change and where
#[derive(Debug, Clone)]
pub struct MutationTarget<'a> {
    pub name: &'a str,
    pub value: &'a str,
    /// Container for a direct set
    pub reference: Option<i64>,
    pub frame_id: i64,
    /// The container is known to be read-only
    pub read_only: bool,
}

fn outcome(body: SetValueResponseBody, tier: MutationTier) -> SetVariableOutcome {
    SetVariableOutcome {
        value: body.value,
        type_name: body.type_name,
        reference: body.variables_reference,
        tier,
    }
}

/// Cancellation ends the whole mutation; any other failure moves on
fn tier_failed(tier: MutationTier, error: Error, failures: &mut Vec<String>) -> InspectResult<()> {
    if matches!(error, Error::Cancelled) {
        return Err(error.into());
    }
    tracing::debug!(?tier, %error, "Mutation tier failed");
    failures.push(format!("{tier:?}: {error}"));
    Ok(())
}

/// Run the tiers in order, stopping at the first success
pub async fn apply(
    channel: &dyn DebugChannel,
    caps: &CapabilityDescriptor,
    spelling: &LiteralSpelling,
    token: &CancellationToken,
    target: &MutationTarget<'_>,
) -> InspectResult<SetVariableOutcome> {
    if !caps.can_mutate() {
        return Err(InspectError::new(ErrorCode::UnsupportedOperation)
            .detail("setVariable")
            .suggest(super::error::Suggestion::fallback_for("setVariable")));
    }

    let mut failures = Vec::new();

    if let Some(reference) = target.reference.filter(|_| caps.supports_set_variable) {
        if target.read_only {
            failures.push("SetVariable: container is read-only".to_string());
        } else {
            let res = cancellable(
                token,
                channel.set_variable(reference, target.name, target.value),
            )
            .await;
            match res {
                Ok(body) => return Ok(outcome(body, MutationTier::SetVariable)),
                Err(e) => tier_failed(MutationTier::SetVariable, e, &mut failures)?,
            }
        }
    }

    if caps.supports_set_expression {
        let res = cancellable(
            token,
            channel.set_expression(target.frame_id, target.name, target.value),
        )
        .await;
        match res {
            Ok(body) => return Ok(outcome(body, MutationTier::SetExpression)),
            Err(e) => tier_failed(MutationTier::SetExpression, e, &mut failures)?,
        }
    }

    if caps.supports_evaluate {
        let expression = build_assignment(target.name, target.value, spelling)?;
        let res = cancellable(
            token,
            channel.evaluate(&expression, Some(target.frame_id), ASSIGN_CONTEXT),
        )
        .await;
        match res {
            Ok(body) => {
                return Ok(SetVariableOutcome {
                    value: body.result,
                    type_name: body.type_name,
                    reference: body.variables_reference,
                    tier: MutationTier::Evaluate,
                })
            }
            Err(e) => tier_failed(MutationTier::Evaluate, e, &mut failures)?,
        }
    }

    let code = if target.read_only {
        ErrorCode::ReadOnly
    } else {
        ErrorCode::ModificationFailed
    };
    Err(InspectError::new(code).detail(format!(
        "Could not set '{}': {}",
        target.name,
        failures.join("; ")
    )))
}
