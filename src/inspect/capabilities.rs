//! Per-adapter feature flags
//!
//! A descriptor is fixed when the adapter instance is built. Narrowing it to
//! what a live adapter reported produces a new value rather than mutating.

use serde::Serialize;

use crate::dap::Capabilities;

use super::error::{InspectError, InspectResult};

/// Immutable feature flags for one runtime adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub supports_set_variable: bool,
    pub supports_set_expression: bool,
    pub supports_evaluate: bool,
    pub supports_variable_paging: bool,
    pub supports_variable_type: bool,
    pub supports_memory_references: bool,
    pub supports_progress_reporting: bool,
    pub supports_invalidated_event: bool,
    pub supports_evaluate_for_hovers: bool,
    /// Runtime can compare two values for object identity
    pub supports_identity_check: bool,
}

impl CapabilityDescriptor {
    /// Everything on; used by scripted test channels
    pub const FULL: Self = Self {
        supports_set_variable: true,
        supports_set_expression: true,
        supports_evaluate: true,
        supports_variable_paging: true,
        supports_variable_type: true,
        supports_memory_references: true,
        supports_progress_reporting: true,
        supports_invalidated_event: true,
        supports_evaluate_for_hovers: true,
        supports_identity_check: true,
    };

    /// Baseline most DAP adapters provide
    pub const STANDARD: Self = Self {
        supports_set_variable: true,
        supports_set_expression: true,
        supports_evaluate: true,
        supports_variable_paging: true,
        supports_variable_type: true,
        supports_memory_references: false,
        supports_progress_reporting: true,
        supports_invalidated_event: true,
        supports_evaluate_for_hovers: true,
        supports_identity_check: false,
    };

    /// Keep only what the live adapter actually advertised
    ///
    /// Paging and types are client-declared in DAP, so they are kept.
    pub fn restricted_by(self, reported: &Capabilities) -> Self {
        Self {
            supports_set_variable: self.supports_set_variable && reported.supports_set_variable,
            supports_set_expression: self.supports_set_expression
                && reported.supports_set_expression,
            supports_evaluate_for_hovers: self.supports_evaluate_for_hovers
                && reported.supports_evaluate_for_hovers,
            ..self
        }
    }

    /// Fail with a capability error unless `supported`
    pub fn require(supported: bool, operation: &str) -> InspectResult<()> {
        if supported {
            Ok(())
        } else {
            Err(InspectError::unsupported_capability(operation))
        }
    }

    /// True when at least one mutation tier is available
    pub fn can_mutate(&self) -> bool {
        self.supports_set_variable || self.supports_set_expression || self.supports_evaluate
    }
}
