//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debug adapter configurations
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Traversal limits and lock timing for the inspection core
    #[serde(default)]
    pub inspection: InspectionConfig,

    /// Per-runtime memory budget overrides, keyed by session type
    #[serde(default)]
    pub budgets: HashMap<String, BudgetOverride>,

    /// Extra session type aliases, mapped onto a built-in session type
    #[serde(default)]
    pub session_types: HashMap<String, String>,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for a debug adapter
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Path to the adapter executable
    pub path: PathBuf,

    /// Additional arguments to pass to the adapter
    #[serde(default)]
    pub args: Vec<String>,

    /// Session type reported for sessions started with this adapter
    #[serde(default)]
    pub session_type: Option<String>,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Default adapter to use
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
        }
    }
}

fn default_adapter() -> String {
    "debugpy".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for DAP initialize request
    #[serde(default = "default_dap_initialize")]
    pub dap_initialize_secs: u64,

    /// Timeout for general DAP requests
    #[serde(default = "default_dap_request")]
    pub dap_request_secs: u64,

    /// How long `inspect` waits for the debuggee to stop
    #[serde(default = "default_stop_wait")]
    pub stop_wait_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dap_initialize_secs: default_dap_initialize(),
            dap_request_secs: default_dap_request(),
            stop_wait_secs: default_stop_wait(),
        }
    }
}

fn default_dap_initialize() -> u64 {
    10
}
fn default_dap_request() -> u64 {
    30
}
fn default_stop_wait() -> u64 {
    60
}

/// Traversal and locking defaults applied when a call leaves them unset
#[derive(Debug, Clone, Deserialize)]
pub struct InspectionConfig {
    /// Depth at which expansion stops and marks `maxDepth`
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Children fetched per expanded variable
    #[serde(default = "default_max_children")]
    pub max_children: usize,

    /// Page size used when reading a scope's top-level variables
    #[serde(default = "default_scope_page_size")]
    pub scope_page_size: usize,

    /// Largest page a single `get_variable_children` call may request
    #[serde(default = "default_children_page_size")]
    pub children_page_size: usize,

    /// Include scopes the adapter flags as expensive
    #[serde(default)]
    pub include_expensive: bool,

    /// Per-call timeout for locked operations
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// How many ancestors an identity cycle check compares against
    #[serde(default = "default_identity_ancestors")]
    pub identity_ancestors: usize,

    /// Identity checks stop for an evaluate path after this many failures
    #[serde(default = "default_identity_failures")]
    pub max_identity_failures: u32,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_children: default_max_children(),
            scope_page_size: default_scope_page_size(),
            children_page_size: default_children_page_size(),
            include_expensive: false,
            lock_timeout_secs: default_lock_timeout(),
            identity_ancestors: default_identity_ancestors(),
            max_identity_failures: default_identity_failures(),
        }
    }
}

fn default_max_depth() -> usize {
    2
}
fn default_max_children() -> usize {
    50
}
fn default_scope_page_size() -> usize {
    200
}
fn default_children_page_size() -> usize {
    100
}
fn default_lock_timeout() -> u64 {
    30
}
fn default_identity_ancestors() -> usize {
    4
}
fn default_identity_failures() -> u32 {
    2
}

/// Memory budget override for one runtime
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct BudgetOverride {
    pub max_nodes: Option<usize>,
    pub max_bytes: Option<usize>,
}

/// Logging settings
#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Get adapter configuration by name
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn get_adapter(&self, name: &str) -> Option<AdapterConfig> {
        if let Some(config) = self.adapters.get(name) {
            return Some(config.clone());
        }

        let (binary, args, session_type): (&str, Vec<String>, Option<&str>) = match name {
            "debugpy" | "debugpy-adapter" => ("debugpy-adapter", Vec::new(), Some("debugpy")),
            "netcoredbg" => ("netcoredbg", vec!["--interpreter=vscode".into()], Some("coreclr")),
            "js-debug" | "js-debug-adapter" => ("js-debug-adapter", Vec::new(), Some("pwa-node")),
            "dart" => ("dart", vec!["debug_adapter".into()], Some("dart")),
            other => (other, Vec::new(), None),
        };

        which::which(binary).ok().map(|path| AdapterConfig {
            path,
            args,
            session_type: session_type.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.inspection.max_depth, 2);
        assert_eq!(config.inspection.max_children, 50);
        assert_eq!(config.inspection.lock_timeout_secs, 30);
        assert_eq!(config.timeouts.dap_request_secs, 30);
        assert!(config.budgets.is_empty());
    }

    #[test]
    fn test_budget_and_alias_sections() {
        let config = Config::parse(
            r#"
            [inspection]
            max_depth = 4

            [budgets.dart]
            max_nodes = 50000
            max_bytes = 10485760

            [session_types]
            "my-node" = "pwa-node"
            "#,
        )
        .unwrap();

        assert_eq!(config.inspection.max_depth, 4);
        assert_eq!(config.inspection.max_children, 50);
        assert_eq!(config.budgets["dart"].max_nodes, Some(50_000));
        assert_eq!(config.session_types["my-node"], "pwa-node");
    }

    #[test]
    fn test_invalid_config_is_parse_error() {
        let err = Config::parse("[inspection]\nmax_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_explicit_adapter_wins() {
        let config = Config::parse(
            r#"
            [adapters.custom]
            path = "/opt/custom-dap"
            args = ["--stdio"]
            session_type = "java"
            "#,
        )
        .unwrap();

        let adapter = config.get_adapter("custom").unwrap();
        assert_eq!(adapter.path, PathBuf::from("/opt/custom-dap"));
        assert_eq!(adapter.session_type.as_deref(), Some("java"));
    }
}
