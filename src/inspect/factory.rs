//! Maps session types to runtime hooks
//!
//! Lookup order for a session: its reported type, then the type named by
//! its launch configuration. Each key is checked against registered
//! overrides before the built-in runtimes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::common::config::{BudgetOverride, Config, InspectionConfig};
use crate::dap::Capabilities;
use crate::runtime::{self, RuntimeHooks};

use super::adapter::RuntimeAdapter;
use super::channel::{DebugChannel, SessionInfo};
use super::error::{InspectError, InspectResult};
use super::lock::OperationLockManager;

#[derive(Clone, Default)]
pub struct AdapterFactory {
    overrides: HashMap<String, Arc<dyn RuntimeHooks>>,
    budgets: HashMap<String, BudgetOverride>,
    config: InspectionConfig,
    locks: OperationLockManager,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory carrying the inspection defaults, budgets and aliases of `config`
    pub fn from_config(config: &Config) -> InspectResult<Self> {
        let mut factory = Self {
            budgets: config.budgets.clone(),
            config: config.inspection.clone(),
            ..Self::default()
        };
        for (alias, target) in &config.session_types {
            factory.register_alias(alias, target)?;
        }
        Ok(factory)
    }

    pub fn with_config(mut self, config: InspectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Register hooks for a session type, taking precedence over built-ins
    pub fn register(&mut self, session_type: impl Into<String>, hooks: Arc<dyn RuntimeHooks>) {
        let session_type = session_type.into();
        tracing::debug!(%session_type, runtime = hooks.info().id, "Registered runtime override");
        self.overrides.insert(session_type, hooks);
    }

    /// Handle `alias` sessions the way `target` sessions are handled
    pub fn register_alias(&mut self, alias: &str, target: &str) -> InspectResult<()> {
        let hooks = self
            .lookup(target)
            .ok_or_else(|| InspectError::unsupported_language(target, &self.supported_types()))?;
        self.register(alias, hooks);
        Ok(())
    }

    /// Override the budget for a session type or runtime id
    pub fn set_budget(&mut self, key: impl Into<String>, budget: BudgetOverride) {
        self.budgets.insert(key.into(), budget);
    }

    fn lookup(&self, session_type: &str) -> Option<Arc<dyn RuntimeHooks>> {
        self.overrides
            .get(session_type)
            .cloned()
            .or_else(|| runtime::builtin_hooks(session_type))
    }

    /// Hooks for `session`, or `E_UNSUPPORTED_LANGUAGE` listing what is known
    pub fn resolve(&self, session: &SessionInfo) -> InspectResult<Arc<dyn RuntimeHooks>> {
        std::iter::once(session.session_type.as_str())
            .chain(session.configured_type.as_deref())
            .find_map(|key| self.lookup(key))
            .ok_or_else(|| {
                InspectError::unsupported_language(&session.session_type, &self.supported_types())
            })
    }

    /// Build the adapter for one session
    ///
    /// `reported` narrows the runtime's capabilities to what the live
    /// adapter advertised at initialize.
    pub fn create(
        &self,
        session: SessionInfo,
        channel: Arc<dyn DebugChannel>,
        reported: Option<&Capabilities>,
    ) -> InspectResult<RuntimeAdapter> {
        let hooks = self.resolve(&session)?;

        let budget = self
            .budgets
            .get(&session.session_type)
            .or_else(|| self.budgets.get(hooks.info().id))
            .copied()
            .unwrap_or_default();
        let limits = hooks
            .budget_limits()
            .with_overrides(budget.max_nodes, budget.max_bytes);

        let mut caps = hooks.capabilities();
        if let Some(reported) = reported {
            caps = caps.restricted_by(reported);
        }

        tracing::info!(
            session = %session.id,
            session_type = %session.session_type,
            runtime = hooks.info().id,
            max_nodes = limits.max_nodes,
            max_bytes = limits.max_bytes,
            "Created inspection adapter"
        );

        Ok(RuntimeAdapter::new(session, channel, hooks)
            .with_config(self.config.clone())
            .with_budget(limits)
            .with_capabilities(caps)
            .with_locks(self.locks.clone()))
    }

    /// Every session type this factory can serve, sorted
    pub fn supported_types(&self) -> Vec<String> {
        runtime::all_runtimes()
            .iter()
            .flat_map(|info| info.session_types.iter().map(|t| t.to_string()))
            .chain(self.overrides.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::budget::BudgetLimits;
    use crate::inspect::error::ErrorCode;
    use crate::testing::ScriptedChannel;

    fn channel() -> Arc<dyn DebugChannel> {
        Arc::new(ScriptedChannel::builder().build())
    }

    #[test]
    fn test_builtin_lookup_and_configured_fallback() {
        let factory = AdapterFactory::new();
        let hooks = factory.resolve(&SessionInfo::new("1", "pwa-chrome")).unwrap();
        assert_eq!(hooks.info().id, "cdp");

        let session = SessionInfo::new("2", "custom-launcher").with_configured_type("debugpy");
        assert_eq!(factory.resolve(&session).unwrap().info().id, "debugpy");
    }

    #[test]
    fn test_unknown_type_lists_supported() {
        let factory = AdapterFactory::new();
        let err = factory.resolve(&SessionInfo::new("1", "cobol")).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedLanguage);
        let detail = err.detail.unwrap();
        for known in ["coreclr", "dart", "debugpy", "java", "node", "pwa-chrome", "pwa-node"] {
            assert!(detail.contains(known), "missing {known} in {detail}");
        }
    }

    #[test]
    fn test_override_beats_builtin() {
        let mut factory = AdapterFactory::new();
        factory.register("node", Arc::new(runtime::debugpy::DebugpyHooks));
        let hooks = factory.resolve(&SessionInfo::new("1", "node")).unwrap();
        assert_eq!(hooks.info().id, "debugpy");
    }

    #[test]
    fn test_aliases_from_config() {
        let config = Config::parse(
            r#"
            [session_types]
            "my-python" = "debugpy"
            "#,
        )
        .unwrap();
        let factory = AdapterFactory::from_config(&config).unwrap();
        assert!(factory.supported_types().contains(&"my-python".to_string()));
        assert_eq!(
            factory.resolve(&SessionInfo::new("1", "my-python")).unwrap().info().id,
            "debugpy"
        );

        let bad = Config::parse("[session_types]\nx = \"cobol\"").unwrap();
        assert!(AdapterFactory::from_config(&bad).is_err());
    }

    #[test]
    fn test_budget_per_runtime() {
        let mut factory = AdapterFactory::new();
        let dart = factory
            .create(SessionInfo::new("1", "dart"), channel(), None)
            .unwrap();
        assert_eq!(dart.budget_status().max_nodes, BudgetLimits::LARGE.max_nodes);

        factory.set_budget(
            "cdp",
            BudgetOverride {
                max_nodes: Some(10),
                max_bytes: None,
            },
        );
        let node = factory
            .create(SessionInfo::new("2", "node"), channel(), None)
            .unwrap();
        let status = node.budget_status();
        assert_eq!(status.max_nodes, 10);
        assert_eq!(status.max_bytes, BudgetLimits::DEFAULT.max_bytes);
    }

    #[test]
    fn test_reported_capabilities_narrow() {
        let factory = AdapterFactory::new();
        let reported = Capabilities {
            supports_set_variable: false,
            supports_set_expression: true,
            ..Default::default()
        };
        let adapter = factory
            .create(SessionInfo::new("1", "java"), channel(), Some(&reported))
            .unwrap();
        assert!(!adapter.capabilities().supports_set_variable);
        assert!(adapter.capabilities().supports_evaluate);
    }
}
