// DataFabric - process-wide routing configuration shared by every execution context

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, ConfigSource, DatabaseConfigurations};
use crate::error::AppResult;
use crate::framework::context::ExecutionContext;
use crate::framework::entity::EntityBindings;
use crate::infrastructure::database::{Connector, SqlxConnector};

const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Immutable after construction; clone the Arc into each request handler
pub struct DataFabric {
    environment: String,
    configs: Arc<dyn ConfigSource>,
    connector: Arc<dyn Connector>,
    bindings: Arc<EntityBindings>,
    verify_timeout: Duration,
}

impl DataFabric {
    pub fn new(
        environment: impl Into<String>,
        configs: Arc<dyn ConfigSource>,
        connector: Arc<dyn Connector>,
        bindings: EntityBindings,
    ) -> Self {
        let environment = environment.into();
        info!(
            "Loading shard_fabric {} for environment {} ({} bound entities)",
            env!("CARGO_PKG_VERSION"),
            environment,
            bindings.len()
        );
        Self {
            environment,
            configs,
            connector,
            bindings: Arc::new(bindings),
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    /// Build from environment configuration: JSON connection store on disk,
    /// sqlx physical connections
    pub fn from_config(config: &Config, bindings: EntityBindings) -> AppResult<Self> {
        let configs = DatabaseConfigurations::from_file(&config.database_config)?;
        Ok(Self::new(
            config.environment.clone(),
            Arc::new(configs),
            Arc::new(SqlxConnector::new()),
            bindings,
        )
        .with_verify_timeout(config.verify_timeout()))
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// Fresh per-request state: no active shards, empty registry
    pub fn new_context(self: &Arc<Self>) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(self))
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn configs(&self) -> &dyn ConfigSource {
        self.configs.as_ref()
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn bindings(&self) -> &EntityBindings {
        &self.bindings
    }

    pub fn verify_timeout(&self) -> Duration {
        self.verify_timeout
    }
}

impl std::fmt::Debug for DataFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFabric")
            .field("environment", &self.environment)
            .field("known_connections", &self.configs.known_names())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}
