// Connection Proxy - resolves the connection an entity type should use right
// now and forwards statements to it
//
// Resolution order: cached handle (same name, still open) -> registry entry
// (liveness probed) -> fresh connection from the configuration store.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ConfigSource;
use crate::error::{AppError, AppResult};
use crate::framework::entity::{EntityBinding, Policy};
use crate::infrastructure::connection_registry::ConnectionRegistry;
use crate::infrastructure::database::{Connector, Operation, OperationOutput, PhysicalConnection};
use crate::infrastructure::shard_context::ShardContext;

/// Replication role, only appended to names of replicated bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    /// Reads go to the slave, everything else to the master
    pub fn for_operation(operation: &Operation) -> Self {
        if operation.is_read() {
            Role::Slave
        } else {
            Role::Master
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }
}

/// Per-context routing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextStats {
    pub connections_opened: u64,
    pub registry_hits: u64,
    pub cache_hits: u64,
    pub stale_reconnects: u64,
    pub transient_retries: u64,
}

/// Where a proxy routes, and whether that connection is the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub name: String,
    pub directory: bool,
}

/// Everything a proxy needs from its execution context for one call
pub struct RoutingScope<'a> {
    pub context_id: Uuid,
    pub environment: &'a str,
    pub configs: &'a dyn ConfigSource,
    pub connector: &'a dyn Connector,
    pub verify_timeout: Duration,
    pub shards: &'a ShardContext,
    pub registry: &'a mut ConnectionRegistry,
    pub stats: &'a mut ContextStats,
}

pub struct ConnectionProxy {
    binding: EntityBinding,
    /// Valid only while the resolved name still equals the cached one
    cached: Option<(String, Arc<dyn PhysicalConnection>)>,
}

impl ConnectionProxy {
    pub fn new(binding: EntityBinding) -> Self {
        Self {
            binding,
            cached: None,
        }
    }

    pub fn binding(&self) -> &EntityBinding {
        &self.binding
    }

    /// `{env}`, `{env}_{shard}` or `{env}_directory`, plus `_{role}` when replicated
    pub fn resolve_connection_name(
        &self,
        environment: &str,
        shards: &ShardContext,
        role: Role,
    ) -> AppResult<String> {
        let base = match &self.binding.policy {
            Policy::Unbound => environment.to_string(),
            Policy::DirectoryRouted => format!("{}_directory", environment),
            Policy::ShardRouted { group } => {
                let shard = shards.current_shard(group).map_err(|_| {
                    AppError::ShardNotConfigured {
                        entity: self.binding.entity.clone(),
                        group: group.clone(),
                    }
                })?;
                format!("{}_{}", environment, shard)
            }
        };
        Ok(self.with_role(base, role))
    }

    /// The connection to use right now. An unbound entity whose default
    /// connection is not configured lands on the directory instead.
    pub fn resolve_target(
        &self,
        environment: &str,
        shards: &ShardContext,
        configs: &dyn ConfigSource,
        role: Role,
    ) -> AppResult<ConnectionTarget> {
        let name = self.resolve_connection_name(environment, shards, role)?;
        if matches!(self.binding.policy, Policy::Unbound) && configs.get_config(&name).is_none() {
            let fallback = self.with_role(format!("{}_directory", environment), role);
            if configs.get_config(&fallback).is_some() {
                debug!("No config for {}, {} falls back to {}", name, self.binding.entity, fallback);
                return Ok(ConnectionTarget {
                    name: fallback,
                    directory: true,
                });
            }
        }
        Ok(ConnectionTarget {
            name,
            directory: self.binding.is_directory(),
        })
    }

    fn with_role(&self, mut name: String, role: Role) -> String {
        if self.binding.replicated {
            name.push('_');
            name.push_str(role.as_str());
        }
        name
    }

    pub fn current_connection_name(&self) -> Option<&str> {
        self.cached.as_ref().map(|(name, _)| name.as_str())
    }

    pub fn is_connected(&self) -> bool {
        self.cached.is_some()
    }

    /// Forward one statement, reopening and retrying once if the connection
    /// was lost underneath it
    pub async fn execute(
        &mut self,
        scope: &mut RoutingScope<'_>,
        operation: &Operation,
    ) -> AppResult<OperationOutput> {
        let role = Role::for_operation(operation);
        let name = self.routed_name(scope, role)?;
        let handle = self.connection_for(scope, &name).await?;

        debug!(context = %scope.context_id, "Calling {} on {}", operation.sql(), name);
        let err = match handle.execute(operation).await {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };
        if !scope.connector.is_transient(&err) {
            return Err(err);
        }

        warn!(
            context = %scope.context_id,
            "Connection {} lost ({}), reconnecting and retrying once", name, err
        );
        scope.stats.transient_retries += 1;
        self.invalidate(scope, &name, &handle).await;

        let handle = Self::open_and_store(scope, &name).await?;
        self.cached = Some((name.clone(), Arc::clone(&handle)));

        match handle.execute(operation).await {
            Ok(output) => Ok(output),
            Err(err) => {
                error!(context = %scope.context_id, "Retry on {} failed: {}", name, err);
                if scope.connector.is_transient(&err) {
                    self.invalidate(scope, &name, &handle).await;
                }
                Err(err)
            }
        }
    }

    /// Run `operations` in one transaction on the connection resolved once
    /// up front; the shard context must not change until this returns
    pub async fn transaction(
        &mut self,
        scope: &mut RoutingScope<'_>,
        operations: &[Operation],
    ) -> AppResult<Vec<OperationOutput>> {
        let name = self.routed_name(scope, Role::Master)?;
        let handle = self.connection_for(scope, &name).await?;

        debug!(
            context = %scope.context_id,
            "Running transaction of {} statements on {}", operations.len(), name
        );
        match handle.execute_in_transaction(operations).await {
            Ok(outputs) => Ok(outputs),
            Err(err) => {
                // Not retried: part of the transaction may already have run
                if scope.connector.is_transient(&err) {
                    self.invalidate(scope, &name, &handle).await;
                }
                Err(err)
            }
        }
    }

    /// Forget the cached handle; the registry keeps the connection
    pub fn disconnect(&mut self) {
        if let Some((name, _)) = self.cached.take() {
            debug!("Releasing cached connection {} for {}", name, self.binding.entity);
        }
    }

    fn routed_name(&self, scope: &RoutingScope<'_>, role: Role) -> AppResult<String> {
        self.resolve_target(scope.environment, scope.shards, scope.configs, role)
            .map(|target| target.name)
    }

    async fn connection_for(
        &mut self,
        scope: &mut RoutingScope<'_>,
        name: &str,
    ) -> AppResult<Arc<dyn PhysicalConnection>> {
        if let Some((cached_name, handle)) = &self.cached {
            if cached_name == name && handle.is_open() {
                scope.stats.cache_hits += 1;
                return Ok(Arc::clone(handle));
            }
        }

        let previous = self
            .current_connection_name()
            .unwrap_or("(none)")
            .to_string();
        let handle = match scope.registry.lookup(name) {
            Some(existing) => {
                debug!(
                    context = %scope.context_id,
                    "Switching from {} to {} (existing connection)", previous, name
                );
                scope.stats.registry_hits += 1;
                if existing.verify(scope.verify_timeout).await {
                    existing
                } else {
                    warn!(
                        context = %scope.context_id,
                        "Connection {} failed verification, reopening", name
                    );
                    scope.stats.stale_reconnects += 1;
                    scope.registry.remove(name);
                    existing.close().await;
                    Self::open_and_store(scope, name).await?
                }
            }
            None => {
                debug!(
                    context = %scope.context_id,
                    "Switching from {} to {} (new connection)", previous, name
                );
                Self::open_and_store(scope, name).await?
            }
        };

        self.cached = Some((name.to_string(), Arc::clone(&handle)));
        Ok(handle)
    }

    async fn open_and_store(
        scope: &mut RoutingScope<'_>,
        name: &str,
    ) -> AppResult<Arc<dyn PhysicalConnection>> {
        let params = scope
            .configs
            .get_config(name)
            .ok_or_else(|| AppError::UnknownConnectionConfig {
                name: name.to_string(),
                known: scope.configs.known_names(),
            })?;

        let handle = scope.connector.open(name, &params).await?;
        if !handle.verify(scope.verify_timeout).await {
            handle.close().await;
            return Err(AppError::TransientConnectionFailure {
                connection: name.to_string(),
                message: "new connection failed verification".to_string(),
            });
        }

        scope.stats.connections_opened += 1;
        info!(context = %scope.context_id, "Opened connection {}", name);
        scope.registry.store(name, Arc::clone(&handle));
        Ok(handle)
    }

    /// Drop a dead handle from the cache and, if it is still the registered
    /// one, from the registry
    async fn invalidate(
        &mut self,
        scope: &mut RoutingScope<'_>,
        name: &str,
        handle: &Arc<dyn PhysicalConnection>,
    ) {
        self.cached = None;
        let registered = scope
            .registry
            .lookup(name)
            .map(|current| Arc::ptr_eq(&current, handle))
            .unwrap_or(false);
        if registered {
            scope.registry.remove(name);
        }
        handle.close().await;
    }
}

impl std::fmt::Debug for ConnectionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProxy")
            .field("binding", &self.binding)
            .field("cached", &self.current_connection_name())
            .finish()
    }
}
