// Execution Context - request-scoped routing state
//
// One ExecutionContext per in-flight request or worker task. It owns the
// shard activations, the connection registry and one proxy per entity type,
// so nothing here is shared across contexts and nothing needs a lock.

use futures::future::BoxFuture;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppResult;
use crate::framework::entity::Model;
use crate::framework::fabric::DataFabric;
use crate::infrastructure::connection_proxy::{
    ConnectionProxy, ConnectionTarget, ContextStats, Role, RoutingScope,
};
use crate::infrastructure::connection_registry::ConnectionRegistry;
use crate::infrastructure::database::{Operation, OperationOutput};
use crate::infrastructure::shard_context::{ShardContext, DEFAULT_GROUP};

pub struct ExecutionContext {
    id: Uuid,
    fabric: Arc<DataFabric>,
    shards: ShardContext,
    registry: ConnectionRegistry,
    proxies: HashMap<String, ConnectionProxy>,
    stats: ContextStats,
}

impl ExecutionContext {
    pub fn new(fabric: Arc<DataFabric>) -> Self {
        let id = Uuid::new_v4();
        debug!(context = %id, "Creating execution context");
        Self {
            id,
            fabric,
            shards: ShardContext::new(),
            registry: ConnectionRegistry::new(),
            proxies: HashMap::new(),
            stats: ContextStats::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn fabric(&self) -> &Arc<DataFabric> {
        &self.fabric
    }

    pub fn shards(&self) -> &ShardContext {
        &self.shards
    }

    /// Direct access for callers that cannot use the scoped forms; pair
    /// `activate` with `restore` or `deactivate`
    pub fn shards_mut(&mut self) -> &mut ShardContext {
        &mut self.shards
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    /// Run `f` with `bindings` merged into the active shards. The previous
    /// activations are restored once `f` finishes, whatever it returned.
    ///
    /// The returned future may only borrow the context it is handed, so `f`
    /// must capture owned or `'static` data.
    pub async fn activate_shards<I, K, V, T, F>(&mut self, bindings: I, f: F) -> T
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        F: for<'c> FnOnce(&'c mut ExecutionContext) -> BoxFuture<'c, T>,
    {
        let scope = self.shards.activate(bindings);
        let output = f(&mut *self).await;
        self.shards.restore(scope);
        output
    }

    /// Single-group form of `activate_shards`
    pub async fn with_shard<T, F>(&mut self, shard: &str, f: F) -> T
    where
        F: for<'c> FnOnce(&'c mut ExecutionContext) -> BoxFuture<'c, T>,
    {
        self.activate_shards([(DEFAULT_GROUP, shard)], f).await
    }

    pub async fn execute(&mut self, entity: &str, operation: Operation) -> AppResult<OperationOutput> {
        let (proxy, mut scope) = self.route(entity)?;
        proxy.execute(&mut scope, &operation).await
    }

    pub async fn execute_model<M: Model>(&mut self, operation: Operation) -> AppResult<OperationOutput> {
        self.execute(M::ENTITY_NAME, operation).await
    }

    pub async fn transaction(
        &mut self,
        entity: &str,
        operations: Vec<Operation>,
    ) -> AppResult<Vec<OperationOutput>> {
        let (proxy, mut scope) = self.route(entity)?;
        proxy.transaction(&mut scope, &operations).await
    }

    /// The name `entity` would use right now, without connecting
    pub fn connection_name(&mut self, entity: &str, role: Role) -> AppResult<String> {
        self.connection_target(entity, role).map(|target| target.name)
    }

    pub fn connection_target(&mut self, entity: &str, role: Role) -> AppResult<ConnectionTarget> {
        let (proxy, scope) = self.route(entity)?;
        proxy.resolve_target(scope.environment, scope.shards, scope.configs, role)
    }

    /// Name of the connection `entity` last used in this context
    pub fn current_connection_name(&self, entity: &str) -> Option<&str> {
        self.proxies
            .get(entity)
            .and_then(ConnectionProxy::current_connection_name)
    }

    pub fn disconnect(&mut self, entity: &str) {
        if let Some(proxy) = self.proxies.get_mut(entity) {
            proxy.disconnect();
        }
    }

    /// Forget every connection this context holds without closing them
    pub fn clear_connection_pool(&mut self) {
        debug!(context = %self.id, "Clearing {} pooled connections", self.registry.len());
        self.registry.clear();
        for proxy in self.proxies.values_mut() {
            proxy.disconnect();
        }
    }

    /// Close every connection this context opened
    pub async fn close(&mut self) {
        for proxy in self.proxies.values_mut() {
            proxy.disconnect();
        }
        self.registry.close_all().await;
    }

    fn route(&mut self, entity: &str) -> AppResult<(&mut ConnectionProxy, RoutingScope<'_>)> {
        let fabric: &DataFabric = &self.fabric;
        let proxy = match self.proxies.entry(entity.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let binding = fabric.bindings().get(entity)?.clone();
                entry.insert(ConnectionProxy::new(binding))
            }
        };
        let scope = RoutingScope {
            context_id: self.id,
            environment: fabric.environment(),
            configs: fabric.configs(),
            connector: fabric.connector(),
            verify_timeout: fabric.verify_timeout(),
            shards: &self.shards,
            registry: &mut self.registry,
            stats: &mut self.stats,
        };
        Ok((proxy, scope))
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("shards", &self.shards)
            .field("registry", &self.registry)
            .field("stats", &self.stats)
            .finish()
    }
}
