// Shard Fabric - shard-aware database connection routing
//
// Entity types are bound to a routing policy once at startup. At request time
// an ExecutionContext resolves the connection name each entity should use
// from the active shard, opens or reuses the matching connection, and
// forwards statements to it.

// Framework - entity bindings, process-wide fabric, request-scoped contexts
pub mod framework;

// Infrastructure - shard context, registry, proxy and physical connections
pub mod infrastructure;

// Common utilities
pub mod config;
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
pub use framework::{
    DataFabric, EntityBinding, EntityBindings, EntityType, ExecutionContext, MigrationBootstrap,
    Model, Policy,
};
pub use infrastructure::{
    ConnectionProxy, ConnectionRegistry, ConnectionTarget, Connector, ContextStats, Operation,
    OperationOutput, PhysicalConnection, Role, ShardContext, ShardScope, SqlxConnector,
    DEFAULT_GROUP,
};
