// Core infrastructure modules
pub mod shard_context;         // Per-context shard activations
pub mod connection_registry;   // Connection name -> physical connection
pub mod connection_proxy;      // Name resolution, reuse, reconnect and retry
pub mod database;              // Physical connection interface and postgres
pub mod sqlite_database;       // SQLite physical connections

#[cfg(test)]
pub mod mock_database;         // Scriptable connections for unit tests

pub use shard_context::{ShardContext, ShardScope, DEFAULT_GROUP};
pub use connection_registry::ConnectionRegistry;
pub use connection_proxy::{ConnectionProxy, ConnectionTarget, ContextStats, Role, RoutingScope};
pub use database::{Connector, Operation, OperationOutput, PhysicalConnection, PostgresConnection, SqlxConnector};
pub use sqlite_database::SqliteConnection;
