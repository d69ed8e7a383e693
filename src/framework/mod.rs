pub mod context;
pub mod entity;
pub mod fabric;
pub mod migration_bootstrap;

pub use context::ExecutionContext;
pub use entity::{EntityBinding, EntityBindings, EntityType, Model, Policy};
pub use fabric::DataFabric;
pub use migration_bootstrap::MigrationBootstrap;
