// Entity Binding - declares how each entity type picks its connection
//
// Bindings are registered once while the application boots, then frozen in
// an Arc inside DataFabric and read concurrently by every execution context.

use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::infrastructure::shard_context::DEFAULT_GROUP;

/// Entity type as the framework describes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    pub name: String,
    /// Framework-level sharing of one connection across concurrent requests
    pub allow_concurrency: bool,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allow_concurrency: false,
        }
    }

    pub fn with_allow_concurrency(mut self, allow: bool) -> Self {
        self.allow_concurrency = allow;
        self
    }
}

/// Typed entity declaration
pub trait Model {
    const ENTITY_NAME: &'static str;
    const ALLOW_CONCURRENCY: bool = false;

    fn entity_type() -> EntityType {
        EntityType::new(Self::ENTITY_NAME).with_allow_concurrency(Self::ALLOW_CONCURRENCY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// `{env}`, the plain default connection
    Unbound,
    /// `{env}_{active shard of group}`
    ShardRouted { group: String },
    /// `{env}_directory`, shared by every shard
    DirectoryRouted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityBinding {
    pub entity: String,
    pub policy: Policy,
    /// Appends `_master` / `_slave` to the connection name
    pub replicated: bool,
}

impl EntityBinding {
    pub fn is_directory(&self) -> bool {
        matches!(self.policy, Policy::DirectoryRouted)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityBindings {
    bindings: HashMap<String, EntityBinding>,
    directories: HashSet<String>,
}

impl EntityBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_as_shard_routed(&mut self, entity: &EntityType) -> AppResult<&mut Self> {
        self.bind_as_shard_routed_by(entity, DEFAULT_GROUP)
    }

    /// Route by the active shard of `group` instead of the default group
    pub fn bind_as_shard_routed_by(
        &mut self,
        entity: &EntityType,
        group: &str,
    ) -> AppResult<&mut Self> {
        self.bind(
            entity,
            Policy::ShardRouted {
                group: group.to_string(),
            },
        )
    }

    pub fn bind_as_directory_routed(&mut self, entity: &EntityType) -> AppResult<&mut Self> {
        self.bind(entity, Policy::DirectoryRouted)
    }

    pub fn bind_unbound(&mut self, entity: &EntityType) -> AppResult<&mut Self> {
        self.bind(entity, Policy::Unbound)
    }

    /// Mark an already bound entity as replicated: reads go to the slave,
    /// writes and transactions to the master
    pub fn replicated(&mut self, entity: &str) -> AppResult<&mut Self> {
        let binding = self
            .bindings
            .get_mut(entity)
            .ok_or_else(|| AppError::UnboundEntity {
                entity: entity.to_string(),
            })?;
        binding.replicated = true;
        Ok(self)
    }

    pub fn bind_model<M: Model>(&mut self, policy: Policy) -> AppResult<&mut Self> {
        self.bind(&M::entity_type(), policy)
    }

    fn bind(&mut self, entity: &EntityType, policy: Policy) -> AppResult<&mut Self> {
        if entity.allow_concurrency {
            return Err(AppError::IncompatibleConcurrencyMode {
                entity: entity.name.clone(),
            });
        }

        info!("Creating connection proxy binding for {} ({:?})", entity.name, policy);
        if matches!(policy, Policy::DirectoryRouted) {
            self.directories.insert(entity.name.clone());
        } else {
            self.directories.remove(&entity.name);
        }
        self.bindings.insert(
            entity.name.clone(),
            EntityBinding {
                entity: entity.name.clone(),
                policy,
                replicated: false,
            },
        );
        Ok(self)
    }

    pub fn get(&self, entity: &str) -> AppResult<&EntityBinding> {
        self.bindings
            .get(entity)
            .ok_or_else(|| AppError::UnboundEntity {
                entity: entity.to_string(),
            })
    }

    /// Classify an entity by name without looking at its policy
    pub fn is_directory(&self, entity: &str) -> bool {
        self.directories.contains(entity)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
