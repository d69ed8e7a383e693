// Shard Context - which shard each shard group is pointed at for one execution context
//
// The framework activates a shard once per inbound request (e.g. by the
// current user's city) and every shard-routed entity reads it when it
// resolves its connection name.

use std::collections::HashMap;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Group used by the single-group `with_shard` form and by entities
/// bound without an explicit `shard_by` group
pub const DEFAULT_GROUP: &str = "default";

/// Snapshot taken by `activate`, handed back to `restore` to undo it
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "restore the scope, or call deactivate, to undo the activation"]
pub struct ShardScope {
    previous: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ShardContext {
    active: HashMap<String, String>,
}

impl ShardContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `bindings` into the active mapping. The returned scope restores
    /// the mapping exactly as it was, including groups that were absent.
    pub fn activate<I, K, V>(&mut self, bindings: I) -> ShardScope
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let previous = self.active.clone();
        for (group, shard) in bindings {
            let (group, shard) = (group.into(), shard.into());
            debug!("Activating shard {} for group {}", shard, group);
            self.active.insert(group, shard);
        }
        ShardScope { previous }
    }

    pub fn restore(&mut self, scope: ShardScope) {
        self.active = scope.previous;
    }

    /// Remove groups set by an activation whose scope was dropped
    pub fn deactivate<I, K>(&mut self, groups: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for group in groups {
            self.active.remove(group.as_ref());
        }
    }

    pub fn current_shard(&self, group: &str) -> AppResult<&str> {
        self.active
            .get(group)
            .map(String::as_str)
            .ok_or_else(|| AppError::NoActiveShard {
                group: group.to_string(),
            })
    }

    pub fn active_shards(&self) -> &HashMap<String, String> {
        &self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_shard_requires_activation() {
        let shards = ShardContext::new();
        let err = shards.current_shard(DEFAULT_GROUP).unwrap_err();
        assert!(matches!(err, AppError::NoActiveShard { ref group } if group == DEFAULT_GROUP));
    }

    #[test]
    fn test_nested_activation_restores_lifo() {
        let mut shards = ShardContext::new();

        let outer = shards.activate([(DEFAULT_GROUP, "hewey")]);
        assert_eq!(shards.current_shard(DEFAULT_GROUP).unwrap(), "hewey");

        let inner = shards.activate([(DEFAULT_GROUP, "dewey"), ("city", "austin")]);
        assert_eq!(shards.current_shard(DEFAULT_GROUP).unwrap(), "dewey");
        assert_eq!(shards.current_shard("city").unwrap(), "austin");

        shards.restore(inner);
        assert_eq!(shards.current_shard(DEFAULT_GROUP).unwrap(), "hewey");
        // city was never set before the inner activation
        assert!(shards.current_shard("city").is_err());

        shards.restore(outer);
        assert!(shards.is_empty());
    }

    #[test]
    fn test_deactivate_fire_and_forget() {
        let mut shards = ShardContext::new();
        let _ = shards.activate([("city", "austin"), ("region", "south")]);

        shards.deactivate(["city"]);
        assert!(shards.current_shard("city").is_err());
        assert_eq!(shards.current_shard("region").unwrap(), "south");

        // unknown groups are ignored
        shards.deactivate(["nope"]);
        assert_eq!(shards.active_shards().len(), 1);
    }
}
