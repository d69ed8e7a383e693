use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::infrastructure::database::PhysicalConnection;

/// Connection name -> physical connection, for one execution context only.
///
/// Stores are last-write-wins: a second `store` under the same name replaces
/// the first handle without closing it. Nothing guards against two proxies
/// racing to open the same name; the loser's handle is simply dropped.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Arc<dyn PhysicalConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn PhysicalConnection>> {
        self.connections.get(name).cloned()
    }

    pub fn store(
        &mut self,
        name: impl Into<String>,
        handle: Arc<dyn PhysicalConnection>,
    ) -> Option<Arc<dyn PhysicalConnection>> {
        let name = name.into();
        let replaced = self.connections.insert(name.clone(), handle);
        if replaced.is_some() {
            debug!("Replaced registry entry for {}", name);
        }
        replaced
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn PhysicalConnection>> {
        self.connections.remove(name)
    }

    /// Soft reset: forget every entry without closing the connections
    pub fn clear(&mut self) {
        self.connections.clear();
    }

    /// Close every connection this context opened, then forget them
    pub async fn close_all(&mut self) {
        for (name, handle) in self.connections.drain() {
            debug!("Closing registry entry {}", name);
            handle.close().await;
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock_database::MockConnection;

    #[test]
    fn test_store_and_lookup() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.lookup("prod_alpha").is_none());

        let first = MockConnection::new("prod_alpha", 1);
        assert!(registry.store("prod_alpha", first.clone()).is_none());
        let found = registry.lookup("prod_alpha").unwrap();
        assert!(Arc::ptr_eq(&(first.clone() as Arc<dyn PhysicalConnection>), &found));

        // last write wins, the replaced handle is not closed
        let second = MockConnection::new("prod_alpha", 2);
        let replaced = registry.store("prod_alpha", second.clone()).unwrap();
        assert!(replaced.is_open());
        assert_eq!(registry.len(), 1);
        let found = registry.lookup("prod_alpha").unwrap();
        assert!(Arc::ptr_eq(&(second as Arc<dyn PhysicalConnection>), &found));
    }

    #[tokio::test]
    async fn test_clear_is_soft_and_close_all_closes() {
        let mut registry = ConnectionRegistry::new();
        let alpha = MockConnection::new("prod_alpha", 1);
        let beta = MockConnection::new("prod_beta", 2);
        registry.store("prod_alpha", alpha.clone());
        registry.store("prod_beta", beta.clone());
        assert_eq!(registry.names(), vec!["prod_alpha", "prod_beta"]);

        registry.clear();
        assert!(registry.is_empty());
        assert!(alpha.is_open());

        registry.store("prod_alpha", alpha.clone());
        registry.close_all().await;
        assert!(registry.is_empty());
        assert!(!alpha.is_open());
        assert!(beta.is_open());
    }
}
