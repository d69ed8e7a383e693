// In-memory physical connections for unit tests: counts opens, records every
// forwarded statement, and fails on demand

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ConnectionParams;
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::{Connector, Operation, OperationOutput, PhysicalConnection};

#[derive(Debug, Default)]
struct MockState {
    opened: Vec<String>,
    executed: Vec<(String, u64, String)>,
    transient_failures: HashMap<String, usize>,
    fatal_failures: HashMap<String, usize>,
}

impl MockState {
    fn take_failure(&mut self, name: &str) -> Option<AppError> {
        if let Some(left) = self.transient_failures.get_mut(name).filter(|n| **n > 0) {
            *left -= 1;
            return Some(AppError::TransientConnectionFailure {
                connection: name.to_string(),
                message: "server has gone away".to_string(),
            });
        }
        if let Some(left) = self.fatal_failures.get_mut(name).filter(|n| **n > 0) {
            *left -= 1;
            return Some(AppError::DatabaseError(format!(
                "MySQL server has gone away on {}",
                name
            )));
        }
        None
    }
}

pub struct MockConnection {
    name: String,
    id: u64,
    open: AtomicBool,
    alive: AtomicBool,
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new(name: &str, id: u64) -> Arc<Self> {
        Self::with_state(name, id, Arc::default())
    }

    fn with_state(name: &str, id: u64, state: Arc<Mutex<MockState>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            id,
            open: AtomicBool::new(true),
            alive: AtomicBool::new(true),
            state,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Make the liveness probe fail while the handle still looks open
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn run(&self, operation: &Operation) -> AppResult<OperationOutput> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure(&self.name) {
            return Err(err);
        }
        state
            .executed
            .push((self.name.clone(), self.id, operation.sql().to_string()));
        Ok(match operation {
            Operation::Execute(_) => OperationOutput::RowsAffected(1),
            Operation::Query(_) => {
                let mut row = HashMap::new();
                row.insert("connection".to_string(), self.name.clone());
                row.insert("handle".to_string(), self.id.to_string());
                OperationOutput::Rows(vec![row])
            }
        })
    }
}

#[async_trait]
impl PhysicalConnection for MockConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn verify(&self, _timeout: Duration) -> bool {
        self.is_open() && self.alive.load(Ordering::SeqCst)
    }

    async fn execute(&self, operation: &Operation) -> AppResult<OperationOutput> {
        self.run(operation)
    }

    async fn execute_in_transaction(
        &self,
        operations: &[Operation],
    ) -> AppResult<Vec<OperationOutput>> {
        operations.iter().map(|op| self.run(op)).collect()
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    next_id: AtomicU64,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    gone_away_is_transient: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat driver errors mentioning "gone away" as connection loss
    pub fn classify_gone_away() -> Self {
        Self {
            gone_away_is_transient: true,
            ..Self::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opened.len()
    }

    pub fn opened_names(&self) -> Vec<String> {
        self.state.lock().unwrap().opened.clone()
    }

    /// (connection name, handle id, sql) for every successful statement
    pub fn executed(&self) -> Vec<(String, u64, String)> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn fail_transiently(&self, name: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .transient_failures
            .insert(name.to_string(), times);
    }

    pub fn fail_fatally(&self, name: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .fatal_failures
            .insert(name.to_string(), times);
    }

    pub fn connection(&self, id: u64) -> Arc<MockConnection> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .expect("no mock connection with that id")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &self,
        name: &str,
        _params: &ConnectionParams,
    ) -> AppResult<Arc<dyn PhysicalConnection>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.lock().unwrap().opened.push(name.to_string());
        let connection = MockConnection::with_state(name, id, Arc::clone(&self.state));
        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection)
    }

    fn is_transient(&self, error: &AppError) -> bool {
        match error {
            AppError::TransientConnectionFailure { .. } => true,
            AppError::DatabaseError(msg) => self.gone_away_is_transient && msg.contains("gone away"),
            _ => false,
        }
    }
}
