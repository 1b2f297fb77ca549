#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bombus_shared::capabilities::kv::{KvBackend, KvError, KvKey, StorageErrorCode};
use bombus_shared::{
    ConnectivityMonitor, Dispatcher, ExecutionOutcome, ExecutorError, Hive, HiveId,
    HiveOperation, HiveStatus, Notification, Notifier, QueueStore, RequestExecutor,
    ServiceConfig, Species,
};
use tokio::sync::{broadcast, Notify, Semaphore};

pub fn delete(id: &str) -> HiveOperation {
    HiveOperation::DeleteHive {
        id: HiveId::new(id),
    }
}

pub fn target(op: &HiveOperation) -> String {
    op.target()
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|| "new".to_string())
}

pub fn hive(id: &str) -> Hive {
    Hive {
        id: HiveId::new(id),
        code: Some(1),
        species: Species::from_catalogue(1).unwrap(),
        starting_date: None,
        status: HiveStatus::Vazia,
        meliponary_id: None,
    }
}

/// Executor whose failures are scripted per target hive id.
#[derive(Default)]
pub struct ScriptedExecutor {
    failures: Mutex<HashMap<String, u32>>,
    always_fail: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: Option<Semaphore>,
    entered: Notify,
    hives: Mutex<Vec<Hive>>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call waits for a permit from [`ScriptedExecutor::release`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub fn fail_times(&self, id: &str, times: u32) {
        self.failures.lock().unwrap().insert(id.to_string(), times);
    }

    pub fn fail_always(&self, id: &str) {
        self.always_fail.lock().unwrap().push(id.to_string());
    }

    pub fn set_hives(&self, hives: Vec<Hive>) {
        *self.hives.lock().unwrap() = hives;
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn execute(&self, operation: &HiveOperation) -> Result<ExecutionOutcome, ExecutorError> {
        let id = target(operation);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        self.calls.lock().unwrap().push(id.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted_failure = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if scripted_failure || self.always_fail.lock().unwrap().contains(&id) {
            return Err(ExecutorError::Rejected {
                status: 503,
                message: "UNAVAILABLE: serviço indisponível".into(),
            });
        }

        Ok(match operation {
            HiveOperation::CreateHive(_) => ExecutionOutcome::Created(hive("srv-1")),
            HiveOperation::UpdateHive { id, .. } => ExecutionOutcome::Updated(hive(id.as_str())),
            HiveOperation::DeleteHive { id } => ExecutionOutcome::Deleted(id.clone()),
        })
    }

    async fn fetch_hives(&self) -> Result<Vec<Hive>, ExecutorError> {
        Ok(self.hives.lock().unwrap().clone())
    }
}

/// Backend that refuses every write.
pub struct FullDisk;

impl KvBackend for FullDisk {
    fn get(&self, _key: &KvKey) -> Result<Option<String>, KvError> {
        Ok(None)
    }

    fn set(&self, _key: &KvKey, _value: &str) -> Result<(), KvError> {
        Err(KvError::storage(StorageErrorCode::DiskFull, "no space left"))
    }

    fn delete(&self, _key: &KvKey) -> Result<bool, KvError> {
        Ok(false)
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub store: QueueStore,
    pub monitor: Arc<ConnectivityMonitor>,
}

pub fn harness(executor: Arc<ScriptedExecutor>, backend: Arc<dyn KvBackend>) -> Harness {
    let config = ServiceConfig::default();
    let store = QueueStore::new(backend, &config.storage_key).unwrap();
    let monitor = Arc::new(ConnectivityMonitor::new(false));
    let dispatcher = Dispatcher::new(
        store.clone(),
        executor,
        Arc::clone(&monitor),
        Notifier::new(),
        &config,
    );
    Harness {
        dispatcher,
        store,
        monitor,
    }
}

pub fn drain_notes(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut notes = Vec::new();
    while let Ok(note) = rx.try_recv() {
        notes.push(note);
    }
    notes
}
