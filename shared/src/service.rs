use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use crate::capabilities::http::ReqwestTransport;
use crate::capabilities::kv::KvBackend;
use crate::config::{ConfigError, ServiceConfig};
use crate::connectivity::{ConnectivityMonitor, ListenerHandle};
use crate::dispatcher::{DispatchError, Dispatcher, DrainReport, SubmitOutcome};
use crate::error::{translate_error, Locale};
use crate::event::{Notification, Notifier};
use crate::executor::{ExecutionOutcome, ExecutorError, HttpExecutor, RequestExecutor};
use crate::model::{CreateHivePayload, Hive, HiveId, UpdateHivePayload};
use crate::offline_store::{QueueStore, StoreError};
use crate::outbox::{HiveOperation, OutboxError, QueuedRequest};
use crate::status::{QueueStatus, StatusReporter};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("failed to build http client: {0}")]
    HttpClient(String),
}

/// What the UI gets back from a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok(id: Option<String>) -> Self {
        Self {
            success: true,
            id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(error.into()),
        }
    }
}

/// Hive operations for the UI, composed from the queue components.
///
/// Build one per process. Dropping it stops the connectivity listener.
#[derive(Debug)]
pub struct HiveService {
    config: ServiceConfig,
    dispatcher: Dispatcher,
    executor: Arc<dyn RequestExecutor>,
    listener: Option<ListenerHandle>,
}

impl HiveService {
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: ServiceConfig,
        backend: Arc<dyn KvBackend>,
        executor: Arc<dyn RequestExecutor>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let store = QueueStore::new(backend, &config.storage_key)?;
        let dispatcher = Dispatcher::new(
            store,
            Arc::clone(&executor),
            monitor,
            Notifier::new(),
            &config,
        );
        let listener = dispatcher.attach();
        info!(base_url = %config.base_url, online = dispatcher.is_online(), "hive service ready");

        Ok(Self {
            config,
            dispatcher,
            executor,
            listener: Some(listener),
        })
    }

    /// Wires the production HTTP executor.
    pub fn with_http(
        config: ServiceConfig,
        backend: Arc<dyn KvBackend>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::HttpClient(e.to_string()))?;
        let executor = HttpExecutor::new(ReqwestTransport::new(client), &config)?;
        Self::new(config, backend, Arc::new(executor), monitor)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        self.dispatcher.monitor()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.dispatcher.subscribe()
    }

    #[instrument(skip(self, payload))]
    pub async fn create_hive(&self, payload: CreateHivePayload) -> OperationResult {
        self.submit(HiveOperation::CreateHive(payload)).await
    }

    #[instrument(skip(self, changes), fields(hive_id = %id))]
    pub async fn update_hive(&self, id: &HiveId, changes: UpdateHivePayload) -> OperationResult {
        if let Some(invalid) = self.reject_blank_id(id) {
            return invalid;
        }
        self.submit(HiveOperation::UpdateHive {
            id: id.clone(),
            changes,
        })
        .await
    }

    #[instrument(skip(self), fields(hive_id = %id))]
    pub async fn delete_hive(&self, id: &HiveId) -> OperationResult {
        if let Some(invalid) = self.reject_blank_id(id) {
            return invalid;
        }
        self.submit(HiveOperation::DeleteHive { id: id.clone() }).await
    }

    /// Reads go straight to the service; nothing is served from the queue.
    pub async fn list_hives(&self) -> Result<Vec<Hive>, ExecutorError> {
        self.executor.fetch_hives().await
    }

    pub async fn queued_requests_count(&self) -> usize {
        self.dispatcher.queue_len().await
    }

    pub async fn queued_requests(&self) -> Vec<QueuedRequest> {
        self.dispatcher.snapshot().await
    }

    pub fn is_online(&self) -> bool {
        self.dispatcher.is_online()
    }

    pub async fn process_queue_manually(&self) -> DrainReport {
        self.dispatcher.manual_drain().await
    }

    pub async fn clear_queued_requests(&self) -> usize {
        self.dispatcher.clear().await
    }

    /// Emits and returns a summary of what is still waiting.
    pub async fn queue_status_notification(&self) -> Notification {
        let count = self.dispatcher.queue_len().await;
        let notification = if count == 0 {
            Notification::AllSynchronized
        } else {
            Notification::AwaitingSync { count }
        };
        self.dispatcher.notifier().emit(notification.clone());
        notification
    }

    pub async fn status(&self) -> QueueStatus {
        QueueStatus {
            online: self.is_online(),
            pending: self.dispatcher.queue_len().await,
        }
    }

    pub async fn spawn_status_reporter(&self) -> StatusReporter {
        StatusReporter::spawn(self.dispatcher.clone(), self.config.status_poll_interval()).await
    }

    /// Stops listening for connectivity changes.
    pub async fn shutdown(mut self) {
        if let Some(listener) = self.listener.take() {
            listener.detach().await;
        }
    }

    async fn submit(&self, operation: HiveOperation) -> OperationResult {
        match self.dispatcher.submit(operation).await {
            Ok(SubmitOutcome::Queued(request_id)) => OperationResult::ok(Some(request_id.to_string())),
            Ok(SubmitOutcome::Applied(ExecutionOutcome::Deleted(_))) => OperationResult::ok(None),
            Ok(SubmitOutcome::Applied(outcome)) => {
                OperationResult::ok(Some(outcome.hive_id().to_string()))
            }
            Err(DispatchError::Executor(e)) => {
                OperationResult::failed(e.user_message(self.config.locale))
            }
            Err(DispatchError::Queue(OutboxError::QueueFull { max })) => {
                OperationResult::failed(match self.config.locale {
                    Locale::PtBr => format!(
                        "Limite de {max} alterações pendentes atingido. Conecte-se para sincronizar."
                    ),
                    Locale::En => {
                        format!("Limit of {max} pending changes reached. Connect to synchronize.")
                    }
                })
            }
            Err(DispatchError::Queue(e)) => {
                error!(error = %e, "could not queue request");
                OperationResult::failed(translate_error(None, None, self.config.locale))
            }
        }
    }

    fn reject_blank_id(&self, id: &HiveId) -> Option<OperationResult> {
        id.as_str().trim().is_empty().then(|| {
            OperationResult::failed(match self.config.locale {
                Locale::PtBr => "id da colmeia é obrigatório.",
                Locale::En => "hive id is required.",
            })
        })
    }
}
