use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Locale;
use crate::outbox::{OperationKind, RequestId};

const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// User-visible events from the write queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// Written offline, waiting for connectivity.
    Enqueued { operation: OperationKind, id: RequestId },
    ConnectionRestored { pending: usize },
    ConnectionLost,
    SyncStarted { pending: usize },
    Synced { operation: OperationKind, id: RequestId },
    /// Replay failed and the entry went back to the tail.
    RetryScheduled {
        operation: OperationKind,
        id: RequestId,
        attempt: u32,
        max: u32,
        message: String,
    },
    /// Terminal: the entry was evicted after its last allowed attempt.
    SyncFailed {
        operation: OperationKind,
        id: RequestId,
        message: String,
    },
    AllSynchronized,
    NothingToSync,
    AwaitingSync { count: usize },
    /// Pending requests were discarded without being sent.
    QueueCleared { removed: usize },
}

impl Notification {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Synced { .. } | Self::AllSynchronized | Self::ConnectionRestored { .. } => {
                Severity::Success
            }
            Self::RetryScheduled { .. }
            | Self::ConnectionLost
            | Self::Enqueued { .. }
            | Self::QueueCleared { .. } => Severity::Warning,
            Self::SyncFailed { .. } => Severity::Error,
            Self::SyncStarted { .. } | Self::NothingToSync | Self::AwaitingSync { .. } => {
                Severity::Info
            }
        }
    }

    pub fn message(&self, locale: Locale) -> String {
        match locale {
            Locale::PtBr => self.message_pt_br(),
            Locale::En => self.message_en(),
        }
    }

    fn message_pt_br(&self) -> String {
        match self {
            Self::Enqueued { operation, .. } => {
                let what = match operation {
                    OperationKind::CreateHive => "Colmeia adicionada offline",
                    OperationKind::UpdateHive => "Alteração da colmeia salva offline",
                    OperationKind::DeleteHive => "Remoção da colmeia salva offline",
                };
                format!("{what}. Será sincronizada quando a conexão for restabelecida.")
            }
            Self::ConnectionRestored { pending: 0 } => "Conexão restaurada!".to_string(),
            Self::ConnectionRestored { .. } => {
                "Conexão restaurada! Iniciando sincronização...".to_string()
            }
            Self::ConnectionLost => "Conexão perdida. As colmeias serão sincronizadas quando a conexão for restabelecida.".to_string(),
            Self::SyncStarted { pending } => {
                format!("Sincronizando {pending} colmeia(s) pendente(s)...")
            }
            Self::Synced { operation, .. } => match operation {
                OperationKind::CreateHive => "Colmeia sincronizada com sucesso!",
                OperationKind::UpdateHive => "Colmeia atualizada com sucesso!",
                OperationKind::DeleteHive => "Colmeia removida com sucesso!",
            }
            .to_string(),
            Self::RetryScheduled {
                attempt,
                max,
                message,
                ..
            } => format!(
                "Falha ao sincronizar ({attempt}/{max}): {message}. Nova tentativa na próxima sincronização."
            ),
            Self::SyncFailed {
                operation, message, ..
            } => match operation {
                OperationKind::CreateHive => format!("Falha ao sincronizar colmeia: {message}"),
                OperationKind::UpdateHive => format!("Falha ao atualizar colmeia: {message}"),
                OperationKind::DeleteHive => format!("Falha ao remover colmeia: {message}"),
            },
            Self::AllSynchronized => "Todas as colmeias foram sincronizadas!".to_string(),
            Self::NothingToSync => "Nenhuma colmeia pendente para sincronizar.".to_string(),
            Self::AwaitingSync { count } => {
                format!("{count} colmeia(s) aguardando sincronização.")
            }
            Self::QueueCleared { removed } => {
                format!("{removed} alteração(ões) pendente(s) descartada(s).")
            }
        }
    }

    fn message_en(&self) -> String {
        match self {
            Self::Enqueued { operation, .. } => {
                let what = match operation {
                    OperationKind::CreateHive => "Hive added offline",
                    OperationKind::UpdateHive => "Hive change saved offline",
                    OperationKind::DeleteHive => "Hive removal saved offline",
                };
                format!("{what}. It will be synchronized when the connection is back.")
            }
            Self::ConnectionRestored { pending: 0 } => "Connection restored!".to_string(),
            Self::ConnectionRestored { .. } => {
                "Connection restored! Starting synchronization...".to_string()
            }
            Self::ConnectionLost => {
                "Connection lost. Hives will be synchronized when the connection is back."
                    .to_string()
            }
            Self::SyncStarted { pending } => format!("Synchronizing {pending} pending hive(s)..."),
            Self::Synced { operation, .. } => match operation {
                OperationKind::CreateHive => "Hive synchronized successfully!",
                OperationKind::UpdateHive => "Hive updated successfully!",
                OperationKind::DeleteHive => "Hive removed successfully!",
            }
            .to_string(),
            Self::RetryScheduled {
                attempt,
                max,
                message,
                ..
            } => format!("Sync failed ({attempt}/{max}): {message}. Retrying on the next sync."),
            Self::SyncFailed {
                operation, message, ..
            } => match operation {
                OperationKind::CreateHive => format!("Failed to synchronize hive: {message}"),
                OperationKind::UpdateHive => format!("Failed to update hive: {message}"),
                OperationKind::DeleteHive => format!("Failed to remove hive: {message}"),
            },
            Self::AllSynchronized => "All hives are synchronized!".to_string(),
            Self::NothingToSync => "No pending hives to synchronize.".to_string(),
            Self::AwaitingSync { count } => format!("{count} hive(s) awaiting synchronization."),
            Self::QueueCleared { removed } => format!("Discarded {removed} pending change(s)."),
        }
    }
}

/// Fan-out of [`Notification`]s. Emitting with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::with_capacity(NOTIFICATION_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Returns how many subscribers received it.
    pub fn emit(&self, notification: Notification) -> usize {
        debug!(?notification, "notify");
        self.tx.send(notification).unwrap_or(0)
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
