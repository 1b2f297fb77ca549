use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::error::Locale;
use crate::model::{CreateHivePayload, HiveId, UnixTimeMs, UpdateHivePayload};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Upper bound on pending requests, shared by the in-memory queue and the
/// persisted copy so that whatever is saved can be loaded back.
pub const MAX_QUEUED_REQUESTS: usize = 10_000;

/// Handle for a pending operation, assigned at enqueue time and never reused.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    const MAX_LENGTH: usize = 128;

    pub fn new(id: impl Into<String>) -> Result<Self, OutboxError> {
        let id = id.into().trim().to_string(); // Store trimmed version
        if id.is_empty() {
            return Err(OutboxError::InvalidId("RequestId cannot be empty".into()));
        }
        if id.len() > Self::MAX_LENGTH {
            return Err(OutboxError::InvalidId(format!(
                "RequestId exceeds {} characters",
                Self::MAX_LENGTH
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(OutboxError::InvalidId(
                "RequestId contains invalid characters (allowed: a-z, A-Z, 0-9, -, _)".into(),
            ));
        }
        Ok(Self(id))
    }

    pub fn generate() -> Self {
        Self(format!("req_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutboxError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("duplicate request: {0}")]
    DuplicateId(String),

    #[error("request not found: {0}")]
    NotFound(String),

    #[error("queue is full: {max} pending requests")]
    QueueFull { max: usize },
}

/// Discriminant of [`HiveOperation`], used for notifications and display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    CreateHive,
    UpdateHive,
    DeleteHive,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateHive => "CREATE_HIVE",
            Self::UpdateHive => "UPDATE_HIVE",
            Self::DeleteHive => "DELETE_HIVE",
        }
    }

    /// Short description shown next to each pending entry.
    pub fn describe(self, locale: Locale) -> &'static str {
        match (self, locale) {
            (Self::CreateHive, Locale::PtBr) => "Criar colmeia",
            (Self::UpdateHive, Locale::PtBr) => "Atualizar colmeia",
            (Self::DeleteHive, Locale::PtBr) => "Excluir colmeia",
            (Self::CreateHive, Locale::En) => "Create hive",
            (Self::UpdateHive, Locale::En) => "Update hive",
            (Self::DeleteHive, Locale::En) => "Delete hive",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write against the remote service, each variant carrying its own payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HiveOperation {
    CreateHive(CreateHivePayload),
    UpdateHive {
        id: HiveId,
        changes: UpdateHivePayload,
    },
    DeleteHive {
        id: HiveId,
    },
}

impl HiveOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            HiveOperation::CreateHive(_) => OperationKind::CreateHive,
            HiveOperation::UpdateHive { .. } => OperationKind::UpdateHive,
            HiveOperation::DeleteHive { .. } => OperationKind::DeleteHive,
        }
    }

    pub fn target(&self) -> Option<&HiveId> {
        match self {
            HiveOperation::CreateHive(_) => None,
            HiveOperation::UpdateHive { id, .. } | HiveOperation::DeleteHive { id } => Some(id),
        }
    }
}

/// A pending write persisted while offline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub id: RequestId,
    #[serde(flatten)]
    pub operation: HiveOperation,
    /// Informational only; replay order is queue position.
    pub enqueued_at: UnixTimeMs,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueuedRequest {
    pub fn new(operation: HiveOperation, max_retries: u32) -> Self {
        Self {
            id: RequestId::generate(),
            operation,
            enqueued_at: UnixTimeMs::now(),
            retry_count: 0,
            max_retries,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Counts one failed replay. Returns `true` when the entry must be evicted.
    pub fn record_failure(&mut self) -> bool {
        self.retry_count = self.retry_count.saturating_add(1).min(self.max_retries);
        self.is_exhausted()
    }

    pub fn describe(&self, locale: Locale) -> &'static str {
        self.kind().describe(locale)
    }
}

/// Ordered pending requests; position 0 drains first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestQueue {
    entries: VecDeque<QueuedRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = QueuedRequest>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_QUEUED_REQUESTS
    }

    pub fn head(&self) -> Option<&QueuedRequest> {
        self.entries.front()
    }

    pub fn get(&self, id: &RequestId) -> Option<&QueuedRequest> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<QueuedRequest> {
        self.entries.iter().cloned().collect()
    }

    pub fn push_back(&mut self, entry: QueuedRequest) -> Result<(), OutboxError> {
        if self.is_full() {
            return Err(OutboxError::QueueFull {
                max: MAX_QUEUED_REQUESTS,
            });
        }
        if self.entries.iter().any(|e| e.id == entry.id) {
            return Err(OutboxError::DuplicateId(entry.id.to_string()));
        }
        self.entries.push_back(entry);
        Ok(())
    }

    pub fn remove(&mut self, id: &RequestId) -> Option<QueuedRequest> {
        let position = self.entries.iter().position(|e| &e.id == id)?;
        self.entries.remove(position)
    }

    /// Records a failure on `id`. Exhausted entries are removed and returned as
    /// `Evicted`; the rest move to the tail.
    pub fn fail(&mut self, id: &RequestId) -> Result<FailureOutcome, OutboxError> {
        let position = self
            .entries
            .iter()
            .position(|e| &e.id == id)
            .ok_or_else(|| OutboxError::NotFound(id.to_string()))?;

        let mut entry = self
            .entries
            .remove(position)
            .ok_or_else(|| OutboxError::NotFound(id.to_string()))?;

        if entry.record_failure() {
            Ok(FailureOutcome::Evicted(entry))
        } else {
            let requeued = entry.clone();
            self.entries.push_back(entry);
            Ok(FailureOutcome::Requeued(requeued))
        }
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    Requeued(QueuedRequest),
    Evicted(QueuedRequest),
}
