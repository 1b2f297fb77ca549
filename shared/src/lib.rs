// lib.rs - offline-resilient hive write queue

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod capabilities;
pub mod config;
pub mod connectivity;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod executor;
pub mod model;
pub mod offline_store;
pub mod outbox;
pub mod service;
pub mod status;

pub use config::{ApiEndpoint, ConfigError, ServiceConfig};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, ListenerHandle};
pub use dispatcher::{
    DispatchError, Dispatcher, DispatcherState, DrainReport, DrainStop, SubmitOutcome,
};
pub use error::{translate_error, translate_http_status, ErrorCategory, Locale};
pub use event::{Notification, Notifier, Severity};
pub use executor::{ExecutionOutcome, ExecutorError, HttpExecutor, RequestExecutor};
pub use model::{
    CreateHivePayload, Hive, HiveId, HiveStatus, Species, UnixTimeMs, UpdateHivePayload,
};
pub use offline_store::{QueueStore, StoreError};
pub use outbox::{HiveOperation, OperationKind, QueuedRequest, RequestId, RequestQueue};
pub use service::{HiveService, OperationResult, ServiceError};
pub use status::{derive_status, QueueStatus, StatusIcon, StatusReporter};
