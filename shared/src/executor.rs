//! Performs one remote operation per queued request and normalises the
//! service's wire records into [`Hive`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::capabilities::http::{
    HttpError, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ValidatedUrl,
};
use crate::config::ServiceConfig;
use crate::error::{translate_error, translate_http_status, ErrorCategory, Locale};
use crate::model::{Hive, HiveId, HiveStatus, Species, UpdateHivePayload};
use crate::outbox::HiveOperation;

const HIVES_PATH: &str = "hives";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("network error: {message}")]
    Transport { message: String },

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {reason}")]
    Malformed { reason: String },
}

impl ExecutorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => ErrorCategory::Transport,
            Self::Rejected { .. } => ErrorCategory::Rejected,
            Self::Malformed { .. } => ErrorCategory::Malformed,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn user_message(&self, locale: Locale) -> String {
        match (self, locale) {
            (Self::Rejected { status, message }, _) => {
                translate_error(Some(message.as_str()), Some(*status), locale)
            }
            (Self::Transport { .. }, Locale::PtBr) => {
                "não foi possível conectar ao servidor.".to_string()
            }
            (Self::Transport { .. }, Locale::En) => "could not reach the server.".to_string(),
            (Self::Timeout { .. }, Locale::PtBr) => {
                "o servidor demorou demais para responder.".to_string()
            }
            (Self::Timeout { .. }, Locale::En) => "the server took too long to respond.".to_string(),
            (Self::Malformed { .. }, Locale::PtBr) => {
                "resposta inválida do servidor, entre em contato com o suporte.".to_string()
            }
            (Self::Malformed { .. }, Locale::En) => {
                "invalid response from server, please contact support.".to_string()
            }
        }
    }
}

impl From<HttpError> for ExecutorError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout { timeout_ms, .. } => Self::Timeout { timeout_ms },
            other => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Created(Hive),
    Updated(Hive),
    Deleted(HiveId),
}

impl ExecutionOutcome {
    pub fn hive_id(&self) -> &HiveId {
        match self {
            Self::Created(hive) | Self::Updated(hive) => &hive.id,
            Self::Deleted(id) => id,
        }
    }

    pub fn hive(&self) -> Option<&Hive> {
        match self {
            Self::Created(hive) | Self::Updated(hive) => Some(hive),
            Self::Deleted(_) => None,
        }
    }
}

/// Executes hive operations against the remote service.
///
/// Each call performs exactly one network exchange.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, operation: &HiveOperation) -> Result<ExecutionOutcome, ExecutorError>;

    async fn fetch_hives(&self) -> Result<Vec<Hive>, ExecutorError>;
}

impl std::fmt::Debug for dyn RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RequestExecutor")
    }
}

// Wire shapes

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(u64),
}

impl WireId {
    fn into_hive_id(self) -> Result<HiveId, ExecutorError> {
        match self {
            WireId::Text(s) if s.trim().is_empty() => Err(ExecutorError::Malformed {
                reason: "hive id is empty".into(),
            }),
            WireId::Text(s) => Ok(HiveId::new(s)),
            WireId::Number(n) => Ok(HiveId::new(n.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSpecies {
    id: u32,
    common_name: String,
    scientific_name: String,
}

#[derive(Debug, Deserialize)]
struct WireMeliponary {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WireHive {
    id: WireId,
    #[serde(default)]
    code: Option<u32>,
    species: WireSpecies,
    #[serde(default)]
    starting_date: Option<String>,
    status: String,
    #[serde(default)]
    meliponary: Option<WireMeliponary>,
}

impl WireHive {
    fn normalize(self) -> Result<Hive, ExecutorError> {
        Ok(Hive {
            id: self.id.into_hive_id()?,
            code: self.code,
            species: Species::new(
                self.species.id,
                self.species.common_name,
                self.species.scientific_name,
            ),
            starting_date: self.starting_date.filter(|d| !d.trim().is_empty()),
            status: HiveStatus::parse(&self.status),
            meliponary_id: self.meliponary.map(|m| m.id),
        })
    }
}

#[derive(Debug, Serialize)]
struct WireUpdateHive<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    species: Option<&'a Species>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<HiveStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    starting_date: Option<&'a str>,
}

impl<'a> From<&'a UpdateHivePayload> for WireUpdateHive<'a> {
    fn from(p: &'a UpdateHivePayload) -> Self {
        Self {
            code: p.code,
            species: p.species.as_ref(),
            status: p.status,
            starting_date: p.starting_date.as_deref(),
        }
    }
}

/// Decodes one hive record from a response body.
pub fn normalize_hive(body: &[u8]) -> Result<Hive, ExecutorError> {
    let wire: WireHive = serde_json::from_slice(body).map_err(|e| ExecutorError::Malformed {
        reason: e.to_string(),
    })?;
    wire.normalize()
}

/// Decodes a list of hive records. One bad record fails the whole list.
pub fn normalize_hive_list(body: &[u8]) -> Result<Vec<Hive>, ExecutorError> {
    let wire: Vec<WireHive> =
        serde_json::from_slice(body).map_err(|e| ExecutorError::Malformed {
            reason: e.to_string(),
        })?;
    wire.into_iter().map(WireHive::normalize).collect()
}

/// Pulls `message`, else `error`, out of an error body.
pub fn extract_error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    ["message", "error"].into_iter().find_map(|field| {
        value
            .get(field)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// [`RequestExecutor`] over an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpExecutor<T> {
    transport: T,
    base_url: ValidatedUrl,
    timeout: std::time::Duration,
    locale: Locale,
}

impl<T: HttpTransport> HttpExecutor<T> {
    pub fn new(transport: T, config: &ServiceConfig) -> Result<Self, ExecutorError> {
        let base_url = ValidatedUrl::new(config.base_url.as_str())?;
        Ok(Self {
            transport,
            base_url,
            timeout: config.request_timeout(),
            locale: config.locale,
        })
    }

    pub fn base_url(&self) -> &ValidatedUrl {
        &self.base_url
    }

    fn request(&self, method: HttpMethod, segments: &[&str]) -> Result<HttpRequest, ExecutorError> {
        let mut path = vec![HIVES_PATH];
        path.extend_from_slice(segments);
        let url = self.base_url.join_segments(&path)?;
        Ok(HttpRequest::new(method, url)
            .with_timeout(self.timeout)?
            .with_header("Accept", "application/json")?)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ExecutorError> {
        let response = self.transport.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }

        let status = response.status();
        let message = extract_error_message(response.body())
            .unwrap_or_else(|| translate_http_status(status, self.locale));
        warn!(
            status,
            request_id = response.request_id(),
            duration_ms = response.duration_ms(),
            %message,
            "remote rejected request"
        );
        Err(ExecutorError::Rejected { status, message })
    }
}

#[async_trait]
impl<T: HttpTransport> RequestExecutor for HttpExecutor<T> {
    #[instrument(skip(self, operation), fields(kind = %operation.kind()))]
    async fn execute(&self, operation: &HiveOperation) -> Result<ExecutionOutcome, ExecutorError> {
        let outcome = match operation {
            HiveOperation::CreateHive(payload) => {
                let request = self.request(HttpMethod::Post, &[])?.with_json(payload)?;
                let response = self.send(request).await?;
                ExecutionOutcome::Created(normalize_hive(response.body())?)
            }
            HiveOperation::UpdateHive { id, changes } => {
                let request = self
                    .request(HttpMethod::Put, &[id.as_str()])?
                    .with_json(&WireUpdateHive::from(changes))?;
                let response = self.send(request).await?;
                ExecutionOutcome::Updated(normalize_hive(response.body())?)
            }
            HiveOperation::DeleteHive { id } => {
                let request = self.request(HttpMethod::Delete, &[id.as_str()])?;
                self.send(request).await?;
                ExecutionOutcome::Deleted(id.clone())
            }
        };
        debug!(hive_id = %outcome.hive_id(), "operation applied remotely");
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn fetch_hives(&self) -> Result<Vec<Hive>, ExecutorError> {
        let request = self.request(HttpMethod::Get, &[])?;
        let response = self.send(request).await?;
        let hives = normalize_hive_list(response.body())?;
        debug!(count = hives.len(), "fetched hives");
        Ok(hives)
    }
}
