//! Platform boundaries the core talks through: a durable key-value slot and
//! an HTTP transport. Shells may provide their own implementations of both.

pub mod http;
pub mod kv;

pub use self::http::{
    HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpTransport,
    ReqwestTransport, ValidatedUrl,
};
#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteKv;
pub use self::kv::{FileKv, KeyNamespace, KvBackend, KvError, KvKey, MemoryKv, StorageErrorCode};
