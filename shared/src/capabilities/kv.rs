use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        if key.trim().is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(KvError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {} bytes", MAX_KEY_LENGTH),
            });
        }

        if key.contains("..") || key.contains('/') || key.contains('\\') {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot contain path separators or traversal sequences".to_string(),
            });
        }

        if key.chars().any(char::is_control) {
            return Err(KvError::InvalidKey {
                key: key.escape_default().to_string(),
                reason: "key contains invalid control characters".to_string(),
            });
        }

        Ok(())
    }
}

/// Prefix separating queue state from anything else a shell keeps in the
/// same store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Outbox,
}

impl KeyNamespace {
    pub fn prefix(self) -> &'static str {
        match self {
            KeyNamespace::Outbox => "outbox",
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (code: {code:?})")]
    Storage {
        code: StorageErrorCode,
        message: String,
    },
}

impl KvError {
    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for KvError {
    fn from(e: std::io::Error) -> Self {
        let code = match e.kind() {
            std::io::ErrorKind::PermissionDenied => StorageErrorCode::PermissionDenied,
            std::io::ErrorKind::WouldBlock => StorageErrorCode::Busy,
            _ => StorageErrorCode::IoError,
        };
        KvError::storage(code, e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unknown,
    Corrupted,
    DiskFull,
    PermissionDenied,
    Busy,
    Locked,
    IoError,
}

/// A durable string slot per key. Writes overwrite the previous value whole.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &KvKey) -> Result<Option<String>, KvError>;
    fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError>;
    fn delete(&self, key: &KvKey) -> Result<bool, KvError>;
}

fn check_value_size(value: &str) -> Result<(), KvError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

fn lock_poisoned() -> KvError {
    KvError::storage(StorageErrorCode::Locked, "storage lock poisoned")
}

/// Process-lifetime backend; the default for tests and for shells that
/// provide no disk.
#[derive(Debug, Default)]
pub struct MemoryKv {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryKv {
    fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        let values = self.values.lock().map_err(|_| lock_poisoned())?;
        Ok(values.get(&key.raw()).cloned())
    }

    fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
        check_value_size(value)?;
        let mut values = self.values.lock().map_err(|_| lock_poisoned())?;
        values.insert(key.raw(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
        let mut values = self.values.lock().map_err(|_| lock_poisoned())?;
        Ok(values.remove(&key.raw()).is_some())
    }
}

/// One file per key under a directory, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KvError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &KvKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.raw().replace(':', "__")))
    }
}

impl KvBackend for FileKv {
    fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
        check_value_size(value)?;
        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");

        let mut file = File::create(&tmp_path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;

        std::fs::rename(&tmp_path, &path)?;
        sync_parent(&path);

        Ok(())
    }

    fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

/// SQLite-backed key-value table.
#[cfg(not(target_arch = "wasm32"))]
pub struct SqliteKv {
    conn: Mutex<rusqlite::Connection>,
}

#[cfg(not(target_arch = "wasm32"))]
impl SqliteKv {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let conn = rusqlite::Connection::open(path).map_err(sqlite_error)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, KvError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(sqlite_error)?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, KvError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(sqlite_error)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn sqlite_error(e: rusqlite::Error) -> KvError {
    use rusqlite::ErrorCode;

    let code = match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) => StorageErrorCode::Busy,
        Some(ErrorCode::DatabaseLocked) => StorageErrorCode::Locked,
        Some(ErrorCode::DiskFull) => StorageErrorCode::DiskFull,
        Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
            StorageErrorCode::Corrupted
        }
        Some(ErrorCode::PermissionDenied) | Some(ErrorCode::ReadOnly) => {
            StorageErrorCode::PermissionDenied
        }
        Some(ErrorCode::CannotOpen) => StorageErrorCode::IoError,
        _ => StorageErrorCode::Unknown,
    };
    KvError::storage(code, e.to_string())
}

#[cfg(not(target_arch = "wasm32"))]
impl KvBackend for SqliteKv {
    fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        use rusqlite::OptionalExtension;

        let conn = self.conn.lock().map_err(|_| lock_poisoned())?;
        conn.query_row(
            "SELECT value FROM kv_entries WHERE key = ?1",
            [key.raw()],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(sqlite_error)
    }

    fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
        check_value_size(value)?;
        let updated_at = i64::try_from(crate::model::UnixTimeMs::now().0).unwrap_or(i64::MAX);
        let conn = self.conn.lock().map_err(|_| lock_poisoned())?;
        conn.execute(
            r#"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![key.raw(), value, updated_at],
        )
        .map_err(sqlite_error)?;
        Ok(())
    }

    fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned())?;
        let affected = conn
            .execute("DELETE FROM kv_entries WHERE key = ?1", [key.raw()])
            .map_err(sqlite_error)?;
        Ok(affected > 0)
    }
}
