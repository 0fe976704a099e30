//! File-backed session storage.
//!
//! Every session owns one fixed-size slot in a single backing file. The slot
//! for session `id` starts at byte `id * record_size`, so validation is one
//! positioned read.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use rand::Rng;
use rand::rngs::OsRng;
use tempfile::NamedTempFile;

use super::service::SessionService;
use super::{IdCounter, RejectReason, SessionRecord, expiry_after, rejected};
use crate::codec::FixedRecord;
use crate::{AuthError, Clock, SecretString, SessionConfig, SystemClock};

const BACKEND: &str = "file";
const SEPARATOR: char = '*';

/// File-based session storage.
///
/// Tokens have the form `{id}*{key}` where `key` is a random `i64` stored in
/// the slot. Keys are not checked for uniqueness across sessions: a key is
/// only ever compared against the slot its id points at.
///
/// The backing file is created with a unique name when the store is built
/// and removed by [`close`](Self::close), or when the store is dropped.
///
/// # Example
///
/// ```rust
/// use session_tokens::{FileSessionStore, SecretString, SessionService};
///
/// let store = FileSessionStore::new()?;
/// let token = store.authenticate("alice", &SecretString::new("pw1"))?;
/// assert_eq!(store.validate_token(token.expose_secret())?.as_deref(), Some("1"));
/// store.close()?;
/// # Ok::<(), session_tokens::AuthError>(())
/// ```
pub struct FileSessionStore {
    slots: SlotFile,
    ids: IdCounter,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl FileSessionStore {
    /// Creates a store in the system temp directory with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be created.
    pub fn new() -> Result<Self, AuthError> {
        Self::with_config(SessionConfig::default())
    }

    /// Creates a store from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ConfigurationError` for an invalid configuration
    /// and `AuthError::StorageError` if the backing file cannot be created.
    pub fn with_config(config: SessionConfig) -> Result<Self, AuthError> {
        config.validate()?;
        let slots = SlotFile::create(
            config.directory.as_deref(),
            config.record_size,
            config.durable_writes,
        )?;

        log::info!(
            target: "session_tokens",
            "msg=\"session store created\" backend={BACKEND} path=\"{}\" record_size={}",
            slots.path.display(),
            config.record_size
        );

        Ok(Self {
            slots,
            ids: IdCounter::default(),
            lifetime: config.session_lifetime,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.slots.path
    }

    /// Number of slots the backing file currently spans, including slot 0
    /// and any gaps left by concurrent writers.
    ///
    /// # Errors
    ///
    /// Returns an error if the file length cannot be read.
    pub fn slot_count(&self) -> Result<u64, AuthError> {
        Ok(self.slots.len()? / self.slots.record_size)
    }

    /// Deletes the backing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn close(self) -> Result<(), AuthError> {
        let path = self.slots.path.clone();
        self.slots.close()?;
        log::info!(
            target: "session_tokens",
            "msg=\"session store deleted\" backend={BACKEND} path=\"{}\"",
            path.display()
        );
        Ok(())
    }
}

impl SessionService for FileSessionStore {
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "file_authenticate", skip_all, err)
    )]
    fn authenticate(
        &self,
        _username: &str,
        _password: &SecretString,
    ) -> Result<SecretString, AuthError> {
        let expires_at = expiry_after(self.clock.now(), self.lifetime)?;
        let record = SessionRecord {
            key: OsRng.r#gen(),
            id: self.ids.next(),
            expires_at,
        };
        let index = u64::try_from(record.id)
            .map_err(|_| AuthError::StorageError("Session id overflow".to_owned()))?;

        let mut slot = vec![0u8; self.slots.record_size_bytes()];
        record.encode_into(&mut slot)?;
        self.slots.write_slot(index, &slot)?;

        Ok(SecretString::new(format!(
            "{}{SEPARATOR}{}",
            record.id, record.key
        )))
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "file_validate_token", skip_all, err)
    )]
    fn validate_token(&self, token: &str) -> Result<Option<String>, AuthError> {
        let Some((id, key)) = parse_token(token) else {
            return Ok(rejected(BACKEND, RejectReason::Malformed));
        };
        let Ok(index) = u64::try_from(id) else {
            return Ok(rejected(BACKEND, RejectReason::OutOfRange));
        };

        let mut slot = vec![0u8; self.slots.record_size_bytes()];
        if !self.slots.read_slot(index, &mut slot)? {
            return Ok(rejected(BACKEND, RejectReason::OutOfRange));
        }

        let Ok(record) = SessionRecord::decode(&slot) else {
            return Ok(rejected(BACKEND, RejectReason::Unknown));
        };
        if record.key != key {
            return Ok(rejected(BACKEND, RejectReason::KeyMismatch));
        }
        if record.id != id {
            return Ok(rejected(BACKEND, RejectReason::Unknown));
        }
        if record.is_expired_at(self.clock.now()) {
            return Ok(rejected(BACKEND, RejectReason::Expired));
        }

        Ok(Some(record.id.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

/// Splits `{id}*{key}`; anything other than exactly two integers is `None`.
fn parse_token(token: &str) -> Option<(i64, i64)> {
    let (id, key) = token.split_once(SEPARATOR)?;
    if key.contains(SEPARATOR) {
        return None;
    }
    Some((id.parse().ok()?, key.parse().ok()?))
}

/// An exclusively owned file addressed in fixed-size slots.
///
/// The cursor is shared state, so every seek and the transfer that follows
/// it happen under one lock guard.
struct SlotFile {
    file: Mutex<NamedTempFile>,
    path: PathBuf,
    record_size: u64,
    durable: bool,
}

impl SlotFile {
    fn create(
        directory: Option<&Path>,
        record_size: usize,
        durable: bool,
    ) -> Result<Self, AuthError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("sessions-").suffix(".db");
        let file = match directory {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(storage_error("create_file"))?;

        let record_size = u64::try_from(record_size)
            .map_err(|_| AuthError::ConfigurationError("record_size too large".to_owned()))?;

        Ok(Self {
            path: file.path().to_path_buf(),
            file: Mutex::new(file),
            record_size,
            durable,
        })
    }

    fn record_size_bytes(&self) -> usize {
        // record_size came from a usize
        self.record_size as usize
    }

    fn lock(&self) -> Result<MutexGuard<'_, NamedTempFile>, AuthError> {
        self.file
            .lock()
            .map_err(|_| AuthError::StorageError("Lock poisoned".to_owned()))
    }

    fn len(&self) -> Result<u64, AuthError> {
        let file = self.lock()?;
        file_len(file.as_file())
    }

    /// Byte range of slot `index`, or `None` if it does not fit in a `u64`.
    fn span(&self, index: u64) -> Option<(u64, u64)> {
        let start = index.checked_mul(self.record_size)?;
        let end = start.checked_add(self.record_size)?;
        Some((start, end))
    }

    fn write_slot(&self, index: u64, record: &[u8]) -> Result<(), AuthError> {
        let (offset, _) = self
            .span(index)
            .ok_or_else(|| AuthError::StorageError(format!("Slot {index} out of range")))?;

        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(offset))
            .map_err(storage_error("seek"))?;
        file.write_all(record).map_err(storage_error("write_slot"))?;
        file.flush().map_err(storage_error("flush"))?;
        if self.durable {
            file.as_file()
                .sync_data()
                .map_err(storage_error("sync_data"))?;
        }
        Ok(())
    }

    /// Fills `buf` from slot `index`. Returns `false` if the slot lies past
    /// the end of the file.
    fn read_slot(&self, index: u64, buf: &mut [u8]) -> Result<bool, AuthError> {
        let Some((offset, end)) = self.span(index) else {
            return Ok(false);
        };

        let mut file = self.lock()?;
        if end > file_len(file.as_file())? {
            return Ok(false);
        }
        file.seek(SeekFrom::Start(offset))
            .map_err(storage_error("seek"))?;
        file.read_exact(buf).map_err(storage_error("read_slot"))?;
        Ok(true)
    }

    fn close(self) -> Result<(), AuthError> {
        let file = self
            .file
            .into_inner()
            .map_err(|_| AuthError::StorageError("Lock poisoned".to_owned()))?;
        file.close().map_err(storage_error("delete_file"))
    }
}

fn file_len(file: &File) -> Result<u64, AuthError> {
    file.metadata()
        .map(|meta| meta.len())
        .map_err(storage_error("metadata"))
}

fn storage_error(operation: &'static str) -> impl Fn(io::Error) -> AuthError {
    move |e| {
        log::error!(target: "session_tokens", "msg=\"storage error\" operation=\"{operation}\" error=\"{e}\"");
        AuthError::StorageError(format!("Failed to {operation}: {e}"))
    }
}
