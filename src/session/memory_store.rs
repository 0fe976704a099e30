//! In-memory session storage.
//!
//! Suitable for single-process deployments and tests.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use rand::rngs::OsRng;

use super::service::SessionService;
use super::{IdCounter, RejectReason, SessionRecord, expiry_after, rejected};
use crate::{AuthError, Clock, SecretString, SessionConfig, SystemClock};

const BACKEND: &str = "memory";

type KeySource = Box<dyn Fn() -> i64 + Send + Sync>;

/// A stored session plus the opaque payload it carries.
struct StoredSession {
    record: SessionRecord,
    #[allow(dead_code)]
    payload: Box<[u8]>,
}

/// In-memory session storage keyed by a random `i64`.
///
/// The token is the decimal key itself. Keys are unique among stored
/// sessions: a fresh key is drawn until one is free, and the claim is made
/// with an atomic insert-if-absent.
///
/// # Note
///
/// Sessions are lost when the process exits, and expired sessions are never
/// evicted. Memory grows with every session issued.
pub struct MemorySessionStore {
    sessions: DashMap<i64, StoredSession>,
    ids: IdCounter,
    lifetime: Duration,
    payload_size: usize,
    clock: Arc<dyn Clock>,
    next_key: KeySource,
}

impl MemorySessionStore {
    /// Creates an empty store with default settings.
    pub fn new() -> Self {
        let config = SessionConfig::default();
        Self {
            sessions: DashMap::new(),
            ids: IdCounter::default(),
            lifetime: config.session_lifetime,
            payload_size: config.payload_size,
            clock: Arc::new(SystemClock),
            next_key: Box::new(|| OsRng.r#gen()),
        }
    }

    /// Creates an empty store from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ConfigurationError` if the configuration is invalid.
    pub fn with_config(config: SessionConfig) -> Result<Self, AuthError> {
        config.validate()?;
        Ok(Self {
            lifetime: config.session_lifetime,
            payload_size: config.payload_size,
            ..Self::new()
        })
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replaces the random key generator.
    #[cfg(test)]
    fn with_key_source(mut self, source: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.next_key = Box::new(source);
        self
    }

    /// Returns the number of sessions currently stored.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if there are no sessions stored.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stores `record` under a key nobody holds yet and returns that key.
    fn insert_with_fresh_key(&self, mut record: SessionRecord) -> i64 {
        loop {
            record.key = (self.next_key)();
            if let Entry::Vacant(slot) = self.sessions.entry(record.key) {
                slot.insert(StoredSession {
                    record,
                    payload: vec![0u8; self.payload_size].into_boxed_slice(),
                });
                return record.key;
            }
            log::debug!(target: "session_tokens", "msg=\"session key collision\" backend={BACKEND}");
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionService for MemorySessionStore {
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "memory_authenticate", skip_all, err)
    )]
    fn authenticate(
        &self,
        _username: &str,
        _password: &SecretString,
    ) -> Result<SecretString, AuthError> {
        let expires_at = expiry_after(self.clock.now(), self.lifetime)?;
        let record = SessionRecord {
            key: 0,
            id: self.ids.next(),
            expires_at,
        };
        let key = self.insert_with_fresh_key(record);
        Ok(SecretString::new(key.to_string()))
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "memory_validate_token", skip_all, err)
    )]
    fn validate_token(&self, token: &str) -> Result<Option<String>, AuthError> {
        let Ok(key) = token.parse::<i64>() else {
            return Ok(rejected(BACKEND, RejectReason::Malformed));
        };
        let Some(record) = self.sessions.get(&key).map(|stored| stored.record) else {
            return Ok(rejected(BACKEND, RejectReason::Unknown));
        };
        if record.is_expired_at(self.clock.now()) {
            return Ok(rejected(BACKEND, RejectReason::Expired));
        }

        Ok(Some(record.id.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
