//! Configuration shared by all session backends.
//!
//! # Example
//!
//! ```rust
//! use chrono::Duration;
//! use session_tokens::SessionConfig;
//!
//! let config = SessionConfig::default()
//!     .with_session_lifetime(Duration::minutes(5))
//!     .with_record_size(256);
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;

use chrono::Duration;

use crate::AuthError;
use crate::SecretString;

/// Three 64-bit fields: key, id, expiration.
pub const MIN_RECORD_SIZE: usize = 24;

/// Longest accepted session lifetime, in days. Keeps `now + lifetime` well
/// inside the range chrono and the record codec can represent.
pub const MAX_SESSION_LIFETIME_DAYS: i64 = 36_500;

/// Minimum length for an explicitly supplied MAC key, in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an issued token stays valid. Default: 30 minutes.
    pub session_lifetime: Duration,
    /// Size of one slot in the file backend. Default: 1024 bytes.
    pub record_size: usize,
    /// Padding kept alongside each in-memory record. Default: 1024 bytes.
    pub payload_size: usize,
    /// Directory for the file backend's backing file. `None` uses the
    /// system temp directory.
    pub directory: Option<PathBuf>,
    /// Call `sync_data` after every slot write instead of only flushing.
    pub durable_writes: bool,
    /// MAC key for the signed backend. `None` draws a random 64-byte key.
    pub secret_key: Option<SecretString>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_lifetime: Duration::minutes(30),
            record_size: 1024,
            payload_size: 1024,
            directory: None,
            durable_writes: false,
            secret_key: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn with_record_size(mut self, record_size: usize) -> Self {
        self.record_size = record_size;
        self
    }

    #[must_use]
    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    #[must_use]
    pub fn with_durable_writes(mut self, durable: bool) -> Self {
        self.durable_writes = durable;
        self
    }

    #[must_use]
    pub fn with_secret_key(mut self, secret: impl Into<SecretString>) -> Self {
        self.secret_key = Some(secret.into());
        self
    }

    /// Checks the settings every backend relies on.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ConfigurationError` describing the first bad field.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.session_lifetime <= Duration::zero() {
            return Err(AuthError::ConfigurationError(
                "session_lifetime must be positive".to_owned(),
            ));
        }
        if self.session_lifetime > Duration::days(MAX_SESSION_LIFETIME_DAYS) {
            return Err(AuthError::ConfigurationError(format!(
                "session_lifetime must be at most {MAX_SESSION_LIFETIME_DAYS} days"
            )));
        }
        if self.record_size < MIN_RECORD_SIZE {
            return Err(AuthError::ConfigurationError(format!(
                "record_size must be at least {MIN_RECORD_SIZE} bytes, got {}",
                self.record_size
            )));
        }
        if let Some(secret) = &self.secret_key {
            if secret.len() < MIN_SECRET_LENGTH {
                return Err(AuthError::ConfigurationError(format!(
                    "secret_key must be at least {MIN_SECRET_LENGTH} bytes, got {}",
                    secret.len()
                )));
            }
        }
        Ok(())
    }
}
