//! Stateless signed session tokens.
//!
//! A token is the standard base64 encoding of 48 bytes:
//!
//! ```text
//! | id: i64 LE | expires_at: i64 LE micros | HMAC-SHA256 over the first 16 bytes |
//! ```
//!
//! Nothing is stored server-side, so there is nothing to revoke. The signing
//! key lives only in memory; a new process invalidates every earlier token.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Duration;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::service::SessionService;
use super::{IdCounter, RejectReason, SignedClaims, expiry_after, rejected};
use crate::codec::FixedRecord;
use crate::{AuthError, Clock, SecretBytes, SecretString, SessionConfig, SystemClock};

type HmacSha256 = Hmac<Sha256>;

const BACKEND: &str = "signed";
const DATA_SIZE: usize = SignedClaims::ENCODED_LEN;
const MAC_SIZE: usize = 32;
const TOKEN_SIZE: usize = DATA_SIZE + MAC_SIZE;
const GENERATED_KEY_LENGTH: usize = 64;

/// Issues self-describing tokens whose integrity is checked with HMAC-SHA256.
///
/// The keyed MAC is kept as a template and cloned for every computation, so
/// concurrent callers never share hashing state.
///
/// # Example
///
/// ```rust
/// use session_tokens::{SecretString, SessionService, SignedTokenService};
///
/// let service = SignedTokenService::new();
/// let token = service.authenticate("alice", &SecretString::new("pw1")).unwrap();
/// assert_eq!(service.validate_token(token.expose_secret()).unwrap().as_deref(), Some("1"));
/// ```
pub struct SignedTokenService {
    mac: HmacSha256,
    ids: IdCounter,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl SignedTokenService {
    /// Creates a service with default settings and a freshly generated key.
    pub fn new() -> Self {
        let key = SecretBytes::generate(GENERATED_KEY_LENGTH);
        Self::from_parts(&key, SessionConfig::default().session_lifetime)
    }

    /// Creates a service from a validated configuration.
    ///
    /// Uses `config.secret_key` when present, otherwise generates a key.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ConfigurationError` if the configuration is invalid.
    pub fn with_config(config: SessionConfig) -> Result<Self, AuthError> {
        config.validate()?;
        let key = match &config.secret_key {
            Some(secret) => SecretBytes::from(secret),
            None => SecretBytes::generate(GENERATED_KEY_LENGTH),
        };
        Ok(Self::from_parts(&key, config.session_lifetime))
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Number of tokens issued so far.
    pub fn issued(&self) -> i64 {
        self.ids.issued()
    }

    fn from_parts(key: &SecretBytes, lifetime: Duration) -> Self {
        log::debug!(target: "session_tokens", "msg=\"signing key ready\" backend={BACKEND} key_len={}", key.len());
        Self {
            mac: keyed_mac(key.expose_secret()),
            ids: IdCounter::default(),
            lifetime,
            clock: Arc::new(SystemClock),
        }
    }

    /// A fresh MAC instance that has absorbed `data`.
    fn mac_over(&self, data: &[u8]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac
    }
}

impl Default for SignedTokenService {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionService for SignedTokenService {
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "signed_authenticate", skip_all, err)
    )]
    fn authenticate(
        &self,
        _username: &str,
        _password: &SecretString,
    ) -> Result<SecretString, AuthError> {
        let expires_at = expiry_after(self.clock.now(), self.lifetime)?;
        let claims = SignedClaims {
            id: self.ids.next(),
            expires_at,
        };

        let mut record = [0u8; TOKEN_SIZE];
        let (data, tag) = record.split_at_mut(DATA_SIZE);
        claims.encode_into(data)?;
        tag.copy_from_slice(&self.mac_over(data).finalize().into_bytes());

        Ok(SecretString::new(STANDARD.encode(record)))
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "signed_validate_token", skip_all, err)
    )]
    fn validate_token(&self, token: &str) -> Result<Option<String>, AuthError> {
        let Ok(record) = STANDARD.decode(token) else {
            return Ok(rejected(BACKEND, RejectReason::Malformed));
        };
        if record.len() != TOKEN_SIZE {
            return Ok(rejected(BACKEND, RejectReason::Malformed));
        }

        let (data, tag) = record.split_at(DATA_SIZE);
        // verify_slice compares in constant time
        if self.mac_over(data).verify_slice(tag).is_err() {
            return Ok(rejected(BACKEND, RejectReason::Tampered));
        }

        let Ok(claims) = SignedClaims::decode(data) else {
            return Ok(rejected(BACKEND, RejectReason::Malformed));
        };
        if claims.is_expired_at(self.clock.now()) {
            return Ok(rejected(BACKEND, RejectReason::Expired));
        }

        Ok(Some(claims.id.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

/// Builds the keyed HMAC template.
///
/// # Panics
///
/// This function cannot panic as HMAC accepts keys of any size.
#[allow(clippy::expect_used)]
fn keyed_mac(key: &[u8]) -> HmacSha256 {
    // SAFETY: HmacSha256::new_from_slice only fails if the key is invalid,
    // but HMAC-SHA256 accepts keys of any length, so this cannot fail.
    HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any size")
}
