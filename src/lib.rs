//! Short-lived session tokens over three interchangeable backends.
//!
//! - [`SignedTokenService`]: stateless, HMAC-SHA256 signed tokens
//! - [`FileSessionStore`]: fixed-size slots in an exclusively owned file
//! - [`MemorySessionStore`]: records in a concurrent in-memory map
//!
//! All of them implement [`SessionService`]:
//!
//! ```rust
//! use session_tokens::{MemorySessionStore, SecretString, SessionService};
//!
//! let store = MemorySessionStore::new();
//! let token = store.authenticate("alice", &SecretString::new("pw1")).unwrap();
//! let user_id = store.validate_token(token.expose_secret()).unwrap();
//! assert_eq!(user_id.as_deref(), Some("1"));
//! ```

pub mod bench;
pub mod clock;
pub mod codec;
pub mod config;
pub mod secret;
pub mod session;

use std::fmt;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::CodecError;
pub use config::SessionConfig;
pub use secret::{SecretBytes, SecretString};
pub use session::{
    FileSessionStore, MemorySessionStore, SessionRecord, SessionService, SignedClaims,
    SignedTokenService,
};

/// Infrastructure failures.
///
/// A rejected token is not an error: `validate_token` reports it as `Ok(None)`.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    StorageError(String),
    ConfigurationError(String),
    Codec(CodecError),
}

impl std::error::Error for AuthError {}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::StorageError(msg) => write!(f, "Storage error: {msg}"),
            AuthError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
            AuthError::Codec(err) => write!(f, "Record encoding error: {err}"),
        }
    }
}

impl From<CodecError> for AuthError {
    fn from(err: CodecError) -> Self {
        AuthError::Codec(err)
    }
}
