//! The contract every session backend satisfies.

use crate::{AuthError, SecretString};

/// Issues and validates session tokens.
///
/// Implementations:
/// - [`SignedTokenService`](super::SignedTokenService): stateless HMAC-signed tokens
/// - [`FileSessionStore`](super::FileSessionStore): fixed-size slots in a backing file
/// - [`MemorySessionStore`](super::MemorySessionStore): concurrent in-memory map
///
/// A token that is malformed, forged, expired or unknown yields `Ok(None)`;
/// callers cannot tell these cases apart. `Err` is reserved for
/// infrastructure failures such as a failed disk write.
pub trait SessionService: Send + Sync {
    /// Starts a session and returns its token.
    ///
    /// Credentials are not checked; every call opens a new session.
    fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<SecretString, AuthError>;

    /// Returns the user id behind `token`, or `None` if it must not be trusted.
    fn validate_token(&self, token: &str) -> Result<Option<String>, AuthError>;

    /// Short name used in logs and reports.
    fn backend_name(&self) -> &'static str;
}
