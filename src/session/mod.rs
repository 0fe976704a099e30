mod file_store;
mod memory_store;
mod service;
mod signed;

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};

use crate::AuthError;
use crate::codec::{
    CodecError, FIELD_SIZE, FixedRecord, RecordReader, RecordWriter, truncate_timestamp,
};
pub use file_store::FileSessionStore;
pub use memory_store::MemorySessionStore;
pub use service::SessionService;
pub use signed::SignedTokenService;

/// The claims carried inside a signed token: 16 bytes once encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedClaims {
    pub id: i64,
    pub expires_at: DateTime<Utc>,
}

impl SignedClaims {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl FixedRecord for SignedClaims {
    const ENCODED_LEN: usize = 2 * FIELD_SIZE;

    fn write_fields(&self, writer: &mut RecordWriter<'_>) -> Result<(), CodecError> {
        writer.put_i64(self.id)?;
        writer.put_timestamp(self.expires_at)
    }

    fn read_fields(reader: &mut RecordReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.get_i64()?,
            expires_at: reader.get_timestamp()?,
        })
    }
}

/// A server-side session record: 24 bytes once encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRecord {
    pub key: i64,
    pub id: i64,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl FixedRecord for SessionRecord {
    const ENCODED_LEN: usize = 3 * FIELD_SIZE;

    fn write_fields(&self, writer: &mut RecordWriter<'_>) -> Result<(), CodecError> {
        writer.put_i64(self.key)?;
        writer.put_i64(self.id)?;
        writer.put_timestamp(self.expires_at)
    }

    fn read_fields(reader: &mut RecordReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            key: reader.get_i64()?,
            id: reader.get_i64()?,
            expires_at: reader.get_timestamp()?,
        })
    }
}

/// Per-instance session id allocator. The first id handed out is 1.
#[derive(Debug, Default)]
pub(crate) struct IdCounter(AtomicI64);

impl IdCounter {
    pub(crate) fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of ids handed out so far.
    pub(crate) fn issued(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Expiration of a session issued at `now`, at the codec's precision.
///
/// A lifetime that runs past the calendar chrono can represent is a
/// configuration error, never a panic.
pub(crate) fn expiry_after(
    now: DateTime<Utc>,
    lifetime: Duration,
) -> Result<DateTime<Utc>, AuthError> {
    now.checked_add_signed(lifetime)
        .map(truncate_timestamp)
        .ok_or_else(|| {
            AuthError::ConfigurationError(format!(
                "session_lifetime of {lifetime} overflows the clock"
            ))
        })
}

/// Why a token was turned away. Only ever logged, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RejectReason {
    Malformed,
    Tampered,
    KeyMismatch,
    OutOfRange,
    Unknown,
    Expired,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RejectReason::Malformed => "malformed",
            RejectReason::Tampered => "tampered",
            RejectReason::KeyMismatch => "key_mismatch",
            RejectReason::OutOfRange => "out_of_range",
            RejectReason::Unknown => "unknown",
            RejectReason::Expired => "expired",
        };
        f.write_str(reason)
    }
}

/// Logs the rejection server-side and yields the caller-facing outcome.
pub(crate) fn rejected(backend: &'static str, reason: RejectReason) -> Option<String> {
    match reason {
        RejectReason::Tampered | RejectReason::KeyMismatch => {
            log::warn!(target: "session_tokens", "msg=\"token rejected\" backend={backend} reason={reason}");
        }
        _ => {
            log::debug!(target: "session_tokens", "msg=\"token rejected\" backend={backend} reason={reason}");
        }
    }
    None
}
