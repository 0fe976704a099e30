//! Fixed-layout binary record encoding.
//!
//! Records are sequences of little-endian 64-bit fields written in a fixed
//! declared order. Timestamps are stored as microseconds since the Unix
//! epoch, which spans every instant `chrono` can represent.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};

/// Width of every encoded field.
pub const FIELD_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ends before the field does.
    BufferTooSmall { needed: usize, available: usize },
    /// The stored value is outside the range `chrono` can represent.
    TimestampOutOfRange(i64),
}

impl std::error::Error for CodecError {}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {needed} bytes, have {available}")
            }
            CodecError::TimestampOutOfRange(micros) => {
                write!(f, "timestamp out of range: {micros}")
            }
        }
    }
}

/// Drops sub-microsecond precision so the instant survives a round trip.
pub fn truncate_timestamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// Sequential writer over a caller-owned buffer.
///
/// Bytes past the last written field are left untouched.
pub struct RecordWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> RecordWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn put_i64(&mut self, value: i64) -> Result<(), CodecError> {
        let end = self.pos + FIELD_SIZE;
        let available = self.buf.len();
        let field = self
            .buf
            .get_mut(self.pos..end)
            .ok_or(CodecError::BufferTooSmall {
                needed: end,
                available,
            })?;
        field.copy_from_slice(&value.to_le_bytes());
        self.pos = end;
        Ok(())
    }

    pub fn put_timestamp(&mut self, at: DateTime<Utc>) -> Result<(), CodecError> {
        self.put_i64(at.timestamp_micros())
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Sequential reader, the mirror of [`RecordWriter`].
pub struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn get_i64(&mut self) -> Result<i64, CodecError> {
        let end = self.pos + FIELD_SIZE;
        let bytes: [u8; FIELD_SIZE] = self
            .buf
            .get(self.pos..end)
            .and_then(|field| field.try_into().ok())
            .ok_or(CodecError::BufferTooSmall {
                needed: end,
                available: self.buf.len(),
            })?;
        self.pos = end;
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn get_timestamp(&mut self) -> Result<DateTime<Utc>, CodecError> {
        let micros = self.get_i64()?;
        DateTime::from_timestamp_micros(micros).ok_or(CodecError::TimestampOutOfRange(micros))
    }
}

/// A record with a fixed field layout.
///
/// Implementors list their fields once for writing and once for reading, in
/// the same order; `encode_into` and `decode` are derived from that.
pub trait FixedRecord: Sized {
    /// Bytes occupied by the encoded fields.
    const ENCODED_LEN: usize;

    fn write_fields(&self, writer: &mut RecordWriter<'_>) -> Result<(), CodecError>;

    fn read_fields(reader: &mut RecordReader<'_>) -> Result<Self, CodecError>;

    /// Writes the fields at the start of `buf`. Any trailing bytes are padding
    /// and are not touched.
    fn encode_into(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        let mut writer = RecordWriter::new(buf);
        self.write_fields(&mut writer)
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = RecordReader::new(buf);
        Self::read_fields(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fields_are_little_endian_in_order() {
        let mut buf = [0u8; 16];
        let mut writer = RecordWriter::new(&mut buf);
        writer.put_i64(1).unwrap();
        writer.put_i64(-1).unwrap();
        assert_eq!(writer.position(), 16);

        assert_eq!(buf[0], 1);
        assert!(buf[1..8].iter().all(|b| *b == 0));
        assert!(buf[8..16].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn test_writer_rejects_short_buffer() {
        let mut buf = [0u8; 12];
        let mut writer = RecordWriter::new(&mut buf);
        writer.put_i64(7).unwrap();
        assert_eq!(
            writer.put_i64(8),
            Err(CodecError::BufferTooSmall {
                needed: 16,
                available: 12
            })
        );
    }

    #[test]
    fn test_reader_rejects_short_buffer() {
        let buf = [0u8; 7];
        let mut reader = RecordReader::new(&buf);
        assert!(matches!(
            reader.get_i64(),
            Err(CodecError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_writer_leaves_padding_untouched() {
        let mut buf = [0xAAu8; 32];
        RecordWriter::new(&mut buf).put_i64(0).unwrap();
        assert!(buf[8..].iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn test_timestamp_out_of_range() {
        let buf = i64::MAX.to_le_bytes();
        let mut reader = RecordReader::new(&buf);
        assert_eq!(
            reader.get_timestamp(),
            Err(CodecError::TimestampOutOfRange(i64::MAX))
        );
    }

    #[test]
    fn test_timestamp_edges_round_trip() {
        for at in [
            DateTime::<Utc>::MIN_UTC,
            DateTime::<Utc>::MAX_UTC,
            DateTime::from_timestamp(0, 0).unwrap(),
        ] {
            let at = truncate_timestamp(at);
            let mut buf = [0u8; FIELD_SIZE];
            RecordWriter::new(&mut buf).put_timestamp(at).unwrap();
            assert_eq!(RecordReader::new(&buf).get_timestamp().unwrap(), at);
        }
    }

    proptest! {
        #[test]
        fn i64_fields_round_trip(a in any::<i64>(), b in any::<i64>()) {
            let mut buf = [0u8; 2 * FIELD_SIZE];
            let mut writer = RecordWriter::new(&mut buf);
            writer.put_i64(a).unwrap();
            writer.put_i64(b).unwrap();

            let mut reader = RecordReader::new(&buf);
            prop_assert_eq!(reader.get_i64().unwrap(), a);
            prop_assert_eq!(reader.get_i64().unwrap(), b);
        }

        #[test]
        fn timestamps_round_trip(
            micros in DateTime::<Utc>::MIN_UTC.timestamp_micros()..=DateTime::<Utc>::MAX_UTC.timestamp_micros()
        ) {
            let at = DateTime::from_timestamp_micros(micros).unwrap();
            let mut buf = [0u8; FIELD_SIZE];
            RecordWriter::new(&mut buf).put_timestamp(at).unwrap();
            prop_assert_eq!(RecordReader::new(&buf).get_timestamp().unwrap(), at);
        }
    }
}
