use std::fmt;

/// Errors raised while encoding or decoding a stream record header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CodecError {
    /// The header's `type` tag did not match any known record kind.
    UnknownRecordType(u32),
    /// A header buffer shorter than [`crate::header::HEADER_LEN`] was
    /// supplied to a decode call.
    ShortHeader {
        /// The buffer length actually supplied.
        len: usize,
    },
    /// A length or offset field would overflow if used as specified (e.g.
    /// `offset + length` wraps `u64`).
    Overflow {
        /// Which field overflowed.
        field: &'static str,
    },
    /// A string field (e.g. `toname`) did not fit in its fixed-width header
    /// slot.
    StringTooLong {
        /// The field name.
        field: &'static str,
        /// The maximum byte length the slot allows.
        max: usize,
    },
    /// A string field's fixed-width slot was not valid UTF-8 once trimmed
    /// of its null padding.
    InvalidUtf8 {
        /// The field name.
        field: &'static str,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRecordType(tag) => write!(f, "unknown record type tag {tag}"),
            Self::ShortHeader { len } => {
                write!(f, "header buffer too short: {len} bytes")
            }
            Self::Overflow { field } => write!(f, "field {field} would overflow"),
            Self::StringTooLong { field, max } => {
                write!(f, "field {field} exceeds its {max}-byte slot")
            }
            Self::InvalidUtf8 { field } => write!(f, "field {field} is not valid UTF-8"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for zdstream_core::ReplicationError {
    fn from(value: CodecError) -> Self {
        Self::InvalidRecord(value.to_string())
    }
}
