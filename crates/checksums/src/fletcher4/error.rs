use std::fmt;

/// Errors produced while folding bytes into a [`super::Fletcher4`] accumulator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChecksumError {
    /// The supplied buffer's length was not a multiple of 4 bytes.
    Unaligned {
        /// The offending buffer length, in bytes.
        len: usize,
    },
}

impl fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unaligned { len } => {
                write!(f, "buffer length {len} is not a multiple of 4 bytes")
            }
        }
    }
}

impl std::error::Error for ChecksumError {}
