//! Offset-tracking, checksum-folding wrappers around the stream's
//! underlying byte handle.

use std::io::{self, Read, Write};

use checksums::Fletcher4;
use zdstream_core::ReplicationError;

/// Wraps a writable stream handle, sealing every byte written into a
/// running [`Fletcher4`] and tracking the cumulative offset.
///
/// Mirrors the traversal-to-wire contract: the checksum is updated over
/// `buf` before the write is issued, and the offset only advances after
/// the write succeeds in full. A short write is treated as an interrupted
/// stream rather than silently retried.
pub struct StreamWriter<W> {
    inner: W,
    checksum: Fletcher4,
    offset: u64,
}

impl<W: Write> StreamWriter<W> {
    /// Wraps `inner`, starting from a zeroed checksum and a zero offset.
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            checksum: Fletcher4::new(),
            offset: 0,
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// The running checksum over every byte written so far.
    #[must_use]
    pub const fn checksum(&self) -> [u64; 4] {
        self.checksum.value()
    }

    /// Writes `buf` in full. `buf.len()` must be a multiple of 4, the
    /// checksum's lane width; the 320-byte headers and rounded payload
    /// lengths this crate emits always satisfy that.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Interrupted`] on a short write, or
    /// [`ReplicationError::Io`] if the underlying write fails.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<(), ReplicationError> {
        self.checksum.update_native(buf)?;
        self.inner.write_all(buf).map_err(|err| {
            if err.kind() == io::ErrorKind::WriteZero {
                ReplicationError::Interrupted(err.to_string())
            } else {
                ReplicationError::Io(err)
            }
        })?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Consumes the writer, returning the inner handle.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Wraps a readable stream handle, folding every byte read into a running
/// [`Fletcher4`] and tracking the cumulative offset (`voff` in the
/// dispatcher's terms).
pub struct StreamReader<R> {
    inner: R,
    checksum: Fletcher4,
    offset: u64,
    swap: bool,
}

impl<R: Read> StreamReader<R> {
    /// Wraps `inner`. `swap` is not known until the stream's `BEGIN`
    /// record has been read; call [`StreamReader::set_swap`] once it has.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            checksum: Fletcher4::new(),
            offset: 0,
            swap: false,
        }
    }

    /// Sets whether subsequent header fields should be byte-swapped on
    /// decode, per `BEGIN::magic`.
    pub const fn set_swap(&mut self, swap: bool) {
        self.swap = swap;
    }

    /// Returns `true` if the stream was detected as byte-swapped.
    #[must_use]
    pub const fn swap(&self) -> bool {
        self.swap
    }

    /// Bytes read so far.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// A snapshot of the running checksum, taken immediately before
    /// reading the next header — this is the value compared against the
    /// stream-supplied checksum at `END`.
    #[must_use]
    pub const fn checksum(&self) -> [u64; 4] {
        self.checksum.value()
    }

    /// Reads exactly `len` bytes, folding them into the running checksum.
    /// `len` must be a multiple of 4.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::InvalidRecord`] on a short read (the
    /// stream ended before `len` bytes were available), or
    /// [`ReplicationError::Io`] on an underlying I/O failure.
    pub fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, ReplicationError> {
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                ReplicationError::InvalidRecord(format!("short read: wanted {len} bytes"))
            } else {
                ReplicationError::Io(err)
            }
        })?;
        self.checksum.update_native(&buf)?;
        self.offset += len as u64;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_tracks_offset_and_checksum() {
        let mut writer = StreamWriter::new(Vec::new());
        writer.write_all(b"01234567").unwrap();
        assert_eq!(writer.offset(), 8);
        assert_ne!(writer.checksum(), [0, 0, 0, 0]);
    }

    #[test]
    fn reader_checksum_matches_writer_checksum() {
        let mut writer = StreamWriter::new(Vec::new());
        writer.write_all(b"01234567").unwrap();
        let sealed = writer.checksum();
        let bytes = writer.into_inner();

        let mut reader = StreamReader::new(bytes.as_slice());
        reader.read_exact(8).unwrap();
        assert_eq!(reader.checksum(), sealed);
    }

    #[test]
    fn reader_reports_short_read() {
        let mut reader = StreamReader::new(&b"short"[..]);
        let err = reader.read_exact(8).unwrap_err();
        assert!(matches!(err, ReplicationError::InvalidRecord(_)));
    }
}
