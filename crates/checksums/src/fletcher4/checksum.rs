use super::error::ChecksumError;

/// Incremental Fletcher-4 accumulator sealing a send/receive record stream.
///
/// Every record byte emitted by the sender, and every record byte parsed by
/// the receiver, is folded into one of these in emission/parse order. The
/// sender snapshots [`Fletcher4::value`] into the `END` record; the receiver
/// snapshots its own accumulator immediately before reading that record and
/// compares the two.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Fletcher4 {
    a: u64,
    b: u64,
    c: u64,
    d: u64,
}

impl Fletcher4 {
    /// Creates a fresh accumulator with all four words zeroed.
    #[must_use]
    pub const fn new() -> Self {
        Self { a: 0, b: 0, c: 0, d: 0 }
    }

    /// Builds an accumulator resuming from a previously captured digest,
    /// e.g. to continue folding a stream whose prefix was checksummed
    /// elsewhere.
    #[must_use]
    pub const fn from_digest(digest: [u64; 4]) -> Self {
        Self {
            a: digest[0],
            b: digest[1],
            c: digest[2],
            d: digest[3],
        }
    }

    /// Returns `true` if no bytes have been folded in yet.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.a == 0 && self.b == 0 && self.c == 0 && self.d == 0
    }

    /// Folds bytes produced on the local host's endianness into the
    /// accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::Unaligned`] if `chunk.len()` is not a
    /// multiple of 4.
    pub fn update_native(&mut self, chunk: &[u8]) -> Result<(), ChecksumError> {
        self.fold(chunk, u32::from_ne_bytes)
    }

    /// Folds bytes produced on the opposite endianness into the
    /// accumulator, byte-swapping each 4-byte lane before accumulating it.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::Unaligned`] if `chunk.len()` is not a
    /// multiple of 4.
    pub fn update_swapped(&mut self, chunk: &[u8]) -> Result<(), ChecksumError> {
        self.fold(chunk, |bytes| u32::from_ne_bytes(bytes).swap_bytes())
    }

    fn fold(&mut self, chunk: &[u8], lane: impl Fn([u8; 4]) -> u32) -> Result<(), ChecksumError> {
        if chunk.len() % 4 != 0 {
            return Err(ChecksumError::Unaligned { len: chunk.len() });
        }
        for word in chunk.chunks_exact(4) {
            let bytes: [u8; 4] = word.try_into().expect("chunks_exact(4) yields 4 bytes");
            let lane = u64::from(lane(bytes));
            self.a = self.a.wrapping_add(lane);
            self.b = self.b.wrapping_add(self.a);
            self.c = self.c.wrapping_add(self.b);
            self.d = self.d.wrapping_add(self.c);
        }
        Ok(())
    }

    /// Returns the four accumulator words in `[a, b, c, d]` order, the
    /// layout stored in the stream's `END` record.
    #[must_use]
    pub const fn value(&self) -> [u64; 4] {
        [self.a, self.b, self.c, self.d]
    }
}
