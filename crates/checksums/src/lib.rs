#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `checksums` provides the Fletcher-4 stream checksum that seals every
//! send/receive record stream produced or consumed by the replication
//! engine. The algorithm is a 4x64-bit rolling digest computed incrementally
//! over an arbitrary-length byte stream; the sender folds every emitted byte
//! into it and writes the final value into the END record, while the
//! receiver folds every parsed byte into an identical accumulator and
//! compares snapshots of it against the sender's value.
//!
//! # Design
//!
//! [`Fletcher4`] accumulates four 64-bit words (`a`, `b`, `c`, `d`) by summing
//! a stream of 32-bit little-endian lanes. [`Fletcher4::update_native`] feeds
//! bytes produced on the local host's endianness; [`Fletcher4::update_swapped`]
//! feeds bytes produced on the opposite endianness, as detected from a
//! stream's `BEGIN` magic (see `protocol::BeginRecord`). Both accept byte
//! slices whose length is a multiple of 4, the lane width the algorithm
//! folds.
//!
//! # Invariants
//!
//! - Input buffers must have a length that is a multiple of 4; callers that
//!   violate this receive [`ChecksumError::Unaligned`] rather than silently
//!   truncating state.
//! - [`Fletcher4`] never buffers the whole stream: each call folds exactly
//!   the bytes handed to it, so memory use is independent of stream length.
//! - [`Fletcher4::value`] exposes the four words in the canonical order used
//!   by the `END` record (`[a, b, c, d]`), regardless of host endianness.
//!
//! # Errors
//!
//! [`ChecksumError`] reports a misaligned update (a buffer whose length is
//! not a multiple of 4).
//!
//! # Examples
//!
//! ```
//! use checksums::Fletcher4;
//!
//! let mut sender = Fletcher4::new();
//! sender.update_native(b"01234567").unwrap();
//! let sealed = sender.value();
//!
//! let mut receiver = Fletcher4::new();
//! receiver.update_native(b"01234567").unwrap();
//! assert_eq!(receiver.value(), sealed);
//! ```
//!
//! # See also
//!
//! - [`protocol`] for the record codec that calls into this crate on every
//!   emitted or parsed byte.
//! - [`engine`] for the send/receive pipelines that seal and verify streams
//!   using this checksum.

mod fletcher4;

pub use fletcher4::{ChecksumError, Fletcher4};
