#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `protocol` defines the on-wire record taxonomy of the send/receive
//! stream and the codec that serializes/parses each record's fixed
//! 320-byte header. It knows nothing about traversal, transactions, or the
//! object store: it only encodes [`Record`] values to bytes and decodes
//! bytes back into them, applying a byte-swap when the stream's `BEGIN`
//! record indicates it was produced on the opposite endianness.
//!
//! # Design
//!
//! Every record kind is a small struct with the wire-layout fields of its
//! ZFS counterpart (see [`record`]). [`Record`] wraps them in an enum; its
//! `encode_header`/`decode_header` methods read and write the common
//! 320-byte union layout described in [`header`]. `WRITE`, `SPILL`, and
//! `OBJECT` carry a trailing payload whose length `Record::payload_len`
//! reports; callers read/write that payload themselves immediately after
//! the header, typically folding it into the same [`checksums::Fletcher4`]
//! accumulator used for the header bytes.
//!
//! # Invariants
//!
//! - Every header is exactly [`header::HEADER_LEN`] bytes, 8-byte aligned
//!   at its stream offset.
//! - Payload lengths reported by [`Record::payload_len`] are always
//!   rounded up to a multiple of 8.
//! - Scalar fields are stored little-endian on the wire; a decode call is
//!   told whether to byte-swap via its `swap` parameter, never inferred
//!   from the bytes themselves (that inference happens once, from
//!   `BeginRecord::magic`, by the caller).
//!
//! # Errors
//!
//! [`error::CodecError`] reports an unrecognized record type tag, a header
//! buffer shorter than [`header::HEADER_LEN`], a length/offset overflow, or
//! a fixed-width string field that does not fit or is not valid UTF-8.
//!
//! # Examples
//!
//! ```
//! use protocol::record::{EndRecord, Record};
//! use zdstream_core::Guid;
//!
//! let end = Record::End(EndRecord { checksum: [1, 2, 3, 4], to_guid: Guid(7) });
//! let header = end.encode_header().unwrap();
//! assert_eq!(Record::decode_header(&header, false).unwrap(), end);
//! ```
//!
//! # See also
//!
//! - [`checksums`] for the Fletcher-4 accumulator sealing the stream.
//! - [`engine`] for the send/receive pipelines built on top of this codec.

/// The error type returned by the wire codec.
pub mod error;
pub mod flags;
pub mod header;
pub mod record;

pub use error::CodecError;
pub use header::{round_up_8, HEADER_LEN, STREAM_MAGIC};
pub use record::{
    BeginRecord, DedupKey, EndRecord, FreeObjectsRecord, FreeRecord, ObjectRecord, Record,
    RecordKind, SpillRecord, WriteByRefRecord, WriteRecord,
};
