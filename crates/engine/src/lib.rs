#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `engine` implements the send and receive pipelines of the replication
//! stream: traversal-driven emission with record aggregation on the send
//! side, and a record dispatcher with per-record transactional appliers on
//! the receive side. It is written entirely against the collaborator
//! traits in [`zdstream_core::collaborators`] and the wire codec in [`protocol`];
//! nothing here knows how blocks are actually stored.
//!
//! # Design
//!
//! - [`aggregator::Aggregator`] is the tiny `{None, Free, FreeObjects}`
//!   state machine that coalesces adjacent `FREE`/`FREEOBJECTS` records
//!   before they reach the wire.
//! - [`stream::StreamWriter`] and [`stream::StreamReader`] seal/verify the
//!   stream's running Fletcher-4 checksum as they write/read each header
//!   and payload.
//! - [`send`] drives a traversal into aggregator calls and frames the
//!   stream with `BEGIN`/`END`.
//! - [`recv`] validates and prepares the target dataset, dispatches
//!   incoming records to per-kind appliers, and runs the two-phase
//!   begin/end commit.
//!
//! # Errors
//!
//! Every fallible operation in this crate returns
//! [`zdstream_core::ReplicationError`]; see that type for the taxonomy.
//!
//! # See also
//!
//! - [`protocol`] for the record types this crate emits and consumes.
//! - [`checksums`] for the Fletcher-4 primitive sealing the stream.

pub mod aggregator;
pub mod guid_map;
pub mod recv;
pub mod send;
pub mod stream;

pub mod testkit;

/// Shorthand for this crate's fallible return type.
pub type EngineResult<T> = Result<T, zdstream_core::ReplicationError>;
