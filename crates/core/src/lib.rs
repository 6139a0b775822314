#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `core` carries the parts of the replication engine that are independent
//! of wire format and of any particular pipeline stage: the error taxonomy
//! every component reports through, the identifiers shared across records
//! (GUIDs, object numbers, transaction groups), and the collaborator traits
//! describing the external systems the engine consumes (object store,
//! snapshot namespace, block cache, traversal iterator, signal source).
//!
//! # Design
//!
//! Collaborator traits are defined here rather than in `engine` so that both
//! `engine` and test harnesses can depend on them without a cycle: `engine`
//! implements the send/receive pipelines against these traits, and any
//! concrete filesystem binds them to its own storage.
//!
//! # Errors
//!
//! [`ReplicationError`] is the single error type returned across the
//! send/receive boundary; every pipeline stage maps its local failure into
//! one of its variants rather than inventing new ones.
//!
//! # See also
//!
//! - [`protocol`] for the wire-level record types that use [`Guid`] and
//!   [`ObjectId`].
//! - [`engine`] for the pipelines implemented against the traits in
//!   [`collaborators`].

pub mod collaborators;

/// The error taxonomy every component reports through.
pub mod error;

/// Identifiers shared across records (GUIDs, object numbers, transaction groups).
pub mod ids;

pub use collaborators::{
    BlockCache, BlockKind, Bookmark, DatasetHandle, DnodeInfo, NeverInterrupted, ObjectStore,
    SignalSource, SnapshotNamespace, Transaction, Traversal, TraversalEvent,
};
pub use error::ReplicationError;
pub use ids::{Guid, ObjectId, Txg};
