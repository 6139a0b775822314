//! Traits describing the external systems the replication engine consumes.
//!
//! None of these are implemented by this crate: a concrete filesystem binds
//! them to its own object store, snapshot namespace, and cache. `engine`'s
//! pipelines are written only against these interfaces, and test code
//! supplies in-memory implementations (see `engine::testkit`).

use crate::{Guid, ObjectId, ReplicationError, Txg};

/// One slot of a dnode's bonus buffer plus the metadata the `OBJECT` record
/// needs to reproduce it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnodeInfo {
    /// Object type, as assigned by the object-set's type registry.
    pub object_type: u8,
    /// Type tag of the bonus buffer payload.
    pub bonus_type: u8,
    /// Block size in bytes; a multiple of the store's minimum block size.
    pub block_size: u32,
    /// Length of the bonus buffer in bytes.
    pub bonus_len: u16,
    /// Checksum algorithm index applied to this object's blocks.
    pub checksum_type: u8,
    /// Compression algorithm index applied to this object's blocks.
    pub compress_type: u8,
    /// Highest block id that has ever been written (`0` if none).
    pub max_block_id: u64,
    /// The bonus buffer contents.
    pub bonus_buffer: Vec<u8>,
}

/// One mutation staged under a [`Transaction`], replayed against the store
/// only at [`Transaction::commit`]. Mirrors the way a DMU transaction holds
/// its writes until the owning transaction group syncs: nothing here is
/// visible to the store until commit, so a record that fails validation
/// partway through staging its mutations leaves the store untouched.
pub enum StagedOp {
    /// Stage an [`ObjectStore::object_claim`].
    ObjectClaim(ObjectId, DnodeInfo),
    /// Stage an [`ObjectStore::object_reclaim`].
    ObjectReclaim(ObjectId, DnodeInfo),
    /// Stage an [`ObjectStore::free_object`].
    FreeObject(ObjectId),
    /// Stage an [`ObjectStore::write`].
    Write(ObjectId, u64, Vec<u8>),
    /// Stage an [`ObjectStore::free_range`].
    FreeRange(ObjectId, u64, u64),
    /// Stage an [`ObjectStore::write_spill`].
    WriteSpill(ObjectId, Vec<u8>),
}

impl StagedOp {
    fn apply(self, store: &mut dyn ObjectStore) -> Result<(), ReplicationError> {
        match self {
            Self::ObjectClaim(object, info) => store.object_claim(object, &info),
            Self::ObjectReclaim(object, info) => store.object_reclaim(object, &info),
            Self::FreeObject(object) => store.free_object(object),
            Self::Write(object, offset, data) => store.write(object, offset, &data),
            Self::FreeRange(object, offset, length) => store.free_range(object, offset, length),
            Self::WriteSpill(object, data) => store.write_spill(object, &data),
        }
    }
}

/// A batch of [`StagedOp`]s that are applied to the store as a unit: either
/// every staged mutation lands at [`Transaction::commit`], or none of them
/// do when the applier calls [`Transaction::abort`] instead. Appliers stage
/// every mutation a record needs before committing, so a validation failure
/// partway through a multi-mutation record (e.g. `FREEOBJECTS` freeing a
/// range) never leaves the store with only some of the range applied.
pub trait Transaction {
    /// Queues `op` to be applied when this transaction commits.
    fn stage(&mut self, op: StagedOp);

    /// Applies every staged operation, in staging order, against `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store rejects one of the staged
    /// operations.
    fn commit(self: Box<Self>, store: &mut dyn ObjectStore) -> Result<(), ReplicationError>;

    /// Discards every staged operation without touching the store.
    fn abort(self: Box<Self>);
}

/// A [`Transaction`] that buffers [`StagedOp`]s in a plain `Vec` and replays
/// them in order on commit. Sufficient for any [`ObjectStore`] whose
/// mutating methods are safe to call in sequence from a single thread; an
/// [`ObjectStore::begin_tx`] implementation can return this directly instead
/// of writing its own staging type.
#[derive(Default)]
pub struct BufferedTransaction {
    ops: Vec<StagedOp>,
}

impl BufferedTransaction {
    /// An empty transaction with no staged operations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transaction for BufferedTransaction {
    fn stage(&mut self, op: StagedOp) {
        self.ops.push(op);
    }

    fn commit(self: Box<Self>, store: &mut dyn ObjectStore) -> Result<(), ReplicationError> {
        for op in self.ops {
            op.apply(store)?;
        }
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

/// The transactional object store a receive applies records against.
///
/// Mirrors the collaborator surface a send/receive core consumes from the
/// underlying storage: object lifecycle, block writes/frees, and the bonus
/// and spill buffers attached to an object's dnode.
pub trait ObjectStore {
    /// Opens a new transaction. Appliers open one transaction per record.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction could not be assigned (e.g. the
    /// store is waiting on a prior transaction group).
    fn begin_tx(&mut self) -> Result<Box<dyn Transaction>, ReplicationError>;

    /// Returns `true` if `object` currently exists in the object-set.
    fn object_exists(&self, object: ObjectId) -> bool;

    /// Creates `object` with the given dnode metadata. Fails if it already
    /// exists; receivers call [`ObjectStore::object_reclaim`] instead in
    /// that case.
    ///
    /// # Errors
    ///
    /// Returns an error if `object` already exists or the metadata is
    /// rejected by the store.
    fn object_claim(&mut self, object: ObjectId, info: &DnodeInfo) -> Result<(), ReplicationError>;

    /// Replaces the dnode metadata of an existing object, freeing any
    /// blocks beyond the new object's extent.
    ///
    /// # Errors
    ///
    /// Returns an error if `object` does not exist.
    fn object_reclaim(&mut self, object: ObjectId, info: &DnodeInfo) -> Result<(), ReplicationError>;

    /// Removes `object` and every block it owns.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying free fails; a missing object is
    /// not an error (callers skip it before calling).
    fn free_object(&mut self, object: ObjectId) -> Result<(), ReplicationError>;

    /// Writes `data` at `offset` within `object`.
    ///
    /// # Errors
    ///
    /// Returns an error if `object` does not exist or the write is
    /// rejected by the store.
    fn write(&mut self, object: ObjectId, offset: u64, data: &[u8]) -> Result<(), ReplicationError>;

    /// Frees `length` bytes starting at `offset` within `object`.
    /// `length == u64::MAX` means "free to the end of the object".
    ///
    /// # Errors
    ///
    /// Returns an error if `object` does not exist.
    fn free_range(&mut self, object: ObjectId, offset: u64, length: u64) -> Result<(), ReplicationError>;

    /// Reads `length` bytes at `offset` from a previously received
    /// snapshot's object-set, for `WRITE_BYREF` dedup resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if the source object or range is invalid.
    fn read_ref(
        &self,
        source_guid: Guid,
        object: ObjectId,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, ReplicationError>;

    /// Replaces `object`'s spill block with `data`, growing the block if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if `object` does not exist.
    fn write_spill(&mut self, object: ObjectId, data: &[u8]) -> Result<(), ReplicationError>;
}

/// The snapshot/clone namespace a receive's begin/end phases operate on.
pub trait SnapshotNamespace {
    /// Returns `true` if the filesystem `tofs` currently exists.
    fn filesystem_exists(&self, tofs: &str) -> bool;

    /// Returns `true` if `tofs`'s parent filesystem exists.
    fn parent_exists(&self, tofs: &str) -> bool;

    /// Returns `true` if `tofs` has been written to since its last
    /// snapshot.
    fn modified_since_last_snapshot(&self, tofs: &str) -> bool;

    /// Returns `true` if `tofs` has a previous snapshot at all.
    fn has_previous_snapshot(&self, tofs: &str) -> bool;

    /// Returns the GUID of `tofs`'s most recent snapshot, if any.
    fn previous_snapshot_guid(&self, tofs: &str) -> Option<Guid>;

    /// Returns the creation txg of `tofs`'s first-ever snapshot, used to
    /// detect "this is the initial state" for full sends onto a fresh
    /// lineage.
    fn initial_txg(&self, tofs: &str) -> Txg;

    /// Walks `tofs`'s snapshot lineage looking for `guid`, returning that
    /// snapshot's creation txg if found. `floor` is the birth txg of the
    /// dataset's current head; per the lineage-walk convention, a snapshot
    /// whose creation txg is less than `floor` ends the search (see
    /// [`crate::collaborators::LineageWalk`]).
    fn find_in_lineage(&self, tofs: &str, guid: Guid, floor: Txg) -> Option<Txg>;

    /// Returns `true` if `from` is a strict ancestor of `to` within the
    /// same filesystem lineage (`dsl_dataset_is_before`). A send
    /// orchestrator rejects with `EXDEV` when this is `false` and `from`
    /// is not [`Guid::NONE`].
    fn is_ancestor(&self, from: Guid, to: Guid) -> bool;

    /// Returns `true` if a snapshot named `tofs@tosnap` already exists.
    fn snapshot_exists(&self, tofs: &str, tosnap: &str) -> bool;

    /// Returns `true` if the temporary receive clone `tofs%recv` exists.
    fn recv_clone_exists(&self, tofs: &str) -> bool;

    /// Creates the temporary receive clone of `tofs`, cloned from its
    /// current head, and returns a handle identifying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the clone could not be created.
    fn create_recv_clone(&mut self, tofs: &str) -> Result<DatasetHandle, ReplicationError>;

    /// Creates a brand-new dataset `tofs` under its (already-existing)
    /// parent, optionally cloned from `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset could not be created.
    fn create_dataset(
        &mut self,
        tofs: &str,
        origin: Option<&str>,
    ) -> Result<DatasetHandle, ReplicationError>;

    /// Marks `handle`'s dataset `INCONSISTENT`, signalling an in-progress
    /// receive to concurrent readers.
    fn mark_inconsistent(&mut self, handle: &DatasetHandle);

    /// Clears the `INCONSISTENT` flag on `handle`'s dataset.
    fn clear_inconsistent(&mut self, handle: &DatasetHandle);

    /// Swaps the temporary receive clone into `tofs`'s head position.
    ///
    /// # Errors
    ///
    /// Returns an error if the swap is rejected (e.g. a conflicting clone
    /// owner without `force`).
    fn clone_swap(&mut self, handle: &DatasetHandle, force: bool) -> Result<(), ReplicationError>;

    /// Takes a new snapshot named `tosnap` of `handle`'s dataset, stamped
    /// with `creation_time` and `guid` from the stream's `BEGIN` record.
    ///
    /// # Errors
    ///
    /// Returns an error if `tosnap` already exists or the snapshot could
    /// not be created.
    fn snapshot(
        &mut self,
        handle: &DatasetHandle,
        tosnap: &str,
        creation_time: u64,
        guid: Guid,
    ) -> Result<(), ReplicationError>;

    /// Destroys `handle`'s dataset outright, used both for temp-clone
    /// cleanup on success and for abort-path cleanup on failure.
    fn destroy(&mut self, handle: &DatasetHandle);
}

/// A marker type documenting the lineage-walk early-exit convention: the
/// walk stops as soon as a candidate snapshot's creation txg falls below
/// the dataset's current-head birth txg, treating that as "definitely not
/// an ancestor" rather than continuing past it.
pub struct LineageWalk;

/// An opaque reference to a dataset owned by the receiving pipeline between
/// `recv_begin` and `recv_end`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct DatasetHandle(pub String);

/// Polled once per traversal callback and once per receive loop iteration
/// to implement cooperative cancellation.
pub trait SignalSource {
    /// Returns `true` if a pending signal should abort the current
    /// operation.
    fn is_interrupted(&self) -> bool;
}

/// A no-op [`SignalSource`] for callers that never request cancellation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverInterrupted;

impl SignalSource for NeverInterrupted {
    fn is_interrupted(&self) -> bool {
        false
    }
}

/// Identifies one traversal position: which object, which indirection
/// level, and which block index within that level.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Bookmark {
    /// The object number.
    pub object: ObjectId,
    /// Indirection level; `0` is a data (or dnode, or spill) block.
    pub level: u8,
    /// Block index within `object` at `level`.
    pub block_id: u64,
}

/// The kind of block a traversal tuple with no block pointer, or a
/// non-level-0 block pointer, refers to — enough for the traversal
/// callback's decision table to route it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockKind {
    /// The block backing the meta-dnode object itself.
    MetaDnode,
    /// A block of dnodes (object metadata), one dnode per fixed-size slot.
    DnodeBlock,
    /// A spill (system-attribute) block.
    Spill,
    /// The object-set's own block (ignored by the callback).
    ObjSet,
    /// A literal data block of a regular object.
    Data,
}

/// One tuple yielded by a snapshot-range traversal: an optional block
/// pointer (`None` means the block has been freed since `from`), the
/// bookmark identifying its position, and the dnode governing the object
/// the bookmark falls within (`None` only for the meta-dnode's own
/// bookmark).
#[derive(Clone, Debug)]
pub struct TraversalEvent {
    /// `None` if this block does not exist in `to` (a free relative to
    /// `from`).
    pub block_present: bool,
    /// What kind of block this tuple refers to.
    pub kind: BlockKind,
    /// The traversal position.
    pub bookmark: Bookmark,
    /// The span, in bytes, one unit of `block_id` covers at `bookmark.level`
    /// (`dn_datablksz * 2^(level * (indblkshift - blkptrshift))`).
    pub span: u64,
    /// The governing dnode, when known (absent only for bookmarks of the
    /// meta-dnode object itself before its dnode block has been read).
    pub dnode: Option<DnodeInfo>,
}

/// A cache-aware, prefetching walk of every block reachable from a
/// snapshot, filtered by birth txg for incremental sends. Implementations
/// are free to prefetch ahead of what [`Traversal::next`] has yielded.
pub trait Traversal {
    /// Returns the next traversal tuple, or `None` once the walk is
    /// complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store failed to continue the
    /// walk (distinct from an `EINTR` signal check, which callers perform
    /// themselves via [`SignalSource`]).
    fn next(&mut self) -> Option<Result<TraversalEvent, ReplicationError>>;
}

/// The block cache a traversal callback reads data blocks through.
pub trait BlockCache {
    /// Reads the block at `(object, level, block_id)`, returning its raw
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the block could not be read.
    fn read(&self, object: ObjectId, level: u8, block_id: u64) -> Result<Vec<u8>, ReplicationError>;
}
