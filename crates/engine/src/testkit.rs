//! In-memory implementations of the [`zdstream_core::collaborators`] traits, used by
//! this crate's own tests and available to downstream crates (the CLI's
//! demo `send`/`recv` subcommands) that want a working backend without a
//! real object store.

use std::collections::{BTreeSet, HashMap, HashSet};

use zdstream_core::collaborators::{
    BlockCache, BufferedTransaction, DatasetHandle, DnodeInfo, ObjectStore, SnapshotNamespace,
    Transaction, TraversalEvent,
};
use zdstream_core::{Guid, ObjectId, ReplicationError, Txg};

/// A [`zdstream_core::collaborators::Traversal`] that simply replays a pre-built
/// list of tuples, for tests that want to drive the send pipeline without
/// a real snapshot walk.
pub struct VecTraversal {
    events: std::vec::IntoIter<TraversalEvent>,
}

impl VecTraversal {
    /// Creates a traversal that yields `events` in order, then ends.
    #[must_use]
    pub fn new(events: Vec<TraversalEvent>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }
}

impl zdstream_core::collaborators::Traversal for VecTraversal {
    fn next(&mut self) -> Option<Result<TraversalEvent, ReplicationError>> {
        self.events.next().map(Ok)
    }
}

/// A [`BlockCache`] that always fails, for send paths that only exercise
/// `BEGIN`/`END` framing (no level-0 data/spill tuples).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpCache;

impl BlockCache for NoOpCache {
    fn read(&self, object: ObjectId, _level: u8, _block_id: u64) -> Result<Vec<u8>, ReplicationError> {
        Err(ReplicationError::BlockRead {
            object,
            source: std::io::Error::other("NoOpCache has no blocks"),
        })
    }
}

/// A [`BlockCache`] backed by a fixed map from `(object, block_id)` to
/// bytes.
#[derive(Clone, Debug, Default)]
pub struct MapCache {
    blocks: HashMap<(ObjectId, u64), Vec<u8>>,
}

impl MapCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the bytes for `(object, block_id)`.
    pub fn insert(&mut self, object: ObjectId, block_id: u64, data: Vec<u8>) {
        self.blocks.insert((object, block_id), data);
    }
}

impl BlockCache for MapCache {
    fn read(&self, object: ObjectId, _level: u8, block_id: u64) -> Result<Vec<u8>, ReplicationError> {
        self.blocks.get(&(object, block_id)).cloned().ok_or(ReplicationError::BlockRead {
            object,
            source: std::io::Error::other("no such block in MapCache"),
        })
    }
}

#[derive(Default)]
struct FsRecord {
    exists: bool,
    parent_exists: bool,
    modified: bool,
    has_prev_snapshot: bool,
    prev_guid: Option<Guid>,
    initial_txg: Txg,
    lineage: Vec<(Guid, Txg)>,
    snapshots: HashSet<String>,
    recv_clone: bool,
    inconsistent: HashSet<String>,
}

/// An in-memory [`SnapshotNamespace`], keyed by filesystem name, for tests
/// and the CLI demo backend.
#[derive(Default)]
pub struct InMemoryNamespace {
    filesystems: std::cell::RefCell<HashMap<String, FsRecord>>,
    ancestry: std::cell::RefCell<BTreeSet<(Guid, Guid)>>,
}

impl InMemoryNamespace {
    /// Creates an empty namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tofs` as an existing filesystem with the given state,
    /// for use in begin-phase eligibility tests.
    pub fn register_filesystem(
        &self,
        tofs: &str,
        parent_exists: bool,
        modified: bool,
        prev_guid: Option<Guid>,
        initial_txg: Txg,
        lineage: Vec<(Guid, Txg)>,
    ) {
        self.filesystems.borrow_mut().insert(
            tofs.to_owned(),
            FsRecord {
                exists: true,
                parent_exists,
                modified,
                has_prev_snapshot: prev_guid.is_some(),
                prev_guid,
                initial_txg,
                lineage,
                snapshots: HashSet::new(),
                recv_clone: false,
                inconsistent: HashSet::new(),
            },
        );
    }

    /// Registers that `from` is an ancestor of `to`, for [`SnapshotNamespace::is_ancestor`].
    pub fn register_ancestor(&self, from: Guid, to: Guid) {
        self.ancestry.borrow_mut().insert((from, to));
    }
}

impl SnapshotNamespace for InMemoryNamespace {
    fn filesystem_exists(&self, tofs: &str) -> bool {
        self.filesystems.borrow().get(tofs).is_some_and(|fs| fs.exists)
    }

    fn parent_exists(&self, tofs: &str) -> bool {
        self.filesystems.borrow().get(tofs).is_some_and(|fs| fs.parent_exists)
    }

    fn modified_since_last_snapshot(&self, tofs: &str) -> bool {
        self.filesystems.borrow().get(tofs).is_some_and(|fs| fs.modified)
    }

    fn has_previous_snapshot(&self, tofs: &str) -> bool {
        self.filesystems.borrow().get(tofs).is_some_and(|fs| fs.has_prev_snapshot)
    }

    fn previous_snapshot_guid(&self, tofs: &str) -> Option<Guid> {
        self.filesystems.borrow().get(tofs).and_then(|fs| fs.prev_guid)
    }

    fn initial_txg(&self, tofs: &str) -> Txg {
        self.filesystems.borrow().get(tofs).map_or(Txg(0), |fs| fs.initial_txg)
    }

    fn find_in_lineage(&self, tofs: &str, guid: Guid, floor: Txg) -> Option<Txg> {
        self.filesystems.borrow().get(tofs).and_then(|fs| {
            fs.lineage
                .iter()
                .take_while(|(_, txg)| *txg >= floor)
                .find(|(g, _)| *g == guid)
                .map(|(_, txg)| *txg)
        })
    }

    fn is_ancestor(&self, from: Guid, to: Guid) -> bool {
        self.ancestry.borrow().contains(&(from, to))
    }

    fn snapshot_exists(&self, tofs: &str, tosnap: &str) -> bool {
        self.filesystems
            .borrow()
            .get(tofs)
            .is_some_and(|fs| fs.snapshots.contains(tosnap))
    }

    fn recv_clone_exists(&self, tofs: &str) -> bool {
        self.filesystems.borrow().get(tofs).is_some_and(|fs| fs.recv_clone)
    }

    fn create_recv_clone(&mut self, tofs: &str) -> Result<DatasetHandle, ReplicationError> {
        let mut fs = self.filesystems.borrow_mut();
        let record = fs.entry(tofs.to_owned()).or_default();
        record.recv_clone = true;
        Ok(DatasetHandle(format!("{tofs}%recv")))
    }

    fn create_dataset(
        &mut self,
        tofs: &str,
        _origin: Option<&str>,
    ) -> Result<DatasetHandle, ReplicationError> {
        let mut fs = self.filesystems.borrow_mut();
        let record = fs.entry(tofs.to_owned()).or_default();
        record.exists = true;
        Ok(DatasetHandle(tofs.to_owned()))
    }

    fn mark_inconsistent(&mut self, handle: &DatasetHandle) {
        let mut fs = self.filesystems.borrow_mut();
        fs.entry(handle.0.clone()).or_default().inconsistent.insert(handle.0.clone());
    }

    fn clear_inconsistent(&mut self, handle: &DatasetHandle) {
        if let Some(record) = self.filesystems.borrow_mut().get_mut(&handle.0) {
            record.inconsistent.remove(&handle.0);
        }
    }

    fn clone_swap(&mut self, handle: &DatasetHandle, _force: bool) -> Result<(), ReplicationError> {
        let mut fs = self.filesystems.borrow_mut();
        if let Some(record) = fs.get_mut(&handle.0) {
            record.recv_clone = false;
        }
        Ok(())
    }

    fn snapshot(
        &mut self,
        handle: &DatasetHandle,
        tosnap: &str,
        _creation_time: u64,
        _guid: Guid,
    ) -> Result<(), ReplicationError> {
        let mut fs = self.filesystems.borrow_mut();
        let record = fs.entry(handle.0.clone()).or_default();
        if !record.snapshots.insert(tosnap.to_owned()) {
            return Err(ReplicationError::SnapshotExists(tosnap.to_owned()));
        }
        Ok(())
    }

    fn destroy(&mut self, handle: &DatasetHandle) {
        self.filesystems.borrow_mut().remove(&handle.0);
    }
}

#[derive(Default)]
struct ObjectRecordState {
    info: DnodeInfo,
    bytes: HashMap<u64, Vec<u8>>,
    spill: Option<Vec<u8>>,
}

#[derive(Default)]
struct InMemoryObjectStoreState {
    objects: HashMap<ObjectId, ObjectRecordState>,
}

/// An in-memory [`ObjectStore`] for tests and the CLI demo backend. Data is
/// modeled as a sparse map of offset-to-bytes per object rather than a
/// real block layout; good enough to verify round-trip content, not block
/// alignment.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    state: std::rc::Rc<std::cell::RefCell<InMemoryObjectStoreState>>,
}

impl InMemoryObjectStore {
    /// An empty object-set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every object currently present in the object-set, in
    /// ascending order, for callers that need to enumerate a completed
    /// receive (e.g. the CLI's demo backend materializing files to disk).
    #[must_use]
    pub fn objects(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.state.borrow().objects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns a clone of `object`'s dnode metadata, if it exists.
    #[must_use]
    pub fn info(&self, object: ObjectId) -> Option<DnodeInfo> {
        self.state.borrow().objects.get(&object).map(|record| record.info.clone())
    }

    /// Returns the full reconstructed contents of `object` as a single
    /// contiguous buffer up to `len` bytes, for round-trip assertions in
    /// tests. Gaps (never written) are zero-filled.
    #[must_use]
    pub fn read_all(&self, object: ObjectId, len: usize) -> Vec<u8> {
        let state = self.state.borrow();
        let mut out = vec![0u8; len];
        if let Some(record) = state.objects.get(&object) {
            for (&offset, bytes) in &record.bytes {
                let start = offset as usize;
                let end = (start + bytes.len()).min(out.len());
                if start < out.len() {
                    out[start..end].copy_from_slice(&bytes[..end - start]);
                }
            }
        }
        out
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn begin_tx(&mut self) -> Result<Box<dyn Transaction>, ReplicationError> {
        Ok(Box::new(BufferedTransaction::new()))
    }

    fn object_exists(&self, object: ObjectId) -> bool {
        self.state.borrow().objects.contains_key(&object)
    }

    fn object_claim(&mut self, object: ObjectId, info: &DnodeInfo) -> Result<(), ReplicationError> {
        let mut state = self.state.borrow_mut();
        if state.objects.contains_key(&object) {
            return Err(ReplicationError::InvalidRecord(format!("object {object} already exists")));
        }
        state.objects.insert(
            object,
            ObjectRecordState {
                info: info.clone(),
                ..Default::default()
            },
        );
        Ok(())
    }

    fn object_reclaim(&mut self, object: ObjectId, info: &DnodeInfo) -> Result<(), ReplicationError> {
        let mut state = self.state.borrow_mut();
        let record = state
            .objects
            .get_mut(&object)
            .ok_or_else(|| ReplicationError::InvalidRecord(format!("object {object} does not exist")))?;
        record.info = info.clone();
        record.bytes.retain(|&offset, bytes| offset + bytes.len() as u64 <= (info.max_block_id + 1) * u64::from(info.block_size));
        Ok(())
    }

    fn free_object(&mut self, object: ObjectId) -> Result<(), ReplicationError> {
        self.state.borrow_mut().objects.remove(&object);
        Ok(())
    }

    fn write(&mut self, object: ObjectId, offset: u64, data: &[u8]) -> Result<(), ReplicationError> {
        let mut state = self.state.borrow_mut();
        let record = state
            .objects
            .entry(object)
            .or_insert_with(ObjectRecordState::default);
        record.bytes.insert(offset, data.to_vec());
        Ok(())
    }

    fn free_range(&mut self, object: ObjectId, offset: u64, length: u64) -> Result<(), ReplicationError> {
        let mut state = self.state.borrow_mut();
        if let Some(record) = state.objects.get_mut(&object) {
            let end = if length == u64::MAX { u64::MAX } else { offset + length };
            record.bytes.retain(|&start, bytes| !(start >= offset && start < end) || start + (bytes.len() as u64) <= offset);
        }
        Ok(())
    }

    fn read_ref(
        &self,
        _source_guid: Guid,
        object: ObjectId,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, ReplicationError> {
        let state = self.state.borrow();
        let record = state
            .objects
            .get(&object)
            .ok_or_else(|| ReplicationError::InvalidRecord(format!("ref object {object} missing")))?;
        let bytes = record
            .bytes
            .get(&offset)
            .ok_or_else(|| ReplicationError::InvalidRecord("ref offset not found".into()))?;
        Ok(bytes[..length as usize].to_vec())
    }

    fn write_spill(&mut self, object: ObjectId, data: &[u8]) -> Result<(), ReplicationError> {
        let mut state = self.state.borrow_mut();
        let record = state
            .objects
            .entry(object)
            .or_insert_with(ObjectRecordState::default);
        record.spill = Some(data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_claim_write_read() {
        let mut store = InMemoryObjectStore::new();
        store
            .object_claim(
                ObjectId(1),
                &DnodeInfo {
                    object_type: 1,
                    max_block_id: 0,
                    block_size: 4096,
                    ..Default::default()
                },
            )
            .unwrap();
        store.write(ObjectId(1), 0, b"hello").unwrap();
        assert!(store.object_exists(ObjectId(1)));
        let data = store.read_all(ObjectId(1), 5);
        assert_eq!(&data, b"hello");
    }

    #[test]
    fn in_memory_namespace_tracks_ancestry() {
        let ns = InMemoryNamespace::new();
        ns.register_ancestor(Guid(1), Guid(2));
        assert!(ns.is_ancestor(Guid(1), Guid(2)));
        assert!(!ns.is_ancestor(Guid(2), Guid(1)));
    }

    #[test]
    fn aborted_transaction_leaves_store_untouched() {
        use zdstream_core::collaborators::StagedOp;

        let mut store = InMemoryObjectStore::new();
        let mut tx = store.begin_tx().unwrap();
        tx.stage(StagedOp::ObjectClaim(ObjectId(1), DnodeInfo::default()));
        tx.stage(StagedOp::Write(ObjectId(1), 0, b"hello".to_vec()));
        tx.abort();

        assert!(!store.object_exists(ObjectId(1)));
    }

    #[test]
    fn committed_transaction_applies_every_staged_op() {
        use zdstream_core::collaborators::StagedOp;

        let mut store = InMemoryObjectStore::new();
        let mut tx = store.begin_tx().unwrap();
        tx.stage(StagedOp::ObjectClaim(
            ObjectId(1),
            DnodeInfo { object_type: 1, block_size: 4096, ..Default::default() },
        ));
        tx.stage(StagedOp::Write(ObjectId(1), 0, b"hello".to_vec()));
        tx.commit(&mut store).unwrap();

        assert!(store.object_exists(ObjectId(1)));
        assert_eq!(store.read_all(ObjectId(1), 5), b"hello");
    }
}
