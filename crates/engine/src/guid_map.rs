//! Sorted GUID-to-dataset map resolving `WRITE_BYREF` dedup
//! back-references, with its lifetime anchored to a cleanup handle rather
//! than to any single receive call.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use zdstream_core::collaborators::DatasetHandle;
use zdstream_core::Guid;

/// An owned, long-held reference to a snapshot mapped by its GUID.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GuidMapEntry {
    /// The dataset the snapshot identified by this GUID was received into.
    pub dataset: DatasetHandle,
}

/// Sorted associative map from snapshot GUID to the dataset a
/// `WRITE_BYREF` record's `refguid` resolves to.
///
/// Created lazily on the first dedup'd receive that needs it. Lifetime is
/// anchored to a [`CleanupHandle`] rather than to any single `recv_stream`
/// call, so several receives sharing the same handle can dedup against
/// each other's output.
#[derive(Clone, Default)]
pub struct GuidMap {
    entries: BTreeMap<Guid, GuidMapEntry>,
}

impl GuidMap {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a newly received snapshot into the map.
    pub fn insert(&mut self, guid: Guid, dataset: DatasetHandle) {
        self.entries.insert(guid, GuidMapEntry { dataset });
    }

    /// Looks up the dataset a `WRITE_BYREF`'s `refguid` should resolve
    /// against.
    #[must_use]
    pub fn get(&self, guid: Guid) -> Option<&GuidMapEntry> {
        self.entries.get(&guid)
    }

    /// Number of snapshots currently mapped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no snapshots are mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An RAII handle standing in for the cleanup file descriptor the GUID
/// map's lifetime is anchored to in the upstream design. Dropping the last
/// clone of a handle releases every hold the map accumulated; cloning a
/// handle is how a caller shares one map across multiple receives.
#[derive(Clone, Default)]
pub struct CleanupHandle {
    map: Arc<Mutex<GuidMap>>,
}

impl CleanupHandle {
    /// Creates a fresh handle owning an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to the shared map.
    pub fn with_map<R>(&self, f: impl FnOnce(&mut GuidMap) -> R) -> R {
        let mut guard = self.map.lock().expect("guid map mutex poisoned");
        f(&mut guard)
    }
}
