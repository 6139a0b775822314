//! Per-record-type transactional application against the object store.

use zdstream_core::collaborators::{DatasetHandle, DnodeInfo, ObjectStore, StagedOp};
use zdstream_core::{Guid, ObjectId, ReplicationError};

use protocol::record::{FreeObjectsRecord, FreeRecord, ObjectRecord, SpillRecord, WriteByRefRecord, WriteRecord};

use crate::guid_map::CleanupHandle;

/// Applies an `OBJECT` record: claims a fresh object or reclaims an
/// existing one, copying in its bonus buffer.
pub fn apply_object(store: &mut dyn ObjectStore, record: &ObjectRecord, payload: &[u8]) -> Result<(), ReplicationError> {
    let bonus_len = record.bonus_len as usize;
    if payload.len() < bonus_len {
        return Err(ReplicationError::InvalidRecord("OBJECT payload shorter than bonus_len".into()));
    }
    let info = DnodeInfo {
        object_type: record.object_type,
        bonus_type: record.bonus_type,
        block_size: record.block_size,
        bonus_len: record.bonus_len,
        checksum_type: record.checksum_type,
        compress_type: record.compress_type,
        max_block_id: 0,
        bonus_buffer: payload[..bonus_len].to_vec(),
    };

    let op = if store.object_exists(record.object) {
        StagedOp::ObjectReclaim(record.object, info)
    } else {
        StagedOp::ObjectClaim(record.object, info)
    };
    let mut tx = store.begin_tx()?;
    tx.stage(op);
    tx.commit(store)
}

/// Applies a `FREEOBJECTS` record: frees every existing object in the
/// range, skipping ones that are already absent.
pub fn apply_freeobjects(store: &mut dyn ObjectStore, record: &FreeObjectsRecord) -> Result<(), ReplicationError> {
    let end = record
        .first_object
        .0
        .checked_add(record.num_objects)
        .ok_or_else(|| ReplicationError::InvalidRecord("FREEOBJECTS range overflows".into()))?;

    let mut tx = store.begin_tx()?;
    for object in record.first_object.0..end {
        let object = ObjectId(object);
        if store.object_exists(object) {
            tx.stage(StagedOp::FreeObject(object));
        }
    }
    tx.commit(store)
}

/// Applies a `WRITE` record: writes its payload at `offset` within
/// `object`.
pub fn apply_write(store: &mut dyn ObjectStore, record: &WriteRecord, payload: &[u8]) -> Result<(), ReplicationError> {
    record
        .offset
        .checked_add(record.length)
        .ok_or_else(|| ReplicationError::InvalidRecord("WRITE offset+length overflows".into()))?;
    let length = usize::try_from(record.length).map_err(|_| ReplicationError::InvalidRecord("WRITE length too large".into()))?;
    if payload.len() < length {
        return Err(ReplicationError::InvalidRecord("WRITE payload shorter than length".into()));
    }

    let mut tx = store.begin_tx()?;
    tx.stage(StagedOp::Write(record.object, record.offset, payload[..length].to_vec()));
    tx.commit(store)
}

/// Applies a `WRITE_BYREF` record: resolves `ref_guid` (via the current
/// object-set or the GUID map) and copies its bytes into `object`.
pub fn apply_write_byref(
    store: &mut dyn ObjectStore,
    record: &WriteByRefRecord,
    guid_map: Option<&CleanupHandle>,
    to_guid: Guid,
) -> Result<(), ReplicationError> {
    let resolved = resolve_ref_guid(record.ref_guid, to_guid, guid_map)?;
    let data = store.read_ref(resolved, record.ref_object, record.ref_offset, record.length)?;

    let mut tx = store.begin_tx()?;
    tx.stage(StagedOp::Write(record.object, record.offset, data));
    tx.commit(store)
}

fn resolve_ref_guid(ref_guid: Guid, to_guid: Guid, guid_map: Option<&CleanupHandle>) -> Result<Guid, ReplicationError> {
    if ref_guid == to_guid {
        return Ok(ref_guid);
    }
    let map = guid_map.ok_or(ReplicationError::MissingCleanupHandle)?;
    let known = map.with_map(|m| m.get(ref_guid).map(|entry| entry.dataset.clone()));
    known
        .map(|_: DatasetHandle| ref_guid)
        .ok_or_else(|| ReplicationError::InvalidRecord(format!("refguid {ref_guid} not in the GUID map")))
}

/// Applies a `FREE` record: frees `length` bytes at `offset`, or to the
/// end of the object when `length == `[`FreeRecord::TO_END`].
pub fn apply_free(store: &mut dyn ObjectStore, record: &FreeRecord) -> Result<(), ReplicationError> {
    if record.length != FreeRecord::TO_END {
        record
            .offset
            .checked_add(record.length)
            .ok_or_else(|| ReplicationError::InvalidRecord("FREE offset+length overflows".into()))?;
    }
    let mut tx = store.begin_tx()?;
    tx.stage(StagedOp::FreeRange(record.object, record.offset, record.length));
    tx.commit(store)
}

/// Applies a `SPILL` record: replaces `object`'s spill block.
pub fn apply_spill(store: &mut dyn ObjectStore, record: &SpillRecord, payload: &[u8]) -> Result<(), ReplicationError> {
    let length = usize::try_from(record.length).map_err(|_| ReplicationError::InvalidRecord("SPILL length too large".into()))?;
    if payload.len() < length {
        return Err(ReplicationError::InvalidRecord("SPILL payload shorter than length".into()));
    }
    let mut tx = store.begin_tx()?;
    tx.stage(StagedOp::WriteSpill(record.object, payload[..length].to_vec()));
    tx.commit(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::InMemoryObjectStore;

    #[test]
    fn apply_object_then_write_round_trips() {
        let mut store = InMemoryObjectStore::new();
        let object_record = ObjectRecord {
            object: ObjectId(1),
            object_type: 1,
            block_size: 4096,
            ..Default::default()
        };
        apply_object(&mut store, &object_record, &[]).unwrap();
        let write_record = WriteRecord {
            object: ObjectId(1),
            object_type: 1,
            offset: 0,
            length: 5,
            to_guid: Guid(1),
            checksum_type: 0,
            checksum_flags: 0,
            dedup_key: protocol::record::DedupKey::default(),
        };
        apply_write(&mut store, &write_record, b"hello").unwrap();
        assert_eq!(store.read_all(ObjectId(1), 5), b"hello");
    }

    #[test]
    fn freeobjects_skips_missing_objects() {
        let mut store = InMemoryObjectStore::new();
        let record = FreeObjectsRecord {
            first_object: ObjectId(10),
            num_objects: 5,
            to_guid: Guid(1),
        };
        apply_freeobjects(&mut store, &record).unwrap();
    }

    #[test]
    fn write_byref_without_map_for_foreign_guid_is_missing_cleanup_handle() {
        let record = WriteByRefRecord {
            object: ObjectId(1),
            offset: 0,
            length: 4,
            to_guid: Guid(1),
            ref_guid: Guid(99),
            ref_object: ObjectId(2),
            ref_offset: 0,
        };
        let mut store = InMemoryObjectStore::new();
        let err = apply_write_byref(&mut store, &record, None, Guid(1)).unwrap_err();
        assert!(matches!(err, ReplicationError::MissingCleanupHandle));
    }
}
