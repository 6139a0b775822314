//! The receive's two-phase commit: snapshot the target, optionally swap in
//! the temp clone, and clean up on any failure since `recv_begin`.

use zdstream_core::collaborators::SnapshotNamespace;
use zdstream_core::{Guid, ReplicationError};

use protocol::record::BeginRecord;

use crate::recv::begin::ReceiveCookie;

/// What a successful receive produced.
#[derive(Clone, Debug)]
pub struct RecvOutcome {
    /// The dataset the stream was materialized into (the original `tofs`,
    /// not the temp clone, once the swap has completed).
    pub dataset: zdstream_core::collaborators::DatasetHandle,
    /// GUID of the newly-created snapshot.
    pub snapshot_guid: Guid,
}

/// Runs the check phase, then the sync phase, of a receive's end
/// sync-task.
///
/// # Errors
///
/// Returns [`ReplicationError::SnapshotExists`] if `cookie.tosnap` was
/// created by a racing operation between `recv_begin` and `recv_end`.
/// Propagates any namespace error. On any error, runs
/// [`recv_cleanup_ds`] before returning.
pub fn recv_end(
    namespace: &mut dyn SnapshotNamespace,
    cookie: &ReceiveCookie,
    begin: &BeginRecord,
    force: bool,
) -> Result<RecvOutcome, ReplicationError> {
    if namespace.snapshot_exists(&cookie.tofs, &cookie.tosnap) {
        recv_cleanup_ds(namespace, cookie);
        return Err(ReplicationError::SnapshotExists(cookie.tosnap.clone()));
    }

    let result = sync(namespace, cookie, begin, force);
    match result {
        Ok(dataset) => Ok(RecvOutcome {
            dataset,
            snapshot_guid: begin.to_guid,
        }),
        Err(err) => {
            recv_cleanup_ds(namespace, cookie);
            Err(err)
        }
    }
}

fn sync(
    namespace: &mut dyn SnapshotNamespace,
    cookie: &ReceiveCookie,
    begin: &BeginRecord,
    force: bool,
) -> Result<zdstream_core::collaborators::DatasetHandle, ReplicationError> {
    if cookie.newfs {
        namespace.snapshot(&cookie.dataset, &cookie.tosnap, begin.creation_time, begin.to_guid)?;
        namespace.clear_inconsistent(&cookie.dataset);
        return Ok(cookie.dataset.clone());
    }

    // The swap moves the clone's materialized contents onto `tofs`'s head
    // identity; the old head's contents end up under the temp-clone name
    // and are destroyed below. Every subsequent operation targets the head,
    // not the clone handle the cookie was created with.
    namespace.clone_swap(&cookie.dataset, force)?;
    let head = zdstream_core::collaborators::DatasetHandle(cookie.tofs.clone());
    namespace.snapshot(&head, &cookie.tosnap, begin.creation_time, begin.to_guid)?;
    namespace.clear_inconsistent(&head);
    namespace.destroy(&cookie.dataset);
    Ok(head)
}

/// Disowns and destroys the cookie's temp/new dataset, undoing everything
/// `recv_begin` set up. Safe to call more than once or on a dataset that
/// was never marked inconsistent.
pub fn recv_cleanup_ds(namespace: &mut dyn SnapshotNamespace, cookie: &ReceiveCookie) {
    namespace.clear_inconsistent(&cookie.dataset);
    namespace.destroy(&cookie.dataset);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recv::begin::recv_begin;
    use crate::testkit::InMemoryNamespace;
    use zdstream_core::Txg;

    fn begin_record() -> BeginRecord {
        BeginRecord {
            magic: protocol::STREAM_MAGIC,
            feature_flags: 0,
            creation_time: 123,
            object_set_type: 2,
            flags: 0,
            to_guid: Guid(6),
            from_guid: Guid(5),
            to_name: "pool/data@snap2".to_owned(),
        }
    }

    #[test]
    fn successful_receive_creates_snapshot_and_clears_inconsistent() {
        let mut ns = InMemoryNamespace::new();
        ns.register_filesystem("pool/data", true, false, Some(Guid(5)), Txg(0), Vec::new());
        let begin = begin_record();
        let cookie = recv_begin(&mut ns, "pool/data", "snap2", &begin, false, None, true).unwrap();
        let outcome = recv_end(&mut ns, &cookie, &begin, false).unwrap();
        assert_eq!(outcome.snapshot_guid, Guid(6));
        assert!(ns.snapshot_exists("pool/data", "snap2"));
    }

    #[test]
    fn racing_snapshot_creation_fails_and_cleans_up() {
        let mut ns = InMemoryNamespace::new();
        ns.register_filesystem("pool/data", true, false, Some(Guid(5)), Txg(0), Vec::new());
        let begin = begin_record();
        let cookie = recv_begin(&mut ns, "pool/data", "snap2", &begin, false, None, true).unwrap();
        ns.snapshot(&zdstream_core::collaborators::DatasetHandle("pool/data".to_owned()), "snap2", 0, Guid(0))
            .unwrap();
        let err = recv_end(&mut ns, &cookie, &begin, false).unwrap_err();
        assert!(matches!(err, ReplicationError::SnapshotExists(_)));
    }
}
