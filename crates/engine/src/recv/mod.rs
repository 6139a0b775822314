//! The receive side of the pipeline: begin eligibility (C6), record
//! dispatch (C7), per-record appliers (C8), and end cleanup (C10).

pub mod appliers;
pub mod begin;
pub mod dispatcher;
pub mod end;

use std::io::Read;

pub use begin::ReceiveCookie;
pub use end::RecvOutcome;

use zdstream_core::collaborators::{ObjectStore, SignalSource, SnapshotNamespace};
use zdstream_core::ReplicationError;

use protocol::record::{BeginRecord, Record};
use protocol::HEADER_LEN;

use crate::guid_map::CleanupHandle;
use crate::stream::StreamReader;

/// Everything `recv` needs that is not readable off the stream itself.
pub struct RecvRequest<'a> {
    /// Target filesystem name.
    pub tofs: &'a str,
    /// Name the new snapshot will take.
    pub tosnap: &'a str,
    /// Apply even if the target has been modified since its last snapshot.
    pub force: bool,
    /// Clone origin, required when `BEGIN::flags::CLONE` is set.
    pub origin: Option<&'a str>,
    /// Whether the pool can service `SA_SPILL`-feature streams.
    pub pool_supports_sa: bool,
}

/// Reads `BEGIN`, runs the begin eligibility checks, dispatches every
/// subsequent record, and runs the end two-phase commit. On any failure
/// after `recv_begin` succeeds, disowns and destroys the partially
/// materialized target before returning the error.
///
/// # Errors
///
/// Propagates any error from the begin checks, the dispatch loop (including
/// [`ReplicationError::ChecksumMismatch`]), or the end commit.
pub fn recv<R: Read>(
    reader: &mut StreamReader<R>,
    namespace: &mut dyn SnapshotNamespace,
    store: &mut dyn ObjectStore,
    guid_map: Option<&CleanupHandle>,
    signals: &dyn SignalSource,
    request: &RecvRequest<'_>,
) -> Result<RecvOutcome, ReplicationError> {
    let begin = read_begin(reader)?;

    let cookie = begin::recv_begin(
        namespace,
        request.tofs,
        request.tosnap,
        &begin,
        request.force,
        request.origin,
        request.pool_supports_sa,
    )?;

    if let Err(err) = dispatcher::dispatch_loop(reader, store, guid_map, signals, begin.to_guid) {
        end::recv_cleanup_ds(namespace, &cookie);
        return Err(err);
    }

    let outcome = end::recv_end(namespace, &cookie, &begin, request.force)?;
    if let Some(map) = guid_map {
        map.with_map(|m| m.insert(outcome.snapshot_guid, outcome.dataset.clone()));
    }
    Ok(outcome)
}

/// Reads the stream's first header, detecting byte-swap from `BEGIN::magic`
/// and arming `reader`'s swap mode before any further record is read.
fn read_begin<R: Read>(reader: &mut StreamReader<R>) -> Result<BeginRecord, ReplicationError> {
    let header_bytes = reader.read_exact(HEADER_LEN)?;

    let native = Record::decode_header(&header_bytes, false);
    if let Ok(Record::Begin(begin)) = &native {
        if begin.magic == protocol::STREAM_MAGIC {
            return Ok(begin.clone());
        }
    }

    let swapped = Record::decode_header(&header_bytes, true).map_err(|err| ReplicationError::InvalidRecord(err.to_string()))?;
    match swapped {
        Record::Begin(begin) if begin.magic == protocol::STREAM_MAGIC => {
            reader.set_swap(true);
            Ok(begin)
        }
        _ => Err(ReplicationError::InvalidRecord("first record is not a recognizable BEGIN".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send::{send, SendRequest};
    use crate::stream::StreamWriter;
    use crate::testkit::{InMemoryNamespace, InMemoryObjectStore, NoOpCache, VecTraversal};
    use zdstream_core::collaborators::NeverInterrupted;
    use zdstream_core::Guid;

    #[test]
    fn full_receive_of_empty_snapshot_creates_snapshot() {
        let mut writer = StreamWriter::new(Vec::new());
        let send_namespace = InMemoryNamespace::default();
        let mut traversal = VecTraversal::new(Vec::new());
        send(
            &mut writer,
            &send_namespace,
            &mut traversal,
            &NoOpCache,
            &NeverInterrupted,
            &SendRequest {
                to_guid: Guid(42),
                from_guid: Guid::NONE,
                to_name: "pool/data@snap".to_owned(),
                object_set_type: 2,
                is_clone: false,
                case_insensitive: false,
                supports_spill: false,
                creation_time: 7,
                callback: crate::send::CallbackConfig::default(),
            },
        )
        .unwrap();
        let bytes = writer.into_inner();

        let mut reader = StreamReader::new(bytes.as_slice());
        let mut recv_namespace = InMemoryNamespace::new();
        recv_namespace.register_filesystem("pool/data", true, false, None, zdstream_core::Txg(0), Vec::new());
        let mut store = InMemoryObjectStore::new();

        let outcome = recv(
            &mut reader,
            &mut recv_namespace,
            &mut store,
            None,
            &NeverInterrupted,
            &RecvRequest {
                tofs: "pool/data",
                tosnap: "snap",
                force: false,
                origin: None,
                pool_supports_sa: true,
            },
        )
        .unwrap();

        assert_eq!(outcome.snapshot_guid, Guid(42));
        assert!(recv_namespace.snapshot_exists("pool/data", "snap"));
    }
}
