//! Pulls record headers and payloads off the stream, verifies the sealing
//! checksum, and dispatches each record to its applier.

use std::io::Read;

use zdstream_core::collaborators::{ObjectStore, SignalSource};
use zdstream_core::{Guid, ReplicationError};

use protocol::record::Record;
use protocol::HEADER_LEN;

use crate::guid_map::CleanupHandle;
use crate::recv::appliers;
use crate::stream::StreamReader;

/// Runs the dispatch loop until an `END` record is consumed and its
/// checksum validated.
///
/// # Errors
///
/// Returns [`ReplicationError::Interrupted`] if `signals` reports a
/// pending interrupt. Returns [`ReplicationError::ChecksumMismatch`] if the
/// `END` record's stored checksum does not match the checksum accumulated
/// over every byte preceding it. Propagates any applier or stream error.
pub fn dispatch_loop<R: Read>(
    reader: &mut StreamReader<R>,
    store: &mut dyn ObjectStore,
    guid_map: Option<&CleanupHandle>,
    signals: &dyn SignalSource,
    to_guid: Guid,
) -> Result<(), ReplicationError> {
    loop {
        if signals.is_interrupted() {
            return Err(ReplicationError::Interrupted("signal pending during receive".into()));
        }

        let pending_checksum = reader.checksum();
        let header_bytes = reader.read_exact(HEADER_LEN)?;
        let record = Record::decode_header(&header_bytes, reader.swap())
            .map_err(|err| ReplicationError::InvalidRecord(err.to_string()))?;

        if record.to_guid() != to_guid {
            return Err(ReplicationError::InvalidRecord(format!(
                "record toguid {} does not match stream toguid {to_guid}",
                record.to_guid()
            )));
        }

        let payload_len = record.payload_len();
        let payload = if payload_len > 0 { Some(reader.read_exact(payload_len)?) } else { None };

        match record {
            Record::Begin(_) => {
                return Err(ReplicationError::InvalidRecord("unexpected second BEGIN mid-stream".into()));
            }
            Record::Object(o) => appliers::apply_object(store, &o, payload.as_deref().unwrap_or(&[]))?,
            Record::FreeObjects(f) => appliers::apply_freeobjects(store, &f)?,
            Record::Write(w) => appliers::apply_write(store, &w, payload.as_deref().unwrap_or(&[]))?,
            Record::WriteByRef(w) => appliers::apply_write_byref(store, &w, guid_map, to_guid)?,
            Record::Free(f) => appliers::apply_free(store, &f)?,
            Record::Spill(s) => appliers::apply_spill(store, &s, payload.as_deref().unwrap_or(&[]))?,
            Record::End(end) => {
                if end.checksum != pending_checksum {
                    return Err(ReplicationError::ChecksumMismatch {
                        expected: end.checksum,
                        computed: pending_checksum,
                    });
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamWriter;
    use crate::testkit::InMemoryObjectStore;
    use zdstream_core::collaborators::NeverInterrupted;
    use zdstream_core::ObjectId;
    use protocol::record::{EndRecord, WriteRecord};

    fn write_record(writer: &mut StreamWriter<Vec<u8>>, record: &Record, payload: Option<&[u8]>) {
        let header = record.encode_header().unwrap();
        writer.write_all(&header).unwrap();
        if let Some(payload) = payload {
            writer.write_all(payload).unwrap();
        }
    }

    #[test]
    fn dispatches_write_then_validates_end_checksum() {
        let mut writer = StreamWriter::new(Vec::new());
        let write = Record::Write(WriteRecord {
            object: ObjectId(7),
            object_type: 1,
            offset: 0,
            length: 8,
            to_guid: Guid(1),
            checksum_type: 0,
            checksum_flags: 0,
            dedup_key: protocol::record::DedupKey::default(),
        });
        write_record(&mut writer, &write, Some(b"abcdefgh"));
        let end = Record::End(EndRecord {
            checksum: writer.checksum(),
            to_guid: Guid(1),
        });
        write_record(&mut writer, &end, None);
        let bytes = writer.into_inner();

        let mut reader = StreamReader::new(bytes.as_slice());
        let mut store = InMemoryObjectStore::new();
        dispatch_loop(&mut reader, &mut store, None, &NeverInterrupted, Guid(1)).unwrap();
    }

    #[test]
    fn corrupted_payload_fails_checksum_at_end() {
        let mut writer = StreamWriter::new(Vec::new());
        let write = Record::Write(WriteRecord {
            object: ObjectId(7),
            object_type: 1,
            offset: 0,
            length: 8,
            to_guid: Guid(1),
            checksum_type: 0,
            checksum_flags: 0,
            dedup_key: protocol::record::DedupKey::default(),
        });
        write_record(&mut writer, &write, Some(b"abcdefgh"));
        let end = Record::End(EndRecord {
            checksum: writer.checksum(),
            to_guid: Guid(1),
        });
        write_record(&mut writer, &end, None);
        let mut bytes = writer.into_inner();
        let flip_at = HEADER_LEN + 2;
        bytes[flip_at] ^= 0xFF;

        let mut reader = StreamReader::new(bytes.as_slice());
        let mut store = InMemoryObjectStore::new();
        let err = dispatch_loop(&mut reader, &mut store, None, &NeverInterrupted, Guid(1)).unwrap_err();
        assert!(matches!(err, ReplicationError::ChecksumMismatch { .. }));
    }
}
