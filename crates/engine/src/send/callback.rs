//! Turns traversal tuples into aggregator/record calls.

use zdstream_core::collaborators::{BlockCache, BlockKind, TraversalEvent};
use zdstream_core::{Guid, ObjectId, ReplicationError};

use protocol::record::{ObjectRecord, Record, SpillRecord, WriteRecord};
use protocol::round_up_8;

use crate::aggregator::Aggregator;

/// Fixed slot size one dnode occupies within a dnode block, used to
/// convert a freed dnode-block's span into an object-number range.
const DNODE_SIZE: u64 = 512;

/// Repeating 64-bit pattern substituted for an unreadable data block when
/// [`CallbackConfig::corrupt_replacement`] is enabled, rather than failing
/// the whole send.
const CORRUPT_SENTINEL: u64 = 0xdead_beef_dead_beef;

/// Tunables the orchestrator passes down to the traversal callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallbackConfig {
    /// If `true`, an unreadable level-0 data block is replaced with a
    /// fixed sentinel pattern rather than aborting the send with `EIO`.
    pub corrupt_replacement: bool,
}

/// A record the callback wants written to the stream, with its trailing
/// payload bytes when the record kind carries one.
#[derive(Debug)]
pub struct Emission {
    /// The record header to write.
    pub record: Record,
    /// Payload bytes to write immediately after the header, already
    /// padded to the 8-byte alignment `record.payload_len()` reports.
    pub payload: Option<Vec<u8>>,
}

impl Emission {
    const fn header_only(record: Record) -> Self {
        Self { record, payload: None }
    }
}

/// Drives [`Aggregator`] calls from traversal tuples, per the decision
/// table: ignore the object-set's own block and anything above level 0;
/// a missing block becomes a `FREE`/`FREEOBJECTS`; a dnode tuple becomes an
/// `OBJECT` (plus its terminal truncating free); a spill or data tuple is
/// read through the cache and becomes `SPILL`/`WRITE`.
pub struct SendCallback<'a> {
    aggregator: &'a mut Aggregator,
    cache: &'a dyn BlockCache,
    to_guid: Guid,
    config: CallbackConfig,
}

impl<'a> SendCallback<'a> {
    /// Creates a callback emitting records stamped with `to_guid`, reading
    /// block payloads through `cache`.
    pub fn new(
        aggregator: &'a mut Aggregator,
        cache: &'a dyn BlockCache,
        to_guid: Guid,
        config: CallbackConfig,
    ) -> Self {
        Self {
            aggregator,
            cache,
            to_guid,
            config,
        }
    }

    /// Processes one traversal tuple, returning the records (if any) it
    /// produced.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::BlockRead`] if a data block could not
    /// be read and no replacement sentinel was configured.
    pub fn handle(&mut self, event: &TraversalEvent) -> Result<Vec<Emission>, ReplicationError> {
        if matches!(event.kind, BlockKind::ObjSet) {
            return Ok(Vec::new());
        }

        if !event.block_present {
            return Ok(if matches!(event.kind, BlockKind::MetaDnode) {
                let first = event.bookmark.block_id * event.span / DNODE_SIZE;
                let num = event.span / DNODE_SIZE;
                self.aggregator
                    .dump_freeobjects(ObjectId(first), num)
                    .into_iter()
                    .map(Emission::header_only)
                    .collect()
            } else {
                let offset = event.bookmark.block_id * event.span;
                self.aggregator
                    .dump_free(event.bookmark.object, offset, event.span)
                    .into_iter()
                    .map(Emission::header_only)
                    .collect()
            });
        }

        if event.bookmark.level > 0 {
            return Ok(Vec::new());
        }

        match event.kind {
            BlockKind::ObjSet => unreachable!("handled above"),
            BlockKind::DnodeBlock => self.dump_object(event.bookmark.object, event.dnode.as_ref()),
            BlockKind::MetaDnode => Ok(Vec::new()),
            BlockKind::Spill => {
                let data = self.cache.read(event.bookmark.object, 0, event.bookmark.block_id)?;
                Ok(vec![self.dump_spill(event.bookmark.object, data)])
            }
            BlockKind::Data => {
                let data = match self.cache.read(event.bookmark.object, 0, event.bookmark.block_id) {
                    Ok(data) => data,
                    Err(err) if self.config.corrupt_replacement => {
                        let len = usize::try_from(event.span).unwrap_or(usize::MAX);
                        let mut sentinel = Vec::with_capacity(len);
                        while sentinel.len() < len {
                            sentinel.extend_from_slice(&CORRUPT_SENTINEL.to_ne_bytes());
                        }
                        sentinel.truncate(len);
                        tracing_replaced_block(event.bookmark.object, &err);
                        sentinel
                    }
                    Err(err) => {
                        return Err(ReplicationError::BlockRead {
                            object: event.bookmark.object,
                            source: std::io::Error::other(err.to_string()),
                        })
                    }
                };
                let offset = event.bookmark.block_id * event.span;
                Ok(vec![self.dump_data(
                    event.bookmark.object,
                    event.dnode.as_ref().map_or(0, |d| d.object_type),
                    offset,
                    data,
                )])
            }
        }
    }

    fn dump_object(
        &mut self,
        object: ObjectId,
        dnode: Option<&zdstream_core::DnodeInfo>,
    ) -> Result<Vec<Emission>, ReplicationError> {
        let Some(dnode) = dnode else {
            return Ok(self
                .aggregator
                .dump_freeobjects(object, 1)
                .into_iter()
                .map(Emission::header_only)
                .collect());
        };
        if dnode.object_type == 0 {
            return Ok(self
                .aggregator
                .dump_freeobjects(object, 1)
                .into_iter()
                .map(Emission::header_only)
                .collect());
        }

        let mut out: Vec<Emission> = self
            .aggregator
            .flush_pending()
            .into_iter()
            .map(Emission::header_only)
            .collect();

        let bonus_len = u16::try_from(dnode.bonus_buffer.len()).unwrap_or(u16::MAX);
        out.push(Emission {
            record: Record::Object(ObjectRecord {
                object,
                object_type: dnode.object_type,
                bonus_type: dnode.bonus_type,
                block_size: dnode.block_size,
                bonus_len,
                checksum_type: dnode.checksum_type,
                compress_type: dnode.compress_type,
                to_guid: self.to_guid,
            }),
            payload: Some(pad_to_8(&dnode.bonus_buffer)),
        });

        let truncate_at = (dnode.max_block_id + 1) * u64::from(dnode.block_size);
        out.extend(
            self.aggregator
                .dump_free(object, truncate_at, protocol::record::FreeRecord::TO_END)
                .into_iter()
                .map(Emission::header_only),
        );
        Ok(out)
    }

    fn dump_spill(&mut self, object: ObjectId, data: Vec<u8>) -> Emission {
        let flushed = self.aggregator.flush_pending();
        debug_assert!(flushed.is_none(), "flush_pending only returns Some for Free/FreeObjects");
        let length = data.len() as u64;
        Emission {
            record: Record::Spill(SpillRecord {
                object,
                length,
                to_guid: self.to_guid,
            }),
            payload: Some(pad_to_8(&data)),
        }
    }

    fn dump_data(&mut self, object: ObjectId, object_type: u8, offset: u64, data: Vec<u8>) -> Emission {
        let flushed = self.aggregator.flush_pending();
        debug_assert!(flushed.is_none(), "flush_pending only returns Some for Free/FreeObjects");
        let length = data.len() as u64;
        Emission {
            record: Record::Write(WriteRecord {
                object,
                object_type,
                offset,
                length,
                to_guid: self.to_guid,
                checksum_type: 0,
                checksum_flags: 0,
                dedup_key: protocol::record::DedupKey::default(),
            }),
            payload: Some(pad_to_8(&data)),
        }
    }
}

fn pad_to_8(data: &[u8]) -> Vec<u8> {
    let mut padded = data.to_vec();
    padded.resize(round_up_8(padded.len()), 0);
    padded
}

fn tracing_replaced_block(object: ObjectId, err: &ReplicationError) {
    #[cfg(feature = "tracing")]
    tracing::warn!(?object, %err, "replacing unreadable data block with sentinel");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use zdstream_core::collaborators::Bookmark;
    use zdstream_core::DnodeInfo;

    struct FakeCache;
    impl BlockCache for FakeCache {
        fn read(&self, _object: ObjectId, _level: u8, _block_id: u64) -> Result<Vec<u8>, ReplicationError> {
            Ok(vec![0xAB; 4096])
        }
    }

    struct FailingCache;
    impl BlockCache for FailingCache {
        fn read(&self, _object: ObjectId, _level: u8, _block_id: u64) -> Result<Vec<u8>, ReplicationError> {
            Err(ReplicationError::InvalidRecord("boom".into()))
        }
    }

    #[test]
    fn missing_block_becomes_free() {
        let mut agg = Aggregator::new(Guid(1));
        let cache = FakeCache;
        let mut cb = SendCallback::new(&mut agg, &cache, Guid(1), CallbackConfig::default());
        let event = TraversalEvent {
            block_present: false,
            kind: BlockKind::Data,
            bookmark: Bookmark {
                object: ObjectId(5),
                level: 0,
                block_id: 1,
            },
            span: 4096,
            dnode: None,
        };
        let emissions = cb.handle(&event).unwrap();
        assert!(emissions.is_empty(), "first free is deferred");
    }

    #[test]
    fn data_block_emits_write() {
        let mut agg = Aggregator::new(Guid(1));
        let cache = FakeCache;
        let mut cb = SendCallback::new(&mut agg, &cache, Guid(1), CallbackConfig::default());
        let event = TraversalEvent {
            block_present: true,
            kind: BlockKind::Data,
            bookmark: Bookmark {
                object: ObjectId(5),
                level: 0,
                block_id: 0,
            },
            span: 4096,
            dnode: Some(DnodeInfo {
                object_type: 1,
                ..Default::default()
            }),
        };
        let emissions = cb.handle(&event).unwrap();
        assert_eq!(emissions.len(), 1);
        match &emissions[0].record {
            Record::Write(w) => assert_eq!(w.length, 4096),
            other => panic!("unexpected record {other:?}"),
        }
        assert_eq!(emissions[0].payload.as_ref().unwrap().len(), 4096);
    }

    #[test]
    fn unreadable_block_without_replacement_is_eio() {
        let mut agg = Aggregator::new(Guid(1));
        let cache = FailingCache;
        let mut cb = SendCallback::new(&mut agg, &cache, Guid(1), CallbackConfig::default());
        let event = TraversalEvent {
            block_present: true,
            kind: BlockKind::Data,
            bookmark: Bookmark {
                object: ObjectId(5),
                level: 0,
                block_id: 0,
            },
            span: 4096,
            dnode: None,
        };
        let err = cb.handle(&event).unwrap_err();
        assert!(matches!(err, ReplicationError::BlockRead { .. }));
    }

    #[test]
    fn unreadable_block_with_replacement_emits_sentinel() {
        let mut agg = Aggregator::new(Guid(1));
        let cache = FailingCache;
        let mut cb = SendCallback::new(
            &mut agg,
            &cache,
            Guid(1),
            CallbackConfig {
                corrupt_replacement: true,
            },
        );
        let event = TraversalEvent {
            block_present: true,
            kind: BlockKind::Data,
            bookmark: Bookmark {
                object: ObjectId(5),
                level: 0,
                block_id: 0,
            },
            span: 16,
            dnode: None,
        };
        let emissions = cb.handle(&event).unwrap();
        assert_eq!(emissions[0].payload.as_ref().unwrap().len(), 16);
    }
}
