//! Coalesces adjacent `FREE` and `FREEOBJECTS` records before they reach
//! the wire.

use zdstream_core::{Guid, ObjectId};

use protocol::record::{FreeObjectsRecord, FreeRecord, Record};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingOp {
    None,
    Free { object: ObjectId, offset: u64, length: u64 },
    FreeObjects { first: ObjectId, num: u64 },
}

/// The tagged `{None, Free, FreeObjects}` state machine deferring at most
/// one record at a time. Only the current variant can be extended; any
/// other incoming record type first flushes it.
pub struct Aggregator {
    to_guid: Guid,
    pending: PendingOp,
}

impl Aggregator {
    /// Creates an aggregator emitting records stamped with `to_guid`.
    #[must_use]
    pub const fn new(to_guid: Guid) -> Self {
        Self {
            to_guid,
            pending: PendingOp::None,
        }
    }

    /// Records a free of `length` bytes at `offset` within `object`.
    /// `length == u64::MAX` ("to the end of the object") is never
    /// deferred: it flushes any pending op and is returned for immediate
    /// emission.
    ///
    /// Returns, in order, the previously pending record if one had to be
    /// flushed, followed by the new record if it could not be deferred.
    pub fn dump_free(&mut self, object: ObjectId, offset: u64, length: u64) -> Vec<Record> {
        let mut out = Vec::with_capacity(2);
        if let PendingOp::Free {
            object: pobj,
            offset: poff,
            length: plen,
        } = self.pending
        {
            if pobj == object && poff + plen == offset && length != FreeRecord::TO_END {
                self.pending = PendingOp::Free {
                    object,
                    offset: poff,
                    length: plen + length,
                };
                return out;
            }
        }
        if let Some(flushed) = self.flush_pending() {
            out.push(flushed);
        }
        if length == FreeRecord::TO_END {
            out.push(Record::Free(FreeRecord {
                object,
                offset,
                length,
                to_guid: self.to_guid,
            }));
        } else {
            self.pending = PendingOp::Free { object, offset, length };
        }
        out
    }

    /// Records a free of `num` consecutive object numbers starting at
    /// `first`.
    ///
    /// Returns the previously pending record if one had to be flushed.
    pub fn dump_freeobjects(&mut self, first: ObjectId, num: u64) -> Option<Record> {
        if let PendingOp::FreeObjects { first: pfirst, num: pnum } = self.pending {
            if pfirst.0 + pnum == first.0 {
                self.pending = PendingOp::FreeObjects {
                    first: pfirst,
                    num: pnum + num,
                };
                return None;
            }
        }
        let flushed = self.flush_pending();
        self.pending = PendingOp::FreeObjects { first, num };
        flushed
    }

    /// Flushes any pending record so a non-aggregating record (`OBJECT`,
    /// `WRITE`, `SPILL`, `BEGIN`, `END`) can be emitted in its place.
    pub fn flush_pending(&mut self) -> Option<Record> {
        match std::mem::replace(&mut self.pending, PendingOp::None) {
            PendingOp::None => None,
            PendingOp::Free { object, offset, length } => Some(Record::Free(FreeRecord {
                object,
                offset,
                length,
                to_guid: self.to_guid,
            })),
            PendingOp::FreeObjects { first, num } => Some(Record::FreeObjects(FreeObjectsRecord {
                first_object: first,
                num_objects: num,
                to_guid: self.to_guid,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_frees_merge() {
        let mut agg = Aggregator::new(Guid(1));
        assert!(agg.dump_free(ObjectId(1), 0, 100).is_empty());
        assert!(agg.dump_free(ObjectId(1), 100, 50).is_empty());
        let flushed = agg.flush_pending().unwrap();
        match flushed {
            Record::Free(f) => {
                assert_eq!(f.offset, 0);
                assert_eq!(f.length, 150);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn non_adjacent_free_flushes_first() {
        let mut agg = Aggregator::new(Guid(1));
        assert!(agg.dump_free(ObjectId(1), 0, 100).is_empty());
        let out = agg.dump_free(ObjectId(1), 500, 10);
        assert_eq!(out.len(), 1);
        match &out[0] {
            Record::Free(f) => assert_eq!(f.length, 100),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn free_to_end_never_defers() {
        let mut agg = Aggregator::new(Guid(1));
        let out = agg.dump_free(ObjectId(1), 0, FreeRecord::TO_END);
        assert_eq!(out.len(), 1);
        match &out[0] {
            Record::Free(f) => assert_eq!(f.length, FreeRecord::TO_END),
            other => panic!("unexpected record {other:?}"),
        }
        assert!(agg.flush_pending().is_none());
    }

    #[test]
    fn freeobjects_merge_and_flush_on_type_change() {
        let mut agg = Aggregator::new(Guid(1));
        assert!(agg.dump_freeobjects(ObjectId(10), 10).is_none());
        assert!(agg.dump_freeobjects(ObjectId(20), 6).is_none());
        let out = agg.dump_free(ObjectId(1), 0, 1);
        assert_eq!(out.len(), 1);
        match &out[0] {
            Record::FreeObjects(f) => {
                assert_eq!(f.first_object, ObjectId(10));
                assert_eq!(f.num_objects, 16);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    proptest::proptest! {
        #[test]
        fn freeobjects_aggregation_matches_unsplit_total(
            first in proptest::prelude::any::<u32>(),
            splits in proptest::collection::vec(1u64..=20, 1..10),
        ) {
            let first = ObjectId(u64::from(first));
            let mut agg = Aggregator::new(Guid(1));
            let mut next = first;
            let mut total = 0u64;
            for &n in &splits {
                agg.dump_freeobjects(next, n);
                next = ObjectId(next.0 + n);
                total += n;
            }
            let flushed = agg.flush_pending().unwrap();
            match flushed {
                Record::FreeObjects(f) => {
                    proptest::prop_assert_eq!(f.first_object, first);
                    proptest::prop_assert_eq!(f.num_objects, total);
                }
                other => panic!("unexpected record {other:?}"),
            }
        }

        #[test]
        fn free_aggregation_matches_unsplit_total(
            object in proptest::prelude::any::<u64>(),
            base_offset in 0u64..1_000_000,
            splits in proptest::collection::vec(1u64..=4096, 1..10),
        ) {
            let object = ObjectId(object);
            let mut agg = Aggregator::new(Guid(1));
            let mut offset = base_offset;
            let mut total = 0u64;
            for &len in &splits {
                agg.dump_free(object, offset, len);
                offset += len;
                total += len;
            }
            let flushed = agg.flush_pending().unwrap();
            match flushed {
                Record::Free(f) => {
                    proptest::prop_assert_eq!(f.object, object);
                    proptest::prop_assert_eq!(f.offset, base_offset);
                    proptest::prop_assert_eq!(f.length, total);
                }
                other => panic!("unexpected record {other:?}"),
            }
        }
    }
}
