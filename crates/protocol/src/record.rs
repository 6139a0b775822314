//! The `Record` taxonomy: typed headers for every stream record kind, and
//! their encode/decode to and from the fixed 320-byte wire header.

use zdstream_core::{Guid, ObjectId};

use crate::error::CodecError;
use crate::header::{read_u32, read_u64, write_u32, write_u64, HEADER_LEN, PREFIX_LEN};

const TONAME_LEN: usize = 256;

/// Numeric tag written into a header's `type` field, identifying which
/// [`Record`] variant follows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum RecordKind {
    /// See [`Record::Begin`].
    Begin = 1,
    /// See [`Record::Object`].
    Object = 2,
    /// See [`Record::FreeObjects`].
    FreeObjects = 3,
    /// See [`Record::Write`].
    Write = 4,
    /// See [`Record::WriteByRef`].
    WriteByRef = 5,
    /// See [`Record::Free`].
    Free = 6,
    /// See [`Record::Spill`].
    Spill = 7,
    /// See [`Record::End`].
    End = 8,
}

impl RecordKind {
    fn from_tag(tag: u32) -> Result<Self, CodecError> {
        match tag {
            1 => Ok(Self::Begin),
            2 => Ok(Self::Object),
            3 => Ok(Self::FreeObjects),
            4 => Ok(Self::Write),
            5 => Ok(Self::WriteByRef),
            6 => Ok(Self::Free),
            7 => Ok(Self::Spill),
            8 => Ok(Self::End),
            other => Err(CodecError::UnknownRecordType(other)),
        }
    }
}

/// The dedup key attached to a [`WriteRecord`]: the logical/physical/
/// compressed sizes and checksum value the object store would use to
/// recognize this block as a duplicate of one already on the receiving
/// pool.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DedupKey {
    /// Uncompressed size of the block in bytes.
    pub logical_size: u64,
    /// On-disk size of the block in bytes.
    pub physical_size: u64,
    /// Size after compression, before any padding to `physical_size`.
    pub compressed_size: u64,
    /// The block's checksum, in the format `checksum_type` designates.
    pub cksum: [u64; 4],
}

/// First record of every stream. Carries the endianness sentinel and the
/// identity of the snapshot being sent.
#[derive(Clone, Debug, PartialEq)]
pub struct BeginRecord {
    /// [`crate::header::STREAM_MAGIC`] if produced natively, its byte
    /// reversal otherwise.
    pub magic: u64,
    /// Feature bits from [`crate::flags::feature_flags`].
    pub feature_flags: u64,
    /// Wall-clock creation time of `toguid`'s snapshot.
    pub creation_time: u64,
    /// The object-set kind being replicated (filesystem-defined tag).
    pub object_set_type: u32,
    /// Bits from [`crate::flags::begin_flags`].
    pub flags: u32,
    /// GUID of the snapshot this stream recreates.
    pub to_guid: Guid,
    /// GUID of the incremental source snapshot, or [`Guid::NONE`] for a
    /// full send.
    pub from_guid: Guid,
    /// `tofs@tosnap`-style display name of the snapshot being sent.
    pub to_name: String,
}

/// Dnode metadata for one object, optionally followed by its bonus buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectRecord {
    /// The object number.
    pub object: ObjectId,
    /// Object type tag.
    pub object_type: u8,
    /// Bonus buffer type tag.
    pub bonus_type: u8,
    /// Block size in bytes.
    pub block_size: u32,
    /// Bonus buffer length in bytes, before padding to 8 bytes.
    pub bonus_len: u16,
    /// Checksum algorithm index.
    pub checksum_type: u8,
    /// Compression algorithm index.
    pub compress_type: u8,
    /// GUID of the snapshot this record belongs to.
    pub to_guid: Guid,
}

/// A run of consecutive object numbers that no longer exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FreeObjectsRecord {
    /// The first freed object number.
    pub first_object: ObjectId,
    /// The count of consecutive objects freed, starting at `first_object`.
    pub num_objects: u64,
    /// GUID of the snapshot this record belongs to.
    pub to_guid: Guid,
}

/// A literal data write, with its trailing `length`-byte payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WriteRecord {
    /// The object being written.
    pub object: ObjectId,
    /// Object type tag (revalidated against the object's dnode on apply).
    pub object_type: u8,
    /// Byte offset within the object.
    pub offset: u64,
    /// Payload length in bytes; always `> 0`.
    pub length: u64,
    /// GUID of the snapshot this record belongs to.
    pub to_guid: Guid,
    /// Checksum algorithm index used by `dedup_key`.
    pub checksum_type: u8,
    /// Bits from [`crate::flags::write_flags`].
    pub checksum_flags: u32,
    /// Dedup matching key for this block.
    pub dedup_key: DedupKey,
}

/// A write whose payload is not inlined but copied from a previously
/// received snapshot, resolved through the GUID map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteByRefRecord {
    /// The object being written.
    pub object: ObjectId,
    /// Byte offset within the destination object.
    pub offset: u64,
    /// Number of bytes to copy.
    pub length: u64,
    /// GUID of the snapshot this record belongs to.
    pub to_guid: Guid,
    /// GUID of the snapshot the source data was received into.
    pub ref_guid: Guid,
    /// Source object number within `ref_guid`'s object-set.
    pub ref_object: ObjectId,
    /// Source byte offset within `ref_object`.
    pub ref_offset: u64,
}

/// A free of `length` bytes at `offset` within `object`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FreeRecord {
    /// The object being freed from.
    pub object: ObjectId,
    /// Byte offset within the object.
    pub offset: u64,
    /// Number of bytes to free; `u64::MAX` means "to the end of the
    /// object".
    pub length: u64,
    /// GUID of the snapshot this record belongs to.
    pub to_guid: Guid,
}

impl FreeRecord {
    /// The sentinel `length` meaning "free through the end of the object".
    pub const TO_END: u64 = u64::MAX;
}

/// A spill-block replacement, with its trailing `length`-byte payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpillRecord {
    /// The object whose spill block is being replaced.
    pub object: ObjectId,
    /// Payload length in bytes.
    pub length: u64,
    /// GUID of the snapshot this record belongs to.
    pub to_guid: Guid,
}

/// Final record of every stream: the sealing checksum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EndRecord {
    /// Fletcher-4 digest over every byte of the stream preceding this
    /// record's header.
    pub checksum: [u64; 4],
    /// GUID of the snapshot this record belongs to.
    pub to_guid: Guid,
}

/// One record of a send/receive stream.
///
/// `Write`, `Spill`, and `Object` carry a `payload_len()` that the caller
/// must read/write as raw bytes immediately following the 320-byte header
/// this type encodes; every other variant is self-contained.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// See [`BeginRecord`].
    Begin(BeginRecord),
    /// See [`ObjectRecord`]. Payload is the bonus buffer, `round_up_8(bonus_len)` bytes.
    Object(ObjectRecord),
    /// See [`FreeObjectsRecord`].
    FreeObjects(FreeObjectsRecord),
    /// See [`WriteRecord`]. Payload is `length` bytes of data.
    Write(WriteRecord),
    /// See [`WriteByRefRecord`].
    WriteByRef(WriteByRefRecord),
    /// See [`FreeRecord`].
    Free(FreeRecord),
    /// See [`SpillRecord`]. Payload is `length` bytes of data.
    Spill(SpillRecord),
    /// See [`EndRecord`].
    End(EndRecord),
}

impl Record {
    /// The number of trailing raw payload bytes this record carries beyond
    /// its fixed header, already rounded up to the 8-byte alignment the
    /// wire format requires.
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        match self {
            Self::Object(o) => crate::header::round_up_8(o.bonus_len as usize),
            Self::Write(w) => crate::header::round_up_8(w.length as usize),
            Self::Spill(s) => crate::header::round_up_8(s.length as usize),
            _ => 0,
        }
    }

    /// The `toguid` every record carries, used to detect a mis-spliced
    /// stream.
    #[must_use]
    pub const fn to_guid(&self) -> Guid {
        match self {
            Self::Begin(r) => r.to_guid,
            Self::Object(r) => r.to_guid,
            Self::FreeObjects(r) => r.to_guid,
            Self::Write(r) => r.to_guid,
            Self::WriteByRef(r) => r.to_guid,
            Self::Free(r) => r.to_guid,
            Self::Spill(r) => r.to_guid,
            Self::End(r) => r.to_guid,
        }
    }

    /// Encodes the fixed header into a 320-byte buffer. Does not include
    /// the variable-length payload a `Write`/`Spill`/`Object` carries.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::StringTooLong`] if `BeginRecord::to_name`
    /// exceeds its fixed slot.
    pub fn encode_header(&self) -> Result<[u8; HEADER_LEN], CodecError> {
        let mut buf = [0u8; HEADER_LEN];
        let kind = match self {
            Self::Begin(_) => RecordKind::Begin,
            Self::Object(_) => RecordKind::Object,
            Self::FreeObjects(_) => RecordKind::FreeObjects,
            Self::Write(_) => RecordKind::Write,
            Self::WriteByRef(_) => RecordKind::WriteByRef,
            Self::Free(_) => RecordKind::Free,
            Self::Spill(_) => RecordKind::Spill,
            Self::End(_) => RecordKind::End,
        };
        write_u32(&mut buf, 0, kind as u32);
        write_u32(&mut buf, 4, self.payload_len() as u32);
        let body = &mut buf[PREFIX_LEN..];
        match self {
            Self::Begin(r) => encode_begin(r, body)?,
            Self::Object(r) => encode_object(r, body),
            Self::FreeObjects(r) => encode_freeobjects(r, body),
            Self::Write(r) => encode_write(r, body),
            Self::WriteByRef(r) => encode_write_byref(r, body),
            Self::Free(r) => encode_free(r, body),
            Self::Spill(r) => encode_spill(r, body),
            Self::End(r) => encode_end(r, body),
        }
        Ok(buf)
    }

    /// Decodes a 320-byte header buffer. `swap` must be `true` once the
    /// stream's `BEGIN` record has established that the stream was
    /// produced on the opposite endianness.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownRecordType`] if the header's type tag
    /// is not one of the eight known kinds, [`CodecError::ShortHeader`] if
    /// `buf` is shorter than [`HEADER_LEN`], or a field-specific decode
    /// error.
    pub fn decode_header(buf: &[u8], swap: bool) -> Result<Self, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::ShortHeader { len: buf.len() });
        }
        let tag = read_u32(buf, 0, swap);
        let kind = RecordKind::from_tag(tag)?;
        let body = &buf[PREFIX_LEN..HEADER_LEN];
        Ok(match kind {
            RecordKind::Begin => Self::Begin(decode_begin(body, swap)?),
            RecordKind::Object => Self::Object(decode_object(body, swap)),
            RecordKind::FreeObjects => Self::FreeObjects(decode_freeobjects(body, swap)),
            RecordKind::Write => Self::Write(decode_write(body, swap)),
            RecordKind::WriteByRef => Self::WriteByRef(decode_write_byref(body, swap)),
            RecordKind::Free => Self::Free(decode_free(body, swap)),
            RecordKind::Spill => Self::Spill(decode_spill(body, swap)),
            RecordKind::End => Self::End(decode_end(body, swap)),
        })
    }
}

fn encode_begin(r: &BeginRecord, body: &mut [u8]) -> Result<(), CodecError> {
    write_u64(body, 0, r.magic);
    write_u64(body, 8, r.feature_flags);
    write_u64(body, 16, r.creation_time);
    write_u32(body, 24, r.object_set_type);
    write_u32(body, 28, r.flags);
    write_u64(body, 32, r.to_guid.0);
    write_u64(body, 40, r.from_guid.0);
    let name_bytes = r.to_name.as_bytes();
    if name_bytes.len() >= TONAME_LEN {
        return Err(CodecError::StringTooLong {
            field: "to_name",
            max: TONAME_LEN - 1,
        });
    }
    let slot = &mut body[48..48 + TONAME_LEN];
    slot[..name_bytes.len()].copy_from_slice(name_bytes);
    Ok(())
}

fn decode_begin(body: &[u8], swap: bool) -> Result<BeginRecord, CodecError> {
    let name_slot = &body[48..48 + TONAME_LEN];
    let nul_at = name_slot.iter().position(|&b| b == 0).unwrap_or(name_slot.len());
    let to_name = std::str::from_utf8(&name_slot[..nul_at])
        .map_err(|_| CodecError::InvalidUtf8 { field: "to_name" })?
        .to_owned();
    Ok(BeginRecord {
        magic: read_u64(body, 0, swap),
        feature_flags: read_u64(body, 8, swap),
        creation_time: read_u64(body, 16, swap),
        object_set_type: read_u32(body, 24, swap),
        flags: read_u32(body, 28, swap),
        to_guid: Guid(read_u64(body, 32, swap)),
        from_guid: Guid(read_u64(body, 40, swap)),
        to_name,
    })
}

fn encode_object(r: &ObjectRecord, body: &mut [u8]) {
    write_u64(body, 0, r.object.0);
    body[8] = r.object_type;
    body[9] = r.bonus_type;
    write_u32(body, 12, r.block_size);
    write_u32(body, 16, u32::from(r.bonus_len));
    body[20] = r.checksum_type;
    body[21] = r.compress_type;
    write_u64(body, 24, r.to_guid.0);
}

fn decode_object(body: &[u8], swap: bool) -> ObjectRecord {
    ObjectRecord {
        object: ObjectId(read_u64(body, 0, swap)),
        object_type: body[8],
        bonus_type: body[9],
        block_size: read_u32(body, 12, swap),
        bonus_len: read_u32(body, 16, swap) as u16,
        checksum_type: body[20],
        compress_type: body[21],
        to_guid: Guid(read_u64(body, 24, swap)),
    }
}

fn encode_freeobjects(r: &FreeObjectsRecord, body: &mut [u8]) {
    write_u64(body, 0, r.first_object.0);
    write_u64(body, 8, r.num_objects);
    write_u64(body, 16, r.to_guid.0);
}

fn decode_freeobjects(body: &[u8], swap: bool) -> FreeObjectsRecord {
    FreeObjectsRecord {
        first_object: ObjectId(read_u64(body, 0, swap)),
        num_objects: read_u64(body, 8, swap),
        to_guid: Guid(read_u64(body, 16, swap)),
    }
}

fn encode_write(r: &WriteRecord, body: &mut [u8]) {
    write_u64(body, 0, r.object.0);
    body[8] = r.object_type;
    write_u64(body, 16, r.offset);
    write_u64(body, 24, r.length);
    write_u64(body, 32, r.to_guid.0);
    body[40] = r.checksum_type;
    write_u32(body, 44, r.checksum_flags);
    write_u64(body, 48, r.dedup_key.logical_size);
    write_u64(body, 56, r.dedup_key.physical_size);
    write_u64(body, 64, r.dedup_key.compressed_size);
    for (i, word) in r.dedup_key.cksum.iter().enumerate() {
        write_u64(body, 72 + i * 8, *word);
    }
}

fn decode_write(body: &[u8], swap: bool) -> WriteRecord {
    let mut cksum = [0u64; 4];
    for (i, word) in cksum.iter_mut().enumerate() {
        *word = read_u64(body, 72 + i * 8, swap);
    }
    WriteRecord {
        object: ObjectId(read_u64(body, 0, swap)),
        object_type: body[8],
        offset: read_u64(body, 16, swap),
        length: read_u64(body, 24, swap),
        to_guid: Guid(read_u64(body, 32, swap)),
        checksum_type: body[40],
        checksum_flags: read_u32(body, 44, swap),
        dedup_key: DedupKey {
            logical_size: read_u64(body, 48, swap),
            physical_size: read_u64(body, 56, swap),
            compressed_size: read_u64(body, 64, swap),
            cksum,
        },
    }
}

fn encode_write_byref(r: &WriteByRefRecord, body: &mut [u8]) {
    write_u64(body, 0, r.object.0);
    write_u64(body, 8, r.offset);
    write_u64(body, 16, r.length);
    write_u64(body, 24, r.to_guid.0);
    write_u64(body, 32, r.ref_guid.0);
    write_u64(body, 40, r.ref_object.0);
    write_u64(body, 48, r.ref_offset);
}

fn decode_write_byref(body: &[u8], swap: bool) -> WriteByRefRecord {
    WriteByRefRecord {
        object: ObjectId(read_u64(body, 0, swap)),
        offset: read_u64(body, 8, swap),
        length: read_u64(body, 16, swap),
        to_guid: Guid(read_u64(body, 24, swap)),
        ref_guid: Guid(read_u64(body, 32, swap)),
        ref_object: ObjectId(read_u64(body, 40, swap)),
        ref_offset: read_u64(body, 48, swap),
    }
}

fn encode_free(r: &FreeRecord, body: &mut [u8]) {
    write_u64(body, 0, r.object.0);
    write_u64(body, 8, r.offset);
    write_u64(body, 16, r.length);
    write_u64(body, 24, r.to_guid.0);
}

fn decode_free(body: &[u8], swap: bool) -> FreeRecord {
    FreeRecord {
        object: ObjectId(read_u64(body, 0, swap)),
        offset: read_u64(body, 8, swap),
        length: read_u64(body, 16, swap),
        to_guid: Guid(read_u64(body, 24, swap)),
    }
}

fn encode_spill(r: &SpillRecord, body: &mut [u8]) {
    write_u64(body, 0, r.object.0);
    write_u64(body, 8, r.length);
    write_u64(body, 16, r.to_guid.0);
}

fn decode_spill(body: &[u8], swap: bool) -> SpillRecord {
    SpillRecord {
        object: ObjectId(read_u64(body, 0, swap)),
        length: read_u64(body, 8, swap),
        to_guid: Guid(read_u64(body, 16, swap)),
    }
}

fn encode_end(r: &EndRecord, body: &mut [u8]) {
    for (i, word) in r.checksum.iter().enumerate() {
        write_u64(body, i * 8, *word);
    }
    write_u64(body, 32, r.to_guid.0);
}

fn decode_end(body: &[u8], swap: bool) -> EndRecord {
    let mut checksum = [0u64; 4];
    for (i, word) in checksum.iter_mut().enumerate() {
        *word = read_u64(body, i * 8, swap);
    }
    EndRecord {
        checksum,
        to_guid: Guid(read_u64(body, 32, swap)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_roundtrips_through_header() {
        let begin = Record::Begin(BeginRecord {
            magic: crate::header::STREAM_MAGIC,
            feature_flags: crate::flags::feature_flags::SA_SPILL,
            creation_time: 42,
            object_set_type: 2,
            flags: crate::flags::begin_flags::CI_DATA,
            to_guid: Guid(7),
            from_guid: Guid::NONE,
            to_name: "pool/data@snap".to_owned(),
        });
        let encoded = begin.encode_header().unwrap();
        let decoded = Record::decode_header(&encoded, false).unwrap();
        assert_eq!(begin, decoded);
    }

    #[test]
    fn write_roundtrips_and_reports_payload_len() {
        let write = Record::Write(WriteRecord {
            object: ObjectId(5),
            object_type: 1,
            offset: 0,
            length: 4096,
            to_guid: Guid(9),
            checksum_type: 2,
            checksum_flags: 0,
            dedup_key: DedupKey::default(),
        });
        assert_eq!(write.payload_len(), 4096);
        let encoded = write.encode_header().unwrap();
        let decoded = Record::decode_header(&encoded, false).unwrap();
        assert_eq!(write, decoded);
    }

    #[test]
    fn byteswapped_roundtrip_matches_native() {
        let end = Record::End(EndRecord {
            checksum: [1, 2, 3, 4],
            to_guid: Guid(99),
        });
        let mut encoded = end.encode_header().unwrap();
        // Flip the type tag to its byte-reversed form, as a swapped sender would write it.
        let native_tag = u32::from_le_bytes(encoded[0..4].try_into().unwrap());
        encoded[0..4].copy_from_slice(&native_tag.swap_bytes().to_le_bytes());
        for chunk in encoded[PREFIX_LEN..].chunks_exact_mut(8) {
            let word = u64::from_le_bytes(chunk.try_into().unwrap());
            chunk.copy_from_slice(&word.swap_bytes().to_le_bytes());
        }
        let decoded = Record::decode_header(&encoded, true).unwrap();
        assert_eq!(end, decoded);
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let buf = [0u8; HEADER_LEN];
        let err = Record::decode_header(&buf, false).unwrap_err();
        assert_eq!(err, CodecError::UnknownRecordType(0));
    }

    #[test]
    fn oversized_to_name_is_rejected() {
        let begin = Record::Begin(BeginRecord {
            magic: crate::header::STREAM_MAGIC,
            feature_flags: 0,
            creation_time: 0,
            object_set_type: 0,
            flags: 0,
            to_guid: Guid(1),
            from_guid: Guid::NONE,
            to_name: "x".repeat(TONAME_LEN),
        });
        assert!(matches!(
            begin.encode_header(),
            Err(CodecError::StringTooLong { field: "to_name", .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn write_record_roundtrips_for_any_fields(
            object in proptest::prelude::any::<u64>(),
            offset in proptest::prelude::any::<u64>(),
            length in 1u64..=8192,
            to_guid in proptest::prelude::any::<u64>(),
            checksum_type in proptest::prelude::any::<u8>(),
            checksum_flags in proptest::prelude::any::<u32>(),
        ) {
            let write = Record::Write(WriteRecord {
                object: ObjectId(object),
                object_type: 1,
                offset,
                length,
                to_guid: Guid(to_guid),
                checksum_type,
                checksum_flags,
                dedup_key: DedupKey::default(),
            });
            let encoded = write.encode_header().unwrap();
            let decoded = Record::decode_header(&encoded, false).unwrap();
            proptest::prop_assert_eq!(write, decoded);
        }

        #[test]
        fn free_record_roundtrips_byteswapped(
            object in proptest::prelude::any::<u64>(),
            offset in proptest::prelude::any::<u64>(),
            length in proptest::prelude::any::<u64>(),
            to_guid in proptest::prelude::any::<u64>(),
        ) {
            let free = Record::Free(FreeRecord {
                object: ObjectId(object),
                offset,
                length,
                to_guid: Guid(to_guid),
            });
            let mut encoded = free.encode_header().unwrap();
            let native_tag = u32::from_le_bytes(encoded[0..4].try_into().unwrap());
            encoded[0..4].copy_from_slice(&native_tag.swap_bytes().to_le_bytes());
            for chunk in encoded[PREFIX_LEN..].chunks_exact_mut(8) {
                let word = u64::from_le_bytes(chunk.try_into().unwrap());
                chunk.copy_from_slice(&word.swap_bytes().to_le_bytes());
            }
            let decoded = Record::decode_header(&encoded, true).unwrap();
            proptest::prop_assert_eq!(free, decoded);
        }
    }
}
