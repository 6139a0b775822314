//! Maps a local directory tree onto the engine's traversal/cache
//! collaborators for `send`, and back from a completed
//! [`engine::testkit::InMemoryObjectStore`] onto a directory tree for
//! `recv`.
//!
//! There is no real pool backing this demo: every send/recv invocation of
//! the CLI runs against `engine::testkit`'s in-memory [`ObjectStore`] and
//! [`SnapshotNamespace`]. A production binding would implement those traits
//! against a real storage layer instead; this module exists to exercise the
//! engine end to end against real files without needing one.

use std::path::{Path, PathBuf};

use zdstream_core::collaborators::{Bookmark, DnodeInfo};
use zdstream_core::{BlockKind, Guid, ObjectId, TraversalEvent};

use checksums::Fletcher4;
use engine::testkit::{InMemoryObjectStore, MapCache};

use crate::error::CliError;

/// Block size each file is chunked into, mirroring a copy-on-write
/// filesystem's default record size.
pub const RECORD_SIZE: u64 = 128 * 1024;

/// Everything [`engine::send::send`] needs to serialize a directory: the
/// traversal tuples in path order, the cache backing their payloads, and a
/// content-derived GUID for the stream's `BEGIN` record.
pub struct SendPlan {
    /// Traversal events for every file under the snapshot directory.
    pub events: Vec<TraversalEvent>,
    /// Block payloads keyed by `(object, block_id)`.
    pub cache: MapCache,
    /// Content-derived GUID for this snapshot.
    pub to_guid: Guid,
    /// Number of files included in the plan.
    pub file_count: usize,
}

/// Walks `dir` and builds a [`SendPlan`] covering every regular file in it.
///
/// # Errors
///
/// Returns [`CliError::Io`] if `dir` cannot be walked or a file cannot be
/// read.
pub fn build_send_plan(dir: &Path) -> Result<SendPlan, CliError> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut events = Vec::new();
    let mut cache = MapCache::new();
    let mut manifest = Fletcher4::new();

    for (index, (relative, absolute)) in files.iter().enumerate() {
        let object = ObjectId(index as u64 + 1);
        let data = std::fs::read(absolute).map_err(|err| CliError::io(absolute.clone(), err))?;
        fold_bytes(&mut manifest, relative.as_bytes());
        fold_bytes(&mut manifest, &data);

        let num_blocks = data.len().div_ceil(RECORD_SIZE as usize);
        let max_block_id = num_blocks.saturating_sub(1) as u64;
        let bonus_buffer = encode_bonus(data.len() as u64, relative);
        let info = DnodeInfo {
            object_type: 1,
            bonus_type: 0,
            block_size: RECORD_SIZE as u32,
            bonus_len: u16::try_from(bonus_buffer.len()).unwrap_or(u16::MAX),
            checksum_type: 0,
            compress_type: 0,
            max_block_id,
            bonus_buffer,
        };

        events.push(TraversalEvent {
            block_present: true,
            kind: BlockKind::DnodeBlock,
            bookmark: Bookmark { object, level: 0, block_id: 0 },
            span: RECORD_SIZE,
            dnode: Some(info.clone()),
        });

        for block_id in 0..num_blocks as u64 {
            let start = (block_id * RECORD_SIZE) as usize;
            let end = (start + RECORD_SIZE as usize).min(data.len());
            cache.insert(object, block_id, data[start..end].to_vec());
            events.push(TraversalEvent {
                block_present: true,
                kind: BlockKind::Data,
                bookmark: Bookmark { object, level: 0, block_id },
                span: RECORD_SIZE,
                dnode: Some(info.clone()),
            });
        }
    }

    let to_guid = Guid(guid_from_manifest(&manifest));
    Ok(SendPlan {
        events,
        cache,
        to_guid,
        file_count: files.len(),
    })
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<(), CliError> {
    let entries = std::fs::read_dir(dir).map_err(|err| CliError::io(dir.to_path_buf(), err))?;
    for entry in entries {
        let entry = entry.map_err(|err| CliError::io(dir.to_path_buf(), err))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|err| CliError::io(path.clone(), err))?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.push((relative, path));
        }
    }
    Ok(())
}

fn fold_bytes(manifest: &mut Fletcher4, raw: &[u8]) {
    let mut bytes = raw.to_vec();
    bytes.resize(protocol::round_up_8(bytes.len()), 0);
    // `round_up_8` guarantees a multiple of 4 too, Fletcher-4's alignment.
    let _ = manifest.update_native(&bytes);
}

/// Packs a file's byte length and relative path into a dnode's bonus
/// buffer: an 8-byte big-endian length prefix followed by the UTF-8 path.
/// The length prefix lets [`materialize`] recover the exact file size
/// without depending on block-count arithmetic (which cannot distinguish
/// an empty file from a one-block file).
fn encode_bonus(len: u64, relative: &str) -> Vec<u8> {
    let mut buffer = len.to_be_bytes().to_vec();
    buffer.extend_from_slice(relative.as_bytes());
    buffer
}

fn decode_bonus(bonus: &[u8]) -> Result<(u64, String), CliError> {
    if bonus.len() < 8 {
        return Err(CliError::InvalidArgument("object bonus buffer too short for a length prefix".into()));
    }
    let (len_bytes, path_bytes) = bonus.split_at(8);
    let len = u64::from_be_bytes(len_bytes.try_into().expect("split_at(8) yields 8 bytes"));
    let relative = String::from_utf8(path_bytes.to_vec())
        .map_err(|_| CliError::InvalidArgument("object bonus buffer path is not valid UTF-8".into()))?;
    Ok((len, relative))
}

fn guid_from_manifest(manifest: &Fletcher4) -> u64 {
    let [a, b, c, d] = manifest.value();
    let folded = a ^ b ^ c ^ d;
    if folded == 0 {
        1
    } else {
        folded
    }
}

/// Materializes every object in `store` into `dir`, using each object's
/// bonus buffer as its relative path.
///
/// # Errors
///
/// Returns [`CliError::Io`] if a destination file or its parent directory
/// could not be created, or [`CliError::InvalidArgument`] if an object's
/// bonus buffer is not valid UTF-8.
pub fn materialize(store: &InMemoryObjectStore, dir: &Path) -> Result<usize, CliError> {
    let mut written = 0;
    for object in store.objects() {
        let Some(info) = store.info(object) else { continue };
        let (len, relative) = decode_bonus(&info.bonus_buffer)?;
        let data = store.read_all(object, len as usize);

        let dest = dir.join(&relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|err| CliError::io(parent.to_path_buf(), err))?;
        }
        std::fs::write(&dest, &data).map_err(|err| CliError::io(dest.clone(), err))?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_files_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let plan = build_send_plan(dir.path()).unwrap();
        assert_eq!(plan.file_count, 2);
    }

    #[test]
    fn guid_is_stable_for_identical_content() {
        let dir1 = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();
        std::fs::write(dir1.path().join("file.txt"), b"hello").unwrap();
        std::fs::write(dir2.path().join("file.txt"), b"hello").unwrap();
        let plan1 = build_send_plan(dir1.path()).unwrap();
        let plan2 = build_send_plan(dir2.path()).unwrap();
        assert_eq!(plan1.to_guid, plan2.to_guid);
    }
}
