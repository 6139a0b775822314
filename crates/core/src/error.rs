use std::io;

/// Errors surfaced across the send/receive boundary.
///
/// Each variant's doc comment names the POSIX-style errno the upstream
/// object-store protocol reports it as, since callers outside this crate
/// (CLI exit codes, daemon RPC responses) still need that mapping.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// `EXDEV` — the requested `from` snapshot is not an ancestor of `to`.
    #[error("{from} is not an ancestor of {to}")]
    NotAnAncestor {
        /// The snapshot that was asked to be treated as the incremental base.
        from: crate::Guid,
        /// The snapshot being sent.
        to: crate::Guid,
    },

    /// `EINVAL` — a malformed header, an out-of-range subcode, or an
    /// offset/length pair that would overflow.
    #[error("invalid stream record: {0}")]
    InvalidRecord(String),

    /// `ENODEV` — the incremental source's GUID was not found in the
    /// target's snapshot lineage.
    #[error("fromguid {0} not found in target lineage")]
    LineageNotFound(crate::Guid),

    /// `ETXTBSY` — the target has changes since its last snapshot and
    /// `force` was not requested.
    #[error("target has been modified since its last snapshot")]
    TargetModified,

    /// `EEXIST` — the target snapshot name already exists.
    #[error("snapshot {0} already exists")]
    SnapshotExists(String),

    /// `EBUSY` — the `%recv` temporary clone already exists.
    #[error("temporary receive clone already exists for {0}")]
    RecvCloneExists(String),

    /// `ENOENT` — a non-clone incremental receive targets an absent
    /// filesystem.
    #[error("target filesystem {0} does not exist")]
    TargetMissing(String),

    /// `ENOTSUP` — the stream uses a feature the receiving pool cannot
    /// implement.
    #[error("unsupported stream feature: {0}")]
    UnsupportedFeature(String),

    /// `EIO` — a data block could not be read and no replacement sentinel
    /// was configured.
    #[error("I/O error reading block for object {object}: {source}")]
    BlockRead {
        /// The object number the unreadable block belonged to.
        object: crate::ObjectId,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// `ECKSUM` — the stream-level Fletcher-4 digest did not match the
    /// value recorded in the `END` record.
    #[error("stream checksum mismatch: expected {expected:?}, computed {computed:?}")]
    ChecksumMismatch {
        /// The checksum the sender wrote into the `END` record.
        expected: [u64; 4],
        /// The checksum the receiver accumulated while parsing.
        computed: [u64; 4],
    },

    /// `EBADF` — a deduplicated stream was received without a valid
    /// cleanup handle to anchor the GUID map's lifetime.
    #[error("dedup stream requires a cleanup handle")]
    MissingCleanupHandle,

    /// `EINTR` — the operation was interrupted by a pending signal, or the
    /// underlying stream write/read was short or failed.
    #[error("operation interrupted: {0}")]
    Interrupted(String),

    /// `EOPNOTSUPP` — the operation has no implementation in this
    /// environment (e.g. no kernel I/O path available).
    #[error("operation not supported in this environment: {0}")]
    NotSupportedHere(String),

    /// Any I/O failure not otherwise classified above, propagated from the
    /// stream handle or the object store.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A [`checksums::ChecksumError`] surfaced while folding stream bytes.
    #[error(transparent)]
    Checksum(#[from] checksums::ChecksumError),
}

impl ReplicationError {
    /// Returns the conventional short errno-style tag for this error, as
    /// used in log lines and CLI diagnostics.
    #[must_use]
    pub const fn errno_tag(&self) -> &'static str {
        match self {
            Self::NotAnAncestor { .. } => "EXDEV",
            Self::InvalidRecord(_) => "EINVAL",
            Self::LineageNotFound(_) => "ENODEV",
            Self::TargetModified => "ETXTBSY",
            Self::SnapshotExists(_) => "EEXIST",
            Self::RecvCloneExists(_) => "EBUSY",
            Self::TargetMissing(_) => "ENOENT",
            Self::UnsupportedFeature(_) => "ENOTSUP",
            Self::BlockRead { .. } => "EIO",
            Self::ChecksumMismatch { .. } => "ECKSUM",
            Self::MissingCleanupHandle => "EBADF",
            Self::Interrupted(_) => "EINTR",
            Self::NotSupportedHere(_) => "EOPNOTSUPP",
            Self::Io(_) => "EIO",
            Self::Checksum(_) => "EINVAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_tag_matches_taxonomy() {
        let err = ReplicationError::TargetModified;
        assert_eq!(err.errno_tag(), "ETXTBSY");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = io::Error::new(io::ErrorKind::Other, "boom");
        let err: ReplicationError = io_err.into();
        assert_eq!(err.errno_tag(), "EIO");
    }

    const KNOWN_ERRNO_TAGS: &[&str] = &[
        "EXDEV", "EINVAL", "ENODEV", "ETXTBSY", "EEXIST", "EBUSY", "ENOENT", "ENOTSUP", "EIO",
        "ECKSUM", "EBADF", "EINTR", "EOPNOTSUPP",
    ];

    proptest::proptest! {
        #[test]
        fn errno_tag_is_always_a_known_tag(message in ".*") {
            let variants = [
                ReplicationError::InvalidRecord(message.clone()),
                ReplicationError::SnapshotExists(message.clone()),
                ReplicationError::RecvCloneExists(message.clone()),
                ReplicationError::TargetMissing(message.clone()),
                ReplicationError::UnsupportedFeature(message.clone()),
                ReplicationError::Interrupted(message.clone()),
                ReplicationError::NotSupportedHere(message),
            ];
            for err in &variants {
                proptest::prop_assert!(KNOWN_ERRNO_TAGS.contains(&err.errno_tag()));
            }
        }
    }
}
