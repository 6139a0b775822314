//! CLI-level error type and its mapping onto process exit codes.

use std::io;

/// Everything a subcommand can fail with.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// A filesystem operation on the local snapshot directory failed.
    #[error("{path}: {source}")]
    Io {
        /// The path the failing operation was scoped to.
        path: std::path::PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The engine's send or receive pipeline reported an error.
    #[error(transparent)]
    Replication(#[from] zdstream_core::ReplicationError),
    /// A path argument did not point at what the subcommand expected.
    #[error("{0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Wraps an I/O error with the path that produced it.
    pub fn io(path: impl Into<std::path::PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Maps this error onto a process exit code, following the errno the
    /// matching [`zdstream_core::ReplicationError`] variant names (or `EIO`/`EINVAL`
    /// for CLI-local failures that never reach the engine).
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io { .. } => 5,           // EIO
            Self::InvalidArgument(_) => 22, // EINVAL
            Self::Replication(err) => replication_exit_code(err),
        }
    }
}

/// Maps [`zdstream_core::ReplicationError::errno_tag`] onto the numeric errno a
/// POSIX shell would see in `$?`. `ECKSUM` has no standard errno across
/// hosts, so it falls back to `1`.
fn replication_exit_code(err: &zdstream_core::ReplicationError) -> i32 {
    match err.errno_tag() {
        "EXDEV" => 18,
        "EINVAL" => 22,
        "ENODEV" => 19,
        "ETXTBSY" => 26,
        "EEXIST" => 17,
        "EBUSY" => 16,
        "ENOENT" => 2,
        "ENOTSUP" | "EOPNOTSUPP" => 95,
        "EIO" => 5,
        "EBADF" => 9,
        "EINTR" => 4,
        _ => 1, // ECKSUM and anything unrecognized
    }
}
