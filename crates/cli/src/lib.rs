#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `cli` is the command-line front-end over [`engine`]'s send/receive
//! pipeline. It has no binding to a real storage pool: `send` walks a
//! directory of files into an in-memory object-set via
//! [`engine::testkit`], and `recv` writes a stream back out into a
//! directory the same way. This makes the whole pipeline — traversal,
//! wire framing, Fletcher-4 sealing, record dispatch, two-phase commit —
//! exercisable end to end from a terminal without a real filesystem
//! binding.
//!
//! # Design
//!
//! [`run`] takes its arguments, stdout, and stderr as parameters rather
//! than reading `std::env`/writing the real streams directly, so tests can
//! drive it in-process. [`exit_code_from`] maps the `i32` `run` returns
//! onto a [`std::process::ExitCode`] for `main`.

mod error;
mod snapshot_dir;

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use zdstream_core::collaborators::NeverInterrupted;
use zdstream_core::Guid;

use engine::recv::{recv, RecvRequest};
use engine::send::{send, SendRequest, CallbackConfig};
use engine::stream::{StreamReader, StreamWriter};
use engine::testkit::{InMemoryNamespace, InMemoryObjectStore, VecTraversal};

use error::CliError;
use logging::Verbosity;

#[derive(Parser)]
#[command(name = "zdstream", version, about = "ZFS-style send/receive stream engine")]
struct Cli {
    /// Increase logging verbosity; repeat for more (`-v`, `-vv`).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Suppress all but error-level logging.
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serializes a directory into a send stream on stdout (or `--output`).
    Send {
        /// Directory to serialize.
        source: PathBuf,
        /// Name recorded in the stream's BEGIN record, e.g. `pool/data@snap`.
        #[arg(long, default_value = "pool/data@snap")]
        name: String,
        /// Write the stream here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Applies a send stream (from stdin or `--input`) into a directory.
    Recv {
        /// Directory the stream's files are materialized into.
        destination: PathBuf,
        /// Target filesystem name the stream's `BEGIN` record names, e.g.
        /// `pool/data`.
        #[arg(long, default_value = "pool/data")]
        tofs: String,
        /// Name the new snapshot takes.
        #[arg(long, default_value = "snap")]
        tosnap: String,
        /// Read the stream from here instead of stdin.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Reports the estimated stream size for a directory without sending it.
    Estimate {
        /// Directory to estimate.
        source: PathBuf,
    },
}

/// Parses `arguments`, runs the requested subcommand, and returns a process
/// exit status (`0` on success, a POSIX errno-style code on failure).
///
/// Help and version output go to `stdout`; usage errors and subcommand
/// failures go to `stderr`.
pub fn run<I, S, Out, Err>(arguments: I, mut stdout: Out, mut stderr: Err) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString> + Clone,
    Out: Write,
    Err: Write,
{
    let cli = match Cli::try_parse_from(arguments) {
        Ok(cli) => cli,
        Err(err) => {
            let is_info = matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let target: &mut dyn Write = if is_info { &mut stdout } else { &mut stderr };
            let _ = write!(target, "{err}");
            return err.exit_code();
        }
    };

    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else {
        Verbosity::from_flag_count(cli.verbose)
    };
    logging::install(verbosity);

    let result = match cli.command {
        Command::Send { source, name, output } => run_send(&source, &name, output.as_deref(), &mut stdout),
        Command::Recv { destination, tofs, tosnap, input } => {
            run_recv(&destination, &tofs, &tosnap, input.as_deref(), &mut stdout)
        }
        Command::Estimate { source } => run_estimate(&source, &mut stdout),
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            let _ = writeln!(stderr, "error: {err}");
            err.exit_code()
        }
    }
}

/// Maps a `run` status code onto a process [`std::process::ExitCode`].
#[must_use]
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    u8::try_from(status).map_or(std::process::ExitCode::FAILURE, std::process::ExitCode::from)
}

fn run_send(source: &std::path::Path, name: &str, output: Option<&std::path::Path>, stdout: &mut dyn Write) -> Result<(), CliError> {
    let plan = snapshot_dir::build_send_plan(source)?;
    tracing::info!(files = plan.file_count, "serializing directory");

    let namespace = InMemoryNamespace::new();
    let mut traversal = VecTraversal::new(plan.events);
    let request = SendRequest {
        to_guid: plan.to_guid,
        from_guid: Guid::NONE,
        to_name: name.to_owned(),
        object_set_type: 2,
        is_clone: false,
        case_insensitive: false,
        supports_spill: false,
        creation_time: 0,
        callback: CallbackConfig::default(),
    };

    let bytes = match output {
        Some(path) => {
            let file = std::fs::File::create(path).map_err(|err| CliError::io(path.to_path_buf(), err))?;
            let mut writer = StreamWriter::new(std::io::BufWriter::new(file));
            send(&mut writer, &namespace, &mut traversal, &plan.cache, &NeverInterrupted, &request)?;
            return Ok(());
        }
        None => {
            let mut writer = StreamWriter::new(Vec::new());
            send(&mut writer, &namespace, &mut traversal, &plan.cache, &NeverInterrupted, &request)?;
            writer.into_inner()
        }
    };

    stdout.write_all(&bytes).map_err(|err| CliError::io(PathBuf::from("<stdout>"), err))?;
    Ok(())
}

fn run_recv(
    destination: &std::path::Path,
    tofs: &str,
    tosnap: &str,
    input: Option<&std::path::Path>,
    stdout: &mut dyn Write,
) -> Result<(), CliError> {
    let mut namespace = InMemoryNamespace::new();
    namespace.register_filesystem(tofs, true, false, None, zdstream_core::Txg(0), Vec::new());
    let mut store = InMemoryObjectStore::new();

    let request = RecvRequest {
        tofs,
        tosnap,
        force: false,
        origin: None,
        pool_supports_sa: true,
    };

    let outcome = match input {
        Some(path) => {
            let file = std::fs::File::open(path).map_err(|err| CliError::io(path.to_path_buf(), err))?;
            let mut reader = StreamReader::new(std::io::BufReader::new(file));
            recv(&mut reader, &mut namespace, &mut store, None, &NeverInterrupted, &request)?
        }
        None => {
            let stdin = std::io::stdin();
            let mut reader = StreamReader::new(stdin.lock());
            recv(&mut reader, &mut namespace, &mut store, None, &NeverInterrupted, &request)?
        }
    };

    std::fs::create_dir_all(destination).map_err(|err| CliError::io(destination.to_path_buf(), err))?;
    let written = snapshot_dir::materialize(&store, destination)?;
    tracing::info!(files = written, snapshot = %outcome.snapshot_guid, "materialized receive");
    writeln!(stdout, "received {} into {} ({} files)", outcome.snapshot_guid, destination.display(), written)
        .map_err(|err| CliError::io(PathBuf::from("<stdout>"), err))?;
    Ok(())
}

fn run_estimate(source: &std::path::Path, stdout: &mut dyn Write) -> Result<(), CliError> {
    let plan = snapshot_dir::build_send_plan(source)?;
    let bytes_changed: u64 = plan
        .events
        .iter()
        .filter(|event| event.kind == zdstream_core::BlockKind::Data)
        .map(|event| event.span)
        .sum();
    let estimate = engine::send::send_estimate(bytes_changed, snapshot_dir::RECORD_SIZE, 128);
    writeln!(stdout, "{estimate}").map_err(|err| CliError::io(PathBuf::from("<stdout>"), err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_flag_reports_success() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = run(["zdstream", "--version"], &mut out, &mut err);
        assert_eq!(status, 0);
        assert!(!out.is_empty());
    }

    #[test]
    fn missing_source_directory_reports_failure() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = run(["zdstream", "send", "/no/such/directory"], &mut out, &mut err);
        assert_ne!(status, 0);
        assert!(!err.is_empty());
    }

    #[test]
    fn round_trips_a_directory_through_send_and_recv() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"hello world").unwrap();
        let stream_path = source.path().join("stream.bin");

        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = run(
            [
                "zdstream".to_owned(),
                "send".to_owned(),
                source.path().to_string_lossy().into_owned(),
                "--output".to_owned(),
                stream_path.to_string_lossy().into_owned(),
            ],
            &mut out,
            &mut err,
        );
        assert_eq!(status, 0, "send failed: {}", String::from_utf8_lossy(&err));

        let dest = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = run(
            [
                "zdstream".to_owned(),
                "recv".to_owned(),
                dest.path().to_string_lossy().into_owned(),
                "--input".to_owned(),
                stream_path.to_string_lossy().into_owned(),
            ],
            &mut out,
            &mut err,
        );
        assert_eq!(status, 0, "recv failed: {}", String::from_utf8_lossy(&err));

        let roundtripped = std::fs::read(dest.path().join("a.txt")).unwrap();
        assert_eq!(roundtripped, b"hello world");
    }
}
