#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `logging` maps the CLI's `-v`/`-q` flag count onto a [`tracing`] max
//! level and installs the global subscriber the `send`/`recv`/`estimate`
//! subcommands emit their structured events through. `engine` and
//! `protocol` both gate their own `tracing::warn!`/`tracing::debug!` calls
//! behind a `tracing` cargo feature; this crate is where the CLI turns that
//! instrumentation into visible output.
//!
//! # Design
//!
//! [`Verbosity`] is a small enum rather than a raw integer so call sites
//! read as intent (`Verbosity::Quiet`) rather than magic numbers. One `-v`
//! occurrence raises it one step; `-q` collapses it to [`Verbosity::Quiet`]
//! outright, matching the way counted flags compose in `clap`.

use std::sync::Once;

/// How much the CLI should report about what it's doing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Only errors.
    Quiet,
    /// Warnings and top-level progress (the default).
    #[default]
    Normal,
    /// Per-record tracing: every applied/emitted record.
    Verbose,
    /// Everything, including per-block cache reads.
    Trace,
}

impl Verbosity {
    /// Maps a `-v` occurrence count to a verbosity step, saturating at
    /// [`Verbosity::Trace`].
    #[must_use]
    pub const fn from_flag_count(count: u8) -> Self {
        match count {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Trace,
        }
    }

    #[cfg(feature = "tracing")]
    const fn level_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            Self::Quiet => tracing::level_filters::LevelFilter::ERROR,
            Self::Normal => tracing::level_filters::LevelFilter::WARN,
            Self::Verbose => tracing::level_filters::LevelFilter::INFO,
            Self::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

static INIT: Once = Once::new();

/// Installs the process-global tracing subscriber at `verbosity`, writing
/// formatted events to stderr. Safe to call more than once; only the first
/// call takes effect, matching `tracing`'s own single-subscriber contract.
#[cfg(feature = "tracing")]
pub fn install(verbosity: Verbosity) {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(verbosity.level_filter())
            .with_writer(std::io::stderr)
            .without_time()
            .init();
    });
}

/// No-op when the `tracing` feature is disabled, so callers don't need to
/// conditionally compile their `install` call.
#[cfg(not(feature = "tracing"))]
pub fn install(_verbosity: Verbosity) {}

#[cfg(test)]
mod tests {
    use super::Verbosity;

    #[test]
    fn flag_count_saturates_at_trace() {
        assert_eq!(Verbosity::from_flag_count(0), Verbosity::Normal);
        assert_eq!(Verbosity::from_flag_count(1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flag_count(2), Verbosity::Trace);
        assert_eq!(Verbosity::from_flag_count(9), Verbosity::Trace);
    }

    #[test]
    fn verbosity_orders_quiet_below_trace() {
        assert!(Verbosity::Quiet < Verbosity::Normal);
        assert!(Verbosity::Normal < Verbosity::Verbose);
        assert!(Verbosity::Verbose < Verbosity::Trace);
    }
}
