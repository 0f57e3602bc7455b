//! Duplication options, policy enums, top-level errors and the terminal outcome.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::report::ReportDuplicate;

////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// Existing destination root policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumDupDestinationConflictStrategy {
    /// Fail with `InvalidDestination` when the destination root is non-empty.
    Error,
    /// Reuse existing directories; fail when a copied file would land on an existing file.
    Merge,
    /// Reuse existing directories and atomically replace colliding files.
    Overwrite,
}

/// Symlink handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumDupSymlinkStrategy {
    /// Recreate the link at destination. Counted as one file unit, never rewritten.
    CopySymlinks,
    /// Ignore symlink entries (a warning is recorded).
    SkipSymlinks,
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumDupPhase {
    #[default]
    Idle,
    Scanning,
    Copying,
    Rewriting,
    Completed,
    Cancelled,
    Failed,
}

impl EnumDupPhase {
    /// `true` for `Completed`, `Cancelled` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StructsAndErrors

/// Input options for `duplicate_tree` / `copy_directory_with_dependencies`.
#[derive(Debug, Clone)]
pub struct SpecDupOptions {
    /// Behavior when the destination root already exists and is non-empty.
    pub rule_conflict_dest: EnumDupDestinationConflictStrategy,
    /// Symlink handling behavior.
    pub rule_symlink: EnumDupSymlinkStrategy,
    /// Glob patterns applied to entry basenames; matches are left out of the duplicate.
    pub patterns_exclude: Option<Vec<String>>,
    /// Maximum worker threads for the per-file stages (scan, copy, rewrite).
    pub num_workers_max: Option<usize>,
    /// Copy permissions, timestamps and xattrs onto copied files.
    pub if_preserve_metadata: bool,
}

impl Default for SpecDupOptions {
    fn default() -> Self {
        Self {
            rule_conflict_dest: EnumDupDestinationConflictStrategy::Error,
            rule_symlink: EnumDupSymlinkStrategy::CopySymlinks,
            patterns_exclude: None,
            num_workers_max: None,
            if_preserve_metadata: true,
        }
    }
}

/// Unrecovered failure of one duplication run.
#[derive(Debug, Error)]
pub enum DuplicateError {
    /// Source file or directory could not be read.
    #[error("Failed to scan {}: {source}", .path.display())]
    ScanFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Destination file or directory could not be written.
    #[error("Failed to copy into {}: {source}", .path.display())]
    CopyFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Token substitution could not be written back.
    #[error("Failed to rewrite references in {}: {source}", .path.display())]
    RewriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Destination path escapes the root or collides with existing data.
    #[error("Invalid destination {}: {reason}", .path.display())]
    InvalidDestination { path: PathBuf, reason: String },
    /// Source path is not a directory.
    #[error("Source is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),
    /// Invalid glob/regex pattern or rename text.
    #[error("{0}")]
    InvalidPattern(String),
    /// Token generator kept producing values already present in the namespace.
    #[error("Failed to generate a unique replacement for token `{0}`")]
    TokenCollision(String),
    /// Background task died before producing an outcome.
    #[error("Duplication task aborted: {0}")]
    TaskAborted(String),
}

impl DuplicateError {
    pub(crate) fn invalid_destination(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidDestination {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Terminal value of one duplication run.
#[derive(Debug)]
pub enum DuplicateOutcome {
    /// Destination fully populated and self-referential.
    Completed(ReportDuplicate),
    /// Cancellation observed; destination holds exactly the committed units.
    Cancelled(ReportDuplicate),
    /// Pipeline aborted; destination left as-is.
    Failed {
        error: DuplicateError,
        report: ReportDuplicate,
    },
}

impl DuplicateOutcome {
    /// Counters gathered up to the terminal state.
    pub fn report(&self) -> &ReportDuplicate {
        match self {
            Self::Completed(report) | Self::Cancelled(report) => report,
            Self::Failed { report, .. } => report,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Failure cause, if any.
    pub fn error(&self) -> Option<&DuplicateError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Terminal phase this outcome corresponds to.
    pub fn phase(&self) -> EnumDupPhase {
        match self {
            Self::Completed(_) => EnumDupPhase::Completed,
            Self::Cancelled(_) => EnumDupPhase::Cancelled,
            Self::Failed { .. } => EnumDupPhase::Failed,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
