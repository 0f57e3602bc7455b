//! `axiomkit_io_dup` v1:
//! Directory duplication with internal reference rewriting.
//!
//! A duplicate is self-contained: every reference token defined inside the
//! copied subtree is replaced by a fresh one, consistently across all files.
//!
//! Modules:
//! - `duplicate`  : orchestrator state machine and async entry point
//! - `walk`       : source tree enumeration into units of work
//! - `index`      : reference index (token -> files)
//! - `copy`       : copy engine (staged, cancellable, progress-reporting)
//! - `rewrite`    : reference map generation and substitution pass
//! - `codec`      : pluggable token grammar (`TokenCodec`) and adapters
//! - `progress`   : progress state, tracker and cancellation context
//! - `postprocess`: steps applied to a completed duplicate
//! - `spec`       : enums/options/errors/outcome
//! - `report`     : run-time report model
//! - `util`       : shared helper functions

pub mod codec;
mod copy;
pub mod duplicate;
pub mod index;
pub mod postprocess;
pub mod progress;
pub mod report;
pub mod rewrite;
pub mod spec;
mod util;
pub mod walk;

pub use codec::{PatternCodec, SpecTokenSpan, TokenCodec, TokenGenerator, UnityGuidCodec};
pub use duplicate::{Duplicator, copy_directory_with_dependencies, duplicate_tree};
pub use index::IndexReference;
pub use postprocess::{PostProcess, RenameText, ReportRename};
pub use progress::{ProgressSink, ProgressState, ProgressTracker, SpecCancelContext};
pub use report::{ReportDuplicate, ReportDuplicateBuilder};
pub use rewrite::ReferenceMap;
pub use spec::{
    DuplicateError, DuplicateOutcome, EnumDupDestinationConflictStrategy, EnumDupPhase,
    EnumDupSymlinkStrategy, SpecDupOptions,
};
pub use util::map_destination_path;
pub use walk::{EnumUnitKind, SpecSourceTree, SpecUnit};
