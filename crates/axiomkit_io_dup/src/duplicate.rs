//! Orchestrator: drives scan, copy and rewrite to exactly one terminal outcome.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use crate::codec::{TokenCodec, UnityGuidCodec};
use crate::copy::{SpecCopyCounters, copy_units};
use crate::index::scan_references;
use crate::progress::{ProgressState, ProgressTracker, SpecCancelContext, StageResult, StageStop};
use crate::report::{ReportDuplicate, ReportDuplicateBuilder};
use crate::rewrite::{SpecRewriteCounters, build_reference_map, rewrite_references};
use crate::spec::{
    DuplicateError, DuplicateOutcome, EnumDupDestinationConflictStrategy, EnumDupPhase,
    SpecDupOptions,
};
use crate::util::{
    SpecWorkerPool, calculate_worker_limit, check_destination_root, compile_globs, is_overlap,
};
use crate::walk::walk_source_tree;

/// One duplication run.
///
/// Single-shot: [`Duplicator::run`] consumes the instance. Phases advance
/// `Idle -> Scanning -> Copying -> Rewriting` and end in `Completed`,
/// `Cancelled` or `Failed`. The rewrite pass only starts after every unit was
/// copied, so a cancelled or failed run never holds half-renamed references.
pub struct Duplicator {
    path_dir_src: PathBuf,
    path_dir_dst: PathBuf,
    codec: Arc<dyn TokenCodec>,
    spec_dup_options: SpecDupOptions,
    cancel: SpecCancelContext,
    tracker: Arc<ProgressTracker>,
}

impl Duplicator {
    pub fn new<P, Q>(dir_source: P, dir_destination: Q, codec: Arc<dyn TokenCodec>) -> Self
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        Self {
            path_dir_src: dir_source.as_ref().to_path_buf(),
            path_dir_dst: dir_destination.as_ref().to_path_buf(),
            codec,
            spec_dup_options: SpecDupOptions::default(),
            cancel: SpecCancelContext::default(),
            tracker: Arc::new(ProgressTracker::new(None)),
        }
    }

    pub fn with_options(mut self, spec_dup_options: SpecDupOptions) -> Self {
        self.spec_dup_options = spec_dup_options;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = SpecCancelContext::new(Some(token));
        self
    }

    /// Install the progress sink. Replaces any tracker handed out before.
    pub fn with_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(ProgressState) + Send + Sync + 'static,
    {
        self.tracker = Arc::new(ProgressTracker::new(Some(Arc::new(on_progress))));
        self
    }

    /// Shared handle for polling progress while the run is in flight.
    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.tracker)
    }

    /// Drive the run to completion on the current thread.
    pub fn run(self) -> DuplicateOutcome {
        log::info!(
            "Duplicating {} -> {} (codec={})",
            self.path_dir_src.display(),
            self.path_dir_dst.display(),
            self.codec.name()
        );
        let mut builder = ReportDuplicateBuilder::default();
        // A panicking stage still ends in `Failed` with the counters reached so far.
        let res_stages = catch_unwind(AssertUnwindSafe(|| self.run_stages(&mut builder)))
            .unwrap_or_else(|payload| {
                Err(DuplicateError::TaskAborted(describe_panic(payload.as_ref())).into())
            });
        builder.extend_warnings(self.tracker.take_warnings());

        match res_stages {
            Ok(()) => {
                self.enter_phase(&mut builder, EnumDupPhase::Completed);
                let report = builder.build();
                log::info!("{report}");
                DuplicateOutcome::Completed(report)
            }
            Err(StageStop::Cancelled) => {
                self.enter_phase(&mut builder, EnumDupPhase::Cancelled);
                let report = builder.build();
                log::info!("{report}");
                DuplicateOutcome::Cancelled(report)
            }
            Err(StageStop::Failed(error)) => {
                log::error!("Duplication failed in {:?}: {error}", builder.phase());
                self.enter_phase(&mut builder, EnumDupPhase::Failed);
                DuplicateOutcome::Failed {
                    error,
                    report: builder.build(),
                }
            }
        }
    }

    /// Run on tokio's blocking pool so the caller's task keeps running.
    pub async fn run_async(self) -> DuplicateOutcome {
        match tokio::task::spawn_blocking(move || self.run()).await {
            Ok(outcome) => outcome,
            Err(e) => DuplicateOutcome::Failed {
                error: DuplicateError::TaskAborted(e.to_string()),
                report: ReportDuplicate {
                    phase: EnumDupPhase::Failed,
                    ..ReportDuplicate::default()
                },
            },
        }
    }

    fn enter_phase(&self, builder: &mut ReportDuplicateBuilder, phase: EnumDupPhase) {
        log::info!("Phase {:?} -> {:?}", builder.phase(), phase);
        builder.set_phase(phase);
    }

    fn run_stages(&self, builder: &mut ReportDuplicateBuilder) -> StageResult<()> {
        let path_dir_src = self.path_dir_src.as_path();
        let path_dir_dst = self.path_dir_dst.as_path();
        let spec_dup_options = &self.spec_dup_options;
        let codec = self.codec.as_ref();

        self.enter_phase(builder, EnumDupPhase::Scanning);
        if !path_dir_src.is_dir() {
            return Err(DuplicateError::SourceNotDirectory(path_dir_src.to_path_buf()).into());
        }
        if is_overlap(path_dir_src, path_dir_dst) {
            return Err(DuplicateError::invalid_destination(
                path_dir_dst,
                format!(
                    "Source {} and destination overlap",
                    path_dir_src.display()
                ),
            )
            .into());
        }
        let set_globs_exclude = compile_globs(spec_dup_options.patterns_exclude.as_deref())?;
        let if_allow_non_empty =
            spec_dup_options.rule_conflict_dest != EnumDupDestinationConflictStrategy::Error;
        if check_destination_root(path_dir_dst, if_allow_non_empty)? {
            log::debug!("Destination root {} already exists", path_dir_dst.display());
        }

        let mut warnings = Vec::new();
        let worker_pool = SpecWorkerPool::new(
            calculate_worker_limit(spec_dup_options.num_workers_max),
            &mut warnings,
        );
        builder.extend_warnings(warnings);

        self.cancel.check()?;
        let tree = walk_source_tree(
            path_dir_src,
            spec_dup_options.rule_symlink,
            set_globs_exclude.as_ref(),
            &self.cancel,
        )?;
        builder.extend_warnings(tree.warnings.iter().cloned());
        builder.set_units_total(tree.n_units());
        self.tracker.set_total(tree.n_units());

        let index = scan_references(&tree, codec, &worker_pool, &self.cancel)?;
        self.cancel.check()?;

        self.enter_phase(builder, EnumDupPhase::Copying);
        let counters_cp = SpecCopyCounters::default();
        let res_copy = copy_units(
            &tree,
            path_dir_dst,
            spec_dup_options,
            &worker_pool,
            &self.tracker,
            &self.cancel,
            &counters_cp,
        );
        builder.add_dirs_created(counters_cp.cnt_dirs_created.load(Ordering::Relaxed));
        builder.add_files_copied(counters_cp.cnt_files_copied.load(Ordering::Relaxed));
        res_copy?;

        // Past this point the destination is complete; cancellation is no longer honoured.
        self.enter_phase(builder, EnumDupPhase::Rewriting);
        let map_refs = build_reference_map(&index, codec)?;
        builder.add_tokens_remapped(map_refs.len() as u64);
        let counters_rw = SpecRewriteCounters::default();
        let res_rewrite = rewrite_references(
            path_dir_src,
            path_dir_dst,
            &index,
            &map_refs,
            codec,
            &worker_pool,
            &counters_rw,
        );
        builder.add_files_rewritten(
            counters_rw.cnt_files_rewritten.load(Ordering::Relaxed),
            counters_rw.cnt_refs_rewritten.load(Ordering::Relaxed),
        );
        res_rewrite?;
        Ok(())
    }
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("stage panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("stage panicked: {msg}")
    } else {
        "stage panicked".to_string()
    }
}

impl std::fmt::Debug for Duplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Duplicator")
            .field("path_dir_src", &self.path_dir_src)
            .field("path_dir_dst", &self.path_dir_dst)
            .field("codec", &self.codec.name())
            .field("spec_dup_options", &self.spec_dup_options)
            .field("tracker", &self.tracker)
            .finish()
    }
}

/// Duplicate `dir_source` into `dir_destination`, blocking until done.
///
/// Behavior is controlled by [`SpecDupOptions`]:
/// - destination conflict policy (fail on non-empty, merge, overwrite),
/// - symlink handling and basename exclude globs,
/// - worker count and metadata preservation.
///
/// Token discovery and substitution are delegated to `codec`.
pub fn duplicate_tree<P, Q>(
    dir_source: P,
    dir_destination: Q,
    codec: Arc<dyn TokenCodec>,
    spec_dup_options: SpecDupOptions,
) -> DuplicateOutcome
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    Duplicator::new(dir_source, dir_destination, codec)
        .with_options(spec_dup_options)
        .run()
}

/// Duplicate a Unity asset folder, regenerating every GUID it defines.
///
/// `on_progress` receives `(completed, total)` once per copied unit, strictly
/// before the returned future resolves. Raising `cancellation` stops the run
/// between units.
pub async fn copy_directory_with_dependencies<P, Q, F>(
    dir_source: P,
    dir_destination: Q,
    cancellation: Option<CancellationToken>,
    on_progress: F,
) -> DuplicateOutcome
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    F: Fn(ProgressState) + Send + Sync + 'static,
{
    let codec = match UnityGuidCodec::new() {
        Ok(codec) => codec,
        Err(error) => {
            return DuplicateOutcome::Failed {
                error,
                report: ReportDuplicate {
                    phase: EnumDupPhase::Failed,
                    ..ReportDuplicate::default()
                },
            };
        }
    };
    let mut duplicator =
        Duplicator::new(dir_source, dir_destination, Arc::new(codec)).with_progress(on_progress);
    if let Some(token) = cancellation {
        duplicator = duplicator.with_cancellation(token);
    }
    duplicator.run_async().await
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use super::{Duplicator, copy_directory_with_dependencies, duplicate_tree};
    use crate::codec::PatternCodec;
    use crate::progress::ProgressState;
    use crate::spec::{DuplicateError, EnumDupPhase, SpecDupOptions};

    fn write_text(path: &Path, txt: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, txt).expect("write text");
    }

    fn pattern_codec() -> Arc<PatternCodec> {
        Arc::new(PatternCodec::new(r"\bID\d+\b", None).expect("codec"))
    }

    #[test]
    fn duplicate_tree_runs_all_phases() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("a.txt"), "ref=ID1");
        write_text(&src.join("sub/b.txt"), "uses ID1 and ID2");

        let outcome = duplicate_tree(&src, &dst, pattern_codec(), SpecDupOptions::default());
        assert!(outcome.is_completed(), "{:?}", outcome.error());

        let report = outcome.report();
        assert_eq!(report.phase, EnumDupPhase::Completed);
        assert_eq!(report.cnt_units_total, 3);
        assert_eq!(report.cnt_dirs_created, 1);
        assert_eq!(report.cnt_files_copied, 2);
        assert_eq!(report.cnt_tokens_remapped, 2);
        assert_eq!(report.cnt_files_rewritten, 2);
        assert_eq!(report.cnt_refs_rewritten, 3);
    }

    #[test]
    fn duplicate_tree_rejects_missing_source() {
        let tmp = TempDir::new().expect("tmp");
        let outcome = duplicate_tree(
            tmp.path().join("missing"),
            tmp.path().join("dst"),
            pattern_codec(),
            SpecDupOptions::default(),
        );
        assert!(matches!(
            outcome.error(),
            Some(DuplicateError::SourceNotDirectory(_))
        ));
        assert_eq!(outcome.report().phase, EnumDupPhase::Failed);
        assert!(!tmp.path().join("dst").exists());
    }

    #[test]
    fn duplicate_tree_rejects_nested_destination() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path().join("src");
        write_text(&src.join("a.txt"), "ID1");

        let outcome = duplicate_tree(
            &src,
            src.join("copy"),
            pattern_codec(),
            SpecDupOptions::default(),
        );
        assert!(matches!(
            outcome.error(),
            Some(DuplicateError::InvalidDestination { .. })
        ));
        assert!(!src.join("copy").exists());
    }

    #[test]
    fn duplicate_tree_rejects_invalid_exclude_glob() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path().join("src");
        write_text(&src.join("a.txt"), "ID1");

        let spec_dup_options = SpecDupOptions {
            patterns_exclude: Some(vec!["[".to_string()]),
            ..SpecDupOptions::default()
        };
        let outcome = duplicate_tree(&src, tmp.path().join("dst"), pattern_codec(), spec_dup_options);
        assert!(matches!(
            outcome.error(),
            Some(DuplicateError::InvalidPattern(_))
        ));
    }

    #[test]
    fn progress_handle_tracks_final_state() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path().join("src");
        write_text(&src.join("x/y/z.txt"), "ID7");

        let duplicator = Duplicator::new(&src, tmp.path().join("dst"), pattern_codec())
            .with_progress(|_state: ProgressState| {});
        let tracker = duplicator.progress();
        let outcome = duplicator.run();

        assert!(outcome.is_completed());
        assert_eq!(tracker.snapshot(), ProgressState { completed: 3, total: 3 });
    }

    #[tokio::test]
    async fn run_async_reports_every_unit_in_order() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path().join("src");
        for n_idx in 0..8 {
            write_text(&src.join(format!("d{}/f{n_idx}.txt", n_idx % 3)), "ID1");
        }

        let l_seen = Arc::new(Mutex::new(Vec::new()));
        let l_seen_sink = Arc::clone(&l_seen);
        let outcome = Duplicator::new(&src, tmp.path().join("dst"), pattern_codec())
            .with_progress(move |state: ProgressState| {
                l_seen_sink.lock().expect("lock").push(state);
            })
            .run_async()
            .await;

        assert!(outcome.is_completed());
        let l_seen = l_seen.lock().expect("lock");
        assert_eq!(l_seen.len(), 11);
        for (n_idx, state) in l_seen.iter().enumerate() {
            assert_eq!(state.completed, n_idx as u64 + 1);
            assert_eq!(state.total, 11);
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_creates_nothing() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("a.meta"), "guid: 0123456789abcdef0123456789abcdef\n");

        let token = CancellationToken::new();
        token.cancel();
        let outcome =
            copy_directory_with_dependencies(&src, &dst, Some(token), |_state: ProgressState| {})
                .await;

        assert!(outcome.is_cancelled());
        assert_eq!(outcome.report().cnt_units_done(), 0);
        assert_eq!(outcome.report().phase, EnumDupPhase::Cancelled);
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn cancel_during_copy_skips_rewrite() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        for n_idx in 0..10 {
            write_text(&src.join(format!("f{n_idx}.txt")), "ref=ID1");
        }

        let token = CancellationToken::new();
        let token_sink = token.clone();
        let outcome = Duplicator::new(&src, &dst, pattern_codec())
            .with_cancellation(token)
            .with_progress(move |state: ProgressState| {
                if state.completed == 3 {
                    token_sink.cancel();
                }
            })
            .run_async()
            .await;

        assert!(outcome.is_cancelled());
        let report = outcome.report();
        assert_eq!(report.cnt_files_copied, 3);
        assert_eq!(report.cnt_tokens_remapped, 0);
        assert_eq!(report.cnt_files_rewritten, 0);
        for entry in std::fs::read_dir(&dst).expect("ls") {
            let txt = std::fs::read_to_string(entry.expect("entry").path()).expect("read");
            assert_eq!(txt, "ref=ID1");
        }
    }

    #[tokio::test]
    async fn panicking_stage_keeps_partial_counters() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_text(&src.join("a.txt"), "ref=ID1");
        write_text(&src.join("b.txt"), "ref=ID2");

        let codec = PatternCodec::new(r"\bID\d+\b", None)
            .expect("codec")
            .with_generator(|_token: &str| -> String { panic!("generator fault") });
        let outcome = Duplicator::new(&src, &dst, Arc::new(codec))
            .run_async()
            .await;

        match outcome.error() {
            Some(DuplicateError::TaskAborted(msg)) => assert!(msg.contains("generator fault"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
        let report = outcome.report();
        assert_eq!(report.phase, EnumDupPhase::Failed);
        assert_eq!(report.cnt_units_total, 2);
        assert_eq!(report.cnt_files_copied, 2);
        assert_eq!(report.cnt_files_rewritten, 0);
        assert_eq!(
            std::fs::read_to_string(dst.join("a.txt")).expect("read"),
            "ref=ID1"
        );
    }

    #[test]
    fn panicking_sink_is_reported_as_warning() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path().join("src");
        write_text(&src.join("a.txt"), "ID1");
        write_text(&src.join("b.txt"), "ID2");

        let outcome = Duplicator::new(&src, tmp.path().join("dst"), pattern_codec())
            .with_progress(|state: ProgressState| {
                if state.completed >= 1 {
                    panic!("sink fault");
                }
            })
            .run();

        assert!(outcome.is_completed());
        assert_eq!(outcome.report().cnt_files_copied, 2);
        assert!(
            outcome
                .report()
                .warnings
                .iter()
                .any(|w| w.contains("Progress sink panicked"))
        );
    }
}
