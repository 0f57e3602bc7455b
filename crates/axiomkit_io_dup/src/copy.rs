//! Copy Engine: materialize every unit of the source tree at destination.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::progress::{ProgressTracker, SpecCancelContext, StageResult};
use crate::spec::{DuplicateError, EnumDupDestinationConflictStrategy, SpecDupOptions};
use crate::util::{
    SpecWorkerPool, commit_staged_file, create_symbolic_link, map_destination_path,
    rebase_link_target, stage_file_copy, validate_destination_path_safety,
};
use crate::walk::{EnumUnitKind, SpecSourceTree, SpecUnit};

/// Units committed so far; read by the orchestrator even after a stop.
#[derive(Debug, Default)]
pub(crate) struct SpecCopyCounters {
    pub(crate) cnt_dirs_created: AtomicU64,
    pub(crate) cnt_files_copied: AtomicU64,
}

#[derive(Debug, Clone)]
struct SpecCopyTaskFile {
    path_file_src: PathBuf,
    path_file_dst: PathBuf,
    kind: EnumUnitKind,
}

struct SpecCopyContext<'a> {
    path_dir_src: &'a Path,
    path_dir_dst: &'a Path,
    spec_dup_options: &'a SpecDupOptions,
    tracker: &'a ProgressTracker,
    cancel: &'a SpecCancelContext,
    counters: &'a SpecCopyCounters,
}

fn copy_failure(path: &Path, e: io::Error) -> DuplicateError {
    DuplicateError::CopyFailure {
        path: path.to_path_buf(),
        source: e,
    }
}

/// Copy every unit of `tree` under `path_dir_dst`.
///
/// Directories are created first, in tree order, so every parent exists
/// before any file below it is written. Files then run on `worker_pool`.
/// Each unit is committed under the tracker lock after a cancellation check.
pub(crate) fn copy_units(
    tree: &SpecSourceTree,
    path_dir_dst: &Path,
    spec_dup_options: &SpecDupOptions,
    worker_pool: &SpecWorkerPool,
    tracker: &ProgressTracker,
    cancel: &SpecCancelContext,
    counters: &SpecCopyCounters,
) -> StageResult<()> {
    let spec_cp_ctx = SpecCopyContext {
        path_dir_src: &tree.path_dir_src,
        path_dir_dst,
        spec_dup_options,
        tracker,
        cancel,
        counters,
    };

    cancel.check()?;
    fs::create_dir_all(path_dir_dst).map_err(|e| copy_failure(path_dir_dst, e))?;

    let mut l_tasks_file_copy: Vec<SpecCopyTaskFile> = Vec::new();
    for unit in &tree.l_units {
        let path_dst = map_destination_path(&tree.path_dir_src, path_dir_dst, &unit.path_rel)?;
        match unit.kind {
            EnumUnitKind::Directory => copy_directory_unit(unit, &path_dst, &spec_cp_ctx)?,
            EnumUnitKind::File | EnumUnitKind::Symlink => {
                l_tasks_file_copy.push(SpecCopyTaskFile {
                    path_file_src: tree.path_abs(unit),
                    path_file_dst: path_dst,
                    kind: unit.kind,
                });
            }
        }
    }
    log::debug!(
        "Created {} directories; copying {} files",
        counters.cnt_dirs_created.load(Ordering::Relaxed),
        l_tasks_file_copy.len()
    );

    worker_pool
        .try_map(&l_tasks_file_copy, |spec_task| {
            copy_file_unit(spec_task, &spec_cp_ctx)
        })
        .map(|_| ())
}

fn copy_directory_unit(
    unit: &SpecUnit,
    path_dir_dst_sub: &Path,
    spec_cp_ctx: &SpecCopyContext<'_>,
) -> StageResult<()> {
    validate_destination_path_safety(path_dir_dst_sub, spec_cp_ctx.path_dir_dst)?;
    spec_cp_ctx
        .tracker
        .commit_unit(spec_cp_ctx.cancel, || match fs::create_dir(path_dir_dst_sub) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path_dir_dst_sub.is_dir() => {
                log::debug!("Reusing existing directory {}", path_dir_dst_sub.display());
                Ok(())
            }
            Err(e) => Err(copy_failure(path_dir_dst_sub, e)),
        })?;
    spec_cp_ctx
        .counters
        .cnt_dirs_created
        .fetch_add(1, Ordering::Relaxed);
    log::trace!("Directory unit done: {}", unit.path_rel.display());
    Ok(())
}

fn copy_file_unit(spec_task: &SpecCopyTaskFile, spec_cp_ctx: &SpecCopyContext<'_>) -> StageResult<()> {
    spec_cp_ctx.cancel.check()?;
    let path_file_dst = spec_task.path_file_dst.as_path();
    validate_destination_path_safety(path_file_dst, spec_cp_ctx.path_dir_dst)?;

    let if_overwrite = match fs::symlink_metadata(path_file_dst) {
        Ok(meta_dst) => match spec_cp_ctx.spec_dup_options.rule_conflict_dest {
            EnumDupDestinationConflictStrategy::Overwrite if !meta_dst.is_dir() => true,
            _ => {
                return Err(DuplicateError::invalid_destination(
                    path_file_dst,
                    "Destination entry already exists",
                )
                .into());
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(copy_failure(path_file_dst, e).into()),
    };

    match spec_task.kind {
        EnumUnitKind::Symlink => {
            let target = fs::read_link(&spec_task.path_file_src)
                .map_err(|e| copy_failure(&spec_task.path_file_src, e))?;
            let target = rebase_link_target(
                &target,
                spec_cp_ctx.path_dir_src,
                spec_cp_ctx.path_dir_dst,
            );
            spec_cp_ctx.tracker.commit_unit(spec_cp_ctx.cancel, || {
                if if_overwrite {
                    fs::remove_file(path_file_dst).map_err(|e| copy_failure(path_file_dst, e))?;
                }
                create_symbolic_link(&spec_task.path_file_src, &target, path_file_dst)
                    .map_err(|e| copy_failure(path_file_dst, e))
            })?
        }
        _ => {
            let file_tmp = stage_file_copy(
                &spec_task.path_file_src,
                path_file_dst,
                spec_cp_ctx.spec_dup_options.if_preserve_metadata,
            )
            .map_err(|e| copy_failure(path_file_dst, e))?;
            // Dropping an uncommitted staging file removes it.
            spec_cp_ctx.tracker.commit_unit(spec_cp_ctx.cancel, || {
                commit_staged_file(file_tmp, path_file_dst, if_overwrite)
                    .map_err(|e| copy_failure(path_file_dst, e))
            })?
        }
    }

    spec_cp_ctx
        .counters
        .cnt_files_copied
        .fetch_add(1, Ordering::Relaxed);
    log::trace!("File unit done: {}", path_file_dst.display());
    Ok(())
}
