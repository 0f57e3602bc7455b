use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tempfile::NamedTempFile;

use crate::spec::DuplicateError;

const C_STAGING_PREFIX: &str = ".axiomkit_dup";

////////////////////////////////////////////////////////////////////////////////
// #region PatternMatching

/// Compile basename globs into one matcher. `None`/empty input compiles to `None`.
pub(crate) fn compile_globs(patterns: Option<&[String]>) -> Result<Option<GlobSet>, DuplicateError> {
    let Some(patterns) = patterns else {
        return Ok(None);
    };
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            DuplicateError::InvalidPattern(format!("Invalid glob pattern `{pattern}`: {e}"))
        })?;
        builder.add(glob);
    }
    let set_globs = builder
        .build()
        .map_err(|e| DuplicateError::InvalidPattern(format!("Invalid glob set: {e}")))?;
    Ok(Some(set_globs))
}

pub(crate) fn is_glob_matching(value: &str, patterns: Option<&GlobSet>) -> bool {
    patterns.is_some_and(|set_globs| set_globs.is_match(value))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PathMapper

fn _normalize_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    // Destination usually does not exist yet: resolve the closest existing ancestor.
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name())
        && !parent.as_os_str().is_empty()
    {
        return _normalize_path(parent).join(name);
    }
    _absolutize_path(path)
}

fn _absolutize_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

pub(crate) fn is_overlap(src: &Path, dst: &Path) -> bool {
    let src_resolved = _normalize_path(src);
    let dst_resolved = _normalize_path(dst);
    dst_resolved.starts_with(&src_resolved) || src_resolved.starts_with(&dst_resolved)
}

/// Map a source-relative path onto the destination root.
///
/// Pure and deterministic: the result nests exactly like the source
/// (`dst_root/<path_rel>`). Fails with `InvalidDestination` when `path_rel`
/// is absolute or contains `..`/prefix components, since the result would
/// escape `path_dir_dst`.
pub fn map_destination_path(
    path_dir_src: &Path,
    path_dir_dst: &Path,
    path_rel: &Path,
) -> Result<PathBuf, DuplicateError> {
    let mut path_dst = path_dir_dst.to_path_buf();
    for component in path_rel.components() {
        match component {
            Component::Normal(part) => path_dst.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(DuplicateError::invalid_destination(
                    path_dir_dst.join(path_rel),
                    format!(
                        "Relative path {} from {} escapes destination root",
                        path_rel.display(),
                        path_dir_src.display()
                    ),
                ));
            }
        }
    }
    Ok(path_dst)
}

/// Reject destination paths that are, or traverse, symlinks below the root.
pub(crate) fn validate_destination_path_safety(
    path_dst_item: &Path,
    path_dir_dst_root: &Path,
) -> Result<(), DuplicateError> {
    let path_dir_dst_root_abs = _absolutize_path(path_dir_dst_root);
    let path_dst_item_abs = _absolutize_path(path_dst_item);

    let path_item_rel = path_dst_item_abs
        .strip_prefix(&path_dir_dst_root_abs)
        .map_err(|_| {
            DuplicateError::invalid_destination(
                path_dst_item,
                format!(
                    "Path escapes destination root {}",
                    path_dir_dst_root.display()
                ),
            )
        })?;

    let mut path_cursor = path_dir_dst_root_abs.clone();
    for part_rel in path_item_rel.components() {
        path_cursor.push(part_rel.as_os_str());
        match fs::symlink_metadata(&path_cursor) {
            Ok(meta_cursor) if meta_cursor.file_type().is_symlink() => {
                return Err(DuplicateError::invalid_destination(
                    path_dst_item,
                    format!("Path traverses symlink component {}", path_cursor.display()),
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => {
                return Err(DuplicateError::CopyFailure {
                    path: path_cursor,
                    source: e,
                });
            }
        }
    }
    Ok(())
}

/// Check the destination root before anything is written.
///
/// Returns `true` when the root already exists (as a real directory).
pub(crate) fn check_destination_root(
    path_dir_dst: &Path,
    if_allow_non_empty: bool,
) -> Result<bool, DuplicateError> {
    let meta_dst = match fs::symlink_metadata(path_dir_dst) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(DuplicateError::CopyFailure {
                path: path_dir_dst.to_path_buf(),
                source: e,
            });
        }
    };
    if meta_dst.file_type().is_symlink() {
        return Err(DuplicateError::invalid_destination(
            path_dir_dst,
            "Destination root must not be a symbolic link",
        ));
    }
    if !meta_dst.is_dir() {
        return Err(DuplicateError::invalid_destination(
            path_dir_dst,
            "Destination root exists and is not a directory",
        ));
    }
    if !if_allow_non_empty {
        let mut iter_entries =
            fs::read_dir(path_dir_dst).map_err(|e| DuplicateError::CopyFailure {
                path: path_dir_dst.to_path_buf(),
                source: e,
            })?;
        if iter_entries.next().is_some() {
            return Err(DuplicateError::invalid_destination(
                path_dir_dst,
                "Destination root already exists and is not empty",
            ));
        }
    }
    Ok(true)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Workers

pub(crate) fn calculate_worker_limit(num_workers_max: Option<usize>) -> usize {
    let n_cpu = std::thread::available_parallelism()
        .map(|v| v.get())
        .unwrap_or(1);

    match num_workers_max {
        Some(n) => n.clamp(1, n_cpu),
        None => n_cpu.clamp(1, 8),
    }
}

/// Bounded pool for the per-file stages; serial when one worker is enough.
pub(crate) struct SpecWorkerPool {
    thread_pool: Option<ThreadPool>,
}

impl SpecWorkerPool {
    pub(crate) fn new(n_workers_max: usize, warnings: &mut Vec<String>) -> Self {
        if n_workers_max <= 1 {
            return Self { thread_pool: None };
        }
        match ThreadPoolBuilder::new().num_threads(n_workers_max).build() {
            Ok(thread_pool) => Self {
                thread_pool: Some(thread_pool),
            },
            Err(e) => {
                log::warn!("Thread pool unavailable (workers={n_workers_max}): {e}");
                warnings.push(format!(
                    "Failed to initialize thread pool (workers={n_workers_max}); fallback to serial."
                ));
                Self { thread_pool: None }
            }
        }
    }

    /// Map every item, stopping at the first error. Output keeps input order.
    pub(crate) fn try_map<T, R, E, F>(&self, l_items: &[T], f_map: F) -> Result<Vec<R>, E>
    where
        T: Sync,
        R: Send,
        E: Send,
        F: Fn(&T) -> Result<R, E> + Sync + Send,
    {
        match &self.thread_pool {
            Some(thread_pool) => thread_pool.install(|| l_items.par_iter().map(&f_map).collect()),
            None => l_items.iter().map(&f_map).collect(),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region AtomicWrites

fn _staging_file_in(path_dir_parent: &Path) -> io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(C_STAGING_PREFIX)
        .tempfile_in(path_dir_parent)
}

fn _parent_of(path: &Path) -> io::Result<&Path> {
    path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Path has no parent directory: {}", path.display()),
        )
    })
}

/// Copy `path_file_src` into a hidden staging file next to `path_file_dst`.
///
/// Nothing is visible at `path_file_dst` until [`commit_staged_file`] runs.
pub(crate) fn stage_file_copy(
    path_file_src: &Path,
    path_file_dst: &Path,
    if_preserve_metadata: bool,
) -> io::Result<NamedTempFile> {
    let mut file_tmp = _staging_file_in(_parent_of(path_file_dst)?)?;
    let mut file_src = fs::File::open(path_file_src)?;
    io::copy(&mut file_src, file_tmp.as_file_mut())?;
    file_tmp.as_file().sync_all()?;
    if if_preserve_metadata {
        apply_metadata(path_file_src, file_tmp.path())?;
    }
    Ok(file_tmp)
}

/// Move a staged file onto its final path.
pub(crate) fn commit_staged_file(
    file_tmp: NamedTempFile,
    path_file_dst: &Path,
    if_overwrite: bool,
) -> io::Result<()> {
    let res_persist = if if_overwrite {
        file_tmp.persist(path_file_dst)
    } else {
        file_tmp.persist_noclobber(path_file_dst)
    };
    res_persist.map(|_| ()).map_err(|e| e.error)
}

/// Replace `path_file` content atomically, keeping its permissions and xattrs.
pub(crate) fn write_atomic(path_file: &Path, content: &[u8]) -> io::Result<()> {
    let stat_old = fs::metadata(path_file)?;
    let mut file_tmp = _staging_file_in(_parent_of(path_file)?)?;
    io::Write::write_all(file_tmp.as_file_mut(), content)?;
    file_tmp.as_file().sync_all()?;
    fs::set_permissions(file_tmp.path(), stat_old.permissions())?;
    #[cfg(target_os = "linux")]
    copy_xattrs_linux(path_file, file_tmp.path());
    file_tmp.persist(path_file).map(|_| ()).map_err(|e| e.error)
}

fn apply_metadata(path_file_src: &Path, path_file_dst: &Path) -> io::Result<()> {
    use filetime::{FileTime, set_file_times};

    let stat_src = fs::metadata(path_file_src)?;
    fs::set_permissions(path_file_dst, stat_src.permissions())?;

    let file_time_access = FileTime::from_last_access_time(&stat_src);
    let file_time_modify = FileTime::from_last_modification_time(&stat_src);
    set_file_times(path_file_dst, file_time_access, file_time_modify)?;

    #[cfg(target_os = "linux")]
    copy_xattrs_linux(path_file_src, path_file_dst);
    Ok(())
}

#[cfg(target_os = "linux")]
fn copy_xattrs_linux(path_file_src: &Path, path_file_dst: &Path) {
    let Ok(iter_xattr_names) = xattr::list(path_file_src) else {
        return;
    };

    for name in iter_xattr_names {
        let Some(raw_value) = xattr::get(path_file_src, &name).ok().flatten() else {
            continue;
        };
        if let Err(e) = xattr::set(path_file_dst, &name, &raw_value) {
            log::debug!(
                "xattr {:?} not copied onto {}: {e}",
                name,
                path_file_dst.display()
            );
        }
    }
}

/// Target for a recreated link.
///
/// Absolute targets below the source root are moved under the destination
/// root. Relative and external targets are kept as-is.
pub(crate) fn rebase_link_target(
    target: &Path,
    path_dir_src: &Path,
    path_dir_dst: &Path,
) -> PathBuf {
    if !target.is_absolute() {
        return target.to_path_buf();
    }
    for path_root_src in [_absolutize_path(path_dir_src), _normalize_path(path_dir_src)] {
        if let Ok(path_rel) = target.strip_prefix(&path_root_src) {
            return _absolutize_path(path_dir_dst).join(path_rel);
        }
    }
    target.to_path_buf()
}

/// Create a link at `path_dst` pointing to `target`, typed like the link at `path_src`.
pub(crate) fn create_symbolic_link(
    path_src: &Path,
    target: &Path,
    path_dst: &Path,
) -> io::Result<()> {
    #[cfg(unix)]
    {
        let _ = path_src;
        std::os::unix::fs::symlink(target, path_dst)
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::{symlink_dir, symlink_file};
        if path_src.is_dir() {
            symlink_dir(target, path_dst)
        } else {
            symlink_file(target, path_dst)
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (path_src, target, path_dst);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Symbolic links are unsupported on this platform",
        ))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
