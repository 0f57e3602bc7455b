//! Source tree enumeration into ordered units of work.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use globset::GlobSet;

use crate::progress::{SpecCancelContext, StageResult};
use crate::spec::{DuplicateError, EnumDupSymlinkStrategy};
use crate::util::is_glob_matching;

/// Kind of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumUnitKind {
    Directory,
    File,
    Symlink,
}

/// One directory, file or symlink to materialize at destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecUnit {
    /// Path relative to the source root.
    pub path_rel: PathBuf,
    pub kind: EnumUnitKind,
}

/// Immutable snapshot of the source subtree.
///
/// Directories always precede their children in `l_units`.
#[derive(Debug, Clone, Default)]
pub struct SpecSourceTree {
    pub path_dir_src: PathBuf,
    pub l_units: Vec<SpecUnit>,
    pub warnings: Vec<String>,
}

impl SpecSourceTree {
    pub fn n_units(&self) -> u64 {
        self.l_units.len() as u64
    }

    pub fn iter_files(&self) -> impl Iterator<Item = &SpecUnit> {
        self.l_units
            .iter()
            .filter(|unit| unit.kind == EnumUnitKind::File)
    }

    pub fn path_abs(&self, unit: &SpecUnit) -> PathBuf {
        self.path_dir_src.join(&unit.path_rel)
    }
}

struct SpecWalkContext<'a> {
    rule_symlink: EnumDupSymlinkStrategy,
    patterns_exclude: Option<&'a GlobSet>,
    cancel: &'a SpecCancelContext,
    tree: SpecSourceTree,
}

/// Enumerate every unit below `path_dir_src` (the root itself is not a unit).
pub(crate) fn walk_source_tree(
    path_dir_src: &Path,
    rule_symlink: EnumDupSymlinkStrategy,
    patterns_exclude: Option<&GlobSet>,
    cancel: &SpecCancelContext,
) -> StageResult<SpecSourceTree> {
    let mut spec_walk_ctx = SpecWalkContext {
        rule_symlink,
        patterns_exclude,
        cancel,
        tree: SpecSourceTree {
            path_dir_src: path_dir_src.to_path_buf(),
            ..SpecSourceTree::default()
        },
    };
    walk_directory(path_dir_src, Path::new(""), &mut spec_walk_ctx)?;
    Ok(spec_walk_ctx.tree)
}

fn walk_directory(
    path_dir: &Path,
    path_rel_dir: &Path,
    spec_walk_ctx: &mut SpecWalkContext<'_>,
) -> StageResult<()> {
    spec_walk_ctx.cancel.check()?;

    let scan_failure = |path: &Path, e: std::io::Error| DuplicateError::ScanFailure {
        path: path.to_path_buf(),
        source: e,
    };

    let mut l_dirs: Vec<(OsString, PathBuf)> = Vec::new();
    let mut l_files: Vec<(OsString, EnumUnitKind)> = Vec::new();

    for entry_res in fs::read_dir(path_dir).map_err(|e| scan_failure(path_dir, e))? {
        let entry = entry_res.map_err(|e| scan_failure(path_dir, e))?;
        let path_entry = entry.path();
        let name_entry = entry.file_name();
        if is_glob_matching(&name_entry.to_string_lossy(), spec_walk_ctx.patterns_exclude) {
            log::debug!("Excluded by pattern: {}", path_entry.display());
            continue;
        }
        let cfg_file_type = entry
            .file_type()
            .map_err(|e| scan_failure(&path_entry, e))?;

        if cfg_file_type.is_symlink() {
            match spec_walk_ctx.rule_symlink {
                EnumDupSymlinkStrategy::CopySymlinks => {
                    l_files.push((name_entry, EnumUnitKind::Symlink));
                }
                EnumDupSymlinkStrategy::SkipSymlinks => {
                    log::warn!("Symlink skipped: {}", path_entry.display());
                    spec_walk_ctx
                        .tree
                        .warnings
                        .push(format!("Symlink skipped: {}", path_entry.display()));
                }
            }
        } else if cfg_file_type.is_dir() {
            l_dirs.push((name_entry, path_entry));
        } else if cfg_file_type.is_file() {
            l_files.push((name_entry, EnumUnitKind::File));
        } else {
            log::warn!("Special file skipped: {}", path_entry.display());
            spec_walk_ctx
                .tree
                .warnings
                .push(format!("Special file skipped: {}", path_entry.display()));
        }
    }

    l_dirs.sort_by(|a, b| a.0.cmp(&b.0));
    l_files.sort_by(|a, b| a.0.cmp(&b.0));

    for (name_file, kind) in l_files {
        spec_walk_ctx.tree.l_units.push(SpecUnit {
            path_rel: path_rel_dir.join(name_file),
            kind,
        });
    }

    for (name_dir, path_dir_sub) in l_dirs {
        let path_rel_sub = path_rel_dir.join(name_dir);
        spec_walk_ctx.tree.l_units.push(SpecUnit {
            path_rel: path_rel_sub.clone(),
            kind: EnumUnitKind::Directory,
        });
        walk_directory(&path_dir_sub, &path_rel_sub, spec_walk_ctx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use super::{EnumUnitKind, walk_source_tree};
    use crate::progress::{SpecCancelContext, StageStop};
    use crate::spec::{DuplicateError, EnumDupSymlinkStrategy};
    use crate::util::compile_globs;

    fn write_text(path: &Path, txt: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, txt).expect("write text");
    }

    #[test]
    fn walk_orders_directories_before_children() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path();
        write_text(&src.join("b.txt"), "b");
        write_text(&src.join("a/x.txt"), "x");
        write_text(&src.join("a/deep/y.txt"), "y");

        let tree = walk_source_tree(
            src,
            EnumDupSymlinkStrategy::CopySymlinks,
            None,
            &SpecCancelContext::default(),
        )
        .expect("walk");

        let l_paths: Vec<(PathBuf, EnumUnitKind)> = tree
            .l_units
            .iter()
            .map(|u| (u.path_rel.clone(), u.kind))
            .collect();
        assert_eq!(
            l_paths,
            vec![
                (PathBuf::from("b.txt"), EnumUnitKind::File),
                (PathBuf::from("a"), EnumUnitKind::Directory),
                (PathBuf::from("a/x.txt"), EnumUnitKind::File),
                (PathBuf::from("a/deep"), EnumUnitKind::Directory),
                (PathBuf::from("a/deep/y.txt"), EnumUnitKind::File),
            ]
        );
        assert_eq!(tree.n_units(), 5);
        assert_eq!(tree.iter_files().count(), 3);
    }

    #[test]
    fn walk_applies_exclude_globs() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path();
        write_text(&src.join("keep.txt"), "k");
        write_text(&src.join("drop.tmp"), "d");
        write_text(&src.join("Library/cache.bin"), "c");

        let patterns = vec!["*.tmp".to_string(), "Library".to_string()];
        let set_globs = compile_globs(Some(patterns.as_slice())).expect("globs");
        let tree = walk_source_tree(
            src,
            EnumDupSymlinkStrategy::CopySymlinks,
            set_globs.as_ref(),
            &SpecCancelContext::default(),
        )
        .expect("walk");
        assert_eq!(tree.n_units(), 1);
        assert_eq!(tree.l_units[0].path_rel, PathBuf::from("keep.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn walk_symlink_policies() {
        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path();
        write_text(&src.join("a.txt"), "a");
        std::os::unix::fs::symlink(src.join("a.txt"), src.join("link.txt")).expect("symlink");

        let tree = walk_source_tree(
            src,
            EnumDupSymlinkStrategy::CopySymlinks,
            None,
            &SpecCancelContext::default(),
        )
        .expect("walk");
        assert!(
            tree.l_units
                .iter()
                .any(|u| u.kind == EnumUnitKind::Symlink && u.path_rel == Path::new("link.txt"))
        );

        let tree = walk_source_tree(
            src,
            EnumDupSymlinkStrategy::SkipSymlinks,
            None,
            &SpecCancelContext::default(),
        )
        .expect("walk");
        assert_eq!(tree.n_units(), 1);
        assert_eq!(tree.warnings.len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn walk_keeps_non_utf8_names_exact() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = TempDir::new().expect("tmp");
        let src = tmp.path();
        let name_raw = OsStr::from_bytes(b"caf\xe9.txt");
        write_text(&src.join(name_raw), "ID1");

        let tree = walk_source_tree(
            src,
            EnumDupSymlinkStrategy::CopySymlinks,
            None,
            &SpecCancelContext::default(),
        )
        .expect("walk");
        assert_eq!(tree.n_units(), 1);
        assert_eq!(tree.l_units[0].path_rel, Path::new(name_raw));
        assert!(tree.path_abs(&tree.l_units[0]).is_file());
    }

    #[test]
    fn walk_stops_when_cancelled() {
        let tmp = TempDir::new().expect("tmp");
        write_text(&tmp.path().join("a.txt"), "a");
        let token = CancellationToken::new();
        token.cancel();

        let res = walk_source_tree(
            tmp.path(),
            EnumDupSymlinkStrategy::CopySymlinks,
            None,
            &SpecCancelContext::new(Some(token)),
        );
        assert!(matches!(res, Err(StageStop::Cancelled)));
    }

    #[test]
    fn walk_missing_root_is_scan_failure() {
        let tmp = TempDir::new().expect("tmp");
        let res = walk_source_tree(
            &tmp.path().join("missing"),
            EnumDupSymlinkStrategy::CopySymlinks,
            None,
            &SpecCancelContext::default(),
        );
        assert!(matches!(
            res,
            Err(StageStop::Failed(DuplicateError::ScanFailure { .. }))
        ));
    }
}
