//! Post-processing collaborators, applied by callers after a completed run.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::GlobSet;

use crate::spec::DuplicateError;
use crate::util::{compile_globs, is_glob_matching, write_atomic};

const L_DEFAULT_TEXT_PATTERNS: &[&str] = &["*.cs", "*.txt", "*.md", "*.json"];

/// Counters of one post-processing pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportRename {
    pub cnt_files_edited: u64,
    pub cnt_entries_renamed: u64,
}

impl fmt::Display for ReportRename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[RENAME] files_edited={} entries_renamed={}",
            self.cnt_files_edited, self.cnt_entries_renamed
        )
    }
}

/// Step run over a finished duplicate.
///
/// Only meaningful after [`crate::DuplicateOutcome::Completed`]: a partial
/// destination may still hold source tokens.
pub trait PostProcess {
    fn name(&self) -> &str;

    fn apply(&self, path_dir_dst: &Path) -> Result<ReportRename, DuplicateError>;
}

/// Replace a template name inside text files, then in entry names.
#[derive(Debug, Clone)]
pub struct RenameText {
    text_old: String,
    text_new: String,
    patterns_text: Option<GlobSet>,
}

impl RenameText {
    /// `text_new` must be non-empty ASCII alphanumerics.
    ///
    /// `patterns_text` are basename globs of files whose content is edited;
    /// `None` selects `*.cs`, `*.txt`, `*.md` and `*.json`.
    pub fn new(
        text_old: &str,
        text_new: &str,
        patterns_text: Option<&[String]>,
    ) -> Result<Self, DuplicateError> {
        if text_old.is_empty() {
            return Err(DuplicateError::InvalidPattern(
                "Rename source text must not be empty".to_string(),
            ));
        }
        if text_new.is_empty() || !text_new.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DuplicateError::InvalidPattern(format!(
                "Rename target `{text_new}` must match ^[0-9A-Za-z]+$"
            )));
        }

        let l_default_patterns: Vec<String> = L_DEFAULT_TEXT_PATTERNS
            .iter()
            .map(|pattern| pattern.to_string())
            .collect();
        let patterns_text = compile_globs(Some(patterns_text.unwrap_or(&l_default_patterns)))?;
        Ok(Self {
            text_old: text_old.to_string(),
            text_new: text_new.to_string(),
            patterns_text,
        })
    }

    fn edit_file(&self, path_file: &Path) -> Result<bool, DuplicateError> {
        let raw = fs::read(path_file).map_err(|e| rename_failure(path_file, e))?;
        let Ok(txt) = String::from_utf8(raw) else {
            log::debug!("Skipping non UTF-8 file {}", path_file.display());
            return Ok(false);
        };
        if !txt.contains(&self.text_old) {
            return Ok(false);
        }
        let txt_new = txt.replace(&self.text_old, &self.text_new);
        write_atomic(path_file, txt_new.as_bytes()).map_err(|e| rename_failure(path_file, e))?;
        Ok(true)
    }

    fn rename_entry(&self, path_entry: &Path) -> Result<bool, DuplicateError> {
        let Some(name) = path_entry.file_name().and_then(|name| name.to_str()) else {
            return Ok(false);
        };
        if !name.contains(&self.text_old) {
            return Ok(false);
        }
        let path_target = path_entry.with_file_name(name.replace(&self.text_old, &self.text_new));
        if fs::symlink_metadata(&path_target).is_ok() {
            return Err(DuplicateError::invalid_destination(
                path_target,
                format!("Rename of {} would replace an existing entry", path_entry.display()),
            ));
        }
        fs::rename(path_entry, &path_target).map_err(|e| rename_failure(path_entry, e))?;
        log::debug!(
            "Renamed {} -> {}",
            path_entry.display(),
            path_target.display()
        );
        Ok(true)
    }
}

impl PostProcess for RenameText {
    fn name(&self) -> &str {
        "rename-text"
    }

    /// Content edits run before renames so that edited paths stay valid.
    /// Renames go children first; a `.meta` companion follows its asset.
    fn apply(&self, path_dir_dst: &Path) -> Result<ReportRename, DuplicateError> {
        let mut l_entries: Vec<(PathBuf, bool)> = Vec::new();
        collect_entries_post_order(path_dir_dst, &mut l_entries)?;

        let mut report = ReportRename::default();
        for (path_entry, b_is_file) in &l_entries {
            let b_is_text = path_entry
                .file_name()
                .map(|name| name.to_string_lossy())
                .is_some_and(|name| is_glob_matching(&name, self.patterns_text.as_ref()));
            if *b_is_file && b_is_text && self.edit_file(path_entry)? {
                report.cnt_files_edited += 1;
            }
        }
        for (path_entry, _) in &l_entries {
            if self.rename_entry(path_entry)? {
                report.cnt_entries_renamed += 1;
            }
        }

        log::info!("{report}");
        Ok(report)
    }
}

fn rename_failure(path: &Path, e: io::Error) -> DuplicateError {
    DuplicateError::RewriteFailure {
        path: path.to_path_buf(),
        source: e,
    }
}

/// Entries below `path_dir`, sorted, children before their parent directory.
fn collect_entries_post_order(
    path_dir: &Path,
    l_entries: &mut Vec<(PathBuf, bool)>,
) -> Result<(), DuplicateError> {
    let mut l_children: Vec<(PathBuf, fs::FileType)> = fs::read_dir(path_dir)
        .and_then(|iter_entries| {
            iter_entries
                .map(|entry| {
                    let entry = entry?;
                    Ok((entry.path(), entry.file_type()?))
                })
                .collect::<io::Result<Vec<_>>>()
        })
        .map_err(|e| DuplicateError::ScanFailure {
            path: path_dir.to_path_buf(),
            source: e,
        })?;
    l_children.sort_by(|a, b| a.0.cmp(&b.0));

    for (path_child, file_type) in l_children {
        if file_type.is_dir() {
            collect_entries_post_order(&path_child, l_entries)?;
        }
        l_entries.push((path_child, file_type.is_file()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::{PostProcess, RenameText, ReportRename};
    use crate::spec::DuplicateError;

    fn write_text(path: &Path, txt: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, txt).expect("write text");
    }

    #[test]
    fn rename_rejects_non_alphanumeric_target() {
        for text_new in ["", "My Page", "Page-2", "ページ"] {
            let err = RenameText::new("TemplatePage", text_new, None).expect_err("must fail");
            assert!(matches!(err, DuplicateError::InvalidPattern(_)));
        }
        assert!(RenameText::new("TemplatePage", "Shop2", None).is_ok());
    }

    #[test]
    fn rename_edits_text_then_renames_bottom_up() {
        let tmp = TempDir::new().expect("tmp");
        let dst = tmp.path();
        write_text(
            &dst.join("Scripts/TemplatePage.cs"),
            "public class TemplatePage : Page {}",
        );
        write_text(&dst.join("Scripts/TemplatePage.cs.meta"), "guid: abc\n");
        write_text(&dst.join("TemplatePageAssets/TemplatePage.prefab"), "name: TemplatePage");
        write_text(&dst.join("README.md"), "no template name here");

        let rename = RenameText::new("TemplatePage", "Shop", None).expect("rename");
        assert_eq!(rename.name(), "rename-text");
        let report = rename.apply(dst).expect("apply");

        assert_eq!(
            report,
            ReportRename {
                cnt_files_edited: 1,
                cnt_entries_renamed: 4,
            }
        );
        assert_eq!(
            std::fs::read_to_string(dst.join("Scripts/Shop.cs")).expect("read"),
            "public class Shop : Page {}"
        );
        assert!(dst.join("Scripts/Shop.cs.meta").is_file());
        // Prefab content is not a text pattern match; only its name changes.
        assert_eq!(
            std::fs::read_to_string(dst.join("ShopAssets/Shop.prefab")).expect("read"),
            "name: TemplatePage"
        );
        assert!(!dst.join("TemplatePageAssets").exists());
    }

    #[test]
    fn rename_refuses_to_replace_existing_entry() {
        let tmp = TempDir::new().expect("tmp");
        let dst = tmp.path();
        write_text(&dst.join("TemplatePage.txt"), "a");
        write_text(&dst.join("Shop.txt"), "b");

        let rename = RenameText::new("TemplatePage", "Shop", None).expect("rename");
        let err = rename.apply(dst).expect_err("must fail");
        assert!(matches!(err, DuplicateError::InvalidDestination { .. }));
        assert_eq!(std::fs::read_to_string(dst.join("Shop.txt")).expect("read"), "b");
    }

    #[test]
    fn rename_custom_text_patterns() {
        let tmp = TempDir::new().expect("tmp");
        let dst = tmp.path();
        write_text(&dst.join("notes.yaml"), "title: TemplatePage");
        write_text(&dst.join("notes.txt"), "TemplatePage");

        let patterns = vec!["*.yaml".to_string()];
        let rename =
            RenameText::new("TemplatePage", "Shop", Some(patterns.as_slice())).expect("rename");
        let report = rename.apply(dst).expect("apply");

        assert_eq!(report.cnt_files_edited, 1);
        assert_eq!(report.cnt_entries_renamed, 0);
        assert_eq!(
            std::fs::read_to_string(dst.join("notes.yaml")).expect("read"),
            "title: Shop"
        );
        assert_eq!(
            std::fs::read_to_string(dst.join("notes.txt")).expect("read"),
            "TemplatePage"
        );
    }
}
