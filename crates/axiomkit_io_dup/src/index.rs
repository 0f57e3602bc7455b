//! Reference Index: which subtree tokens occur in which files.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use crate::codec::TokenCodec;
use crate::progress::{SpecCancelContext, StageResult, StageStop};
use crate::spec::DuplicateError;
use crate::util::SpecWorkerPool;
use crate::walk::{SpecSourceTree, SpecUnit};

/// Output of the scan stage.
#[derive(Debug, Clone, Default)]
pub struct IndexReference {
    /// Subtree token -> files (relative, tree order) in which it occurs.
    pub tokens: BTreeMap<String, Vec<PathBuf>>,
    /// Files holding at least one subtree token; the only files the rewriter touches.
    pub files_bearing: Vec<PathBuf>,
    /// Every token located anywhere, including references leaving the subtree.
    pub tokens_seen: BTreeSet<String>,
    /// Reference-bearing files read by the scan.
    pub cnt_files_scanned: u64,
}

impl IndexReference {
    pub fn n_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains_key(token)
    }

    /// Located tokens that no file in the subtree defines.
    pub fn iter_external(&self) -> impl Iterator<Item = &String> {
        self.tokens_seen
            .iter()
            .filter(|token| !self.tokens.contains_key(*token))
    }
}

#[derive(Debug)]
struct SpecFileTokens {
    path_rel: PathBuf,
    set_defined: BTreeSet<String>,
    set_located: BTreeSet<String>,
}

fn scan_file(
    tree: &SpecSourceTree,
    unit: &SpecUnit,
    codec: &dyn TokenCodec,
    cancel: &SpecCancelContext,
) -> StageResult<SpecFileTokens> {
    cancel.check()?;
    let path_file_src = tree.path_abs(unit);
    let raw = fs::read(&path_file_src).map_err(|e| DuplicateError::ScanFailure {
        path: path_file_src.clone(),
        source: e,
    })?;
    Ok(SpecFileTokens {
        path_rel: unit.path_rel.clone(),
        set_defined: codec
            .extract_tokens(&unit.path_rel, &raw)
            .into_iter()
            .collect(),
        set_located: codec
            .locate_tokens(&raw)
            .into_iter()
            .map(|span| span.token)
            .collect(),
    })
}

/// Read every reference-bearing file of `tree` and index its tokens.
///
/// An unreadable file aborts the scan with `ScanFailure`; files without
/// tokens contribute nothing.
pub(crate) fn scan_references(
    tree: &SpecSourceTree,
    codec: &dyn TokenCodec,
    worker_pool: &SpecWorkerPool,
    cancel: &SpecCancelContext,
) -> StageResult<IndexReference> {
    let l_units_bearing: Vec<&SpecUnit> = tree
        .iter_files()
        .filter(|unit| codec.is_reference_bearing(&unit.path_rel))
        .collect();
    log::debug!(
        "Scanning {} reference-bearing files with codec `{}`",
        l_units_bearing.len(),
        codec.name()
    );

    let l_file_tokens: Vec<SpecFileTokens> = worker_pool
        .try_map(&l_units_bearing, |unit| scan_file(tree, unit, codec, cancel))
        .inspect_err(|stop| {
            if let StageStop::Failed(e) = stop {
                log::error!("Reference scan failed: {e}");
            }
        })?;

    let mut index = IndexReference {
        cnt_files_scanned: l_file_tokens.len() as u64,
        ..IndexReference::default()
    };
    for spec_file_tokens in &l_file_tokens {
        for token in &spec_file_tokens.set_defined {
            index.tokens.entry(token.clone()).or_default();
        }
        index
            .tokens_seen
            .extend(spec_file_tokens.set_located.iter().cloned());
        index
            .tokens_seen
            .extend(spec_file_tokens.set_defined.iter().cloned());
    }

    for spec_file_tokens in l_file_tokens {
        let mut b_bearing = false;
        for token in spec_file_tokens
            .set_located
            .union(&spec_file_tokens.set_defined)
        {
            if let Some(l_paths) = index.tokens.get_mut(token) {
                l_paths.push(spec_file_tokens.path_rel.clone());
                b_bearing = true;
            }
        }
        if b_bearing {
            index.files_bearing.push(spec_file_tokens.path_rel);
        }
    }

    log::info!(
        "Indexed {} subtree tokens ({} external) across {} files",
        index.n_tokens(),
        index.iter_external().count(),
        index.files_bearing.len()
    );
    Ok(index)
}
