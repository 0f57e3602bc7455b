//! Reference Rewriter: fresh tokens for the duplicate and the substitution pass.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::TokenCodec;
use crate::index::IndexReference;
use crate::spec::DuplicateError;
use crate::util::{SpecWorkerPool, map_destination_path, write_atomic};

const N_GENERATE_ATTEMPTS_MAX: usize = 64;

/// Old token -> new token, built once per run and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMap {
    map: BTreeMap<String, String>,
}

impl ReferenceMap {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            map: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, token_old: &str) -> Option<&str> {
        self.map.get(token_old).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Mint one fresh token per subtree token.
///
/// New tokens never equal any token seen during the scan (old, external or
/// already minted), so the duplicate cannot collide with its source.
pub(crate) fn build_reference_map(
    index: &IndexReference,
    codec: &dyn TokenCodec,
) -> Result<ReferenceMap, DuplicateError> {
    let mut set_taken: BTreeSet<String> = index.tokens_seen.clone();
    set_taken.extend(index.tokens.keys().cloned());

    let mut map = BTreeMap::new();
    for token_old in index.tokens.keys() {
        let token_new = (0..N_GENERATE_ATTEMPTS_MAX)
            .map(|_| codec.generate_token(token_old))
            .find(|candidate| !candidate.is_empty() && !set_taken.contains(candidate))
            .ok_or_else(|| DuplicateError::TokenCollision(token_old.clone()))?;
        set_taken.insert(token_new.clone());
        map.insert(token_old.clone(), token_new);
    }
    Ok(ReferenceMap { map })
}

/// Counters shared by rewrite workers; they survive an aborted pass.
#[derive(Debug, Default)]
pub(crate) struct SpecRewriteCounters {
    pub(crate) cnt_files_rewritten: AtomicU64,
    pub(crate) cnt_refs_rewritten: AtomicU64,
}

fn rewrite_file(
    path_file_dst: &Path,
    codec: &dyn TokenCodec,
    map_refs: &ReferenceMap,
    counters: &SpecRewriteCounters,
) -> Result<(), DuplicateError> {
    let rewrite_failure = |e| DuplicateError::RewriteFailure {
        path: path_file_dst.to_path_buf(),
        source: e,
    };

    let raw = fs::read(path_file_dst).map_err(rewrite_failure)?;
    let Some((raw_new, n_replaced)) = codec.substitute(&raw, map_refs) else {
        return Ok(());
    };
    write_atomic(path_file_dst, &raw_new).map_err(rewrite_failure)?;
    counters.cnt_files_rewritten.fetch_add(1, Ordering::Relaxed);
    counters
        .cnt_refs_rewritten
        .fetch_add(n_replaced as u64, Ordering::Relaxed);
    log::debug!(
        "Rewrote {n_replaced} references in {}",
        path_file_dst.display()
    );
    Ok(())
}

/// Substitute mapped tokens inside every copied file that holds one.
///
/// Must run exactly once, after a successful copy: old tokens are gone
/// afterwards. The first write failure stops the pass; files already
/// rewritten stay rewritten.
pub(crate) fn rewrite_references(
    path_dir_src: &Path,
    path_dir_dst: &Path,
    index: &IndexReference,
    map_refs: &ReferenceMap,
    codec: &dyn TokenCodec,
    worker_pool: &SpecWorkerPool,
    counters: &SpecRewriteCounters,
) -> Result<(), DuplicateError> {
    if map_refs.is_empty() {
        return Ok(());
    }
    let l_paths_dst: Vec<PathBuf> = index
        .files_bearing
        .iter()
        .map(|path_rel| map_destination_path(path_dir_src, path_dir_dst, path_rel))
        .collect::<Result<_, _>>()?;

    worker_pool
        .try_map(&l_paths_dst, |path_file_dst| {
            rewrite_file(path_file_dst, codec, map_refs, counters)
        })
        .map(|_| ())
}
