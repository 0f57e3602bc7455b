//! Pluggable reference-token capability.
//!
//! The duplication core never parses file formats. It asks a [`TokenCodec`]
//! which files may carry references, where the exact token occurrences are,
//! which tokens belong to the duplicated subtree, and how to mint a fresh one.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use globset::GlobSet;
use regex::bytes::Regex;
use uuid::Uuid;

use crate::rewrite::ReferenceMap;
use crate::spec::DuplicateError;
use crate::util::{compile_globs, is_glob_matching};

/// One exact-token occurrence inside a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTokenSpan {
    /// Byte range of the token (not of the surrounding syntax).
    pub range: Range<usize>,
    pub token: String,
}

/// Format-specific reference extraction and substitution.
pub trait TokenCodec: Send + Sync {
    /// Adapter label used in logs.
    fn name(&self) -> &str;

    /// Files rejected here are copied verbatim and never read for tokens.
    fn is_reference_bearing(&self, path_rel: &Path) -> bool;

    /// Every exact-token occurrence, in ascending non-overlapping order.
    fn locate_tokens(&self, raw: &[u8]) -> Vec<SpecTokenSpan>;

    /// Tokens owned by the duplicated subtree.
    ///
    /// Located tokens that are never extracted by any file are treated as
    /// references to the outside world and pass through unchanged.
    fn extract_tokens(&self, _path_rel: &Path, raw: &[u8]) -> Vec<String> {
        self.locate_tokens(raw)
            .into_iter()
            .map(|span| span.token)
            .collect()
    }

    /// Replace every located token present in `map_refs`.
    ///
    /// Returns the new content and the number of substituted occurrences, or
    /// `None` when nothing matched.
    fn substitute(&self, raw: &[u8], map_refs: &ReferenceMap) -> Option<(Vec<u8>, usize)> {
        splice_tokens(raw, &self.locate_tokens(raw), map_refs)
    }

    /// Candidate replacement for `token_old`. Uniqueness is enforced by the caller.
    fn generate_token(&self, token_old: &str) -> String;
}

/// Rebuild `raw` with the mapped spans replaced.
pub fn splice_tokens(
    raw: &[u8],
    l_spans: &[SpecTokenSpan],
    map_refs: &ReferenceMap,
) -> Option<(Vec<u8>, usize)> {
    let mut out: Vec<u8> = Vec::with_capacity(raw.len());
    let mut n_cursor = 0;
    let mut n_replaced = 0;

    for span in l_spans {
        let Some(token_new) = map_refs.get(&span.token) else {
            continue;
        };
        if span.range.start < n_cursor || span.range.end > raw.len() {
            continue;
        }
        out.extend_from_slice(&raw[n_cursor..span.range.start]);
        out.extend_from_slice(token_new.as_bytes());
        n_cursor = span.range.end;
        n_replaced += 1;
    }

    if n_replaced == 0 {
        return None;
    }
    out.extend_from_slice(&raw[n_cursor..]);
    Some((out, n_replaced))
}

/// Spans from capture group 1 when the pattern has one, otherwise the whole match.
fn locate_with(regex: &Regex, raw: &[u8]) -> Vec<SpecTokenSpan> {
    regex
        .captures_iter(raw)
        .filter_map(|caps| {
            let m = caps.get(1).or_else(|| caps.get(0))?;
            let token = std::str::from_utf8(m.as_bytes()).ok()?;
            Some(SpecTokenSpan {
                range: m.range(),
                token: token.to_string(),
            })
        })
        .filter(|span| !span.token.is_empty())
        .collect()
}

fn compile_regex(pattern: &str) -> Result<Regex, DuplicateError> {
    Regex::new(pattern).map_err(|e| {
        DuplicateError::InvalidPattern(format!("Invalid token pattern `{pattern}`: {e}"))
    })
}

fn generate_uuid_hex() -> String {
    Uuid::new_v4().simple().to_string()
}

////////////////////////////////////////////////////////////////////////////////
// #region UnityGuid

/// Text-serialized asset extensions whose YAML may reference other assets by GUID.
const L_UNITY_YAML_EXTENSIONS: &[&str] = &[
    "meta",
    "unity",
    "prefab",
    "asset",
    "mat",
    "anim",
    "controller",
    "overrideController",
    "playable",
    "mask",
    "physicMaterial",
    "physicsMaterial2D",
    "guiskin",
    "fontsettings",
    "spriteatlas",
    "lighting",
    "mixer",
    "renderTexture",
    "flare",
    "cubemap",
    "brush",
    "terrainlayer",
    "signal",
    "shadervariants",
    "preset",
    "asmdef",
    "asmref",
];

/// Unity-style asset GUIDs: 32 lowercase hex digits.
///
/// `*.meta` files define GUIDs on a `guid:` line; YAML assets reference them
/// as `{fileID: ..., guid: <hex>, type: ...}`. `asmdef`/`asmref` JSON uses
/// `"GUID:<hex>"`.
#[derive(Debug, Clone)]
pub struct UnityGuidCodec {
    regex_reference: Regex,
    regex_definition: Regex,
}

impl UnityGuidCodec {
    pub fn new() -> Result<Self, DuplicateError> {
        Ok(Self {
            regex_reference: compile_regex(r#"(?-u)(?:\bguid:[ \t]*|"GUID:)([0-9a-f]{32})\b"#)?,
            regex_definition: compile_regex(r"(?m-u)^guid:[ \t]*([0-9a-f]{32})[ \t]*\r?$")?,
        })
    }
}

impl TokenCodec for UnityGuidCodec {
    fn name(&self) -> &str {
        "unity-guid"
    }

    fn is_reference_bearing(&self, path_rel: &Path) -> bool {
        path_rel
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                L_UNITY_YAML_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }

    fn locate_tokens(&self, raw: &[u8]) -> Vec<SpecTokenSpan> {
        locate_with(&self.regex_reference, raw)
    }

    fn extract_tokens(&self, path_rel: &Path, raw: &[u8]) -> Vec<String> {
        let b_is_meta = path_rel
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("meta"));
        if !b_is_meta {
            return Vec::new();
        }
        locate_with(&self.regex_definition, raw)
            .into_iter()
            .map(|span| span.token)
            .collect()
    }

    fn generate_token(&self, _token_old: &str) -> String {
        generate_uuid_hex()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Pattern

/// Custom replacement generator for [`PatternCodec`].
pub type TokenGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Tokens described by a user regex; every match belongs to the subtree.
///
/// Exactness is the pattern's job: anchor it with `\b` (or surrounding syntax
/// plus a capture group) so that substrings of longer identifiers never match.
#[derive(Clone)]
pub struct PatternCodec {
    regex_token: Regex,
    patterns_include: Option<GlobSet>,
    generator: Option<TokenGenerator>,
}

impl PatternCodec {
    /// `patterns_include` restricts reference-bearing files by basename glob.
    pub fn new(pattern: &str, patterns_include: Option<&[String]>) -> Result<Self, DuplicateError> {
        Ok(Self {
            regex_token: compile_regex(pattern)?,
            patterns_include: compile_globs(patterns_include)?,
            generator: None,
        })
    }

    /// Replace the default 32-hex UUID generator.
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.generator = Some(Arc::new(generator));
        self
    }
}

impl std::fmt::Debug for PatternCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternCodec")
            .field("regex_token", &self.regex_token.as_str())
            .field("has_include", &self.patterns_include.is_some())
            .field("has_generator", &self.generator.is_some())
            .finish()
    }
}

impl TokenCodec for PatternCodec {
    fn name(&self) -> &str {
        "pattern"
    }

    fn is_reference_bearing(&self, path_rel: &Path) -> bool {
        let Some(patterns_include) = self.patterns_include.as_ref() else {
            return true;
        };
        path_rel
            .file_name()
            .map(|name| name.to_string_lossy())
            .is_some_and(|name| is_glob_matching(&name, Some(patterns_include)))
    }

    fn locate_tokens(&self, raw: &[u8]) -> Vec<SpecTokenSpan> {
        locate_with(&self.regex_token, raw)
    }

    fn generate_token(&self, token_old: &str) -> String {
        match self.generator.as_ref() {
            Some(generator) => generator(token_old),
            None => generate_uuid_hex(),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
