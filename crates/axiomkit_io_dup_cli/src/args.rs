use std::path::PathBuf;

use axiomkit_io_dup::{EnumDupDestinationConflictStrategy, SpecDupOptions};
use clap::{Parser, ValueEnum};
use log::LevelFilter;

/// Reference grammar used to find tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum CodecKind {
    /// Unity `.meta` GUIDs and the YAML assets referencing them.
    Unity,
    /// Every match of `--pattern`.
    Pattern,
}

/// Destination root policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Refuse a non-empty destination.
    Error,
    /// Reuse directories; fail on colliding files.
    Merge,
    /// Reuse directories; replace colliding files.
    Overwrite,
}

impl From<ConflictPolicy> for EnumDupDestinationConflictStrategy {
    fn from(policy: ConflictPolicy) -> Self {
        match policy {
            ConflictPolicy::Error => Self::Error,
            ConflictPolicy::Merge => Self::Merge,
            ConflictPolicy::Overwrite => Self::Overwrite,
        }
    }
}

/// Duplicate a directory and give the copy its own reference tokens.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory to duplicate.
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Destination root; created when missing.
    #[arg(value_name = "DESTINATION")]
    pub destination: PathBuf,

    /// Token grammar.
    #[arg(long, value_enum, default_value_t = CodecKind::Unity)]
    pub codec: CodecKind,

    /// Token regex for `--codec pattern` (capture group 1 when present).
    #[arg(long, required_if_eq("codec", "pattern"))]
    pub pattern: Option<String>,

    /// Basename globs of files scanned for tokens (`--codec pattern` only).
    #[arg(long = "include", value_name = "GLOB")]
    pub patterns_include: Vec<String>,

    /// Basename globs left out of the duplicate.
    #[arg(long = "exclude", value_name = "GLOB")]
    pub patterns_exclude: Vec<String>,

    /// Maximum worker threads.
    #[arg(long = "workers", value_name = "N")]
    pub num_workers_max: Option<usize>,

    /// Existing destination policy.
    #[arg(long = "on-conflict", value_enum, default_value_t = ConflictPolicy::Error)]
    pub on_conflict: ConflictPolicy,

    /// Do not copy permissions, timestamps and xattrs.
    #[arg(long = "no-preserve-metadata")]
    pub no_preserve_metadata: bool,

    /// After a completed run, replace OLD with NEW in text files and entry names.
    #[arg(long, value_name = "OLD=NEW", value_parser = parse_rename)]
    pub rename: Option<(String, String)>,

    /// Increase logging verbosity (`-v`, `-vv`, `-vvv`).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn to_options(&self) -> SpecDupOptions {
        SpecDupOptions {
            rule_conflict_dest: self.on_conflict.into(),
            patterns_exclude: (!self.patterns_exclude.is_empty())
                .then(|| self.patterns_exclude.clone()),
            num_workers_max: self.num_workers_max,
            if_preserve_metadata: !self.no_preserve_metadata,
            ..SpecDupOptions::default()
        }
    }
}

fn parse_rename(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((text_old, text_new)) if !text_old.is_empty() && !text_new.is_empty() => {
            Ok((text_old.to_string(), text_new.to_string()))
        }
        _ => Err(format!("expected OLD=NEW, got `{raw}`")),
    }
}

/// Map `-v` counts to the appropriate log level.
pub fn get_log_level_from_verbose(verbose_count: u8) -> LevelFilter {
    match verbose_count {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        3.. => LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axiomkit_io_dup::EnumDupDestinationConflictStrategy;
    use clap::Parser;
    use log::LevelFilter;

    use super::{Args, CodecKind, get_log_level_from_verbose};

    #[test]
    fn maps_verbose_flags_to_log_filters() {
        assert_eq!(get_log_level_from_verbose(0), LevelFilter::Warn);
        assert_eq!(get_log_level_from_verbose(1), LevelFilter::Info);
        assert_eq!(get_log_level_from_verbose(2), LevelFilter::Debug);
        assert_eq!(get_log_level_from_verbose(3), LevelFilter::Trace);
        assert_eq!(get_log_level_from_verbose(9), LevelFilter::Trace);
    }

    #[test]
    fn parses_minimal_args() {
        let args = Args::parse_from(["axiomkit-dup", "Template/Page", "temp"]);
        assert_eq!(args.source, PathBuf::from("Template/Page"));
        assert_eq!(args.destination, PathBuf::from("temp"));
        assert_eq!(args.codec, CodecKind::Unity);
        assert!(args.rename.is_none());

        let spec_dup_options = args.to_options();
        assert_eq!(
            spec_dup_options.rule_conflict_dest,
            EnumDupDestinationConflictStrategy::Error
        );
        assert!(spec_dup_options.patterns_exclude.is_none());
        assert!(spec_dup_options.if_preserve_metadata);
    }

    #[test]
    fn parses_full_feature_flags() {
        let args = Args::parse_from([
            "axiomkit-dup",
            "src",
            "dst",
            "--codec",
            "pattern",
            "--pattern",
            r"\bID\d+\b",
            "--include",
            "*.txt",
            "--exclude",
            "*.tmp",
            "--exclude",
            ".git",
            "--workers",
            "2",
            "--on-conflict",
            "merge",
            "--no-preserve-metadata",
            "--rename",
            "TemplatePage=Shop",
            "-vv",
        ]);
        assert_eq!(args.codec, CodecKind::Pattern);
        assert_eq!(args.pattern.as_deref(), Some(r"\bID\d+\b"));
        assert_eq!(args.patterns_include, vec!["*.txt".to_string()]);
        assert_eq!(
            args.rename,
            Some(("TemplatePage".to_string(), "Shop".to_string()))
        );
        assert_eq!(args.verbose, 2);

        let spec_dup_options = args.to_options();
        assert_eq!(
            spec_dup_options.rule_conflict_dest,
            EnumDupDestinationConflictStrategy::Merge
        );
        assert_eq!(
            spec_dup_options.patterns_exclude,
            Some(vec!["*.tmp".to_string(), ".git".to_string()])
        );
        assert_eq!(spec_dup_options.num_workers_max, Some(2));
        assert!(!spec_dup_options.if_preserve_metadata);
    }

    #[test]
    fn pattern_codec_requires_pattern() {
        let res = Args::try_parse_from(["axiomkit-dup", "src", "dst", "--codec", "pattern"]);
        assert!(res.is_err());
    }

    #[test]
    fn rename_requires_both_sides() {
        for raw in ["Template", "=Shop", "Template="] {
            let res = Args::try_parse_from(["axiomkit-dup", "src", "dst", "--rename", raw]);
            assert!(res.is_err(), "{raw} accepted");
        }
    }
}
