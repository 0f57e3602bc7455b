//! Duplication report model and mutable report builder.

use std::collections::BTreeMap;
use std::fmt;

use crate::spec::EnumDupPhase;

/// Aggregate counters and diagnostics for one duplication run.
#[derive(Debug, Default, Clone)]
pub struct ReportDuplicate {
    /// Last phase the orchestrator entered.
    pub phase: EnumDupPhase,
    /// Units of work (directories + files) enumerated by the scan.
    pub cnt_units_total: u64,
    /// Directories materialized at destination.
    pub cnt_dirs_created: u64,
    /// Files (and recreated symlinks) committed at destination.
    pub cnt_files_copied: u64,
    /// Distinct reference tokens given a fresh replacement.
    pub cnt_tokens_remapped: u64,
    /// Copied files whose content changed during the rewrite pass.
    pub cnt_files_rewritten: u64,
    /// Token occurrences substituted across all rewritten files.
    pub cnt_refs_rewritten: u64,
    /// Non-fatal warnings collected during the run.
    pub warnings: Vec<String>,
}

impl ReportDuplicate {
    /// Units committed at destination (directories + files).
    pub fn cnt_units_done(&self) -> u64 {
        self.cnt_dirs_created + self.cnt_files_copied
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_units_total".to_string(), self.cnt_units_total);
        dict_counts.insert("cnt_dirs_created".to_string(), self.cnt_dirs_created);
        dict_counts.insert("cnt_files_copied".to_string(), self.cnt_files_copied);
        dict_counts.insert("cnt_tokens_remapped".to_string(), self.cnt_tokens_remapped);
        dict_counts.insert("cnt_files_rewritten".to_string(), self.cnt_files_rewritten);
        dict_counts.insert("cnt_refs_rewritten".to_string(), self.cnt_refs_rewritten);
        dict_counts.insert("cnt_warnings".to_string(), self.warning_count() as u64);
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        format!(
            "{prefix} phase={:?} units={}/{} dirs={} files={} tokens={} rewritten_files={} rewritten_refs={} warnings={}",
            self.phase,
            self.cnt_units_done(),
            self.cnt_units_total,
            self.cnt_dirs_created,
            self.cnt_files_copied,
            self.cnt_tokens_remapped,
            self.cnt_files_rewritten,
            self.cnt_refs_rewritten,
            self.warning_count()
        )
    }
}

impl fmt::Display for ReportDuplicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[DUP]"))
    }
}

/// Mutable accumulator owned by the orchestrator.
#[derive(Debug, Default, Clone)]
pub struct ReportDuplicateBuilder {
    report: ReportDuplicate,
}

impl ReportDuplicateBuilder {
    pub fn set_phase(&mut self, phase: EnumDupPhase) {
        self.report.phase = phase;
    }

    pub fn phase(&self) -> EnumDupPhase {
        self.report.phase
    }

    pub fn set_units_total(&mut self, value: u64) {
        self.report.cnt_units_total = value;
    }

    pub fn add_dirs_created(&mut self, value: u64) {
        self.report.cnt_dirs_created += value;
    }

    pub fn add_files_copied(&mut self, value: u64) {
        self.report.cnt_files_copied += value;
    }

    pub fn add_tokens_remapped(&mut self, value: u64) {
        self.report.cnt_tokens_remapped += value;
    }

    /// Record `n_files` rewritten files holding `n_refs` substituted occurrences.
    pub fn add_files_rewritten(&mut self, n_files: u64, n_refs: u64) {
        self.report.cnt_files_rewritten += n_files;
        self.report.cnt_refs_rewritten += n_refs;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.report.warnings.push(warning);
    }

    pub fn extend_warnings<I: IntoIterator<Item = String>>(&mut self, warnings: I) {
        self.report.warnings.extend(warnings);
    }

    /// Snapshot without consuming the builder.
    pub fn peek(&self) -> &ReportDuplicate {
        &self.report
    }

    /// Finalize builder into immutable report.
    pub fn build(self) -> ReportDuplicate {
        self.report
    }
}
