//! Report generation for suite runs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::format::Outcome;

/// One executed test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRow {
    pub path: String,
    pub kind: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
}

/// Summary counters over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub expected_failures: u64,
    pub unexpected_passes: u64,
    pub unsupported: u64,
}

impl ReportSummary {
    #[must_use]
    pub fn from_rows(rows: &[TestRow]) -> Self {
        let mut summary = Self {
            total: rows.len() as u64,
            ..Self::default()
        };
        for row in rows {
            match row.outcome {
                Outcome::Pass => summary.passed += 1,
                Outcome::Fail => summary.failed += 1,
                Outcome::XFail => summary.expected_failures += 1,
                Outcome::XPass => summary.unexpected_passes += 1,
                Outcome::Unsupported => summary.unsupported += 1,
            }
        }
        summary
    }

    /// Expected failures and unsupported tests do not fail the run.
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failed == 0 && self.unexpected_passes == 0
    }
}

/// A suite run report: metadata, summary, and per-test rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub title: String,
    pub target_triple: String,
    pub stdlib: String,
    pub timestamp: String,
    pub summary: ReportSummary,
    pub rows: Vec<TestRow>,
}

impl SuiteReport {
    /// Render the report as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", self.title));
        out.push_str(&format!("- Target: {}\n", self.target_triple));
        out.push_str(&format!("- Stdlib: {}\n", self.stdlib));
        out.push_str(&format!("- Timestamp: {}\n", self.timestamp));
        out.push_str(&format!("- Total: {}\n", self.summary.total));
        out.push_str(&format!("- Passed: {}\n", self.summary.passed));
        out.push_str(&format!("- Failed: {}\n", self.summary.failed));
        out.push_str(&format!(
            "- Expected failures: {}\n",
            self.summary.expected_failures
        ));
        out.push_str(&format!(
            "- Unexpected passes: {}\n",
            self.summary.unexpected_passes
        ));
        out.push_str(&format!("- Unsupported: {}\n\n", self.summary.unsupported));

        out.push_str("| Test | Kind | Status |\n");
        out.push_str("|------|------|--------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                row.path,
                row.kind,
                row.outcome.as_str().to_uppercase()
            ));
        }
        out
    }

    /// Render the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.summary.all_passed()
    }
}

/// A single artifact entry in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub kind: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Index linking a run's emitted files with content hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub index_version: u32,
    pub run_id: String,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ArtifactIndex {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            index_version: 1,
            run_id: run_id.into(),
            artifacts: Vec::new(),
        }
    }

    /// Hash a file and add it to the index.
    pub fn add_file(&mut self, path: &Path, kind: &str) -> std::io::Result<()> {
        let bytes = std::fs::read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        self.artifacts.push(ArtifactEntry {
            path: path.display().to_string(),
            kind: kind.to_string(),
            sha256: format!("{:x}", hasher.finalize()),
            size_bytes: bytes.len() as u64,
        });
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(path: &str, outcome: Outcome) -> TestRow {
        TestRow {
            path: path.to_string(),
            kind: "pass".to_string(),
            outcome,
            detail: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn summary_counts_each_outcome() {
        let rows = vec![
            row("a.pass.cpp", Outcome::Pass),
            row("b.pass.cpp", Outcome::Fail),
            row("c.pass.cpp", Outcome::XFail),
            row("d.pass.cpp", Outcome::XPass),
            row("e.pass.cpp", Outcome::Unsupported),
            row("f.pass.cpp", Outcome::Pass),
        ];
        let summary = ReportSummary::from_rows(&rows);
        assert_eq!(summary.total, 6);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.expected_failures, 1);
        assert_eq!(summary.unexpected_passes, 1);
        assert_eq!(summary.unsupported, 1);
        assert!(!summary.all_passed());
    }

    #[test]
    fn expected_failures_and_unsupported_do_not_fail_the_run() {
        let rows = vec![
            row("a.pass.cpp", Outcome::Pass),
            row("b.pass.cpp", Outcome::XFail),
            row("c.pass.cpp", Outcome::Unsupported),
        ];
        assert!(ReportSummary::from_rows(&rows).all_passed());
    }

    #[test]
    fn markdown_report_has_counters_and_rows() {
        let rows = vec![row("util/move.pass.cpp", Outcome::Pass)];
        let report = SuiteReport {
            title: "Conformance Report".to_string(),
            target_triple: "x86_64-unknown-linux-gnu".to_string(),
            stdlib: "libc++".to_string(),
            timestamp: "2026-08-06T00:00:00Z".to_string(),
            summary: ReportSummary::from_rows(&rows),
            rows,
        };
        let md = report.to_markdown();
        assert!(md.contains("# Conformance Report"));
        assert!(md.contains("- Passed: 1"));
        assert!(md.contains("| util/move.pass.cpp | pass | PASS |"));
    }

    #[test]
    fn json_report_round_trips() {
        let rows = vec![row("a.pass.cpp", Outcome::Fail)];
        let report = SuiteReport {
            title: "t".to_string(),
            target_triple: "triple".to_string(),
            stdlib: "libc++".to_string(),
            timestamp: "now".to_string(),
            summary: ReportSummary::from_rows(&rows),
            rows,
        };
        let parsed: SuiteReport = serde_json::from_str(&report.to_json()).expect("valid json");
        assert_eq!(parsed.summary.failed, 1);
        assert_eq!(parsed.rows[0].outcome, Outcome::Fail);
    }

    #[test]
    fn artifact_index_hashes_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("report.md");
        std::fs::write(&file, "# report\n").expect("write artifact");
        let mut index = ArtifactIndex::new("run-1");
        index.add_file(&file, "report").expect("hash artifact");
        assert_eq!(index.artifacts.len(), 1);
        assert_eq!(index.artifacts[0].kind, "report");
        assert_eq!(index.artifacts[0].sha256.len(), 64);
        assert_eq!(index.artifacts[0].size_bytes, 9);
    }
}
