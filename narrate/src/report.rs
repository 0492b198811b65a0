//! Run summary: counts, surviving files and failures.

use crate::job::{JobResult, JobStatus};
use crate::text::ChapterUnit;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// An audio file present after the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

/// A job that ended in failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailedJob {
    pub job_id: String,
    pub error: String,
}

/// Aggregated outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Chapters considered after filtering
    pub chapters: usize,
    /// Jobs dispatched
    pub total: usize,
    pub succeeded: usize,
    /// Valid outputs kept from an earlier run
    pub reused: usize,
    /// Chapters with no speakable text; never dispatched
    pub skipped: Vec<String>,
    pub failed: Vec<FailedJob>,
    /// Surviving outputs in chapter order
    pub files: Vec<ProducedFile>,
}

impl RunReport {
    /// Build the report once every job has finished.
    pub fn from_results(
        started_at: DateTime<Utc>,
        units: &[ChapterUnit],
        results: &[JobResult],
    ) -> Self {
        let mut ordered: Vec<&JobResult> = results.iter().collect();
        ordered.sort_by_key(|r| r.order);

        let mut succeeded = 0;
        let mut reused = 0;
        let mut failed = Vec::new();
        let mut files = Vec::new();

        for result in ordered {
            match &result.status {
                JobStatus::Succeeded { .. } => succeeded += 1,
                JobStatus::Reused { .. } => reused += 1,
                JobStatus::Failed(error) => {
                    failed.push(FailedJob {
                        job_id: result.job_id.clone(),
                        error: error.to_string(),
                    });
                    continue;
                }
            }
            if let Some(file) = produced_file(&result.output) {
                files.push(file);
            }
        }

        let skipped = units
            .iter()
            .filter(|u| u.is_empty())
            .map(|u| u.name().to_string())
            .collect();

        Self {
            started_at,
            finished_at: Utc::now(),
            chapters: units.len(),
            total: results.len(),
            succeeded,
            reused,
            skipped,
            failed,
            files,
        }
    }

    /// Whether jobs were dispatched and none of them produced audio.
    pub fn nothing_succeeded(&self) -> bool {
        self.total > 0 && self.succeeded + self.reused == 0
    }

    /// Total bytes of audio on disk.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }

    /// Human-readable summary lines.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();

        let elapsed = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        lines.push(format!(
            "Completed: {}/{} succeeded, {} failed, {} skipped{} ({:.1}s)",
            self.succeeded + self.reused,
            self.total,
            self.failed.len(),
            self.skipped.len(),
            if self.reused > 0 {
                format!(", {} reused", self.reused)
            } else {
                String::new()
            },
            elapsed
        ));

        if !self.skipped.is_empty() {
            lines.push(format!("Skipped (empty): {}", self.skipped.join(", ")));
        }

        for failure in &self.failed {
            lines.push(format!("  FAILED {}: {}", failure.job_id, failure.error));
        }

        if !self.files.is_empty() {
            lines.push(format!(
                "Output files ({}, {}):",
                self.files.len(),
                format_bytes(self.total_bytes())
            ));
            for file in &self.files {
                let name = file
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.path.display().to_string());
                lines.push(format!("  {} ({})", name, format_bytes(file.bytes)));
            }
        }

        lines
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn produced_file(path: &Path) -> Option<ProducedFile> {
    let meta = fs::metadata(path).ok()?;
    Some(ProducedFile {
        path: path.to_path_buf(),
        bytes: meta.len(),
    })
}

/// Format bytes for human-readable display.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
