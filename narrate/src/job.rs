//! Narration jobs: one text unit, one request, one output file.
//!
//! A job starts pending and ends either succeeded or failed. The failed
//! transition is the only place that removes an output file, so every failure
//! path cleans up exactly once.

use crate::error::NarrateError;
use crate::text::{ChapterUnit, pad_width, segments};
use crate::tts::{SpeechRequest, Transfer, TtsBackend, TtsError, VoiceOptions};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Default minimum size for whole-chapter audio.
pub const DEFAULT_MIN_BYTES_CHAPTER: u64 = 10 * 1024;

/// Default minimum size for segment audio.
pub const DEFAULT_MIN_BYTES_SEGMENT: u64 = 1024;

/// Terminal state of a job.
#[derive(Debug)]
pub enum JobStatus {
    /// Audio written and validated.
    Succeeded { bytes: u64 },
    /// A valid output from an earlier run was kept.
    Reused { bytes: u64 },
    /// Request or validation failed; the output file is gone.
    Failed(NarrateError),
}

/// Result of running one job.
#[derive(Debug)]
pub struct JobResult {
    pub job_id: String,
    /// (chapter position, segment index) for ordering reports
    pub order: (usize, usize),
    pub output: PathBuf,
    pub status: JobStatus,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Succeeded { .. } | JobStatus::Reused { .. }
        )
    }
}

/// A pending unit of work.
#[derive(Debug, Clone)]
pub struct NarrationJob {
    /// Output file stem, unique within a run
    pub id: String,
    /// (chapter position, segment index); segment index is 0 when unsegmented
    pub order: (usize, usize),
    pub request: SpeechRequest,
    pub output: PathBuf,
    pub min_bytes: u64,
}

impl NarrationJob {
    /// Run the job to a terminal state.
    pub async fn run(self, backend: &dyn TtsBackend, skip_existing: bool) -> JobResult {
        if skip_existing {
            if let Some(bytes) = self.reusable_output() {
                return self.finish(JobStatus::Reused { bytes });
            }
        }

        let outcome = match backend.synthesize(&self.request, &self.output).await {
            Ok(transfer) => validate(&transfer, &self.output, self.min_bytes),
            Err(e) => Err(transport_error(e, &self.output)),
        };

        match outcome {
            Ok(bytes) => self.finish(JobStatus::Succeeded { bytes }),
            Err(error) => self.fail(error),
        }
    }

    /// Size of an existing output that passes validation. An undersized
    /// leftover from an interrupted run is removed.
    fn reusable_output(&self) -> Option<u64> {
        let size = fs::metadata(&self.output).ok()?.len();
        if size > self.min_bytes {
            return Some(size);
        }
        log::debug!(
            "Discarding untrusted leftover {} ({} bytes)",
            self.output.display(),
            size
        );
        remove_output(&self.output);
        None
    }

    /// Fail a job that never produced a result of its own.
    pub fn abandon(self, error: NarrateError) -> JobResult {
        self.fail(error)
    }

    /// Failed transition: remove the artifact, then record the error.
    fn fail(self, error: NarrateError) -> JobResult {
        remove_output(&self.output);
        self.finish(JobStatus::Failed(error))
    }

    fn finish(self, status: JobStatus) -> JobResult {
        JobResult {
            job_id: self.id,
            order: self.order,
            output: self.output,
            status,
        }
    }
}

fn remove_output(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

fn transport_error(error: TtsError, output: &Path) -> NarrateError {
    match error {
        TtsError::Write { source, .. } => NarrateError::WriteFailure {
            path: output.to_path_buf(),
            message: source.to_string(),
        },
        other => NarrateError::TransportFailure {
            status: None,
            message: other.to_string(),
        },
    }
}

/// Classify a finished request.
///
/// Accepts only when the status is 2xx and the file at `path` is larger than
/// `min_bytes`. A non-2xx status is rejected without looking at the file. A
/// file whose size differs from what was streamed is a write failure.
pub fn validate(transfer: &Transfer, path: &Path, min_bytes: u64) -> Result<u64, NarrateError> {
    let status = transfer.status;
    if !transfer.is_success() {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unexpected status");
        return Err(NarrateError::TransportFailure {
            status: Some(status),
            message: reason.to_string(),
        });
    }

    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            return Err(NarrateError::WriteFailure {
                path: path.to_path_buf(),
                message: if e.kind() == ErrorKind::NotFound {
                    "no output was written".to_string()
                } else {
                    e.to_string()
                },
            });
        }
    };

    if size != transfer.bytes_written {
        return Err(NarrateError::WriteFailure {
            path: path.to_path_buf(),
            message: format!(
                "received {} bytes but the file holds {}",
                transfer.bytes_written, size
            ),
        });
    }

    if size <= min_bytes {
        return Err(NarrateError::UndersizedOutput {
            path: path.to_path_buf(),
            size,
            min_bytes,
        });
    }

    Ok(size)
}

/// Create the output directory and check that files can be written to it.
pub fn prepare_output_dir(dir: &Path) -> Result<(), NarrateError> {
    let unwritable = |source| NarrateError::OutputUnwritable {
        dir: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(unwritable)?;
    tempfile::NamedTempFile::new_in(dir).map_err(unwritable)?;
    Ok(())
}

/// Settings that turn chapters into jobs.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub output_dir: PathBuf,
    /// Audio file extension without the dot
    pub extension: String,
    /// Maximum segment length in characters, 0 for whole chapters
    pub segment_length: usize,
    /// Minimum valid output size; `None` picks the mode's default
    pub min_bytes: Option<u64>,
    pub voice: VoiceOptions,
}

impl JobPlan {
    pub fn effective_min_bytes(&self) -> u64 {
        self.min_bytes.unwrap_or(if self.segment_length == 0 {
            DEFAULT_MIN_BYTES_CHAPTER
        } else {
            DEFAULT_MIN_BYTES_SEGMENT
        })
    }

    fn file_name(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.extension)
    }

    fn job(&self, stem: String, order: (usize, usize), text: &str) -> NarrationJob {
        let file_name = self.file_name(&stem);
        NarrationJob {
            output: self.output_dir.join(&file_name),
            request: SpeechRequest {
                text: text.to_string(),
                file_name,
                voice: self.voice.clone(),
            },
            id: stem,
            order,
            min_bytes: self.effective_min_bytes(),
        }
    }
}

/// Failed results for chapters whose file could not be read.
///
/// These never reach the TTS service but count toward the run's failures.
pub fn unreadable_results(units: &[ChapterUnit], plan: &JobPlan) -> Vec<JobResult> {
    units
        .iter()
        .enumerate()
        .filter_map(|(position, unit)| {
            let error = unit.read_failure()?;
            Some(JobResult {
                job_id: unit.name().to_string(),
                order: (position, 0),
                output: plan.output_dir.join(plan.file_name(unit.name())),
                status: JobStatus::Failed(error),
            })
        })
        .collect()
}

/// Create jobs for every non-empty chapter, in chapter order.
///
/// Fails if two jobs would write the same file.
pub fn plan_jobs(units: &[ChapterUnit], plan: &JobPlan) -> Result<Vec<NarrationJob>, NarrateError> {
    let mut jobs = Vec::new();

    for (position, unit) in units.iter().enumerate() {
        let Some(text) = unit.text.as_deref() else {
            continue;
        };

        if plan.segment_length == 0 {
            jobs.push(plan.job(unit.name().to_string(), (position, 0), text));
            continue;
        }

        let parts = segments(text, plan.segment_length);
        let width = pad_width(parts.clone().count());
        for segment in parts {
            jobs.push(plan.job(
                segment.file_stem(unit.name(), width),
                (position, segment.index),
                segment.speech_text(),
            ));
        }
    }

    let mut seen = HashSet::new();
    for job in &jobs {
        if !seen.insert(&job.output) {
            return Err(NarrateError::Config(format!(
                "Two jobs would write {}; rename one of the source files",
                job.output.display()
            )));
        }
    }

    Ok(jobs)
}
