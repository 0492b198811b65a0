//! Job scheduler with a bounded number of in-flight requests.

use crate::error::NarrateError;
use crate::job::{JobResult, NarrationJob};
use crate::tts::TtsBackend;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Default number of concurrent requests.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 5;

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum jobs in flight at once (at least 1)
    pub max_in_flight: usize,
    /// Minimum spacing between successive dispatches
    pub delay: Duration,
    /// Keep valid outputs from earlier runs instead of re-requesting them
    pub skip_existing: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            delay: Duration::ZERO,
            skip_existing: false,
        }
    }
}

/// Progress information for the scheduler.
#[derive(Debug, Clone, Default)]
pub struct SchedulerProgress {
    /// Total number of jobs.
    pub total_jobs: usize,
    /// Jobs that reached a terminal state.
    pub completed: usize,
    /// Of those, how many failed.
    pub failed: usize,
    /// Jobs currently running.
    pub in_flight: usize,
}

/// Dispatches jobs to a TTS backend, at most `max_in_flight` at a time.
pub struct JobScheduler {
    backend: Arc<dyn TtsBackend>,
    options: SchedulerOptions,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl JobScheduler {
    /// Create a new scheduler.
    pub fn new(backend: Arc<dyn TtsBackend>, options: SchedulerOptions) -> Self {
        Self {
            backend,
            options: SchedulerOptions {
                max_in_flight: options.max_in_flight.max(1),
                ..options
            },
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Highest number of jobs that were ever in flight together.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Record a finished job and notify the caller.
    fn record<F>(
        &self,
        total_jobs: usize,
        failed: &mut usize,
        results: &mut Vec<JobResult>,
        result: JobResult,
        on_result: &mut F,
    ) where
        F: FnMut(&SchedulerProgress, &JobResult),
    {
        *failed += usize::from(!result.is_success());
        let progress = SchedulerProgress {
            total_jobs,
            completed: results.len() + 1,
            failed: *failed,
            in_flight: self.in_flight.load(Ordering::SeqCst),
        };
        on_result(&progress, &result);
        results.push(result);
    }

    /// Run every job to a terminal state.
    ///
    /// `on_result` is called as each job finishes, in completion order.
    /// Returns once all dispatched jobs have finished.
    pub async fn run_to_completion<F>(
        &self,
        jobs: Vec<NarrationJob>,
        mut on_result: F,
    ) -> Result<Vec<JobResult>>
    where
        F: FnMut(&SchedulerProgress, &JobResult),
    {
        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.options.max_in_flight));
        let (tx, mut rx) = mpsc::unbounded_channel::<JobResult>();
        let mut tasks = JoinSet::new();
        let mut results: Vec<JobResult> = Vec::with_capacity(total);
        let mut failed = 0;
        // Dispatched but not yet reported, so a panicked task still gets a result.
        let mut outstanding: HashMap<String, NarrationJob> = HashMap::new();
        let mut last_dispatch: Option<Instant> = None;

        for job in jobs {
            // Wait for a free slot, reporting finished jobs meanwhile.
            let permit = loop {
                tokio::select! {
                    permit = Arc::clone(&semaphore).acquire_owned() => {
                        break permit.context("Job semaphore closed")?;
                    }
                    Some(result) = rx.recv() => {
                        outstanding.remove(&result.job_id);
                        self.record(total, &mut failed, &mut results, result, &mut on_result);
                    }
                }
            };

            if let Some(previous) = last_dispatch {
                tokio::time::sleep_until(previous + self.options.delay).await;
            }
            last_dispatch = Some(Instant::now());

            log::debug!("Dispatching {}", job.id);
            outstanding.insert(job.id.clone(), job.clone());

            let backend = Arc::clone(&self.backend);
            let in_flight = Arc::clone(&self.in_flight);
            let peak = Arc::clone(&self.peak);
            let tx = tx.clone();
            let skip_existing = self.options.skip_existing;

            tasks.spawn(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let result = job.run(backend.as_ref(), skip_existing).await;

                in_flight.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
                let _ = tx.send(result);
            });
        }

        // Only the tasks hold senders now; recv ends once they all finish.
        drop(tx);
        while let Some(result) = rx.recv().await {
            outstanding.remove(&result.job_id);
            self.record(total, &mut failed, &mut results, result, &mut on_result);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("Narration task ended abnormally: {}", e);
            }
        }

        for (_, job) in outstanding.drain() {
            let result = job.abandon(NarrateError::TransportFailure {
                status: None,
                message: "job task ended without a result".to_string(),
            });
            self.record(total, &mut failed, &mut results, result, &mut on_result);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapters::ChapterFile;
    use crate::job::{JobPlan, JobStatus, plan_jobs};
    use crate::text::{ChapterUnit, LineMode};
    use crate::tts::VoiceOptions;
    use crate::tts::testing::{MockBackend, MockReply};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn jobs(dir: &Path, count: usize) -> Vec<NarrationJob> {
        let units: Vec<_> = (1..=count)
            .map(|i| {
                ChapterUnit::from_text(
                    ChapterFile::new(PathBuf::from(format!("第{}章.txt", i))),
                    "正文。",
                    LineMode::Preserve,
                )
            })
            .collect();
        let plan = JobPlan {
            output_dir: dir.to_path_buf(),
            extension: "mp3".to_string(),
            segment_length: 0,
            min_bytes: Some(1000),
            voice: VoiceOptions::default(),
        };
        plan_jobs(&units, &plan).unwrap()
    }

    fn options(max_in_flight: usize) -> SchedulerOptions {
        SchedulerOptions {
            max_in_flight,
            ..SchedulerOptions::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_bound() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Arc::new(
            MockBackend::always(200, 5000).with_latency(Duration::from_millis(20)),
        );
        let scheduler = JobScheduler::new(backend.clone(), options(3));

        let results = scheduler
            .run_to_completion(jobs(temp_dir.path(), 20), |progress, _| {
                assert!(progress.in_flight <= 3);
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| r.is_success()));
        assert!(scheduler.peak_in_flight() <= 3);
        assert!(backend.peak_in_flight() <= 3);
        assert_eq!(backend.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_single_slot_runs_sequentially() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Arc::new(
            MockBackend::always(200, 5000).with_latency(Duration::from_millis(5)),
        );
        let scheduler = JobScheduler::new(backend.clone(), options(1));

        scheduler
            .run_to_completion(jobs(temp_dir.path(), 4), |_, _| {})
            .await
            .unwrap();

        assert_eq!(backend.peak_in_flight(), 1);
        assert_eq!(
            backend.requested_files(),
            vec!["第1章.mp3", "第2章.mp3", "第3章.mp3", "第4章.mp3"]
        );
    }

    #[tokio::test]
    async fn test_zero_bound_is_treated_as_one() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::always(200, 5000));
        let scheduler = JobScheduler::new(backend.clone(), options(0));

        let results = scheduler
            .run_to_completion(jobs(temp_dir.path(), 2), |_, _| {})
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_continues() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::new(|req| match req.file_name.as_str() {
            "第2章.mp3" => MockReply::Status(503, 0),
            "第3章.mp3" => MockReply::Status(200, 500),
            "第4章.mp3" => MockReply::Refused,
            _ => MockReply::Status(200, 4000),
        }));
        let scheduler = JobScheduler::new(backend, options(2));

        let mut seen = 0;
        let mut failures = 0;
        let results = scheduler
            .run_to_completion(jobs(temp_dir.path(), 6), |progress, result| {
                seen += 1;
                failures += usize::from(!result.is_success());
                assert_eq!(progress.completed, seen);
                assert_eq!(progress.failed, failures);
            })
            .await
            .unwrap();

        assert_eq!(seen, 6);
        let failed: Vec<_> = results
            .iter()
            .filter(|r| matches!(r.status, JobStatus::Failed(_)))
            .map(|r| r.job_id.as_str())
            .collect();
        assert_eq!(failed.len(), 3);
        assert_eq!(failures, 3);
        assert!(!temp_dir.path().join("第2章.mp3").exists());
        assert!(!temp_dir.path().join("第3章.mp3").exists());
        assert!(!temp_dir.path().join("第4章.mp3").exists());
        assert!(temp_dir.path().join("第5章.mp3").exists());
    }

    #[tokio::test]
    async fn test_dispatch_delay() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::always(200, 5000));
        let scheduler = JobScheduler::new(
            backend,
            SchedulerOptions {
                max_in_flight: 8,
                delay: Duration::from_millis(40),
                skip_existing: false,
            },
        );

        let started = std::time::Instant::now();
        scheduler
            .run_to_completion(jobs(temp_dir.path(), 3), |_, _| {})
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_no_jobs() {
        let backend = Arc::new(MockBackend::always(200, 5000));
        let scheduler = JobScheduler::new(backend.clone(), options(4));
        let results = scheduler.run_to_completion(Vec::new(), |_, _| {}).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(backend.call_count(), 0);
    }
}
