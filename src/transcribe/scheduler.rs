//! Chunk-aware transcription scheduler.
//!
//! Drives a backend over the ordered chunk list with a bounded worker
//! pool pulling from one shared queue. Transient failures are retried
//! inside the worker with exponential backoff and full jitter; results are
//! reordered by chunk index before delivery so the combined transcript is
//! deterministic regardless of completion order.

use crate::defaults;
use crate::transcribe::{BackendError, TranscribeOptions, TranscriptionBackend, TranscriptionOutput};
use rand::Rng;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Cooperative cancellation flag shared between the orchestrator, the
/// scheduler and its workers.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One unit of work: an encoded chunk awaiting transcription.
#[derive(Debug, Clone)]
pub struct ChunkJob {
    pub chunk_index: usize,
    pub audio_path: PathBuf,
}

/// Result of one chunk, after retries.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub chunk_index: usize,
    /// Wall-clock seconds spent on the chunk, retries included.
    pub elapsed_s: f64,
    pub result: Result<TranscriptionOutput, BackendError>,
}

impl ChunkOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on chunks in flight.
    pub max_concurrent: usize,
    /// Per-attempt timeout; exceeding it counts as a transient failure.
    pub timeout: Duration,
    /// Retry attempts after the first try of a transient failure.
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_cap: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MAX_CONCURRENT,
            timeout: Duration::from_secs(defaults::BACKEND_TIMEOUT_S),
            max_retries: defaults::MAX_RETRIES,
            backoff_initial: Duration::from_secs_f64(defaults::BACKOFF_INITIAL_S),
            backoff_cap: Duration::from_secs_f64(defaults::BACKOFF_CAP_S),
        }
    }
}

/// Bounded-concurrency scheduler over one backend.
pub struct ChunkScheduler {
    config: SchedulerConfig,
}

impl ChunkScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Transcribe every job, at most `max_concurrent` in flight, and
    /// return outcomes ordered by chunk index. On cancellation, pending
    /// jobs are discarded and only completed outcomes are returned.
    pub async fn run(
        &self,
        jobs: Vec<ChunkJob>,
        backend: Arc<dyn TranscriptionBackend>,
        options: &TranscribeOptions,
        cancel: &CancelFlag,
    ) -> Vec<ChunkOutcome> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let total = jobs.len();
        let workers = self.config.max_concurrent.max(1).min(total);

        // Single shared queue: each job is dispatched at most once.
        let (job_tx, job_rx) = mpsc::unbounded_channel::<ChunkJob>();
        for job in jobs {
            let _ = job_tx.send(job);
        }
        drop(job_tx);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<ChunkOutcome>();

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let job_rx = job_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let backend = backend.clone();
            let options = options.clone();
            let cancel = cancel.clone();
            let config = self.config.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };

                    if cancel.is_cancelled() {
                        // Stop pulling; the remaining queue is discarded.
                        break;
                    }

                    log::debug!("worker {worker_id} transcribing chunk {}", job.chunk_index);
                    let outcome = transcribe_with_retries(&job, &backend, &options, &cancel, &config).await;
                    if outcome_tx.send(outcome).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(outcome_tx);

        let mut by_index = BTreeMap::new();
        while let Some(outcome) = outcome_rx.recv().await {
            by_index.insert(outcome.chunk_index, outcome);
        }
        for handle in handles {
            let _ = handle.await;
        }

        // Cancelled chunks are not results; callers persist what finished.
        by_index
            .into_values()
            .filter(|outcome| outcome.result != Err(BackendError::Cancelled))
            .collect()
    }
}

/// Run one chunk through the backend, retrying transient failures with
/// exponential backoff and full jitter.
async fn transcribe_with_retries(
    job: &ChunkJob,
    backend: &Arc<dyn TranscriptionBackend>,
    options: &TranscribeOptions,
    cancel: &CancelFlag,
    config: &SchedulerConfig,
) -> ChunkOutcome {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    let result = loop {
        if cancel.is_cancelled() {
            break Err(BackendError::Cancelled);
        }

        match attempt_once(job, backend, options, cancel, config).await {
            Ok(output) => break Ok(output),
            Err(error) if error.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let backoff = backoff_delay(config, attempt);
                log::warn!(
                    "chunk {} attempt {} failed ({error}); retrying in {:.2}s",
                    job.chunk_index,
                    attempt,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
            }
            Err(error) => {
                if error != BackendError::Cancelled {
                    log::error!("chunk {} failed: {error}", job.chunk_index);
                }
                break Err(error);
            }
        }
    };

    ChunkOutcome {
        chunk_index: job.chunk_index,
        elapsed_s: started.elapsed().as_secs_f64(),
        result,
    }
}

/// One timed attempt, abandoned early if cancellation is requested.
async fn attempt_once(
    job: &ChunkJob,
    backend: &Arc<dyn TranscriptionBackend>,
    options: &TranscribeOptions,
    cancel: &CancelFlag,
    config: &SchedulerConfig,
) -> Result<TranscriptionOutput, BackendError> {
    let attempt = tokio::time::timeout(config.timeout, backend.transcribe(&job.audio_path, options));
    tokio::pin!(attempt);

    loop {
        tokio::select! {
            result = &mut attempt => {
                return match result {
                    Ok(inner) => inner,
                    Err(_) => Err(BackendError::Timeout(config.timeout.as_secs())),
                };
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                if cancel.is_cancelled() {
                    // Dropping the in-flight future aborts the request.
                    return Err(BackendError::Cancelled);
                }
            }
        }
    }
}

/// Full-jitter exponential backoff: uniform in (0, min(cap, initial * 2^(n-1))].
fn backoff_delay(config: &SchedulerConfig, attempt: u32) -> Duration {
    let doubling = f64::from(1u32 << (attempt - 1).min(16));
    let exp = (config.backoff_initial.as_secs_f64() * doubling)
        .min(config.backoff_cap.as_secs_f64());
    let jittered = rand::thread_rng().gen_range(0.0..=exp);
    Duration::from_secs_f64(jittered.max(0.001))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::{MockBackend, MockOutcome};

    fn fast_config(max_concurrent: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_initial: Duration::from_millis(2),
            backoff_cap: Duration::from_millis(10),
        }
    }

    fn jobs(count: usize) -> Vec<ChunkJob> {
        (0..count)
            .map(|i| ChunkJob {
                chunk_index: i,
                audio_path: PathBuf::from(format!("chunk_{i:03}.flac")),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_results_ordered_by_chunk_index() {
        let backend = Arc::new(
            MockBackend::new("m")
                .with_response("text")
                .with_delay(Duration::from_millis(5)),
        );
        let scheduler = ChunkScheduler::new(fast_config(4));

        let outcomes = scheduler
            .run(jobs(8), backend, &TranscribeOptions::default(), &CancelFlag::new())
            .await;

        let indices: Vec<usize> = outcomes.iter().map(|o| o.chunk_index).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
        assert!(outcomes.iter().all(|o| o.is_ok()));
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let backend = Arc::new(
            MockBackend::new("m").with_delay(Duration::from_millis(20)),
        );
        let scheduler = ChunkScheduler::new(fast_config(3));

        scheduler
            .run(jobs(10), backend.clone(), &TranscribeOptions::default(), &CancelFlag::new())
            .await;

        assert!(backend.max_in_flight() <= 3, "saw {}", backend.max_in_flight());
        assert_eq!(backend.calls(), 10);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_to_success() {
        let backend = Arc::new(
            MockBackend::new("m")
                .with_response("recovered")
                .script(
                    "chunk_000.flac",
                    MockOutcome::Error(BackendError::Network("reset".into())),
                )
                .script(
                    "chunk_000.flac",
                    MockOutcome::Error(BackendError::RateLimited("429".into())),
                ),
        );
        let scheduler = ChunkScheduler::new(fast_config(1));

        let outcomes = scheduler
            .run(jobs(1), backend.clone(), &TranscribeOptions::default(), &CancelFlag::new())
            .await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result.as_ref().unwrap().text, "recovered");
        // First try plus two retries.
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_exhausts_retries() {
        let mut backend = MockBackend::new("m");
        for _ in 0..4 {
            backend = backend.script(
                "chunk_000.flac",
                MockOutcome::Error(BackendError::ServiceUnavailable("503".into())),
            );
        }
        let backend = Arc::new(backend);
        let scheduler = ChunkScheduler::new(fast_config(1));

        let outcomes = scheduler
            .run(jobs(1), backend.clone(), &TranscribeOptions::default(), &CancelFlag::new())
            .await;

        assert_eq!(backend.calls(), 4);
        assert!(matches!(
            outcomes[0].result,
            Err(BackendError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_fatal_failure_not_retried_others_continue() {
        let backend = Arc::new(
            MockBackend::new("m")
                .with_response("fine")
                .script(
                    "chunk_002.flac",
                    MockOutcome::Error(BackendError::BadRequest("corrupt".into())),
                ),
        );
        let scheduler = ChunkScheduler::new(fast_config(2));

        let outcomes = scheduler
            .run(jobs(5), backend.clone(), &TranscribeOptions::default(), &CancelFlag::new())
            .await;

        assert_eq!(outcomes.len(), 5);
        assert_eq!(
            outcomes.iter().filter(|o| o.is_ok()).count(),
            4,
        );
        assert!(matches!(
            outcomes[2].result,
            Err(BackendError::BadRequest(_))
        ));
        // The fatal chunk is tried exactly once.
        assert_eq!(backend.calls(), 5);
    }

    #[tokio::test]
    async fn test_cancellation_discards_pending() {
        let backend = Arc::new(
            MockBackend::new("m").with_delay(Duration::from_millis(30)),
        );
        let scheduler = ChunkScheduler::new(fast_config(1));
        let cancel = CancelFlag::new();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            cancel_clone.cancel();
        });

        let outcomes = scheduler
            .run(jobs(20), backend.clone(), &TranscribeOptions::default(), &cancel)
            .await;

        // Far fewer than 20 completed; none of them is a Cancelled marker.
        assert!(outcomes.len() < 20);
        assert!(outcomes.iter().all(|o| o.result != Err(BackendError::Cancelled)));
        assert!(backend.calls() < 20);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let backend = Arc::new(
            MockBackend::new("m")
                .with_response("slow but fine")
                .with_delay(Duration::from_millis(50)),
        );
        let config = SchedulerConfig {
            timeout: Duration::from_millis(10),
            max_retries: 1,
            ..fast_config(1)
        };
        let scheduler = ChunkScheduler::new(config);

        let outcomes = scheduler
            .run(jobs(1), backend, &TranscribeOptions::default(), &CancelFlag::new())
            .await;

        assert!(matches!(outcomes[0].result, Err(BackendError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_empty_job_list() {
        let backend = Arc::new(MockBackend::new("m"));
        let scheduler = ChunkScheduler::new(fast_config(3));
        let outcomes = scheduler
            .run(Vec::new(), backend, &TranscribeOptions::default(), &CancelFlag::new())
            .await;
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = SchedulerConfig::default();
        for attempt in 1..=10 {
            let delay = backoff_delay(&config, attempt);
            assert!(delay.as_secs_f64() <= defaults::BACKOFF_CAP_S + f64::EPSILON);
        }
    }

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
