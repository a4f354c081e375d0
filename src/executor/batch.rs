//! Chunked Batch Executor
//!
//! Runs a batch of tasks in sequential chunks. Within a chunk every task
//! competes for a permit from the shared [`ConcurrencyLimiter`], so no more
//! than `max_concurrency` operations are ever in flight. Results are placed by
//! task index, never by completion order.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use super::ConcurrencyLimiter;
use crate::config::ExecutorConfig;
use crate::coordination::CircuitBreaker;
use crate::domain::{BatchResult, BatchTask, SubmissionContext, TaskOutcome};
use crate::error::{GateError, Result};

const PERMIT_TIMEOUT: &str = "permit timeout";
const CHUNK_TIMEOUT: &str = "chunk timeout";
const TASK_INTERRUPTED: &str = "task interrupted";

/// Executes batches under the shared concurrency limit
pub struct BatchExecutor {
    config: ExecutorConfig,
    limiter: Arc<ConcurrencyLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl BatchExecutor {
    pub fn new(
        config: ExecutorConfig,
        limiter: Arc<ConcurrencyLimiter>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            limiter,
            breaker,
        }
    }

    /// Build the limiter from the executor config
    pub fn with_own_limiter(config: ExecutorConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let limiter = Arc::new(ConcurrencyLimiter::new(
            config.max_concurrency,
            config.permit_timeout(),
        ));
        Self::new(config, limiter, breaker)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn limiter(&self) -> Arc<ConcurrencyLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Execute every task and return outcomes in input order.
    ///
    /// The whole batch is rejected with `CircuitOpen` (or `Overloaded` for an
    /// unhealthy pool) before any task runs. Individual task errors never fail
    /// the batch; they become `Failure` outcomes.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, tasks = tasks.len()))]
    pub async fn execute<P, R, E, F, Fut>(
        &self,
        ctx: &SubmissionContext,
        tasks: Vec<BatchTask<P, R>>,
        op: F,
    ) -> Result<BatchResult<R>>
    where
        P: Send + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let total = tasks.len();
        if total == 0 {
            return Ok(BatchResult::empty());
        }

        check_indices(&tasks)?;
        self.breaker.admit()?;

        let chunk_size = self.config.chunk_size.max(1);
        let chunk_count = total.div_ceil(chunk_size);
        info!(
            "Executing {} tasks in {} chunks (limit {})",
            total,
            chunk_count,
            self.limiter.max_permits()
        );

        let op = Arc::new(op);
        let mut outcomes: Vec<TaskOutcome<R>> = (0..total).map(|_| TaskOutcome::Pending).collect();
        let mut remaining = tasks.into_iter();

        for chunk_no in 0..chunk_count {
            if chunk_no > 0 && self.config.chunk_pause_ms > 0 {
                sleep(self.config.chunk_pause()).await;
            }
            let chunk: Vec<_> = remaining.by_ref().take(chunk_size).collect();
            debug!("Chunk {}/{}: {} tasks", chunk_no + 1, chunk_count, chunk.len());
            self.run_chunk(chunk, &op, &mut outcomes).await;
        }

        let result = BatchResult::from_outcomes(outcomes);
        info!(
            "Batch finished in {}ms: {} succeeded, {} failed",
            ctx.elapsed_ms(),
            result.success_count,
            result.failure_count
        );
        Ok(result)
    }

    async fn run_chunk<P, R, E, F, Fut>(
        &self,
        chunk: Vec<BatchTask<P, R>>,
        op: &Arc<F>,
        outcomes: &mut [TaskOutcome<R>],
    ) where
        P: Send + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let deadline = Instant::now() + self.config.chunk_timeout();
        let task_timeout = self.config.task_timeout();
        let mut indices = Vec::with_capacity(chunk.len());
        let mut set = JoinSet::new();

        for task in chunk {
            let index = task.index;
            indices.push(index);

            let limiter = Arc::clone(&self.limiter);
            let breaker = Arc::clone(&self.breaker);
            let op = Arc::clone(op);
            let payload = task.payload;

            set.spawn(async move {
                let permit = match limiter.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        debug!("Task {} gave up waiting for a permit: {}", index, e);
                        breaker.record_failure(PERMIT_TIMEOUT);
                        return (index, TaskOutcome::Failure(PERMIT_TIMEOUT.to_string()));
                    }
                };

                let outcome = match timeout(task_timeout, (*op)(payload)).await {
                    Ok(Ok(value)) => {
                        breaker.record_success();
                        TaskOutcome::Success(value)
                    }
                    Ok(Err(e)) => {
                        let reason = e.to_string();
                        breaker.record_failure(&reason);
                        TaskOutcome::Failure(reason)
                    }
                    Err(_) => {
                        let reason = format!("task timed out after {}ms", task_timeout.as_millis());
                        breaker.record_failure(&reason);
                        TaskOutcome::Failure(reason)
                    }
                };
                drop(permit);
                (index, outcome)
            });
        }

        let mut chunk_timed_out = false;
        loop {
            match timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((index, outcome)))) => outcomes[index] = outcome,
                Ok(Some(Err(e))) => warn!("Task join failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Chunk exceeded {}ms, cancelling {} unfinished tasks",
                        self.config.chunk_timeout().as_millis(),
                        set.len()
                    );
                    chunk_timed_out = true;
                    set.abort_all();
                    break;
                }
            }
        }

        let reason = if chunk_timed_out {
            CHUNK_TIMEOUT
        } else {
            TASK_INTERRUPTED
        };
        for index in indices {
            if matches!(outcomes[index], TaskOutcome::Pending) {
                self.breaker.record_failure(reason);
                outcomes[index] = TaskOutcome::Failure(reason.to_string());
            }
        }
    }
}

/// Indices must form a permutation of `0..len`
fn check_indices<P, R>(tasks: &[BatchTask<P, R>]) -> Result<()> {
    let mut seen = vec![false; tasks.len()];
    for task in tasks {
        match seen.get_mut(task.index) {
            Some(slot) if !*slot => *slot = true,
            Some(_) => {
                return Err(GateError::Validation(format!(
                    "duplicate task index {}",
                    task.index
                )))
            }
            None => {
                return Err(GateError::Validation(format!(
                    "task index {} out of range for batch of {}",
                    task.index,
                    tasks.len()
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn executor(config: ExecutorConfig, threshold: u32) -> BatchExecutor {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            ..Default::default()
        }));
        BatchExecutor::with_own_limiter(config, breaker)
    }

    fn fast_config(chunk_size: usize, max_concurrency: usize) -> ExecutorConfig {
        ExecutorConfig {
            chunk_size,
            chunk_pause_ms: 1,
            max_concurrency,
            permit_timeout_ms: 5_000,
            task_timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_limit() {
        let exec = executor(fast_config(50, 4), 1_000);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = BatchTask::from_payloads(0..40u32);
        let (c, p) = (current.clone(), peak.clone());
        let result = exec
            .execute(&SubmissionContext::new(40), tasks, move |n| {
                let (c, p) = (c.clone(), p.clone());
                async move {
                    let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(5)).await;
                    c.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(n * 2)
                }
            })
            .await
            .unwrap();

        assert!(result.all_succeeded());
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(exec.limiter().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_results_follow_input_order_under_random_latency() {
        let exec = executor(fast_config(7, 3), 1_000);
        let tasks = BatchTask::from_payloads(0..25u64);

        let result = exec
            .execute(&SubmissionContext::new(25), tasks, |n| async move {
                let jitter = rand::thread_rng().gen_range(0..10);
                sleep(Duration::from_millis(jitter)).await;
                Ok::<_, String>(format!("ack-{}", n))
            })
            .await
            .unwrap();

        assert_eq!(result.len(), 25);
        for (i, outcome) in result.outcomes.iter().enumerate() {
            assert_eq!(outcome, &TaskOutcome::Success(format!("ack-{}", i)));
        }
    }

    #[tokio::test]
    async fn test_hundred_twenty_tasks_with_two_failures() {
        let exec = executor(fast_config(50, 15), 1_000);
        let tasks = BatchTask::from_payloads(0..120usize);

        let result = exec
            .execute(&SubmissionContext::new(120), tasks, |n| async move {
                if n == 7 || n == 31 {
                    Err(format!("rejected order {}", n))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(result.success_count, 118);
        assert_eq!(result.failure_count, 2);
        assert!(result[7].is_failure());
        assert!(result[31].is_failure());
        assert_eq!(result[119], TaskOutcome::Success(119));
    }

    #[tokio::test]
    async fn test_slow_task_times_out_without_failing_batch() {
        let config = ExecutorConfig {
            task_timeout_ms: 20,
            ..fast_config(10, 2)
        };
        let exec = executor(config, 1_000);
        let tasks = BatchTask::from_payloads([0u64, 200, 0]);

        let result = exec
            .execute(&SubmissionContext::new(3), tasks, |ms| async move {
                sleep(Duration::from_millis(ms)).await;
                Ok::<_, String>(ms)
            })
            .await
            .unwrap();

        assert!(result[0].is_success());
        assert!(matches!(&result[1], TaskOutcome::Failure(r) if r.contains("timed out")));
        assert!(result[2].is_success());
    }

    #[tokio::test]
    async fn test_permit_timeout_becomes_failure() {
        let config = ExecutorConfig {
            permit_timeout_ms: 10,
            ..fast_config(10, 1)
        };
        let exec = executor(config, 1_000);
        let tasks = BatchTask::from_payloads([0u8, 1]);

        let result = exec
            .execute(&SubmissionContext::new(2), tasks, |n| async move {
                sleep(Duration::from_millis(60)).await;
                Ok::<_, String>(n)
            })
            .await
            .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
        assert!(result
            .outcomes
            .iter()
            .any(|o| o == &TaskOutcome::Failure(PERMIT_TIMEOUT.to_string())));
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_batch_before_any_task() {
        let exec = executor(fast_config(10, 2), 2);
        exec.breaker.record_failure("a");
        exec.breaker.record_failure("b");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let err = exec
            .execute(&SubmissionContext::new(3), BatchTask::from_payloads(0..3), move |n: i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, String>(n) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, GateError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_feed_breaker() {
        let exec = executor(fast_config(10, 2), 3);
        let result = exec
            .execute(&SubmissionContext::new(4), BatchTask::from_payloads(0..4), |_: i32| async {
                Err::<i32, _>("downstream unavailable")
            })
            .await
            .unwrap();

        assert_eq!(result.failure_count, 4);
        assert_eq!(exec.breaker.state(), crate::coordination::CircuitState::Open);
    }

    #[tokio::test]
    async fn test_rejects_bad_indices() {
        let exec = executor(fast_config(10, 2), 5);
        let tasks = vec![BatchTask::new(0, 1), BatchTask::new(0, 2)];
        let err = exec
            .execute(&SubmissionContext::new(2), tasks, |n: i32| async move { Ok::<_, String>(n) })
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Validation(_)));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let exec = executor(fast_config(10, 2), 5);
        let tasks: Vec<BatchTask<i32, i32>> = Vec::new();
        let result = exec
            .execute(&SubmissionContext::new(0), tasks, |n| async move { Ok::<_, String>(n) })
            .await
            .unwrap();
        assert!(result.is_empty());
    }
}
