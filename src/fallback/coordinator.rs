//! Bulk submission with retry and per-order fallback
//!
//! One submission moves through:
//!
//! ```text
//! New -> BulkAttempt -> Success
//!                    -> BulkFailed -> IndividualFallback -> Success | PartialSuccess | Failure
//!                                  -> Failure
//! ```
//!
//! Only qualifying failures are retried, and only small batches fall back to
//! per-order submission through the [`BatchExecutor`].

use serde::Serialize;
use std::sync::Arc;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use super::RetryPolicy;
use crate::config::FallbackConfig;
use crate::coordination::CircuitBreaker;
use crate::domain::{BatchResult, BatchTask, Order, SubmissionContext, TaskOutcome};
use crate::error::{GateError, Result};
use crate::executor::BatchExecutor;
use crate::transport::{Acknowledgement, BulkItem, DownstreamFailure, FailureClass, OrderTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    New,
    BulkAttempt,
    BulkFailed,
    IndividualFallback,
    Success,
    PartialSuccess,
    Failure,
}

impl std::fmt::Display for SubmissionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubmissionPhase::New => "new",
            SubmissionPhase::BulkAttempt => "bulk_attempt",
            SubmissionPhase::BulkFailed => "bulk_failed",
            SubmissionPhase::IndividualFallback => "individual_fallback",
            SubmissionPhase::Success => "success",
            SubmissionPhase::PartialSuccess => "partial_success",
            SubmissionPhase::Failure => "failure",
        };
        write!(f, "{}", name)
    }
}

/// Terminal state of one submission
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub phase: SubmissionPhase,
    pub result: BatchResult<Acknowledgement>,
    /// Bulk calls made, including retries
    pub bulk_attempts: u32,
}

pub struct FallbackCoordinator {
    config: FallbackConfig,
    policy: RetryPolicy,
    transport: Arc<dyn OrderTransport>,
    executor: Arc<BatchExecutor>,
    breaker: Arc<CircuitBreaker>,
}

impl FallbackCoordinator {
    pub fn new(
        config: FallbackConfig,
        transport: Arc<dyn OrderTransport>,
        executor: Arc<BatchExecutor>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let policy = RetryPolicy::from(config.retry.clone());
        Self {
            config,
            policy,
            transport,
            executor,
            breaker,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit `orders` downstream.
    ///
    /// A terminal failure of the bulk path is returned as
    /// `GateError::Downstream`. Orders the service rejects individually, in a
    /// bulk response or during fallback, are reported inside the result.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, orders = orders.len()))]
    pub async fn submit(&self, ctx: &SubmissionContext, orders: Vec<Order>) -> Result<SubmissionOutcome> {
        if orders.is_empty() {
            return Ok(SubmissionOutcome {
                phase: SubmissionPhase::Success,
                result: BatchResult::empty(),
                bulk_attempts: 0,
            });
        }

        let mut phase = SubmissionPhase::New;

        if !self.config.bulk_enabled {
            advance(&mut phase, SubmissionPhase::IndividualFallback);
            let result = self.submit_individually(ctx, orders).await?;
            return Ok(finish(phase, result, 0));
        }

        advance(&mut phase, SubmissionPhase::BulkAttempt);
        let (failure, attempts) = match self.bulk_with_retries(&orders).await {
            Ok((items, attempts)) => {
                let outcomes = items
                    .into_iter()
                    .map(|item| match item {
                        Ok(ack) => TaskOutcome::Success(ack),
                        Err(rejected) => TaskOutcome::Failure(rejected.to_string()),
                    })
                    .collect();
                return Ok(finish(phase, BatchResult::from_outcomes(outcomes), attempts));
            }
            Err(failed) => failed,
        };
        advance(&mut phase, SubmissionPhase::BulkFailed);

        if !self.policy.should_trigger(&failure) {
            warn!("Bulk submission failed with non-retryable error: {}", failure);
            advance(&mut phase, SubmissionPhase::Failure);
            return Err(GateError::downstream(failure, false));
        }

        if !self.config.enabled || orders.len() > self.config.max_individual_orders {
            warn!(
                "Bulk submission failed after {} attempts; {} orders not eligible for fallback (max {})",
                attempts,
                orders.len(),
                self.config.max_individual_orders
            );
            advance(&mut phase, SubmissionPhase::Failure);
            return Err(GateError::downstream(failure, true));
        }

        info!(
            "Bulk submission failed after {} attempts ({}), falling back to {} individual orders",
            attempts,
            failure,
            orders.len()
        );
        advance(&mut phase, SubmissionPhase::IndividualFallback);
        let result = self.submit_individually(ctx, orders).await?;
        Ok(finish(phase, result, attempts))
    }

    /// Bulk call with backoff; returns the last failure and attempt count on give-up.
    ///
    /// All attempts and sleeps together stay within the policy's total timeout
    /// budget: an attempt is cut short at the deadline, and a retry whose
    /// delay would reach the deadline is not started.
    async fn bulk_with_retries(
        &self,
        orders: &[Order],
    ) -> std::result::Result<(Vec<BulkItem>, u32), (DownstreamFailure, u32)> {
        let call_timeout = self.config.call_timeout();
        let deadline = Instant::now() + self.policy.total_timeout_budget(call_timeout);
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let attempt_deadline = (Instant::now() + call_timeout).min(deadline);
            let result = match timeout_at(attempt_deadline, self.transport.submit_bulk(orders)).await {
                Ok(result) => result.and_then(|items| check_item_count(orders.len(), items)),
                Err(_) => Err(DownstreamFailure::timeout(format!(
                    "bulk call exceeded {}ms",
                    call_timeout.as_millis()
                ))),
            };

            let failure = match result {
                Ok(items) => {
                    self.breaker.record_success();
                    debug!("Bulk submission answered on attempt {}", attempts);
                    return Ok((items, attempts));
                }
                Err(failure) => failure,
            };

            if !self.policy.should_trigger(&failure) {
                return Err((failure, attempts));
            }
            self.breaker.record_failure(&failure.to_string());

            let retry = attempts - 1;
            if retry >= self.policy.max_retries() {
                return Err((failure, attempts));
            }
            if !self.breaker.allow_operation() {
                warn!("Circuit opened during bulk retries; giving up after {} attempts", attempts);
                return Err((failure, attempts));
            }

            let delay = self.policy.delay_for(retry);
            if Instant::now() + delay >= deadline {
                warn!(
                    "Bulk retry budget exhausted after {} attempts: {}",
                    attempts, failure
                );
                return Err((failure, attempts));
            }
            warn!(
                "Bulk attempt {} failed: {}. Retrying in {}ms...",
                attempts,
                failure,
                delay.as_millis()
            );
            sleep(delay).await;
        }
    }

    async fn submit_individually(
        &self,
        ctx: &SubmissionContext,
        orders: Vec<Order>,
    ) -> Result<BatchResult<Acknowledgement>> {
        let transport = Arc::clone(&self.transport);
        let tasks = BatchTask::from_payloads(orders);
        self.executor
            .execute(ctx, tasks, move |order: Order| {
                let transport = Arc::clone(&transport);
                async move { transport.submit(&order).await }
            })
            .await
    }
}

fn advance(phase: &mut SubmissionPhase, next: SubmissionPhase) {
    debug!("Submission {} -> {}", phase, next);
    *phase = next;
}

fn finish(
    mut phase: SubmissionPhase,
    result: BatchResult<Acknowledgement>,
    bulk_attempts: u32,
) -> SubmissionOutcome {
    let next = if result.all_succeeded() {
        SubmissionPhase::Success
    } else if result.success_count > 0 {
        SubmissionPhase::PartialSuccess
    } else {
        SubmissionPhase::Failure
    };
    advance(&mut phase, next);
    SubmissionOutcome {
        phase,
        result,
        bulk_attempts,
    }
}

fn check_item_count(
    expected: usize,
    items: Vec<BulkItem>,
) -> std::result::Result<Vec<BulkItem>, DownstreamFailure> {
    if items.len() == expected {
        Ok(items)
    } else {
        Err(DownstreamFailure::new(
            None,
            FailureClass::Other,
            format!("bulk call returned {} results for {} orders", items.len(), expected),
        ))
    }
}
