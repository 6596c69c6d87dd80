//! Retry coordination for the fetch → detect → extract attempt unit.
//!
//! The coordinator is an explicit state machine. [`transition`] is a pure
//! function over [`CoordinatorState`] and [`Event`]; [`RetryCoordinator`]
//! feeds it events by running attempts, sleeping and watching the deadline.

use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{BackoffStrategy, RetryConfig};
use crate::error::{CrawlError, CrawlResult, ExhaustionReason, FailureKind};
use crate::extract::Extraction;
use crate::logging::LogContext;
use crate::{log_info, log_warn};

/// Tagged outcome of one attempt unit
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    Success(Extraction),
    NoDataFound,
    StructureMismatch,
    FetchTimeout,
    FetchError(String),
}

impl AttemptResult {
    /// Map a page-level error onto an attempt result; `None` for fatal errors
    pub fn from_error(error: &CrawlError) -> Option<Self> {
        match error {
            CrawlError::FetchTimeout { .. } => Some(Self::FetchTimeout),
            CrawlError::Fetch { message } => Some(Self::FetchError(message.clone())),
            CrawlError::StructureMismatch { .. } => Some(Self::StructureMismatch),
            CrawlError::NoDataFound { .. } => Some(Self::NoDataFound),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::NoDataFound => Some(FailureKind::NoDataFound),
            Self::StructureMismatch => Some(FailureKind::StructureMismatch),
            Self::FetchTimeout => Some(FailureKind::FetchTimeout),
            Self::FetchError(_) => Some(FailureKind::FetchError),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Success(extraction) => format!("{} records", extraction.records.len()),
            Self::NoDataFound => "layout matched but no valid records remained".to_string(),
            Self::StructureMismatch => "no known layout matched the page".to_string(),
            Self::FetchTimeout => "page did not become ready in time".to_string(),
            Self::FetchError(cause) => cause.clone(),
        }
    }
}

/// What an attempt reported to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Recoverable(FailureKind),
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    Outcome(OutcomeKind),
    DelayElapsed,
    DeadlineExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Attempting {
        attempt: u32,
    },
    /// Attempt `attempt` failed with `last`; the next one starts after `delay`
    Waiting {
        attempt: u32,
        delay: Duration,
        last: FailureKind,
    },
    Succeeded {
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last: FailureKind,
        reason: ExhaustionReason,
    },
    Failed {
        attempts: u32,
    },
}

impl CoordinatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Exhausted { .. } | Self::Failed { .. }
        )
    }
}

/// Attempt bound and delay schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: BackoffStrategy,
    pub max_delay: Duration,
    pub jitter: bool,
    pub total_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// `max_retries` counts total attempts; zero still makes one attempt
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: seconds(config.retry_delay_seconds),
            backoff: config.backoff,
            max_delay: seconds(config.max_delay_seconds),
            jitter: config.jitter,
            total_timeout: config.total_timeout_seconds.map(Duration::from_secs),
        }
    }

    /// Delay after the failed attempt number `attempt` (1-based), before jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let step = attempt.saturating_sub(1);
        let delay = match self.backoff {
            BackoffStrategy::Constant => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(step.saturating_add(1)),
            BackoffStrategy::Exponential => self.base_delay.saturating_mul(2u32.saturating_pow(step)),
        };
        delay.min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let millis = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Next coordinator state. Events that do not apply to a state leave it unchanged.
pub fn transition(state: CoordinatorState, event: Event, policy: &RetryPolicy) -> CoordinatorState {
    use CoordinatorState::*;

    match (state, event) {
        (Idle, Event::Start) => Attempting { attempt: 1 },

        (Attempting { attempt }, Event::Outcome(OutcomeKind::Success)) => Succeeded { attempts: attempt },
        (Attempting { attempt }, Event::Outcome(OutcomeKind::Fatal)) => Failed { attempts: attempt },
        (Attempting { attempt }, Event::Outcome(OutcomeKind::Recoverable(last))) => {
            if attempt >= policy.max_attempts {
                Exhausted {
                    attempts: attempt,
                    last,
                    reason: ExhaustionReason::AttemptLimit,
                }
            } else {
                Waiting {
                    attempt,
                    delay: policy.delay_for(attempt),
                    last,
                }
            }
        }
        // An attempt cut off by the deadline never finished loading
        (Attempting { attempt }, Event::DeadlineExceeded) => Exhausted {
            attempts: attempt,
            last: FailureKind::FetchTimeout,
            reason: ExhaustionReason::Deadline,
        },

        (Waiting { attempt, .. }, Event::DelayElapsed) => Attempting { attempt: attempt + 1 },
        (Waiting { attempt, last, .. }, Event::DeadlineExceeded) => Exhausted {
            attempts: attempt,
            last,
            reason: ExhaustionReason::Deadline,
        },

        (state, _) => state,
    }
}

/// One finished attempt, kept for the run report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub failure: Option<FailureKind>,
    pub detail: String,
    pub duration_ms: u64,
}

/// Successful coordinator run
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub extraction: Extraction,
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,
}

pub struct RetryCoordinator {
    policy: RetryPolicy,
    context: LogContext,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            context: LogContext::new("retry", "crawl"),
        }
    }

    /// Log context stamped on every attempt line
    pub fn with_context(mut self, context: LogContext) -> Self {
        self.context = context;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `unit` until it succeeds, a fatal error occurs or the policy gives up.
    ///
    /// `unit` receives the 1-based attempt number. Page-level failures are
    /// reported as `Ok(AttemptResult::..)` and retried; an `Err` is fatal and
    /// returned as is, unless it is itself a page-level error.
    pub async fn run<F, Fut>(&self, mut unit: F) -> CrawlResult<RetryOutcome>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = CrawlResult<AttemptResult>>,
    {
        let deadline = self.policy.total_timeout.map(|limit| Instant::now() + limit);
        let mut state = transition(CoordinatorState::Idle, Event::Start, &self.policy);
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut extraction = None;
        let mut fatal = None;

        loop {
            match state {
                CoordinatorState::Attempting { attempt } => {
                    let context = self.context.clone().with_attempt(attempt);
                    log_info!(context, "Starting attempt {}/{}", attempt, self.policy.max_attempts);
                    let started = Instant::now();

                    let result = match deadline {
                        Some(at) => match tokio::time::timeout_at(at, unit(attempt)).await {
                            Ok(result) => result,
                            Err(_) => {
                                history.push(AttemptRecord {
                                    attempt,
                                    failure: Some(FailureKind::FetchTimeout),
                                    detail: "total timeout exceeded during attempt".to_string(),
                                    duration_ms: elapsed_ms(started),
                                });
                                log_warn!(context, "Total timeout exceeded during attempt {}", attempt);
                                state = transition(state, Event::DeadlineExceeded, &self.policy);
                                continue;
                            }
                        },
                        None => unit(attempt).await,
                    };

                    let result = match result {
                        Ok(result) => Ok(result),
                        Err(error) => AttemptResult::from_error(&error).ok_or(error),
                    };
                    let context = context.with_duration(started.elapsed());

                    let outcome = match result {
                        Ok(AttemptResult::Success(found)) => {
                            let context = context.with_counts(found.records.len(), found.dropped_count());
                            log_info!(context, "Attempt {} succeeded", attempt);
                            history.push(AttemptRecord {
                                attempt,
                                failure: None,
                                detail: format!("{} records via {}", found.records.len(), found.layout),
                                duration_ms: elapsed_ms(started),
                            });
                            extraction = Some(found);
                            OutcomeKind::Success
                        }
                        Ok(failed) => {
                            let kind = failed.failure_kind().unwrap_or(FailureKind::FetchError);
                            let detail = failed.describe();
                            let context = context.with_failure(kind);
                            log_warn!(context, "Attempt {} failed: {}", attempt, detail);
                            history.push(AttemptRecord {
                                attempt,
                                failure: Some(kind),
                                detail,
                                duration_ms: elapsed_ms(started),
                            });
                            OutcomeKind::Recoverable(kind)
                        }
                        Err(error) => {
                            log_warn!(context, category = error.category(), "Attempt {} hit a fatal error: {}", attempt, error);
                            fatal = Some(error);
                            OutcomeKind::Fatal
                        }
                    };

                    state = transition(state, Event::Outcome(outcome), &self.policy);
                }

                CoordinatorState::Waiting { delay, .. } => {
                    let delay = self.policy.jittered(delay);
                    tracing::info!("Retrying in {:.1}s", delay.as_secs_f64());

                    let wake = Instant::now() + delay;
                    let event = match deadline {
                        Some(at) if at <= wake => {
                            tokio::time::sleep_until(at).await;
                            Event::DeadlineExceeded
                        }
                        _ => {
                            tokio::time::sleep_until(wake).await;
                            Event::DelayElapsed
                        }
                    };
                    state = transition(state, event, &self.policy);
                }

                CoordinatorState::Succeeded { attempts } => {
                    let extraction = extraction
                        .take()
                        .ok_or_else(|| CrawlError::fetch("attempt succeeded without records"))?;
                    return Ok(RetryOutcome {
                        extraction,
                        attempts,
                        history,
                    });
                }

                CoordinatorState::Exhausted { attempts, last, reason } => {
                    let detail = history
                        .last()
                        .map(|h| h.detail.clone())
                        .unwrap_or_default();
                    tracing::error!(attempts, last = %last, %reason, "Retries exhausted");
                    return Err(CrawlError::Exhausted {
                        attempts,
                        last,
                        reason,
                        detail,
                    });
                }

                CoordinatorState::Failed { attempts } => {
                    return Err(fatal.take().unwrap_or_else(|| {
                        CrawlError::config(format!("attempt {} failed fatally", attempts))
                    }));
                }

                CoordinatorState::Idle => {
                    state = transition(state, Event::Start, &self.policy);
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeeRecord;
    use chrono::Local;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            backoff: BackoffStrategy::Constant,
            max_delay: Duration::ZERO,
            jitter: false,
            total_timeout: None,
        }
    }

    fn extraction() -> Extraction {
        let record = FeeRecord::new("갤럭시 S24", "5GX 프라임", 516_000, 645_400, None, Local::now()).unwrap();
        Extraction {
            layout: "test".to_string(),
            records: vec![record],
            found: 1,
            dropped: Vec::new(),
        }
    }

    #[test]
    fn test_transitions() {
        let p = policy(2);
        let state = transition(CoordinatorState::Idle, Event::Start, &p);
        assert_eq!(state, CoordinatorState::Attempting { attempt: 1 });

        let state = transition(
            state,
            Event::Outcome(OutcomeKind::Recoverable(FailureKind::StructureMismatch)),
            &p,
        );
        assert_eq!(
            state,
            CoordinatorState::Waiting {
                attempt: 1,
                delay: Duration::ZERO,
                last: FailureKind::StructureMismatch,
            }
        );

        let state = transition(state, Event::DelayElapsed, &p);
        assert_eq!(state, CoordinatorState::Attempting { attempt: 2 });

        let state = transition(state, Event::Outcome(OutcomeKind::Recoverable(FailureKind::NoDataFound)), &p);
        assert_eq!(
            state,
            CoordinatorState::Exhausted {
                attempts: 2,
                last: FailureKind::NoDataFound,
                reason: ExhaustionReason::AttemptLimit,
            }
        );
        assert!(state.is_terminal());

        // Terminal states ignore further events
        assert_eq!(transition(state, Event::Start, &p), state);
    }

    #[test]
    fn test_fatal_and_deadline_transitions() {
        let p = policy(5);
        let attempting = CoordinatorState::Attempting { attempt: 2 };
        assert_eq!(
            transition(attempting, Event::Outcome(OutcomeKind::Fatal), &p),
            CoordinatorState::Failed { attempts: 2 }
        );
        assert_eq!(
            transition(attempting, Event::Outcome(OutcomeKind::Success), &p),
            CoordinatorState::Succeeded { attempts: 2 }
        );

        let waiting = CoordinatorState::Waiting {
            attempt: 2,
            delay: Duration::from_secs(4),
            last: FailureKind::FetchError,
        };
        assert_eq!(
            transition(waiting, Event::DeadlineExceeded, &p),
            CoordinatorState::Exhausted {
                attempts: 2,
                last: FailureKind::FetchError,
                reason: ExhaustionReason::Deadline,
            }
        );
        assert_eq!(transition(waiting, Event::Outcome(OutcomeKind::Success), &p), waiting);
    }

    #[test]
    fn test_backoff_schedule() {
        let mut p = RetryPolicy {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            ..policy(10)
        };

        p.backoff = BackoffStrategy::Exponential;
        let delays: Vec<u64> = (1..=6).map(|a| p.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30]);

        p.backoff = BackoffStrategy::Linear;
        assert_eq!(p.delay_for(3), Duration::from_secs(6));

        p.backoff = BackoffStrategy::Constant;
        assert_eq!(p.delay_for(9), Duration::from_secs(2));

        // Saturates instead of overflowing
        p.backoff = BackoffStrategy::Exponential;
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = RetryConfig::default();
        config.max_retries = 0;
        config.total_timeout_seconds = Some(60);
        let p = RetryPolicy::from_config(&config);
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.base_delay, Duration::from_secs(2));
        assert_eq!(p.total_timeout, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_persistent_timeout_makes_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let coordinator = RetryCoordinator::new(policy(3));

        let result = coordinator
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(AttemptResult::FetchTimeout) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(CrawlError::Exhausted { attempts, last, reason, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, FailureKind::FetchTimeout);
                assert_eq!(reason, ExhaustionReason::AttemptLimit);
            }
            other => panic!("expected Exhausted, got {:?}", other.map(|o| o.attempts)),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_recoverable_failures() {
        let coordinator = RetryCoordinator::new(policy(3));

        let outcome = coordinator
            .run(|attempt| async move {
                match attempt {
                    1 => Err(CrawlError::StructureMismatch { tried: vec!["proximity".to_string()] }),
                    2 => Ok(AttemptResult::FetchError("connection reset".to_string())),
                    _ => Ok(AttemptResult::Success(extraction())),
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.extraction.records.len(), 1);
        let failures: Vec<Option<FailureKind>> = outcome.history.iter().map(|h| h.failure).collect();
        assert_eq!(
            failures,
            vec![Some(FailureKind::StructureMismatch), Some(FailureKind::FetchError), None]
        );
    }

    #[tokio::test]
    async fn test_fatal_error_bypasses_retry() {
        let calls = AtomicU32::new(0);
        let coordinator = RetryCoordinator::new(policy(5));

        let result = coordinator
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CrawlError::config("chrome_path does not exist")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CrawlError::Config { .. })));
    }

    #[tokio::test]
    async fn test_deadline_forces_exhaustion() {
        let p = RetryPolicy {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(20),
            total_timeout: Some(Duration::from_millis(150)),
            ..policy(1000)
        };
        let calls = AtomicU32::new(0);

        let result = RetryCoordinator::new(p)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(AttemptResult::NoDataFound)
                }
            })
            .await;

        match result {
            Err(CrawlError::Exhausted { attempts, reason, .. }) => {
                assert_eq!(reason, ExhaustionReason::Deadline);
                assert!(attempts < 1000);
                assert_eq!(attempts, calls.load(Ordering::SeqCst));
            }
            other => panic!("expected Exhausted, got {:?}", other.map(|o| o.attempts)),
        }
    }
}
