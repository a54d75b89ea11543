use super::store::{ProgressStore, StoreError};
use super::{ItemStatus, Reservation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One unit of external work.
#[derive(Debug, Clone)]
pub struct Job<P> {
    pub key: String,
    /// Quota units reserved before every execution attempt.
    pub cost: u64,
    pub payload: P,
}

impl<P> Job<P> {
    pub fn new(key: impl Into<String>, cost: u64, payload: P) -> Self {
        Self {
            key: key.into(),
            cost,
            payload,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// Worth retrying: network blips, rate limits, provider 5xx, timeouts.
    #[error("{reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Retrying cannot help: invalid input, not found, auth rejected.
    #[error("{0}")]
    Permanent(String),

    /// The provider reports its quota spent. The item stays pending and the
    /// run stops until the ledger resets.
    #[error("{0}")]
    Exhausted(String),
}

impl JobError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }
}

/// Performs the external call for one job. A successful call may return an
/// output that is recorded on the work item.
#[async_trait]
pub trait JobExecutor<P: Send + Sync>: Send + Sync {
    async fn execute(&self, job: &Job<P>) -> Result<Option<String>, JobError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per item before it is marked failed.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Capped exponential backoff with up to 25% jitter, never above `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let capped = self
            .base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay);
        if capped.is_zero() {
            return capped;
        }
        let spread = (capped.as_millis() / 4) as u64;
        let jitter = rand::thread_rng().gen_range(0..=spread);
        (capped + Duration::from_millis(jitter)).min(self.max_delay)
    }

    /// Backoff for `attempt`, raised to a provider hint but never past `max_delay`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let delay = self.backoff(attempt);
        match hint {
            Some(hint) => delay.max(hint.min(self.max_delay)),
            None => delay,
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    Completed,
    /// Quota denied before an item could run; try again after the reset.
    QuotaExhausted { reset_at: DateTime<Utc> },
    Cancelled,
    /// The input sequence itself was unusable; nothing was executed.
    RejectedInput(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub key: String,
    pub reason: String,
}

/// Status counts across all runs for the keys of one input sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusTotals {
    pub done: usize,
    pub failed: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    /// Items executed at least once during this run.
    pub attempted: usize,
    pub done: usize,
    pub failed: Vec<FailedItem>,
    /// Items already terminal from earlier runs.
    pub skipped: usize,
    /// Items not yet terminal when the run stopped.
    pub remaining: usize,
    pub totals: StatusTotals,
    pub quota_used: u64,
    pub quota_limit: u64,
    pub stop: RunStop,
}

impl RunSummary {
    fn new(total: usize) -> Self {
        Self {
            total,
            attempted: 0,
            done: 0,
            failed: Vec::new(),
            skipped: 0,
            remaining: 0,
            totals: StatusTotals::default(),
            quota_used: 0,
            quota_limit: 0,
            stop: RunStop::Completed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stop == RunStop::Completed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stop = match &self.stop {
            RunStop::Completed => "completed".to_string(),
            RunStop::QuotaExhausted { reset_at } => {
                format!("quota exhausted, resets at {}", reset_at.to_rfc3339())
            }
            RunStop::Cancelled => "cancelled".to_string(),
            RunStop::RejectedInput(reason) => format!("input rejected: {reason}"),
        };
        writeln!(f, "run {stop}")?;
        writeln!(
            f,
            "  this run: attempted={} done={} failed={} skipped={} remaining={}",
            self.attempted,
            self.done,
            self.failed.len(),
            self.skipped,
            self.remaining
        )?;
        writeln!(
            f,
            "  all runs: done={} failed={} pending={}",
            self.totals.done, self.totals.failed, self.totals.pending
        )?;
        write!(
            f,
            "  quota: {}/{} used, {} remaining",
            self.quota_used,
            self.quota_limit,
            self.quota_limit.saturating_sub(self.quota_used)
        )?;
        for item in &self.failed {
            write!(f, "\n  failed {}: {}", short_key(&item.key), item.reason)?;
        }
        Ok(())
    }
}

fn short_key(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

enum ItemOutcome {
    Done,
    Failed(String),
    QuotaDenied,
    Cancelled,
}

/// Drives jobs in order through an executor, consulting the quota ledger and
/// the progress store before each call.
pub struct ResumableRunner<'s, E> {
    store: &'s ProgressStore,
    executor: E,
    policy: RetryPolicy,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    retry_failed: bool,
}

impl<'s, E> ResumableRunner<'s, E> {
    pub fn new(store: &'s ProgressStore, executor: E, policy: RetryPolicy) -> Self {
        Self {
            store,
            executor,
            policy,
            cancel: CancellationToken::new(),
            clock: Arc::new(SystemClock),
            retry_failed: false,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Gives previously failed items of this input another chance.
    pub fn retry_failed(mut self, yes: bool) -> Self {
        self.retry_failed = yes;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub async fn run<P>(&self, jobs: &[Job<P>]) -> Result<RunSummary, StoreError>
    where
        P: Send + Sync,
        E: JobExecutor<P>,
    {
        let mut summary = RunSummary::new(jobs.len());

        let mut seen = HashSet::new();
        if let Some(dup) = jobs.iter().find(|job| !seen.insert(job.key.as_str())) {
            summary.stop = RunStop::RejectedInput(format!(
                "duplicate job key {}",
                short_key(&dup.key)
            ));
            return Ok(self.finish(summary, jobs));
        }

        if self.retry_failed {
            let revived = self
                .store
                .reset_failed(jobs.iter().map(|job| job.key.as_str()))?;
            if revived > 0 {
                tracing::info!(revived, "Retrying previously failed items");
            }
        }
        self.store.reset_if_due(self.clock.now())?;

        for job in jobs {
            if self.cancel.is_cancelled() {
                summary.stop = RunStop::Cancelled;
                break;
            }

            match self.store.status_of(&job.key) {
                Some(ItemStatus::Done) | Some(ItemStatus::Failed) => {
                    summary.skipped += 1;
                    continue;
                }
                _ => {}
            }

            match self.drive(job, &mut summary).await? {
                ItemOutcome::Done => summary.done += 1,
                ItemOutcome::Failed(reason) => summary.failed.push(FailedItem {
                    key: job.key.clone(),
                    reason,
                }),
                ItemOutcome::QuotaDenied => {
                    summary.stop = RunStop::QuotaExhausted {
                        reset_at: self.store.quota().reset_at(),
                    };
                    break;
                }
                ItemOutcome::Cancelled => {
                    summary.stop = RunStop::Cancelled;
                    break;
                }
            }
        }

        self.store.save()?;
        Ok(self.finish(summary, jobs))
    }

    async fn drive<P>(&self, job: &Job<P>, summary: &mut RunSummary) -> Result<ItemOutcome, StoreError>
    where
        P: Send + Sync,
        E: JobExecutor<P>,
    {
        let mut counted = false;
        loop {
            if let Reservation::Denied {
                used,
                limit,
                requested,
            } = self.store.reserve(job.cost, self.clock.now())?
            {
                tracing::warn!(
                    key = short_key(&job.key),
                    used,
                    limit,
                    requested,
                    "Quota exhausted; stopping run"
                );
                return Ok(ItemOutcome::QuotaDenied);
            }

            if !counted {
                summary.attempted += 1;
                counted = true;
            }
            let attempt = self.store.begin_attempt(&job.key)?;

            let result = match tokio::time::timeout(
                self.policy.call_timeout,
                self.executor.execute(job),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(JobError::transient(format!(
                    "timed out after {}s",
                    self.policy.call_timeout.as_secs()
                ))),
            };

            match result {
                Ok(output) => {
                    self.store.mark_done(&job.key, output)?;
                    tracing::debug!(key = short_key(&job.key), attempt, "Item done");
                    return Ok(ItemOutcome::Done);
                }
                Err(JobError::Exhausted(reason)) => {
                    tracing::warn!(key = short_key(&job.key), %reason, "Provider quota exhausted; stopping run");
                    self.store.note_error(&job.key, &reason)?;
                    self.store.exhaust_quota()?;
                    return Ok(ItemOutcome::QuotaDenied);
                }
                Err(JobError::Permanent(reason)) => {
                    tracing::warn!(key = short_key(&job.key), %reason, "Item failed permanently");
                    self.store.mark_failed(&job.key, &reason)?;
                    return Ok(ItemOutcome::Failed(reason));
                }
                Err(JobError::Transient {
                    reason,
                    retry_after,
                }) => {
                    if attempt >= self.policy.max_attempts {
                        let reason = format!("{reason} (gave up after {attempt} attempts)");
                        tracing::warn!(key = short_key(&job.key), %reason, "Item failed");
                        self.store.mark_failed(&job.key, &reason)?;
                        return Ok(ItemOutcome::Failed(reason));
                    }
                    self.store.note_error(&job.key, &reason)?;

                    let delay = self.policy.delay_for(attempt, retry_after);
                    tracing::info!(
                        key = short_key(&job.key),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "Transient failure; backing off"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(ItemOutcome::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn finish<P>(&self, mut summary: RunSummary, jobs: &[Job<P>]) -> RunSummary {
        let snapshot = self.store.snapshot();
        let mut totals = StatusTotals::default();
        for job in jobs {
            match snapshot.status_of(&job.key) {
                Some(ItemStatus::Done) => totals.done += 1,
                Some(ItemStatus::Failed) => totals.failed += 1,
                _ => totals.pending += 1,
            }
        }
        summary.remaining = totals.pending;
        summary.totals = totals;
        summary.quota_used = snapshot.quota.used();
        summary.quota_limit = snapshot.quota.limit();
        summary
    }
}
