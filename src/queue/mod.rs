// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable per-account work queue.
//!
//! Jobs persist in the key-value store (`queue:jobs:<native_addr>`,
//! score = ready-at ms) so queued operations and pending withdrawals
//! survive restarts. The dispatcher runs at most one job per native
//! address at a time; user-facing ordering within an account comes from
//! the queue, not from the balance lock.
//!
//! Operational errors re-enqueue the job with a delay under a bounded
//! retry budget. Anything else fails the job and surfaces to the
//! submitter; in particular a ledger failure after a chain send is never
//! replayed.

use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use crate::store::{keys, KvStore, WriteBatch};
use crate::types::{now_ms, Job, JobOutcome, Operation};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DISPATCH_TICK: Duration = Duration::from_millis(250);
const MAX_JOB_RETRIES: u32 = 10;
const DEFAULT_RETRY_DELAY_MS: i64 = 5_000;
const BASE_UNITS_PER_BAN: u128 = 1_000_000_000_000_000_000;

/// Executes one job; implemented by the operation router
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> BridgeResult<JobOutcome>;
}

#[derive(Default)]
struct QueueState {
    /// Groups with a job currently running
    inflight: HashSet<String>,
    /// Submitters waiting for a job's outcome, by job id
    responders: HashMap<String, oneshot::Sender<BridgeResult<JobOutcome>>>,
}

pub struct OperationQueue {
    kv: Arc<dyn KvStore>,
    metrics: Arc<BridgeMetrics>,
    state: Mutex<QueueState>,
    wake: Notify,
    retry_delay_ms: i64,
}

impl OperationQueue {
    pub fn new(kv: Arc<dyn KvStore>, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            kv,
            metrics,
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    /// Override the operational-retry delay (tests use a short one)
    pub fn with_retry_delay(mut self, retry_delay_ms: i64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Enqueue an operation and return the channel its outcome arrives on
    pub async fn enqueue(
        &self,
        operation: Operation,
    ) -> BridgeResult<oneshot::Receiver<BridgeResult<JobOutcome>>> {
        let job = Job::new(operation);
        let (tx, rx) = oneshot::channel();
        self.persist(&job).await?;
        self.state.lock().await.responders.insert(job.id.clone(), tx);
        self.wake.notify_one();
        Ok(rx)
    }

    /// Enqueue a job with no submitter waiting (chain-originated work and
    /// pending-withdrawal successors)
    pub async fn enqueue_job(&self, job: Job) -> BridgeResult<()> {
        debug!(
            "enqueued {} job {} for {} (ready at {})",
            job.operation.kind(),
            job.id,
            job.operation.group(),
            job.ready_at_ms
        );
        self.persist(&job).await?;
        self.wake.notify_one();
        Ok(())
    }

    async fn persist(&self, job: &Job) -> BridgeResult<()> {
        let encoded = serde_json::to_string(job)
            .map_err(|e| BridgeError::StorageError(format!("unencodable job: {}", e)))?;
        self.kv
            .exec(WriteBatch::new().zadd(
                keys::queue_jobs(&job.operation.group()),
                encoded,
                job.ready_at_ms,
            ))
            .await
    }

    /// Summed pending-withdrawal amount in base units, across all
    /// accounts. Feeds the operator gauge and the mint-receipt ceiling.
    pub async fn pending_withdrawals_amount(&self) -> BridgeResult<u128> {
        let mut total: u128 = 0;
        for key in self.kv.scan_prefix(keys::QUEUE_JOBS_PREFIX).await? {
            for (raw, _) in self.kv.zrange_by_score(&key, 0, i64::MAX).await? {
                let Ok(job) = serde_json::from_str::<Job>(&raw) else {
                    continue;
                };
                if let Operation::NativeWithdrawal {
                    amount, attempt, ..
                } = &job.operation
                {
                    if *attempt > 0 {
                        if let Ok(value) = crate::types::parse_ban_amount(amount) {
                            total = total.saturating_add(value);
                        }
                    }
                }
            }
        }
        Ok(total)
    }

    /// Spawn the dispatcher
    pub fn start(
        self: &Arc<Self>,
        handler: Arc<dyn JobHandler>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            queue.dispatch_loop(handler, cancel).await;
        })
    }

    async fn dispatch_loop(self: Arc<Self>, handler: Arc<dyn JobHandler>, cancel: CancellationToken) {
        info!("queue dispatcher started");
        let mut interval = time::interval(DISPATCH_TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("queue dispatcher cancelled");
                    break;
                }
                _ = self.wake.notified() => {}
                _ = interval.tick() => {}
            }
            if let Err(e) = self.dispatch_ready(&handler).await {
                warn!("dispatch pass failed: {}", e);
            }
        }
    }

    async fn dispatch_ready(self: &Arc<Self>, handler: &Arc<dyn JobHandler>) -> BridgeResult<()> {
        for key in self.kv.scan_prefix(keys::QUEUE_JOBS_PREFIX).await? {
            let group = key[keys::QUEUE_JOBS_PREFIX.len()..].to_string();
            {
                let state = self.state.lock().await;
                if state.inflight.contains(&group) {
                    continue;
                }
            }

            // Oldest ready job for this account
            let ready = self.kv.zrange_by_score(&key, 0, now_ms()).await?;
            let Some((raw, _)) = ready.into_iter().next() else {
                continue;
            };
            let job: Job = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(e) => {
                    error!("dropping undecodable job in {}: {}", key, e);
                    self.kv
                        .exec(WriteBatch::new().zrem(key.clone(), raw))
                        .await?;
                    continue;
                }
            };

            self.state.lock().await.inflight.insert(group.clone());
            let queue = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                queue.run_job(handler, group, key, raw, job).await;
            });
        }
        self.refresh_pending_metric().await;
        Ok(())
    }

    async fn run_job(
        self: Arc<Self>,
        handler: Arc<dyn JobHandler>,
        group: String,
        key: String,
        raw: String,
        job: Job,
    ) {
        let kind = job.operation.kind();
        debug!("running job {} ({}) for {}", job.id, kind, group);
        let result = handler.handle(&job).await;
        match result {
            Ok(outcome) => {
                if let Err(e) = self
                    .kv
                    .exec(WriteBatch::new().zrem(key.clone(), raw.clone()))
                    .await
                {
                    // The job will be re-run; handlers are idempotent
                    error!("could not remove finished job {}: {}", job.id, e);
                }
                self.metrics
                    .queue_jobs_total
                    .with_label_values(&[kind, "ok"])
                    .inc();
                self.respond(&job.id, Ok(outcome)).await;
            }
            Err(e) if e.is_retryable() && job.retries < MAX_JOB_RETRIES => {
                warn!(
                    "job {} ({}) hit {}, retry {}/{}",
                    job.id,
                    kind,
                    e,
                    job.retries + 1,
                    MAX_JOB_RETRIES
                );
                let mut next = job.clone();
                next.retries += 1;
                next.ready_at_ms = now_ms() + self.retry_delay_ms;
                match serde_json::to_string(&next) {
                    Ok(encoded) => {
                        let batch = WriteBatch::new()
                            .zrem(key.clone(), raw.clone())
                            .zadd(key.clone(), encoded, next.ready_at_ms);
                        if let Err(e) = self.kv.exec(batch).await {
                            error!("could not reschedule job {}: {}", job.id, e);
                        }
                    }
                    Err(e) => error!("could not reschedule job {}: {}", job.id, e),
                }
                self.metrics
                    .queue_jobs_total
                    .with_label_values(&[kind, "retried"])
                    .inc();
            }
            Err(e) => {
                error!("job {} ({}) failed: {}", job.id, kind, e);
                if let Err(rm) = self
                    .kv
                    .exec(WriteBatch::new().zrem(key.clone(), raw.clone()))
                    .await
                {
                    error!("could not remove failed job {}: {}", job.id, rm);
                }
                self.metrics
                    .queue_jobs_total
                    .with_label_values(&[kind, "failed"])
                    .inc();
                self.metrics
                    .job_errors
                    .with_label_values(&[kind, e.error_type()])
                    .inc();
                self.respond(&job.id, Err(e)).await;
            }
        }

        self.state.lock().await.inflight.remove(&group);
        self.wake.notify_one();
    }

    async fn respond(&self, job_id: &str, result: BridgeResult<JobOutcome>) {
        let sender = self.state.lock().await.responders.remove(job_id);
        if let Some(sender) = sender {
            // The submitter may be gone; the job's effects stand either way
            let _ = sender.send(result);
        }
    }

    async fn refresh_pending_metric(&self) {
        if let Ok(total) = self.pending_withdrawals_amount().await {
            self.metrics
                .pending_withdrawals_ban
                .set((total / BASE_UNITS_PER_BAN) as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn swap_to_ban_op(native: &str, hash: &str) -> Operation {
        Operation::SwapToBan {
            blockchain_address: "0xb".to_string(),
            native_address: native.to_string(),
            amount: "1".to_string(),
            hash: hash.to_string(),
            event_timestamp_seconds: 10,
            wban_balance: "0".to_string(),
        }
    }

    fn queue() -> Arc<OperationQueue> {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        Arc::new(OperationQueue::new(kv, BridgeMetrics::new_for_testing()).with_retry_delay(50))
    }

    /// Completes every job after a short pause, flagging overlapping runs
    /// within one group
    struct SlowHandler {
        active: Mutex<HashSet<String>>,
        overlap: AtomicBool,
        handled: AtomicU32,
    }

    impl SlowHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                active: Mutex::new(HashSet::new()),
                overlap: AtomicBool::new(false),
                handled: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl JobHandler for SlowHandler {
        async fn handle(&self, job: &Job) -> BridgeResult<JobOutcome> {
            let group = job.operation.group();
            if !self.active.lock().await.insert(group.clone()) {
                self.overlap.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.lock().await.remove(&group);
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(JobOutcome::SwapToBan)
        }
    }

    /// Fails with a scripted error the first `failures` times per job id
    struct FlakyHandler {
        failures: u32,
        seen: Mutex<HashMap<String, u32>>,
        error: BridgeError,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, job: &Job) -> BridgeResult<JobOutcome> {
            let mut seen = self.seen.lock().await;
            let count = seen.entry(job.id.clone()).or_insert(0);
            *count += 1;
            if *count <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(JobOutcome::SwapToBan)
            }
        }
    }

    #[tokio::test]
    async fn test_outcome_is_delivered() {
        let queue = queue();
        let cancel = CancellationToken::new();
        let handle = queue.start(SlowHandler::new(), cancel.clone());

        let rx = queue.enqueue(swap_to_ban_op("ban_a", "h1")).await.unwrap();
        let outcome = time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, JobOutcome::SwapToBan);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_per_account_serialization() {
        let queue = queue();
        let handler = SlowHandler::new();
        let cancel = CancellationToken::new();
        let handle = queue.start(handler.clone(), cancel.clone());

        let mut receivers = Vec::new();
        for i in 0..3 {
            receivers.push(
                queue
                    .enqueue(swap_to_ban_op("ban_a", &format!("h{}", i)))
                    .await
                    .unwrap(),
            );
        }
        receivers.push(queue.enqueue(swap_to_ban_op("ban_b", "h9")).await.unwrap());

        for rx in receivers {
            time::timeout(Duration::from_secs(10), rx)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }
        assert_eq!(handler.handled.load(Ordering::SeqCst), 4);
        assert!(
            !handler.overlap.load(Ordering::SeqCst),
            "two jobs ran concurrently for one account"
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_operational_errors_are_retried() {
        let queue = queue();
        let handler = Arc::new(FlakyHandler {
            failures: 2,
            seen: Mutex::new(HashMap::new()),
            error: BridgeError::LockTimeout("balance:ban_a".to_string()),
        });
        let cancel = CancellationToken::new();
        let handle = queue.start(handler.clone(), cancel.clone());

        let rx = queue.enqueue(swap_to_ban_op("ban_a", "h1")).await.unwrap();
        let outcome = time::timeout(Duration::from_secs(10), rx)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, JobOutcome::SwapToBan);
        assert_eq!(*handler.seen.lock().await.values().next().unwrap(), 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let queue = queue();
        let handler = Arc::new(FlakyHandler {
            failures: u32::MAX,
            seen: Mutex::new(HashMap::new()),
            error: BridgeError::StoreTransactionFailure("boom".to_string()),
        });
        let cancel = CancellationToken::new();
        let handle = queue.start(handler.clone(), cancel.clone());

        let rx = queue.enqueue(swap_to_ban_op("ban_a", "h1")).await.unwrap();
        let result = time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::StoreTransactionFailure(_))
        ));
        // Exactly one attempt: replay would double-spend
        assert_eq!(*handler.seen.lock().await.values().next().unwrap(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_delayed_jobs_wait_for_ready_time() {
        let queue = queue();
        let handler = SlowHandler::new();
        let cancel = CancellationToken::new();
        let handle = queue.start(handler.clone(), cancel.clone());

        queue
            .enqueue_job(Job::delayed(swap_to_ban_op("ban_a", "h1"), 600))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_withdrawals_amount() {
        let queue = queue();
        let op = Operation::NativeWithdrawal {
            native_address: "ban_a".to_string(),
            blockchain_address: "0xb".to_string(),
            amount: "2.5".to_string(),
            timestamp_ms: 1,
            signature: "s".to_string(),
            attempt: 1,
        };
        queue.enqueue_job(Job::delayed(op, 60_000)).await.unwrap();

        // First attempts don't count, only pending successors do
        let first = Operation::NativeWithdrawal {
            native_address: "ban_b".to_string(),
            blockchain_address: "0xb".to_string(),
            amount: "7".to_string(),
            timestamp_ms: 2,
            signature: "s".to_string(),
            attempt: 0,
        };
        queue.enqueue_job(Job::new(first)).await.unwrap();

        assert_eq!(
            queue.pending_withdrawals_amount().await.unwrap(),
            2_500_000_000_000_000_000
        );
    }
}
