// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! EVM chain scanner.
//!
//! Walks `(checkpoint, head - safety_depth]` in bounded batches, turns
//! every redemption event into a swap-to-ban job and advances the
//! checkpoint monotonically. Replay after a crash is safe because the
//! swap-to-ban handler is idempotent on `(blockchain_address, hash)`.

use crate::clients::WbanClient;
use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use crate::queue::OperationQueue;
use crate::retry_with_max_elapsed_time;
use crate::store::LedgerStore;
use crate::types::{Job, Operation, WbanEvent};
use std::cmp;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub poll_interval: Duration,
    /// Blocks below the head considered final enough to process
    pub safety_depth: u64,
    /// Largest block range per log query
    pub max_block_range: u64,
    pub max_retry_duration: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            safety_depth: 12,
            max_block_range: 1000,
            max_retry_duration: Duration::from_secs(60),
        }
    }
}

pub struct ChainScanner {
    ledger: Arc<LedgerStore>,
    queue: Arc<OperationQueue>,
    wban: Arc<dyn WbanClient>,
    metrics: Arc<BridgeMetrics>,
    config: ScannerConfig,
}

impl ChainScanner {
    pub fn new(
        ledger: Arc<LedgerStore>,
        queue: Arc<OperationQueue>,
        wban: Arc<dyn WbanClient>,
        metrics: Arc<BridgeMetrics>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            ledger,
            queue,
            wban,
            metrics,
            config,
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(cancel).await;
        })
    }

    async fn run(&self, cancel: CancellationToken) {
        info!(
            "chain scanner started (safety depth {}, poll {:?})",
            self.config.safety_depth, self.config.poll_interval
        );
        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("chain scanner cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.scan_pass().await {
                        warn!("scan pass failed: {}", e);
                    }
                }
            }
        }
    }

    /// One scan iteration: catch up from the checkpoint to the safe head
    pub async fn scan_pass(&self) -> BridgeResult<()> {
        let head = match retry_with_max_elapsed_time!(
            self.wban.head_block(),
            self.config.max_retry_duration
        ) {
            Ok(Ok(head)) => head,
            _ => {
                return Err(BridgeError::UpstreamChainFailure(
                    "could not fetch chain head".to_string(),
                ))
            }
        };
        let safe_head = head.saturating_sub(self.config.safety_depth);
        let mut cursor = self.ledger.last_processed_block().await?;

        while cursor < safe_head {
            let from = cursor + 1;
            let to = cmp::min(cursor + self.config.max_block_range, safe_head);
            let events = match retry_with_max_elapsed_time!(
                self.wban.fetch_events(from, to),
                self.config.max_retry_duration
            ) {
                Ok(Ok(events)) => events,
                _ => {
                    return Err(BridgeError::UpstreamChainFailure(format!(
                        "could not fetch events in blocks {}..={}",
                        from, to
                    )))
                }
            };
            for event in events {
                self.ingest(event).await?;
            }
            self.ledger.set_last_processed_block(to).await?;
            self.metrics.last_processed_block.set(to as i64);
            debug!("scanned blocks {}..={} (head {})", from, to, head);
            cursor = to;
        }
        Ok(())
    }

    async fn ingest(&self, event: WbanEvent) -> BridgeResult<()> {
        match event {
            WbanEvent::Redemption {
                blockchain_address,
                native_address,
                amount,
                hash,
                timestamp_seconds,
                wban_balance,
            } => {
                info!(
                    "redemption {} observed: {} wBAN from {} -> {}",
                    hash, amount, blockchain_address, native_address
                );
                self.queue
                    .enqueue_job(Job::new(Operation::SwapToBan {
                        blockchain_address,
                        native_address,
                        amount,
                        hash,
                        event_timestamp_seconds: timestamp_seconds,
                        wban_balance,
                    }))
                    .await
            }
            WbanEvent::Mint {
                blockchain_address,
                amount,
                hash,
            } => {
                debug!(
                    "mint {} observed for {} ({} base units)",
                    hash, blockchain_address, amount
                );
                self.metrics.mint_events_total.inc();
                Ok(())
            }
        }
    }
}
