// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wires the core together and exposes the operations the edge calls.
//!
//! `start` spawns the queue dispatcher, the chain scanner and the deposit
//! pipeline under one cancellation token. The deposit pipeline is what
//! turns a first deposit into a confirmed claim.

use crate::claims::ClaimManager;
use crate::clients::{BanWalletClient, Blacklist, SignatureVerifier, WbanClient};
use crate::error::{BridgeError, BridgeResult};
use crate::lock::LockManager;
use crate::metrics::BridgeMetrics;
use crate::processors::{
    OperationRouter, SwapToBanProcessor, SwapToWbanProcessor, WithdrawalProcessor,
};
use crate::queue::OperationQueue;
use crate::scanner::{ChainScanner, ScannerConfig};
use crate::store::{KvStore, LedgerStore};
use crate::types::{
    normalize_address, AccountHistory, ClaimResult, DepositEvent, JobOutcome, MintReceipt,
    Operation, SwapToWbanRequest, WithdrawalOutcome, WithdrawalRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub hot_wallet: String,
    pub evm_explorer_url: String,
    pub starting_block: u64,
    pub pending_withdrawal_retry_delay: Duration,
    pub scanner: ScannerConfig,
}

pub struct BridgeNode {
    ledger: Arc<LedgerStore>,
    queue: Arc<OperationQueue>,
    router: Arc<OperationRouter>,
    claims: ClaimManager,
    scanner: Arc<ChainScanner>,
    metrics: Arc<BridgeMetrics>,
}

impl BridgeNode {
    pub fn new(
        kv: Arc<dyn KvStore>,
        ban: Arc<dyn BanWalletClient>,
        wban: Arc<dyn WbanClient>,
        verifier: Arc<dyn SignatureVerifier>,
        blacklist: Arc<dyn Blacklist>,
        metrics: Arc<BridgeMetrics>,
        config: NodeConfig,
    ) -> Self {
        let locks = Arc::new(LockManager::new(kv.clone()));
        let ledger = Arc::new(LedgerStore::new(
            kv.clone(),
            locks,
            config.evm_explorer_url.clone(),
            config.starting_block,
        ));
        let queue = Arc::new(OperationQueue::new(kv, metrics.clone()));
        let router = Arc::new(OperationRouter::new(
            WithdrawalProcessor::new(
                ledger.clone(),
                ban,
                verifier.clone(),
                queue.clone(),
                metrics.clone(),
                config.hot_wallet.clone(),
                config.pending_withdrawal_retry_delay.as_millis() as i64,
            ),
            SwapToWbanProcessor::new(
                ledger.clone(),
                wban.clone(),
                verifier.clone(),
                metrics.clone(),
            ),
            SwapToBanProcessor::new(ledger.clone(), metrics.clone()),
        ));
        let claims = ClaimManager::new(ledger.clone(), verifier, blacklist);
        let scanner = Arc::new(ChainScanner::new(
            ledger.clone(),
            queue.clone(),
            wban,
            metrics.clone(),
            config.scanner,
        ));
        Self {
            ledger,
            queue,
            router,
            claims,
            scanner,
            metrics,
        }
    }

    /// Spawn the long-running tasks; `deposits` is the stream of native
    /// chain deposits into the hot wallet
    pub fn start(
        self: &Arc<Self>,
        deposits: mpsc::Receiver<DepositEvent>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        handles.push(self.queue.start(self.router.clone(), cancel.clone()));
        handles.push(self.scanner.clone().start(cancel.clone()));

        let node = self.clone();
        handles.push(tokio::spawn(async move {
            node.deposit_loop(deposits, cancel).await;
        }));
        handles
    }

    async fn deposit_loop(
        &self,
        mut deposits: mpsc::Receiver<DepositEvent>,
        cancel: CancellationToken,
    ) {
        info!("deposit pipeline started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("deposit pipeline cancelled");
                    break;
                }
                event = deposits.recv() => {
                    let Some(event) = event else {
                        warn!("deposit channel closed");
                        break;
                    };
                    if let Err(e) = self.handle_deposit(&event).await {
                        error!("deposit {} not processed: {}", event.hash, e);
                    }
                }
            }
        }
    }

    /// Confirm-then-credit: the first deposit binds the pending claim,
    /// later ones only credit. Replays are dropped on the hash check.
    pub async fn handle_deposit(&self, event: &DepositEvent) -> BridgeResult<()> {
        let native = normalize_address(&event.from);

        if !self.ledger.is_claimed(&native).await?
            && self.ledger.has_pending_claim(&native).await?
        {
            self.claims.confirm(&native).await?;
        }
        if !self.ledger.is_claimed(&native).await? {
            warn!(
                "ignoring deposit {} from unclaimed wallet {}",
                event.hash, native
            );
            return Ok(());
        }
        if self.ledger.contains_deposit(&native, &event.hash).await? {
            debug!("deposit {} already credited", event.hash);
            return Ok(());
        }

        self.ledger
            .store_deposit(&native, event.amount, event.timestamp_ms, &event.hash)
            .await?;
        self.metrics.deposits_total.inc();
        info!(
            "deposit {} credited: {} base units to {}",
            event.hash, event.amount, native
        );
        Ok(())
    }

    // ---------- edge-facing operations ----------

    pub async fn claim(
        &self,
        native_address: &str,
        blockchain_address: &str,
        signature: &str,
    ) -> BridgeResult<ClaimResult> {
        self.claims
            .claim(native_address, blockchain_address, signature)
            .await
    }

    pub async fn request_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> BridgeResult<WithdrawalOutcome> {
        let rx = self
            .queue
            .enqueue(Operation::NativeWithdrawal {
                native_address: request.native_address,
                blockchain_address: request.blockchain_address,
                amount: request.amount,
                timestamp_ms: request.timestamp_ms,
                signature: request.signature,
                attempt: 0,
            })
            .await?;
        match rx.await {
            Ok(Ok(JobOutcome::Withdrawal(outcome))) => Ok(outcome),
            Ok(Ok(_)) => Err(BridgeError::Generic("unexpected job outcome".to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BridgeError::Generic(
                "job result channel closed".to_string(),
            )),
        }
    }

    pub async fn request_swap_to_wban(
        &self,
        request: SwapToWbanRequest,
    ) -> BridgeResult<MintReceipt> {
        let rx = self
            .queue
            .enqueue(Operation::SwapToWban {
                native_address: request.native_address,
                blockchain_address: request.blockchain_address,
                amount: request.amount,
                timestamp_ms: request.timestamp_ms,
                signature: request.signature,
                gasless: request.gasless,
            })
            .await?;
        match rx.await {
            Ok(Ok(JobOutcome::SwapToWban(receipt))) => Ok(receipt),
            Ok(Ok(_)) => Err(BridgeError::Generic("unexpected job outcome".to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BridgeError::Generic(
                "job result channel closed".to_string(),
            )),
        }
    }

    pub async fn balance_of(&self, native_address: &str) -> BridgeResult<u128> {
        self.ledger.get_balance(native_address).await
    }

    pub async fn history(
        &self,
        native_address: &str,
        blockchain_address: &str,
    ) -> BridgeResult<AccountHistory> {
        Ok(AccountHistory {
            deposits: self.ledger.deposits(native_address).await?,
            withdrawals: self.ledger.withdrawals(native_address).await?,
            swaps: self
                .ledger
                .swaps(blockchain_address, native_address)
                .await?,
        })
    }

    pub async fn pending_withdrawals_amount(&self) -> BridgeResult<u128> {
        self.queue.pending_withdrawals_amount().await
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::StaticBlacklist;
    use crate::store::MemoryKvStore;
    use crate::test_utils::{MockBanWallet, MockVerifier, MockWbanChain};
    use crate::types::{now_ms, parse_ban_amount};

    struct NodeFixture {
        node: Arc<BridgeNode>,
        ban: Arc<MockBanWallet>,
        #[allow(dead_code)]
        wban: Arc<MockWbanChain>,
    }

    fn fixture() -> NodeFixture {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let ban = Arc::new(MockBanWallet::new());
        let wban = Arc::new(MockWbanChain::new());
        let node = Arc::new(BridgeNode::new(
            kv,
            ban.clone(),
            wban.clone(),
            Arc::new(MockVerifier),
            Arc::new(StaticBlacklist::empty()),
            BridgeMetrics::new_for_testing(),
            NodeConfig {
                hot_wallet: "ban_hot".to_string(),
                evm_explorer_url: "https://bscscan.com".to_string(),
                starting_block: 100,
                pending_withdrawal_retry_delay: Duration::from_millis(50),
                scanner: ScannerConfig {
                    poll_interval: Duration::from_secs(3600),
                    max_retry_duration: Duration::from_millis(100),
                    ..ScannerConfig::default()
                },
            },
        ));
        NodeFixture { node, ban, wban }
    }

    fn deposit(from: &str, human_amount: &str, hash: &str) -> DepositEvent {
        DepositEvent {
            from: from.to_string(),
            amount: parse_ban_amount(human_amount).unwrap(),
            hash: hash.to_string(),
            timestamp_ms: now_ms(),
        }
    }

    #[tokio::test]
    async fn test_first_deposit_confirms_claim_and_credits() {
        let fx = fixture();
        assert_eq!(
            fx.node.claim("ban_a", "0xb", "valid:0xb").await.unwrap(),
            ClaimResult::Accepted
        );

        fx.node
            .handle_deposit(&deposit("ban_a", "500", "h1"))
            .await
            .unwrap();

        assert!(fx.node.ledger().is_claimed("ban_a").await.unwrap());
        assert!(fx.node.ledger().has_claim("ban_a", "0xb").await.unwrap());
        assert_eq!(
            fx.node.balance_of("ban_a").await.unwrap(),
            parse_ban_amount("500").unwrap()
        );
    }

    #[tokio::test]
    async fn test_deposit_from_unclaimed_wallet_is_ignored() {
        let fx = fixture();
        fx.node
            .handle_deposit(&deposit("ban_stranger", "500", "h1"))
            .await
            .unwrap();
        assert_eq!(fx.node.balance_of("ban_stranger").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replayed_deposit_credits_once() {
        let fx = fixture();
        fx.node.claim("ban_a", "0xb", "valid:0xb").await.unwrap();
        for _ in 0..3 {
            fx.node
                .handle_deposit(&deposit("ban_a", "500", "h1"))
                .await
                .unwrap();
        }
        assert_eq!(
            fx.node.balance_of("ban_a").await.unwrap(),
            parse_ban_amount("500").unwrap()
        );
    }

    #[tokio::test]
    async fn test_withdrawal_round_trip_through_queue() {
        let fx = fixture();
        fx.node.claim("ban_a", "0xb", "valid:0xb").await.unwrap();
        fx.node
            .handle_deposit(&deposit("ban_a", "1000", "h1"))
            .await
            .unwrap();
        fx.ban.set_balance("ban_hot", "1000");

        let cancel = CancellationToken::new();
        let (_tx, deposits) = mpsc::channel(8);
        let handles = fx.node.start(deposits, cancel.clone());

        let outcome = fx
            .node
            .request_withdrawal(WithdrawalRequest {
                native_address: "ban_a".to_string(),
                blockchain_address: "0xb".to_string(),
                amount: "300".to_string(),
                timestamp_ms: 2000,
                signature: "valid:0xb".to_string(),
            })
            .await
            .unwrap();
        let WithdrawalOutcome::Sent { hash } = outcome else {
            panic!("expected a send");
        };
        assert!(!hash.is_empty());
        assert_eq!(
            fx.node.balance_of("ban_a").await.unwrap(),
            parse_ban_amount("700").unwrap()
        );

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_swap_round_trip_through_queue() {
        let fx = fixture();
        fx.node.claim("ban_a", "0xb", "valid:0xb").await.unwrap();
        fx.node
            .handle_deposit(&deposit("ban_a", "1000", "h1"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let (_tx, deposits) = mpsc::channel(8);
        let handles = fx.node.start(deposits, cancel.clone());

        let receipt = fx
            .node
            .request_swap_to_wban(SwapToWbanRequest {
                native_address: "ban_a".to_string(),
                blockchain_address: "0xb".to_string(),
                amount: "400".to_string(),
                timestamp_ms: 2000,
                signature: "valid:0xb".to_string(),
                gasless: false,
            })
            .await
            .unwrap();
        assert!(!receipt.receipt.is_empty());
        assert_eq!(
            fx.node.balance_of("ban_a").await.unwrap(),
            parse_ban_amount("600").unwrap()
        );

        let history = fx.node.history("ban_a", "0xb").await.unwrap();
        assert_eq!(history.deposits.len(), 1);
        assert_eq!(history.swaps.len(), 1);
        assert_eq!(history.swaps[0].kind, "swap-to-wban");

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
