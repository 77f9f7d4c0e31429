// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mock collaborators and a full-core fixture for tests.

use crate::claims::ClaimManager;
use crate::clients::{
    BanWalletClient, Blacklist, SignatureVerifier, StaticBlacklist, WbanClient,
};
use crate::error::{BridgeError, BridgeResult};
use crate::lock::LockManager;
use crate::metrics::BridgeMetrics;
use crate::processors::{
    OperationRouter, SwapToBanProcessor, SwapToWbanProcessor, WithdrawalProcessor,
};
use crate::queue::OperationQueue;
use crate::scanner::{ChainScanner, ScannerConfig};
use crate::store::{keys, KvStore, LedgerStore, MemoryKvStore};
use crate::types::{normalize_address, parse_ban_amount, Job, MintReceipt, WbanEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock native-coin wallet with preset balances and captured sends
pub struct MockBanWallet {
    balances: Mutex<HashMap<String, u128>>,
    sends: Mutex<Vec<(String, u128)>>,
    next_hash: AtomicU64,
}

impl MockBanWallet {
    pub fn new() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            sends: Mutex::new(Vec::new()),
            next_hash: AtomicU64::new(0),
        }
    }

    pub fn set_balance(&self, address: &str, human_amount: &str) {
        self.balances.lock().unwrap().insert(
            normalize_address(address),
            parse_ban_amount(human_amount).unwrap(),
        );
    }

    pub fn sent(&self) -> Vec<(String, u128)> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl BanWalletClient for MockBanWallet {
    async fn balance(&self, address: &str) -> BridgeResult<u128> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&normalize_address(address))
            .copied()
            .unwrap_or(0))
    }

    async fn send(&self, to: &str, amount: u128) -> BridgeResult<String> {
        self.sends
            .lock()
            .unwrap()
            .push((normalize_address(to), amount));
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("h_send_{}", n))
    }
}

/// Mock wBAN chain with preset events and captured receipt issuance
pub struct MockWbanChain {
    head: AtomicU64,
    events: Mutex<Vec<(u64, WbanEvent)>>,
    receipts: Mutex<Vec<(String, u128)>>,
    next_receipt: AtomicU64,
    wban_balances: Mutex<HashMap<String, u128>>,
}

impl MockWbanChain {
    pub fn new() -> Self {
        Self {
            head: AtomicU64::new(0),
            events: Mutex::new(Vec::new()),
            receipts: Mutex::new(Vec::new()),
            next_receipt: AtomicU64::new(0),
            wban_balances: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn add_event(&self, block: u64, event: WbanEvent) {
        self.events.lock().unwrap().push((block, event));
    }

    pub fn receipts(&self) -> Vec<(String, u128)> {
        self.receipts.lock().unwrap().clone()
    }
}

#[async_trait]
impl WbanClient for MockWbanChain {
    async fn head_block(&self) -> BridgeResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn fetch_events(&self, from_block: u64, to_block: u64) -> BridgeResult<Vec<WbanEvent>> {
        let mut hits: Vec<(u64, WbanEvent)> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|(block, _)| from_block <= *block && *block <= to_block)
            .cloned()
            .collect();
        hits.sort_by_key(|(block, _)| *block);
        Ok(hits.into_iter().map(|(_, event)| event).collect())
    }

    async fn create_mint_receipt(
        &self,
        blockchain_address: &str,
        amount: u128,
    ) -> BridgeResult<MintReceipt> {
        let blockchain = normalize_address(blockchain_address);
        self.receipts
            .lock()
            .unwrap()
            .push((blockchain.clone(), amount));
        let n = self.next_receipt.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MintReceipt {
            receipt: format!("receipt_{}", n),
            uuid: format!("uuid_{}", n),
            wban_balance: self
                .wban_balances
                .lock()
                .unwrap()
                .get(&blockchain)
                .copied()
                .unwrap_or(0),
        })
    }
}

/// Accepts signatures of the form `valid:<address>` and recovers that
/// address, regardless of message
pub struct MockVerifier;

impl SignatureVerifier for MockVerifier {
    fn recover(&self, _message: &str, signature: &str) -> BridgeResult<String> {
        signature
            .strip_prefix("valid:")
            .map(|address| address.to_string())
            .ok_or(BridgeError::InvalidSignature)
    }
}

/// The whole core wired over a memory store
pub struct Fixture {
    pub kv: Arc<dyn KvStore>,
    pub ledger: Arc<LedgerStore>,
    pub queue: Arc<OperationQueue>,
    pub ban: Arc<MockBanWallet>,
    pub wban: Arc<MockWbanChain>,
    pub verifier: Arc<MockVerifier>,
    pub blacklist: Arc<StaticBlacklist>,
    pub metrics: Arc<BridgeMetrics>,
    pub router: Arc<OperationRouter>,
    deposit_seq: AtomicI64,
}

impl Fixture {
    pub const HOT_WALLET: &'static str = "ban_hot";
    const PENDING_RETRY_DELAY_MS: i64 = 50;

    pub async fn new() -> Self {
        Self::with_blacklist(Vec::new()).await
    }

    pub async fn with_blacklist(entries: Vec<(String, String)>) -> Self {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let locks = Arc::new(
            LockManager::new(kv.clone()).with_retry(3, Duration::from_millis(10)),
        );
        let ledger = Arc::new(LedgerStore::new(
            kv.clone(),
            locks,
            "https://bscscan.com",
            100,
        ));
        let metrics = BridgeMetrics::new_for_testing();
        let queue = Arc::new(
            OperationQueue::new(kv.clone(), metrics.clone()).with_retry_delay(50),
        );
        let ban = Arc::new(MockBanWallet::new());
        let wban = Arc::new(MockWbanChain::new());
        let verifier = Arc::new(MockVerifier);
        let blacklist = Arc::new(StaticBlacklist::new(entries));

        let router = Arc::new(OperationRouter::new(
            WithdrawalProcessor::new(
                ledger.clone(),
                ban.clone(),
                verifier.clone(),
                queue.clone(),
                metrics.clone(),
                Self::HOT_WALLET,
                Self::PENDING_RETRY_DELAY_MS,
            ),
            SwapToWbanProcessor::new(
                ledger.clone(),
                wban.clone(),
                verifier.clone(),
                metrics.clone(),
            ),
            SwapToBanProcessor::new(ledger.clone(), metrics.clone()),
        ));

        Self {
            kv,
            ledger,
            queue,
            ban,
            wban,
            verifier,
            blacklist,
            metrics,
            router,
            deposit_seq: AtomicI64::new(0),
        }
    }

    pub fn withdrawal(&self) -> WithdrawalProcessor {
        WithdrawalProcessor::new(
            self.ledger.clone(),
            self.ban.clone(),
            self.verifier.clone(),
            self.queue.clone(),
            self.metrics.clone(),
            Self::HOT_WALLET,
            Self::PENDING_RETRY_DELAY_MS,
        )
    }

    pub fn swap_to_wban(&self) -> SwapToWbanProcessor {
        SwapToWbanProcessor::new(
            self.ledger.clone(),
            self.wban.clone(),
            self.verifier.clone(),
            self.metrics.clone(),
        )
    }

    pub fn swap_to_ban(&self) -> SwapToBanProcessor {
        SwapToBanProcessor::new(self.ledger.clone(), self.metrics.clone())
    }

    pub fn claims(&self) -> ClaimManager {
        let blacklist: Arc<dyn Blacklist> = self.blacklist.clone();
        ClaimManager::new(self.ledger.clone(), self.verifier.clone(), blacklist)
    }

    pub fn scanner(&self) -> ChainScanner {
        ChainScanner::new(
            self.ledger.clone(),
            self.queue.clone(),
            self.wban.clone(),
            self.metrics.clone(),
            ScannerConfig {
                poll_interval: Duration::from_secs(1),
                safety_depth: 12,
                max_block_range: 1000,
                max_retry_duration: Duration::from_millis(100),
            },
        )
    }

    pub async fn claim_and_confirm(&self, native: &str, blockchain: &str) {
        assert!(self
            .ledger
            .store_pending_claim(native, blockchain)
            .await
            .unwrap());
        assert!(self.ledger.confirm_claim(native).await.unwrap());
    }

    pub async fn fund(&self, native: &str, human_amount: &str) {
        let seq = self.deposit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger
            .store_deposit(
                native,
                parse_ban_amount(human_amount).unwrap(),
                seq,
                &format!("fund_h{}", seq),
            )
            .await
            .unwrap();
    }

    pub async fn queued_jobs(&self, group: &str) -> Vec<Job> {
        self.kv
            .zrange_by_score(&keys::queue_jobs(group), 0, i64::MAX)
            .await
            .unwrap()
            .iter()
            .filter_map(|(raw, _)| serde_json::from_str(raw).ok())
            .collect()
    }

    pub async fn queued_job(&self, group: &str) -> Option<Job> {
        self.queued_jobs(group).await.into_iter().next()
    }
}
