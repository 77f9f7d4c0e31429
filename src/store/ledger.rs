// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The balance ledger and its record sequences.
//!
//! Every mutation for a native address happens under that account's
//! advisory lock and commits through one atomic `WriteBatch`: balance
//! write, sequence append and audit entry become visible together or not
//! at all. A failure inside a lock-protected block releases the lock and
//! surfaces the error unchanged.

use crate::error::{BridgeError, BridgeResult};
use crate::lock::LockManager;
use crate::store::keys;
use crate::store::{KvStore, WriteBatch};
use crate::types::{normalize_address, HistoryEntry, SwapToBanRecord, NATIVE_EXPLORER_URL};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Read-path lease
const READ_LOCK_TTL: Duration = Duration::from_secs(1);
/// Deposits tolerate a slow store; everything else stays tight
const DEPOSIT_LOCK_TTL: Duration = Duration::from_secs(30);
const MUTATE_LOCK_TTL: Duration = Duration::from_secs(1);

/// Pending claims auto-expire after this
const PENDING_CLAIM_TTL: Duration = Duration::from_secs(300);

/// History responses cap at the most recent 1000 entries
const HISTORY_LIMIT: isize = 1000;

pub struct LedgerStore {
    kv: Arc<dyn KvStore>,
    locks: Arc<LockManager>,
    evm_explorer_url: String,
    default_start_block: u64,
}

impl LedgerStore {
    pub fn new(
        kv: Arc<dyn KvStore>,
        locks: Arc<LockManager>,
        evm_explorer_url: impl Into<String>,
        default_start_block: u64,
    ) -> Self {
        Self {
            kv,
            locks,
            evm_explorer_url: evm_explorer_url.into(),
            default_start_block,
        }
    }

    // ---------- balances ----------

    /// Point-in-time balance read under the account lock
    pub async fn get_balance(&self, native_address: &str) -> BridgeResult<u128> {
        let native = normalize_address(native_address);
        let lease = self
            .locks
            .acquire(&[keys::balance_lock(&native)], READ_LOCK_TTL)
            .await?;
        let result = self.read_balance(&native).await;
        self.locks.release(lease).await;
        result
    }

    async fn read_balance(&self, native: &str) -> BridgeResult<u128> {
        match self.kv.get(&keys::balance(native)).await? {
            Some(raw) => raw
                .parse::<u128>()
                .map_err(|e| BridgeError::StorageError(format!("corrupt balance for {}: {}", native, e))),
            None => Ok(0),
        }
    }

    // ---------- deposits ----------

    pub async fn store_deposit(
        &self,
        native_address: &str,
        amount: u128,
        timestamp_ms: i64,
        hash: &str,
    ) -> BridgeResult<()> {
        let native = normalize_address(native_address);
        let lease = self
            .locks
            .acquire(&[keys::balance_lock(&native)], DEPOSIT_LOCK_TTL)
            .await?;
        let result = self
            .store_deposit_locked(&native, amount, timestamp_ms, hash)
            .await;
        self.locks.release(lease).await;
        result
    }

    async fn store_deposit_locked(
        &self,
        native: &str,
        amount: u128,
        timestamp_ms: i64,
        hash: &str,
    ) -> BridgeResult<()> {
        let balance = self.read_balance(native).await?;
        let new_balance = balance.checked_add(amount).ok_or_else(|| {
            BridgeError::StoreTransactionFailure(format!("balance overflow for {}", native))
        })?;
        let batch = WriteBatch::new()
            .set(keys::balance(native), new_balance.to_string())
            .zadd(keys::deposits(native), hash, timestamp_ms)
            .hset(
                keys::audit(hash),
                vec![
                    ("type".to_string(), "deposit".to_string()),
                    ("native_address".to_string(), native.to_string()),
                    ("amount".to_string(), amount.to_string()),
                    ("timestamp_ms".to_string(), timestamp_ms.to_string()),
                    ("hash".to_string(), hash.to_string()),
                ],
            );
        self.kv.exec(batch).await?;
        debug!(
            "credited deposit {} to {}: {} -> {}",
            hash, native, balance, new_balance
        );
        Ok(())
    }

    pub async fn contains_deposit(&self, native_address: &str, hash: &str) -> BridgeResult<bool> {
        let native = normalize_address(native_address);
        Ok(self.kv.zscore(&keys::deposits(&native), hash).await?.is_some())
    }

    // ---------- withdrawals ----------

    pub async fn store_withdrawal(
        &self,
        native_address: &str,
        amount: u128,
        timestamp_ms: i64,
        hash: &str,
    ) -> BridgeResult<()> {
        let native = normalize_address(native_address);
        let lease = self
            .locks
            .acquire(&[keys::balance_lock(&native)], MUTATE_LOCK_TTL)
            .await?;
        let result = self
            .store_withdrawal_locked(&native, amount, timestamp_ms, hash)
            .await;
        self.locks.release(lease).await;
        result
    }

    async fn store_withdrawal_locked(
        &self,
        native: &str,
        amount: u128,
        timestamp_ms: i64,
        hash: &str,
    ) -> BridgeResult<()> {
        let balance = self.read_balance(native).await?;
        let new_balance = balance.checked_sub(amount).ok_or_else(|| {
            BridgeError::StoreTransactionFailure(format!(
                "withdrawal of {} would overdraw {} (balance {})",
                amount, native, balance
            ))
        })?;
        let batch = WriteBatch::new()
            .set(keys::balance(native), new_balance.to_string())
            .zadd(keys::withdrawals(native), hash, timestamp_ms)
            .hset(
                keys::audit(hash),
                vec![
                    ("type".to_string(), "withdrawal".to_string()),
                    ("native_address".to_string(), native.to_string()),
                    ("amount".to_string(), amount.to_string()),
                    ("timestamp_ms".to_string(), timestamp_ms.to_string()),
                    ("hash".to_string(), hash.to_string()),
                ],
            );
        self.kv.exec(batch).await?;
        debug!(
            "debited withdrawal {} from {}: {} -> {}",
            hash, native, balance, new_balance
        );
        Ok(())
    }

    /// Exact-timestamp membership test; the withdrawal uniqueness key is
    /// `(native_address, timestamp_ms)`
    pub async fn contains_withdrawal_request(
        &self,
        native_address: &str,
        timestamp_ms: i64,
    ) -> BridgeResult<bool> {
        let native = normalize_address(native_address);
        let hits = self
            .kv
            .zrange_by_score(&keys::withdrawals(&native), timestamp_ms, timestamp_ms)
            .await?;
        Ok(!hits.is_empty())
    }

    // ---------- swaps ----------

    pub async fn store_swap_to_wban(
        &self,
        native_address: &str,
        blockchain_address: &str,
        amount: u128,
        timestamp_ms: i64,
        receipt: &str,
        uuid: &str,
    ) -> BridgeResult<()> {
        let native = normalize_address(native_address);
        let blockchain = normalize_address(blockchain_address);
        let lease = self
            .locks
            .acquire(&[keys::swap_lock(&native)], MUTATE_LOCK_TTL)
            .await?;
        let result = self
            .store_swap_to_wban_locked(&native, &blockchain, amount, timestamp_ms, receipt, uuid)
            .await;
        self.locks.release(lease).await;
        result
    }

    async fn store_swap_to_wban_locked(
        &self,
        native: &str,
        blockchain: &str,
        amount: u128,
        timestamp_ms: i64,
        receipt: &str,
        uuid: &str,
    ) -> BridgeResult<()> {
        let balance = self.read_balance(native).await?;
        let new_balance = balance.checked_sub(amount).ok_or_else(|| {
            BridgeError::StoreTransactionFailure(format!(
                "swap of {} would overdraw {} (balance {})",
                amount, native, balance
            ))
        })?;
        let batch = WriteBatch::new()
            .set(keys::balance(native), new_balance.to_string())
            .zadd(keys::swaps_ban_to_wban(native), receipt, timestamp_ms)
            .hset(
                keys::audit(receipt),
                vec![
                    ("type".to_string(), "swap-to-wban".to_string()),
                    ("native_address".to_string(), native.to_string()),
                    ("blockchain_address".to_string(), blockchain.to_string()),
                    ("amount".to_string(), amount.to_string()),
                    ("timestamp_ms".to_string(), timestamp_ms.to_string()),
                    ("receipt".to_string(), receipt.to_string()),
                    ("uuid".to_string(), uuid.to_string()),
                ],
            );
        self.kv.exec(batch).await?;
        debug!(
            "issued mint receipt for {}: debited {}, balance {} -> {}",
            native, amount, balance, new_balance
        );
        Ok(())
    }

    /// Credit a chain-originated wBAN -> BAN redemption.
    ///
    /// Idempotent on `(blockchain_address, hash)`: the membership test
    /// runs inside the lock, so duplicate event delivery is a no-op.
    /// Returns whether the ledger was actually credited.
    pub async fn store_swap_to_ban(&self, record: &SwapToBanRecord) -> BridgeResult<bool> {
        let native = normalize_address(&record.native_address);
        let blockchain = normalize_address(&record.blockchain_address);
        let lease = self
            .locks
            .acquire(&[keys::balance_lock(&native)], MUTATE_LOCK_TTL)
            .await?;
        let result = self
            .store_swap_to_ban_locked(&native, &blockchain, record)
            .await;
        self.locks.release(lease).await;
        result
    }

    async fn store_swap_to_ban_locked(
        &self,
        native: &str,
        blockchain: &str,
        record: &SwapToBanRecord,
    ) -> BridgeResult<bool> {
        if self
            .kv
            .zscore(&keys::swaps_wban_to_ban(blockchain), &record.hash)
            .await?
            .is_some()
        {
            warn!(
                "swap-to-ban {} for {} already processed, skipping",
                record.hash, blockchain
            );
            return Ok(false);
        }
        let balance = self.read_balance(native).await?;
        let new_balance = balance.checked_add(record.amount).ok_or_else(|| {
            BridgeError::StoreTransactionFailure(format!("balance overflow for {}", native))
        })?;
        let batch = WriteBatch::new()
            .set(keys::balance(native), new_balance.to_string())
            .zadd(
                keys::swaps_wban_to_ban(blockchain),
                &record.hash,
                record.timestamp_ms,
            )
            .hset(
                keys::audit(&record.hash),
                vec![
                    ("type".to_string(), "swap-to-ban".to_string()),
                    ("blockchain_address".to_string(), blockchain.to_string()),
                    ("native_address".to_string(), native.to_string()),
                    ("amount".to_string(), record.amount.to_string()),
                    ("timestamp_ms".to_string(), record.timestamp_ms.to_string()),
                    ("hash".to_string(), record.hash.clone()),
                ],
            );
        self.kv.exec(batch).await?;
        debug!(
            "credited swap-to-ban {} to {}: {} -> {}",
            record.hash, native, balance, new_balance
        );
        Ok(true)
    }

    pub async fn contains_swap_to_ban(
        &self,
        blockchain_address: &str,
        hash: &str,
    ) -> BridgeResult<bool> {
        let blockchain = normalize_address(blockchain_address);
        Ok(self
            .kv
            .zscore(&keys::swaps_wban_to_ban(&blockchain), hash)
            .await?
            .is_some())
    }

    // ---------- gasless swap allowance ----------

    pub async fn has_used_free_swap(&self, native_address: &str) -> BridgeResult<bool> {
        let native = normalize_address(native_address);
        Ok(self.kv.get(&keys::gasless(&native)).await?.is_some())
    }

    pub async fn mark_free_swap_used(
        &self,
        native_address: &str,
        txn_id: &str,
    ) -> BridgeResult<()> {
        let native = normalize_address(native_address);
        self.kv
            .exec(WriteBatch::new().set(keys::gasless(&native), txn_id))
            .await
    }

    // ---------- claims ----------

    pub async fn has_pending_claim(&self, native_address: &str) -> BridgeResult<bool> {
        let native = normalize_address(native_address);
        Ok(!self
            .kv
            .scan_prefix(&keys::pending_claim_prefix(&native))
            .await?
            .is_empty())
    }

    pub async fn has_pending_claim_for(
        &self,
        native_address: &str,
        blockchain_address: &str,
    ) -> BridgeResult<bool> {
        let native = normalize_address(native_address);
        let blockchain = normalize_address(blockchain_address);
        Ok(self
            .kv
            .get(&keys::pending_claim(&native, &blockchain))
            .await?
            .is_some())
    }

    /// Blockchain addresses with a live pending claim for `native_address`,
    /// in key order
    pub async fn pending_claims(&self, native_address: &str) -> BridgeResult<Vec<String>> {
        let native = normalize_address(native_address);
        let prefix = keys::pending_claim_prefix(&native);
        let keys = self.kv.scan_prefix(&prefix).await?;
        Ok(keys
            .into_iter()
            .map(|key| key[prefix.len()..].to_string())
            .collect())
    }

    /// Conditional create: returns false if this exact pending entry
    /// already exists (either from an earlier submission or a lost race)
    pub async fn store_pending_claim(
        &self,
        native_address: &str,
        blockchain_address: &str,
    ) -> BridgeResult<bool> {
        let native = normalize_address(native_address);
        let blockchain = normalize_address(blockchain_address);
        self.kv
            .set_nx_px(
                &keys::pending_claim(&native, &blockchain),
                "1",
                PENDING_CLAIM_TTL,
            )
            .await
    }

    pub async fn remove_pending_claim(
        &self,
        native_address: &str,
        blockchain_address: &str,
    ) -> BridgeResult<()> {
        let native = normalize_address(native_address);
        let blockchain = normalize_address(blockchain_address);
        self.kv
            .exec(WriteBatch::new().del(keys::pending_claim(&native, &blockchain)))
            .await
    }

    /// Promote the single pending entry for `native_address` to a
    /// permanent claim, populating the reverse index in the same
    /// multi-write. Returns false when no pending entry exists.
    pub async fn confirm_claim(&self, native_address: &str) -> BridgeResult<bool> {
        let native = normalize_address(native_address);
        let pending = self.pending_claims(&native).await?;
        let Some(blockchain) = pending.first() else {
            return Ok(false);
        };
        if pending.len() > 1 {
            warn!(
                "{} pending claims found for {}, promoting {}",
                pending.len(),
                native,
                blockchain
            );
        }
        let batch = WriteBatch::new()
            .set(keys::claim(&native, blockchain), "1")
            .sadd(keys::claims_by_blockchain(blockchain), &native)
            .del(keys::pending_claim(&native, blockchain));
        self.kv.exec(batch).await?;
        debug!("confirmed claim {} -> {}", native, blockchain);
        Ok(true)
    }

    pub async fn is_claimed(&self, native_address: &str) -> BridgeResult<bool> {
        let native = normalize_address(native_address);
        Ok(!self
            .kv
            .scan_prefix(&keys::claim_prefix(&native))
            .await?
            .is_empty())
    }

    pub async fn has_claim(
        &self,
        native_address: &str,
        blockchain_address: &str,
    ) -> BridgeResult<bool> {
        let native = normalize_address(native_address);
        let blockchain = normalize_address(blockchain_address);
        Ok(self
            .kv
            .get(&keys::claim(&native, &blockchain))
            .await?
            .is_some())
    }

    pub async fn native_addresses_for_blockchain_address(
        &self,
        blockchain_address: &str,
    ) -> BridgeResult<Vec<String>> {
        let blockchain = normalize_address(blockchain_address);
        self.kv
            .smembers(&keys::claims_by_blockchain(&blockchain))
            .await
    }

    // ---------- chain checkpoint ----------

    pub async fn last_processed_block(&self) -> BridgeResult<u64> {
        match self.kv.get(keys::LAST_PROCESSED_BLOCK).await? {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| BridgeError::StorageError(format!("corrupt checkpoint: {}", e))),
            None => Ok(self.default_start_block),
        }
    }

    /// Monotone checkpoint advance: `n <= current` is a no-op
    pub async fn set_last_processed_block(&self, n: u64) -> BridgeResult<()> {
        let current = self.last_processed_block().await?;
        if n <= current {
            debug!("checkpoint {} <= current {}, not moving", n, current);
            return Ok(());
        }
        self.kv
            .exec(WriteBatch::new().set(keys::LAST_PROCESSED_BLOCK, n.to_string()))
            .await
    }

    // ---------- history ----------

    pub async fn deposits(&self, native_address: &str) -> BridgeResult<Vec<HistoryEntry>> {
        let native = normalize_address(native_address);
        let refs = self
            .kv
            .zrevrange(&keys::deposits(&native), 0, HISTORY_LIMIT - 1)
            .await?;
        self.hydrate(refs, |hash| Some(self.native_explorer_link(hash)))
            .await
    }

    pub async fn withdrawals(&self, native_address: &str) -> BridgeResult<Vec<HistoryEntry>> {
        let native = normalize_address(native_address);
        let refs = self
            .kv
            .zrevrange(&keys::withdrawals(&native), 0, HISTORY_LIMIT - 1)
            .await?;
        self.hydrate(refs, |hash| Some(self.native_explorer_link(hash)))
            .await
    }

    /// Both swap directions merged, newest first, capped at 1000
    pub async fn swaps(
        &self,
        blockchain_address: &str,
        native_address: &str,
    ) -> BridgeResult<Vec<HistoryEntry>> {
        let native = normalize_address(native_address);
        let blockchain = normalize_address(blockchain_address);

        let outbound = self
            .kv
            .zrevrange(&keys::swaps_ban_to_wban(&native), 0, HISTORY_LIMIT - 1)
            .await?;
        let inbound = self
            .kv
            .zrevrange(&keys::swaps_wban_to_ban(&blockchain), 0, HISTORY_LIMIT - 1)
            .await?;

        let mut entries = self.hydrate(outbound, |_| None).await?;
        entries.extend(
            self.hydrate(inbound, |hash| Some(self.evm_explorer_link(hash)))
                .await?,
        );
        entries.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        entries.truncate(HISTORY_LIMIT as usize);
        Ok(entries)
    }

    async fn hydrate<F>(
        &self,
        refs: Vec<(String, i64)>,
        link: F,
    ) -> BridgeResult<Vec<HistoryEntry>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut entries = Vec::with_capacity(refs.len());
        for (reference, score) in refs {
            let audit: HashMap<String, String> = self.kv.hgetall(&keys::audit(&reference)).await?;
            if audit.is_empty() {
                warn!("audit entry missing for {}", reference);
                continue;
            }
            entries.push(HistoryEntry {
                kind: audit.get("type").cloned().unwrap_or_default(),
                amount: audit.get("amount").cloned().unwrap_or_else(|| "0".to_string()),
                timestamp_ms: score,
                link: link(&reference),
                reference,
            });
        }
        Ok(entries)
    }

    fn native_explorer_link(&self, hash: &str) -> String {
        format!("{}{}", NATIVE_EXPLORER_URL, hash)
    }

    fn evm_explorer_link(&self, hash: &str) -> String {
        format!("{}/tx/{}", self.evm_explorer_url.trim_end_matches('/'), hash)
    }
}
