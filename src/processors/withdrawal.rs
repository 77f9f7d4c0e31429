// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Withdrawal state machine:
//! `submitted -> validated -> funded -> sent -> recorded`, with
//! `pending-funds` when the hot wallet cannot cover the amount.

use crate::clients::{BanWalletClient, SignatureVerifier};
use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use crate::queue::OperationQueue;
use crate::store::LedgerStore;
use crate::types::{
    normalize_address, parse_ban_amount, withdrawal_message, Job, Operation, WithdrawalOutcome,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct WithdrawalProcessor {
    ledger: Arc<LedgerStore>,
    ban: Arc<dyn BanWalletClient>,
    verifier: Arc<dyn SignatureVerifier>,
    queue: Arc<OperationQueue>,
    metrics: Arc<BridgeMetrics>,
    hot_wallet: String,
    pending_retry_delay_ms: i64,
}

impl WithdrawalProcessor {
    pub fn new(
        ledger: Arc<LedgerStore>,
        ban: Arc<dyn BanWalletClient>,
        verifier: Arc<dyn SignatureVerifier>,
        queue: Arc<OperationQueue>,
        metrics: Arc<BridgeMetrics>,
        hot_wallet: impl Into<String>,
        pending_retry_delay_ms: i64,
    ) -> Self {
        Self {
            ledger,
            ban,
            verifier,
            queue,
            metrics,
            hot_wallet: hot_wallet.into(),
            pending_retry_delay_ms,
        }
    }

    pub async fn handle(
        &self,
        native_address: &str,
        blockchain_address: &str,
        amount: &str,
        timestamp_ms: i64,
        signature: &str,
        attempt: u32,
    ) -> BridgeResult<WithdrawalOutcome> {
        // The uniqueness key is (native_address, timestamp_ms)
        if self
            .ledger
            .contains_withdrawal_request(native_address, timestamp_ms)
            .await?
        {
            return Err(BridgeError::DuplicateRequest);
        }

        if signature.is_empty() {
            return Err(BridgeError::InvalidSignature);
        }
        let recovered = self
            .verifier
            .recover(&withdrawal_message(amount, native_address), signature)?;
        if normalize_address(&recovered) != normalize_address(blockchain_address) {
            return Err(BridgeError::InvalidSignature);
        }

        if !self.ledger.is_claimed(native_address).await?
            || !self
                .ledger
                .has_claim(native_address, blockchain_address)
                .await?
        {
            return Err(BridgeError::NotClaimed(native_address.to_string()));
        }

        let value = parse_ban_amount(amount)?;
        if value == 0 {
            return Err(BridgeError::InvalidAmount(
                "withdrawal amount must be positive".to_string(),
            ));
        }

        let balance = self.ledger.get_balance(native_address).await?;
        if balance < value {
            return Err(BridgeError::InsufficientBalance {
                available: balance,
                requested: value,
            });
        }

        let hot_balance = self.ban.balance(&self.hot_wallet).await?;
        if hot_balance < value {
            return self
                .enter_pending(
                    native_address,
                    blockchain_address,
                    amount,
                    timestamp_ms,
                    signature,
                    attempt,
                    value,
                    hot_balance,
                )
                .await;
        }

        let hash = match self.ban.send(native_address, value).await {
            Ok(hash) => hash,
            // The node refused after our balance check; same pending path
            Err(BridgeError::InsufficientHotWallet { available, .. }) => {
                return self
                    .enter_pending(
                        native_address,
                        blockchain_address,
                        amount,
                        timestamp_ms,
                        signature,
                        attempt,
                        value,
                        available,
                    )
                    .await;
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self
            .ledger
            .store_withdrawal(native_address, value, timestamp_ms, &hash)
            .await
        {
            // The coins left the hot wallet; a retry would send them again
            error!(
                "withdrawal for {} sent as {} but not recorded, reconcile manually: {}",
                native_address, hash, e
            );
            return Err(BridgeError::StoreTransactionFailure(format!(
                "sent {} but could not record it: {}",
                hash, e
            )));
        }

        self.metrics.withdrawals_total.inc();
        info!(
            "withdrew {} BAN to {} in block {}",
            amount, native_address, hash
        );
        Ok(WithdrawalOutcome::Sent { hash })
    }

    async fn enter_pending(
        &self,
        native_address: &str,
        blockchain_address: &str,
        amount: &str,
        timestamp_ms: i64,
        signature: &str,
        attempt: u32,
        value: u128,
        hot_balance: u128,
    ) -> BridgeResult<WithdrawalOutcome> {
        if attempt > 0 {
            warn!(
                "withdrawal of {} BAN for {} still unfunded (hot wallet {}), giving up",
                amount, native_address, hot_balance
            );
            return Ok(WithdrawalOutcome::Sent {
                hash: String::new(),
            });
        }

        let successor = Job::delayed(
            Operation::NativeWithdrawal {
                native_address: native_address.to_string(),
                blockchain_address: blockchain_address.to_string(),
                amount: amount.to_string(),
                timestamp_ms,
                signature: signature.to_string(),
                attempt: attempt + 1,
            },
            self.pending_retry_delay_ms,
        );
        self.queue.enqueue_job(successor).await?;
        info!(
            "hot wallet underfunded ({} < {}), withdrawal for {} parked as pending",
            hot_balance, value, native_address
        );
        Ok(WithdrawalOutcome::Pending)
    }
}
