// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! BAN -> wBAN swap: validates the signed request, issues a mint receipt
//! and debits the ledger. The receipt's later on-chain redemption is the
//! user's business and never re-enters this core.

use crate::clients::{SignatureVerifier, WbanClient};
use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use crate::store::LedgerStore;
use crate::types::{normalize_address, parse_ban_amount, swap_to_wban_message, MintReceipt};
use std::sync::Arc;
use tracing::{error, info};

pub struct SwapToWbanProcessor {
    ledger: Arc<LedgerStore>,
    wban: Arc<dyn WbanClient>,
    verifier: Arc<dyn SignatureVerifier>,
    metrics: Arc<BridgeMetrics>,
}

impl SwapToWbanProcessor {
    pub fn new(
        ledger: Arc<LedgerStore>,
        wban: Arc<dyn WbanClient>,
        verifier: Arc<dyn SignatureVerifier>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            ledger,
            wban,
            verifier,
            metrics,
        }
    }

    pub async fn handle(
        &self,
        native_address: &str,
        blockchain_address: &str,
        amount: &str,
        timestamp_ms: i64,
        signature: &str,
        gasless: bool,
    ) -> BridgeResult<MintReceipt> {
        if signature.is_empty() {
            return Err(BridgeError::InvalidSignature);
        }
        let recovered = self
            .verifier
            .recover(&swap_to_wban_message(amount, native_address), signature)?;
        if normalize_address(&recovered) != normalize_address(blockchain_address) {
            return Err(BridgeError::InvalidSignature);
        }

        if !self
            .ledger
            .has_claim(native_address, blockchain_address)
            .await?
        {
            return Err(BridgeError::NotClaimed(native_address.to_string()));
        }

        let value = parse_ban_amount(amount)?;

        let balance = self.ledger.get_balance(native_address).await?;
        if balance < value {
            return Err(BridgeError::InsufficientBalance {
                available: balance,
                requested: value,
            });
        }

        // A signed authorization, not a chain transaction: free to retry
        let receipt = self
            .wban
            .create_mint_receipt(blockchain_address, value)
            .await?;

        if gasless && !self.ledger.has_used_free_swap(native_address).await? {
            self.ledger
                .mark_free_swap_used(native_address, &receipt.uuid)
                .await?;
        }

        if let Err(e) = self
            .ledger
            .store_swap_to_wban(
                native_address,
                blockchain_address,
                value,
                timestamp_ms,
                &receipt.receipt,
                &receipt.uuid,
            )
            .await
        {
            // The user holds a receipt the ledger knows nothing about
            error!(
                "mint receipt {} issued to {} but swap not recorded, reconcile manually: {}",
                receipt.uuid, blockchain_address, e
            );
            return Err(BridgeError::StoreTransactionFailure(format!(
                "issued receipt {} but could not record the swap: {}",
                receipt.uuid, e
            )));
        }

        self.metrics.swaps_to_wban_total.inc();
        info!(
            "swapped {} BAN from {} into a mint receipt for {}",
            amount, native_address, blockchain_address
        );
        Ok(receipt)
    }
}
