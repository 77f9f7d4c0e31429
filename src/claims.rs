// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Claim state machine: a signed claim creates a 5-minute pending record
//! binding a native address to a blockchain address; the first deposit
//! into the native address promotes it to a permanent claim.
//!
//! The check order in `claim` is part of the contract: signature, then
//! blacklist, then existing claim, then pending state.

use crate::clients::{Blacklist, SignatureVerifier};
use crate::error::BridgeResult;
use crate::store::LedgerStore;
use crate::types::{claim_message, normalize_address, ClaimResult};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ClaimManager {
    ledger: Arc<LedgerStore>,
    verifier: Arc<dyn SignatureVerifier>,
    blacklist: Arc<dyn Blacklist>,
}

impl ClaimManager {
    pub fn new(
        ledger: Arc<LedgerStore>,
        verifier: Arc<dyn SignatureVerifier>,
        blacklist: Arc<dyn Blacklist>,
    ) -> Self {
        Self {
            ledger,
            verifier,
            blacklist,
        }
    }

    pub async fn claim(
        &self,
        native_address: &str,
        blockchain_address: &str,
        signature: &str,
    ) -> BridgeResult<ClaimResult> {
        let recovered = match self
            .verifier
            .recover(&claim_message(native_address), signature)
        {
            Ok(address) => address,
            Err(_) => return Ok(ClaimResult::InvalidSignature),
        };
        if normalize_address(&recovered) != normalize_address(blockchain_address) {
            return Ok(ClaimResult::InvalidSignature);
        }

        if let Some(alias) = self.blacklist.lookup(native_address).await? {
            warn!(
                "refused claim of blacklisted wallet {} (alias: {})",
                native_address, alias
            );
            return Ok(ClaimResult::Blacklisted);
        }

        let native = normalize_address(native_address);
        let blockchain = normalize_address(blockchain_address);

        if self.ledger.has_claim(&native, &blockchain).await? {
            return Ok(ClaimResult::AlreadyDone);
        }

        // Re-submitting an un-confirmed claim for the same pair is fine
        if self.ledger.has_pending_claim_for(&native, &blockchain).await? {
            return Ok(ClaimResult::Accepted);
        }

        if !self.ledger.has_pending_claim(&native).await? {
            if self.ledger.store_pending_claim(&native, &blockchain).await? {
                // Two wallets may race past the scan above; the entry in
                // key order wins, the loser withdraws its own entry
                let pending = self.ledger.pending_claims(&native).await?;
                if pending.first().map(String::as_str) == Some(blockchain.as_str()) {
                    info!("pending claim created: {} -> {}", native, blockchain);
                    return Ok(ClaimResult::Accepted);
                }
                self.ledger.remove_pending_claim(&native, &blockchain).await?;
            } else if self.ledger.has_pending_claim_for(&native, &blockchain).await? {
                // Lost the conditional create to a concurrent submission
                // of the same pair
                return Ok(ClaimResult::Accepted);
            }
        }

        Ok(ClaimResult::InvalidOwner)
    }

    /// Promote the pending claim; invoked by the first deposit into
    /// `native_address`
    pub async fn confirm(&self, native_address: &str) -> BridgeResult<bool> {
        self.ledger.confirm_claim(native_address).await
    }
}
