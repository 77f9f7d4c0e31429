// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persisted key layout. The exact shapes are a compatibility contract
//! with existing deployments; address segments are always canonical
//! lowercase (see `types::normalize_address`).

/// Highest fully-processed EVM block
pub const LAST_PROCESSED_BLOCK: &str = "blockchain:blocks:latest";

/// Prefix of the per-account durable job queues
pub const QUEUE_JOBS_PREFIX: &str = "queue:jobs:";

pub fn balance(native_address: &str) -> String {
    format!("ban-balance:{}", native_address)
}

pub fn deposits(native_address: &str) -> String {
    format!("deposits:{}", native_address)
}

pub fn withdrawals(native_address: &str) -> String {
    format!("withdrawals:{}", native_address)
}

pub fn swaps_ban_to_wban(native_address: &str) -> String {
    format!("swaps:ban-to-wban:{}", native_address)
}

pub fn swaps_wban_to_ban(blockchain_address: &str) -> String {
    format!("swaps:wban-to-ban:{}", blockchain_address)
}

pub fn gasless(native_address: &str) -> String {
    format!("swaps:gasless:{}", native_address)
}

pub fn audit(reference: &str) -> String {
    format!("audit:{}", reference)
}

pub fn pending_claim(native_address: &str, blockchain_address: &str) -> String {
    format!("claims:pending:{}:{}", native_address, blockchain_address)
}

pub fn pending_claim_prefix(native_address: &str) -> String {
    format!("claims:pending:{}:", native_address)
}

pub fn claim(native_address: &str, blockchain_address: &str) -> String {
    format!("claims:{}:{}", native_address, blockchain_address)
}

pub fn claim_prefix(native_address: &str) -> String {
    format!("claims:{}:", native_address)
}

pub fn claims_by_blockchain(blockchain_address: &str) -> String {
    format!("claims:by-blockchain:{}", blockchain_address)
}

pub fn lock(resource: &str) -> String {
    format!("locks:{}", resource)
}

pub fn queue_jobs(native_address: &str) -> String {
    format!("{}{}", QUEUE_JOBS_PREFIX, native_address)
}

/// Lock resource protecting an account's balance and its record sequences
pub fn balance_lock(native_address: &str) -> String {
    format!("balance:{}", native_address)
}

/// Lock resource protecting BAN -> wBAN swap commits for an account
pub fn swap_lock(native_address: &str) -> String {
    format!("swaps:ban-to-wban:{}", native_address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout_is_stable() {
        // Bit-exact layout: existing deployments depend on these shapes
        assert_eq!(balance("ban_a"), "ban-balance:ban_a");
        assert_eq!(deposits("ban_a"), "deposits:ban_a");
        assert_eq!(withdrawals("ban_a"), "withdrawals:ban_a");
        assert_eq!(swaps_ban_to_wban("ban_a"), "swaps:ban-to-wban:ban_a");
        assert_eq!(swaps_wban_to_ban("0xb"), "swaps:wban-to-ban:0xb");
        assert_eq!(gasless("ban_a"), "swaps:gasless:ban_a");
        assert_eq!(audit("h1"), "audit:h1");
        assert_eq!(pending_claim("ban_a", "0xb"), "claims:pending:ban_a:0xb");
        assert_eq!(claim("ban_a", "0xb"), "claims:ban_a:0xb");
        assert_eq!(claims_by_blockchain("0xb"), "claims:by-blockchain:0xb");
        assert_eq!(LAST_PROCESSED_BLOCK, "blockchain:blocks:latest");
        assert_eq!(lock("balance:ban_a"), "locks:balance:ban_a");
        assert_eq!(queue_jobs("ban_a"), "queue:jobs:ban_a");
    }
}
