// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain types shared across the bridge core: operation payloads, job
//! envelopes, chain events, history entries and the canonical signature
//! messages users sign.

use crate::error::{BridgeError, BridgeResult};
use ethers::utils::{format_units, parse_units, ParseUnits};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Ledger base units per BAN (18 decimals, matching wBAN on the EVM side)
pub const BAN_DECIMALS: u32 = 18;

/// Block explorer for the native chain
pub const NATIVE_EXPLORER_URL: &str = "https://creeper.banano.cc/explorer/block/";

/// Canonical form of an address used for comparisons and key segments.
///
/// Every code path that compares a raw input to a stored value must go
/// through this first; keys are always built from the canonical form.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Parse a human-readable BAN amount ("1.5") into base units.
///
/// Negative amounts are rejected here; zero is left to the caller since
/// the state machines differ on it.
pub fn parse_ban_amount(amount: &str) -> BridgeResult<u128> {
    let parsed = parse_units(amount.trim(), BAN_DECIMALS)
        .map_err(|e| BridgeError::InvalidAmount(format!("{}: {}", amount, e)))?;
    match parsed {
        ParseUnits::U256(value) => {
            if value > ethers::types::U256::from(u128::MAX) {
                return Err(BridgeError::InvalidAmount(format!(
                    "{} exceeds the representable range",
                    amount
                )));
            }
            Ok(value.as_u128())
        }
        ParseUnits::I256(_) => Err(BridgeError::InvalidAmount(format!(
            "negative amount {}",
            amount
        ))),
    }
}

/// Format base units back into a human-readable BAN amount ("1.5")
pub fn format_ban_amount(amount: u128) -> String {
    let formatted = format_units(ethers::types::U256::from(amount), BAN_DECIMALS)
        .unwrap_or_else(|_| "0".to_string());
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Canonical message signed for a withdrawal request
pub fn withdrawal_message(amount: &str, native_address: &str) -> String {
    format!("Withdraw {} BAN to my wallet \"{}\"", amount, native_address)
}

/// Canonical message signed for a BAN -> wBAN swap request
pub fn swap_to_wban_message(amount: &str, native_address: &str) -> String {
    format!(
        "Swap {} BAN for wBAN with BAN I deposited from my wallet \"{}\"",
        amount, native_address
    )
}

/// Canonical message signed to claim a native address
pub fn claim_message(native_address: &str) -> String {
    format!(
        "I hereby claim that the BAN address \"{}\" is mine",
        native_address
    )
}

/// A withdrawal request as submitted by the edge.
///
/// `amount` stays a string: the signature covers the exact characters the
/// user typed, and parsing happens during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub native_address: String,
    pub blockchain_address: String,
    pub amount: String,
    pub timestamp_ms: i64,
    pub signature: String,
}

/// A BAN -> wBAN swap request as submitted by the edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapToWbanRequest {
    pub native_address: String,
    pub blockchain_address: String,
    pub amount: String,
    pub timestamp_ms: i64,
    pub signature: String,
    /// Consume the one-time operator-sponsored swap allowance
    #[serde(default)]
    pub gasless: bool,
}

/// Operation payloads carried by queue jobs.
///
/// The serialized `kind` tags are part of the durable queue format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Operation {
    NativeWithdrawal {
        native_address: String,
        blockchain_address: String,
        amount: String,
        timestamp_ms: i64,
        signature: String,
        /// 0 for the original request, incremented on each pending-funds successor
        attempt: u32,
    },
    SwapToWban {
        native_address: String,
        blockchain_address: String,
        amount: String,
        timestamp_ms: i64,
        signature: String,
        gasless: bool,
    },
    SwapToBan {
        blockchain_address: String,
        native_address: String,
        amount: String,
        hash: String,
        event_timestamp_seconds: i64,
        wban_balance: String,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::NativeWithdrawal { .. } => "native-withdrawal",
            Operation::SwapToWban { .. } => "swap-to-wban",
            Operation::SwapToBan { .. } => "swap-to-ban",
        }
    }

    /// The serialization group: all jobs for one native address run one at a time
    pub fn group(&self) -> String {
        match self {
            Operation::NativeWithdrawal { native_address, .. }
            | Operation::SwapToWban { native_address, .. }
            | Operation::SwapToBan { native_address, .. } => normalize_address(native_address),
        }
    }
}

/// A durable queue job wrapping an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Earliest time the job may be dispatched (ms since epoch)
    pub ready_at_ms: i64,
    /// Operational-error retries consumed so far
    pub retries: u32,
    pub operation: Operation,
}

impl Job {
    pub fn new(operation: Operation) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ready_at_ms: now_ms(),
            retries: 0,
            operation,
        }
    }

    pub fn delayed(operation: Operation, delay_ms: i64) -> Self {
        let mut job = Self::new(operation);
        job.ready_at_ms += delay_ms;
        job
    }
}

/// What a completed job hands back to its submitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Withdrawal(WithdrawalOutcome),
    SwapToWban(MintReceipt),
    SwapToBan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalOutcome {
    /// The native send went out. An empty hash means the hot wallet was
    /// still underfunded on the final attempt and the request was dropped.
    Sent { hash: String },
    /// Hot wallet underfunded; a delayed successor job was enqueued
    Pending,
}

/// Signed mint authorization returned by a BAN -> wBAN swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub receipt: String,
    pub uuid: String,
    pub wban_balance: u128,
}

/// Result of a claim submission. Ordering of the checks that produce
/// these is part of the contract (see `claims`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    Accepted,
    AlreadyDone,
    InvalidSignature,
    InvalidOwner,
    Blacklisted,
}

/// A deposit observed on the native chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    pub from: String,
    pub amount: u128,
    pub hash: String,
    pub timestamp_ms: i64,
}

/// Events extracted from the wBAN contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WbanEvent {
    /// wBAN burned for BAN; becomes a swap-to-ban job
    Redemption {
        blockchain_address: String,
        native_address: String,
        /// Human-readable, e.g. "1.5"; the handler parses to base units
        amount: String,
        hash: String,
        timestamp_seconds: i64,
        wban_balance: String,
    },
    /// Mint receipt redeemed on chain; tracked for metrics only
    Mint {
        blockchain_address: String,
        amount: u128,
        hash: String,
    },
}

/// Ledger record for a chain-originated wBAN -> BAN redemption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapToBanRecord {
    pub blockchain_address: String,
    pub native_address: String,
    pub amount: u128,
    pub hash: String,
    pub timestamp_ms: i64,
}

/// One entry of an account's history, hydrated from the audit store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub kind: String,
    /// Base units, decimal string
    pub amount: String,
    pub timestamp_ms: i64,
    /// Transaction hash or mint receipt
    pub reference: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountHistory {
    pub deposits: Vec<HistoryEntry>,
    pub withdrawals: Vec<HistoryEntry>,
    pub swaps: Vec<HistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ban_amount() {
        assert_eq!(parse_ban_amount("1.5").unwrap(), 1_500_000_000_000_000_000);
        assert_eq!(parse_ban_amount("0").unwrap(), 0);
        assert_eq!(
            parse_ban_amount("500").unwrap(),
            500_000_000_000_000_000_000
        );
        assert!(parse_ban_amount("-1").is_err());
        assert!(parse_ban_amount("not a number").is_err());
    }

    #[test]
    fn test_format_ban_amount() {
        assert_eq!(format_ban_amount(1_500_000_000_000_000_000), "1.5");
        assert_eq!(format_ban_amount(0), "0");
        assert_eq!(format_ban_amount(2_000_000_000_000_000_000), "2");
        assert_eq!(format_ban_amount(1), "0.000000000000000001");
    }

    #[test]
    fn test_parse_format_round_trip() {
        for human in ["1.5", "0.19", "123456.789"] {
            let base = parse_ban_amount(human).unwrap();
            assert_eq!(format_ban_amount(base), human);
        }
    }

    #[test]
    fn test_canonical_messages() {
        // These literals are what wallets sign; they must never drift
        assert_eq!(
            withdrawal_message("1.5", "ban_1abc"),
            "Withdraw 1.5 BAN to my wallet \"ban_1abc\""
        );
        assert_eq!(
            swap_to_wban_message("10", "ban_1abc"),
            "Swap 10 BAN for wBAN with BAN I deposited from my wallet \"ban_1abc\""
        );
        assert_eq!(
            claim_message("ban_1abc"),
            "I hereby claim that the BAN address \"ban_1abc\" is mine"
        );
    }

    #[test]
    fn test_operation_kind_tags() {
        let op = Operation::NativeWithdrawal {
            native_address: "ban_a".to_string(),
            blockchain_address: "0xb".to_string(),
            amount: "1".to_string(),
            timestamp_ms: 1,
            signature: "s".to_string(),
            attempt: 0,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "native-withdrawal");
        assert_eq!(op.kind(), "native-withdrawal");

        let op = Operation::SwapToBan {
            blockchain_address: "0xb".to_string(),
            native_address: "ban_a".to_string(),
            amount: "1.5".to_string(),
            hash: "h".to_string(),
            event_timestamp_seconds: 10,
            wban_balance: "0".to_string(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "swap-to-ban");
    }

    #[test]
    fn test_job_round_trip() {
        let job = Job::new(Operation::SwapToWban {
            native_address: "BAN_A".to_string(),
            blockchain_address: "0xB".to_string(),
            amount: "3".to_string(),
            timestamp_ms: 42,
            signature: "s".to_string(),
            gasless: false,
        });
        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.operation.group(), "ban_a");
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("  BAN_1ABC "), "ban_1abc");
        assert_eq!(
            normalize_address("0xDEADBEEF00000000000000000000000000000000"),
            "0xdeadbeef00000000000000000000000000000000"
        );
    }
}
