// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Error type for bridge operations.
///
/// Validation errors surface synchronously to the submitter. Operational
/// errors (`LockTimeout`, `UpstreamChainFailure`) are retried by the work
/// queue. `StoreTransactionFailure` after a successful chain send is fatal
/// for the job: replaying it would double-spend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("a different blockchain wallet already has a pending claim for {0}")]
    InvalidOwner(String),

    #[error("wallet {0} has no confirmed claim")]
    NotClaimed(String),

    #[error("wallet {wallet} is blacklisted (alias: {alias})")]
    Blacklisted { wallet: String, alias: String },

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: u128, requested: u128 },

    #[error("hot wallet underfunded: available {available}, requested {requested}")]
    InsufficientHotWallet { available: u128, requested: u128 },

    #[error("duplicate request")]
    DuplicateRequest,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("could not acquire lock on {0}")]
    LockTimeout(String),

    #[error("store transaction failure: {0}")]
    StoreTransactionFailure(String),

    #[error("upstream chain failure: {0}")]
    UpstreamChainFailure(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("{0}")]
    Generic(String),
}

impl BridgeError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::InvalidSignature => "invalid_signature",
            BridgeError::InvalidOwner(_) => "invalid_owner",
            BridgeError::NotClaimed(_) => "not_claimed",
            BridgeError::Blacklisted { .. } => "blacklisted",
            BridgeError::InsufficientBalance { .. } => "insufficient_balance",
            BridgeError::InsufficientHotWallet { .. } => "insufficient_hot_wallet",
            BridgeError::DuplicateRequest => "duplicate_request",
            BridgeError::InvalidAmount(_) => "invalid_amount",
            BridgeError::LockTimeout(_) => "lock_timeout",
            BridgeError::StoreTransactionFailure(_) => "store_transaction_failure",
            BridgeError::UpstreamChainFailure(_) => "upstream_chain_failure",
            BridgeError::StorageError(_) => "storage_error",
            BridgeError::Generic(_) => "generic",
        }
    }

    /// Whether the work queue should re-run the job after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::LockTimeout(_) | BridgeError::UpstreamChainFailure(_)
        )
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
