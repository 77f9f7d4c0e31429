// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Native-coin node client.
//!
//! Deposits arrive as receivable blocks on the hot wallet; the poller
//! pockets them and emits `DepositEvent`s. Amounts cross this boundary in
//! ledger base units; conversion to the node's raw unit happens here.

use crate::error::{BridgeError, BridgeResult};
use crate::types::{now_ms, DepositEvent};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Banano raw is 10^29 per BAN; the ledger uses 10^18 base units per BAN
pub const RAW_PER_BASE_UNIT: u128 = 100_000_000_000;

#[async_trait]
pub trait BanWalletClient: Send + Sync {
    /// Confirmed balance of `address`, in ledger base units
    async fn balance(&self, address: &str) -> BridgeResult<u128>;

    /// Send `amount` base units from the hot wallet; returns the block hash
    async fn send(&self, to: &str, amount: u128) -> BridgeResult<String>;
}

/// JSON-RPC client against a Banano node with wallet support
pub struct BananoRpcClient {
    http: reqwest::Client,
    node_url: String,
    wallet_id: String,
    hot_wallet: String,
    receive_poll_interval: Duration,
}

impl BananoRpcClient {
    pub fn new(
        node_url: impl Into<String>,
        wallet_id: impl Into<String>,
        hot_wallet: impl Into<String>,
        receive_poll_interval: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            node_url: node_url.into(),
            wallet_id: wallet_id.into(),
            hot_wallet: hot_wallet.into(),
            receive_poll_interval,
        }
    }

    async fn rpc(&self, payload: Value) -> BridgeResult<Value> {
        let response = self
            .http
            .post(&self.node_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BridgeError::UpstreamChainFailure(format!("node unreachable: {}", e)))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::UpstreamChainFailure(format!("bad node response: {}", e)))?;
        if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
            return Err(BridgeError::UpstreamChainFailure(format!(
                "node error: {}",
                error
            )));
        }
        Ok(body)
    }

    /// Spawn the receivable poller; deposits land on the returned channel
    pub fn subscribe_deposits(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<DepositEvent> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.clone();
        tokio::spawn(async move {
            client.receive_loop(tx, cancel).await;
        });
        rx
    }

    async fn receive_loop(&self, tx: mpsc::Sender<DepositEvent>, cancel: CancellationToken) {
        info!(
            "watching receivable deposits on {} every {:?}",
            self.hot_wallet, self.receive_poll_interval
        );
        let mut interval = time::interval(self.receive_poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("deposit poller cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.pump_receivables(&tx).await {
                        warn!("receivable poll failed: {}", e);
                    }
                }
            }
        }
    }

    async fn pump_receivables(&self, tx: &mpsc::Sender<DepositEvent>) -> BridgeResult<()> {
        let body = self
            .rpc(json!({
                "action": "receivable",
                "account": self.hot_wallet,
                "source": "true",
                "count": "100",
            }))
            .await?;
        // An empty result comes back as "" rather than {}
        let Some(blocks) = body.get("blocks").and_then(|b| b.as_object()) else {
            return Ok(());
        };
        for (hash, info) in blocks {
            let source = info.get("source").and_then(|v| v.as_str()).unwrap_or("");
            let raw: u128 = info
                .get("amount")
                .and_then(|v| v.as_str())
                .unwrap_or("0")
                .parse()
                .unwrap_or(0);
            if source.is_empty() || raw == 0 {
                warn!("skipping malformed receivable block {}", hash);
                continue;
            }
            // Pocket the block so it stops showing up as receivable
            self.rpc(json!({
                "action": "receive",
                "wallet": self.wallet_id,
                "account": self.hot_wallet,
                "block": hash,
            }))
            .await?;
            debug!("received deposit {} from {} ({} raw)", hash, source, raw);
            let event = DepositEvent {
                from: source.to_string(),
                amount: raw / RAW_PER_BASE_UNIT,
                hash: hash.clone(),
                timestamp_ms: now_ms(),
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BanWalletClient for BananoRpcClient {
    async fn balance(&self, address: &str) -> BridgeResult<u128> {
        let body = self
            .rpc(json!({"action": "account_balance", "account": address}))
            .await?;
        let raw: u128 = body
            .get("balance")
            .and_then(|v| v.as_str())
            .unwrap_or("0")
            .parse()
            .map_err(|e| BridgeError::UpstreamChainFailure(format!("bad balance: {}", e)))?;
        Ok(raw / RAW_PER_BASE_UNIT)
    }

    async fn send(&self, to: &str, amount: u128) -> BridgeResult<String> {
        let raw = amount.checked_mul(RAW_PER_BASE_UNIT).ok_or_else(|| {
            BridgeError::InvalidAmount(format!("{} base units overflows raw", amount))
        })?;
        let result = self
            .rpc(json!({
                "action": "send",
                "wallet": self.wallet_id,
                "source": self.hot_wallet,
                "destination": to,
                "amount": raw.to_string(),
            }))
            .await;
        match result {
            Ok(body) => body
                .get("block")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    BridgeError::UpstreamChainFailure("send returned no block hash".to_string())
                }),
            // The hot-wallet balance check races with other spenders; a
            // refusal here flows into the pending-withdrawal path
            Err(BridgeError::UpstreamChainFailure(msg))
                if msg.to_lowercase().contains("insufficient") =>
            {
                Err(BridgeError::InsufficientHotWallet {
                    available: 0,
                    requested: amount,
                })
            }
            Err(e) => Err(e),
        }
    }
}
