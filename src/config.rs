// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::clients::{BananoRpcClient, EvmSignatureVerifier, StaticBlacklist, WbanContractClient};
use crate::scanner::ScannerConfig;
use crate::store::{KvStore, RedisKvStore};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BanConfig {
    // Rpc url of the Banano node, wallet-enabled, used for balances,
    // sends and pocketing deposits.
    pub node_rpc_url: String,
    // Wallet id holding the hot wallet account.
    pub wallet_id: String,
    // The hot wallet address user withdrawals are paid from.
    pub hot_wallet: String,
    #[serde(default = "default_receive_poll_secs")]
    pub receive_poll_secs: u64,
    // Delay before a pending withdrawal retries against the hot wallet.
    #[serde(default = "default_pending_retry_secs")]
    pub pending_withdrawal_retry_secs: u64,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WbanConfig {
    // Rpc url of an EVM fullnode on the chain carrying the wBAN contract.
    pub evm_rpc_url: String,
    // The wBAN token contract address.
    pub contract_address: String,
    // Hex private key signing mint receipts; must match the contract's
    // expected signer.
    pub receipt_signer_key: String,
    // Block explorer base url, e.g. https://bscscan.com
    pub explorer_url: String,
    // First block to scan when no checkpoint exists yet.
    pub starting_block: u64,
    #[serde(default = "default_safety_depth")]
    pub safety_depth: u64,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlacklistEntry {
    pub address: String,
    pub alias: String,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeNodeConfig {
    pub redis_url: String,
    // The port for the metrics server.
    pub metrics_port: u16,
    pub ban: BanConfig,
    pub wban: WbanConfig,
    #[serde(default)]
    pub blacklist: Vec<BlacklistEntry>,
}

fn default_receive_poll_secs() -> u64 {
    5
}

fn default_pending_retry_secs() -> u64 {
    60
}

fn default_safety_depth() -> u64 {
    12
}

fn default_poll_secs() -> u64 {
    15
}

fn default_max_block_range() -> u64 {
    1000
}

/// Clients and store built from a validated config
pub struct ValidatedConfig {
    pub kv: Arc<dyn KvStore>,
    pub ban_client: Arc<BananoRpcClient>,
    pub wban_client: Arc<WbanContractClient>,
    pub verifier: Arc<EvmSignatureVerifier>,
    pub blacklist: Arc<StaticBlacklist>,
}

impl BridgeNodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {:?}", path))?;
        serde_yaml::from_str(&raw).with_context(|| format!("failed to parse config {:?}", path))
    }

    pub async fn validate(&self) -> anyhow::Result<ValidatedConfig> {
        info!("Starting config validation");

        let kv = RedisKvStore::connect(&self.redis_url)
            .await
            .context("could not reach the key-value store")?;

        let ban_client = Arc::new(BananoRpcClient::new(
            &self.ban.node_rpc_url,
            &self.ban.wallet_id,
            &self.ban.hot_wallet,
            Duration::from_secs(self.ban.receive_poll_secs),
        ));

        let wban_client = Arc::new(
            WbanContractClient::new(
                &self.wban.evm_rpc_url,
                &self.wban.contract_address,
                &self.wban.receipt_signer_key,
            )
            .context("could not build the wBAN contract client")?,
        );

        let blacklist = Arc::new(StaticBlacklist::new(
            self.blacklist
                .iter()
                .map(|entry| (entry.address.clone(), entry.alias.clone())),
        ));

        info!("Config validation complete");
        Ok(ValidatedConfig {
            kv: Arc::new(kv),
            ban_client,
            wban_client,
            verifier: Arc::new(EvmSignatureVerifier),
            blacklist,
        })
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            poll_interval: Duration::from_secs(self.wban.poll_secs),
            safety_depth: self.wban.safety_depth,
            max_block_range: self.wban.max_block_range,
            ..ScannerConfig::default()
        }
    }
}
