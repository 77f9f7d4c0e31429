// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wban_bridge::config::BridgeNodeConfig;
use wban_bridge::metrics::{start_metrics_server, BridgeMetrics};
use wban_bridge::node::{BridgeNode, NodeConfig};

#[derive(Parser)]
#[command(name = "wban-bridge")]
#[command(about = "Custodial core of the BAN <-> wBAN bridge", long_about = None)]
struct Args {
    /// Path to the node config file
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = BridgeNodeConfig::load(&args.config)?;

    let registry = prometheus::Registry::new();
    let metrics = Arc::new(BridgeMetrics::new(&registry));

    let validated = config.validate().await?;
    let cancel = CancellationToken::new();
    let deposits = validated.ban_client.subscribe_deposits(cancel.clone());

    let node = Arc::new(BridgeNode::new(
        validated.kv,
        validated.ban_client,
        validated.wban_client,
        validated.verifier,
        validated.blacklist,
        metrics,
        NodeConfig {
            hot_wallet: config.ban.hot_wallet.clone(),
            evm_explorer_url: config.wban.explorer_url.clone(),
            starting_block: config.wban.starting_block,
            pending_withdrawal_retry_delay: Duration::from_secs(
                config.ban.pending_withdrawal_retry_secs,
            ),
            scanner: config.scanner_config(),
        },
    ));

    let mut handles = node.start(deposits, cancel.clone());
    handles.push(start_metrics_server(registry, config.metrics_port).await?);
    info!("bridge node started");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
