// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    pub(crate) deposits_total: IntCounter,
    pub(crate) withdrawals_total: IntCounter,
    pub(crate) swaps_to_wban_total: IntCounter,
    pub(crate) swaps_to_ban_total: IntCounter,
    pub(crate) duplicate_chain_events: IntCounter,
    pub(crate) mint_events_total: IntCounter,
    pub(crate) queue_jobs_total: IntCounterVec,
    pub(crate) job_errors: IntCounterVec,
    pub(crate) pending_withdrawals_ban: IntGauge,
    pub(crate) last_processed_block: IntGauge,
}

impl BridgeMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            deposits_total: register_int_counter_with_registry!(
                "bridge_deposits_total",
                "Total number of BAN deposits credited to the ledger",
                registry,
            )
            .unwrap(),
            withdrawals_total: register_int_counter_with_registry!(
                "bridge_withdrawals_total",
                "Total number of BAN withdrawals sent and recorded",
                registry,
            )
            .unwrap(),
            swaps_to_wban_total: register_int_counter_with_registry!(
                "bridge_swaps_to_wban_total",
                "Total number of mint receipts issued",
                registry,
            )
            .unwrap(),
            swaps_to_ban_total: register_int_counter_with_registry!(
                "bridge_swaps_to_ban_total",
                "Total number of wBAN redemptions credited",
                registry,
            )
            .unwrap(),
            duplicate_chain_events: register_int_counter_with_registry!(
                "bridge_duplicate_chain_events",
                "Chain events skipped because they were already processed",
                registry,
            )
            .unwrap(),
            mint_events_total: register_int_counter_with_registry!(
                "bridge_mint_events_total",
                "Mint events observed on the wBAN contract",
                registry,
            )
            .unwrap(),
            queue_jobs_total: register_int_counter_vec_with_registry!(
                "bridge_queue_jobs_total",
                "Queue jobs by kind and terminal status",
                &["kind", "status"],
                registry,
            )
            .unwrap(),
            job_errors: register_int_counter_vec_with_registry!(
                "bridge_job_errors",
                "Job failures by kind and error type",
                &["kind", "error_type"],
                registry,
            )
            .unwrap(),
            pending_withdrawals_ban: register_int_gauge_with_registry!(
                "bridge_pending_withdrawals_ban",
                "Summed amount (whole BAN) of withdrawals waiting on the hot wallet",
                registry,
            )
            .unwrap(),
            last_processed_block: register_int_gauge_with_registry!(
                "bridge_last_processed_block",
                "Highest fully-processed EVM block",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Arc<Self> {
        Arc::new(Self::new(&Registry::new()))
    }
}

fn encode(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        error!("failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Serve the registry on `/metrics`
pub async fn start_metrics_server(
    registry: Registry,
    port: u16,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use axum::{routing::get, Router};

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move { encode(&registry) }
        }),
    );
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("metrics server listening on port {}", port);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("metrics server exited: {}", e);
        }
    }))
}
