// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! wBAN -> BAN redemption: chain-originated credit. Duplicate event
//! delivery is tolerated by the membership re-check the ledger performs
//! inside the balance lock.

use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;
use crate::store::LedgerStore;
use crate::types::{parse_ban_amount, SwapToBanRecord};
use std::sync::Arc;
use tracing::info;

pub struct SwapToBanProcessor {
    ledger: Arc<LedgerStore>,
    metrics: Arc<BridgeMetrics>,
}

impl SwapToBanProcessor {
    pub fn new(ledger: Arc<LedgerStore>, metrics: Arc<BridgeMetrics>) -> Self {
        Self { ledger, metrics }
    }

    pub async fn handle(
        &self,
        blockchain_address: &str,
        native_address: &str,
        amount: &str,
        hash: &str,
        event_timestamp_seconds: i64,
    ) -> BridgeResult<()> {
        if native_address.trim().is_empty() {
            return Err(BridgeError::Generic(format!(
                "redemption {} carries an empty BAN wallet; contract invariant violated",
                hash
            )));
        }

        let value = parse_ban_amount(amount)?;
        let record = SwapToBanRecord {
            blockchain_address: blockchain_address.to_string(),
            native_address: native_address.to_string(),
            amount: value,
            hash: hash.to_string(),
            timestamp_ms: event_timestamp_seconds * 1000,
        };

        let credited = self.ledger.store_swap_to_ban(&record).await?;
        if credited {
            self.metrics.swaps_to_ban_total.inc();
            info!(
                "credited {} BAN to {} from redemption {}",
                amount, native_address, hash
            );
        } else {
            self.metrics.duplicate_chain_events.inc();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Fixture;

    #[tokio::test]
    async fn test_double_delivery_credits_once() {
        let fx = Fixture::new().await;

        for _ in 0..2 {
            fx.swap_to_ban()
                .handle("0xB", "ban_a", "1.5", "h4", 10)
                .await
                .unwrap();
        }

        assert_eq!(
            fx.ledger.get_balance("ban_a").await.unwrap(),
            1_500_000_000_000_000_000
        );
        // Score is the event timestamp in ms
        assert_eq!(fx.kv.zscore("swaps:wban-to-ban:0xb", "h4").await.unwrap(), Some(10_000));
        let audit = fx.kv.hgetall("audit:h4").await.unwrap();
        assert_eq!(audit.get("type"), Some(&"swap-to-ban".to_string()));
    }

    #[tokio::test]
    async fn test_rejects_empty_ban_wallet() {
        let fx = Fixture::new().await;
        let err = fx
            .swap_to_ban()
            .handle("0xB", "  ", "1.5", "h4", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Generic(_)));
        assert!(!fx.ledger.contains_swap_to_ban("0xb", "h4").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_unparseable_amount() {
        let fx = Fixture::new().await;
        let err = fx
            .swap_to_ban()
            .handle("0xB", "ban_a", "-1.5", "h4", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidAmount(_)));
    }
}
