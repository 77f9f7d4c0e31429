// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::BridgeResult;
use crate::types::normalize_address;
use async_trait::async_trait;
use std::collections::HashMap;

/// Wallets barred from claiming. A hit returns the operator-facing alias.
#[async_trait]
pub trait Blacklist: Send + Sync {
    async fn lookup(&self, native_address: &str) -> BridgeResult<Option<String>>;
}

/// Blacklist backed by the configured entries
pub struct StaticBlacklist {
    entries: HashMap<String, String>,
}

impl StaticBlacklist {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(address, alias)| (normalize_address(&address), alias))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Blacklist for StaticBlacklist {
    async fn lookup(&self, native_address: &str) -> BridgeResult<Option<String>> {
        Ok(self.entries.get(&normalize_address(native_address)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_is_normalized() {
        let blacklist = StaticBlacklist::new(vec![(
            "BAN_BAD".to_string(),
            "known mixer".to_string(),
        )]);
        assert_eq!(
            blacklist.lookup("ban_bad").await.unwrap(),
            Some("known mixer".to_string())
        );
        assert_eq!(blacklist.lookup("ban_good").await.unwrap(), None);
    }
}
