// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-process `KvStore` used by tests and single-node runs.
//!
//! All namespaces live behind one `RwLock`, so a `WriteBatch` commits
//! under a single write guard and is trivially atomic. TTLs are checked
//! lazily on read.

use crate::error::BridgeResult;
use crate::store::kv::{KvStore, WriteBatch, WriteOp};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StringCell {
    value: String,
    expires_at: Option<Instant>,
}

impl StringCell {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, StringCell>,
    /// member -> score per key
    zsets: HashMap<String, BTreeMap<String, i64>>,
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl Inner {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::Set { key, value } => {
                self.strings.insert(
                    key,
                    StringCell {
                        value,
                        expires_at: None,
                    },
                );
            }
            WriteOp::Del { key } => {
                self.strings.remove(&key);
                self.zsets.remove(&key);
                self.sets.remove(&key);
                self.hashes.remove(&key);
            }
            WriteOp::ZAdd { key, member, score } => {
                self.zsets.entry(key).or_default().insert(member, score);
            }
            WriteOp::ZRem { key, member } => {
                if let Some(zset) = self.zsets.get_mut(&key) {
                    zset.remove(&member);
                    if zset.is_empty() {
                        self.zsets.remove(&key);
                    }
                }
            }
            WriteOp::SAdd { key, member } => {
                self.sets.entry(key).or_default().insert(member);
            }
            WriteOp::HSet { key, fields } => {
                let hash = self.hashes.entry(key).or_default();
                for (field, value) in fields {
                    hash.insert(field, value);
                }
            }
        }
    }
}

pub struct MemoryKvStore {
    inner: RwLock<Inner>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> BridgeResult<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .strings
            .get(key)
            .filter(|cell| cell.is_live())
            .map(|cell| cell.value.clone()))
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> BridgeResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.strings.get(key).map(|c| c.is_live()).unwrap_or(false) {
            return Ok(false);
        }
        inner.strings.insert(
            key.to_string(),
            StringCell {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> BridgeResult<bool> {
        let mut inner = self.inner.write().await;
        let matches = inner
            .strings
            .get(key)
            .map(|cell| cell.is_live() && cell.value == expected)
            .unwrap_or(false);
        if matches {
            inner.strings.remove(key);
        }
        Ok(matches)
    }

    async fn scan_prefix(&self, prefix: &str) -> BridgeResult<Vec<String>> {
        let inner = self.inner.read().await;
        let mut keys = BTreeSet::new();
        for (key, cell) in &inner.strings {
            if key.starts_with(prefix) && cell.is_live() {
                keys.insert(key.clone());
            }
        }
        for key in inner.zsets.keys().chain(inner.sets.keys()).chain(inner.hashes.keys()) {
            if key.starts_with(prefix) {
                keys.insert(key.clone());
            }
        }
        Ok(keys.into_iter().collect())
    }

    async fn zscore(&self, key: &str, member: &str) -> BridgeResult<Option<i64>> {
        let inner = self.inner.read().await;
        Ok(inner.zsets.get(key).and_then(|z| z.get(member).copied()))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> BridgeResult<Vec<(String, i64)>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<(String, i64)> = inner
            .zsets
            .get(key)
            .map(|z| {
                z.iter()
                    .filter(|(_, score)| min <= **score && **score <= max)
                    .map(|(member, score)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));
        Ok(entries)
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> BridgeResult<Vec<(String, i64)>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<(String, i64)> = inner
            .zsets
            .get(key)
            .map(|z| z.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| (b.1, &b.0).cmp(&(a.1, &a.0)));

        let len = entries.len() as isize;
        let resolve = |index: isize| -> isize {
            if index < 0 {
                (len + index).max(0)
            } else {
                index
            }
        };
        let from = resolve(start).min(len);
        let to = (resolve(stop) + 1).min(len);
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(entries[from as usize..to as usize].to_vec())
    }

    async fn smembers(&self, key: &str) -> BridgeResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hgetall(&self, key: &str) -> BridgeResult<HashMap<String, String>> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn exec(&self, batch: WriteBatch) -> BridgeResult<()> {
        let mut inner = self.inner.write().await;
        for op in batch.ops {
            inner.apply(op);
        }
        Ok(())
    }
}
