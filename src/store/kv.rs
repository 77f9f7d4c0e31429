// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Key-value store abstraction.
//!
//! The ledger, lock manager and work queue are written against this seam;
//! `MemoryKvStore` backs tests and single-node runs, `RedisKvStore` backs
//! production. A `WriteBatch` executes all-or-nothing: either every write
//! in it becomes visible or none does.

use crate::error::BridgeResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// A single write inside an atomic batch
#[derive(Debug, Clone)]
pub enum WriteOp {
    Set {
        key: String,
        value: String,
    },
    Del {
        key: String,
    },
    ZAdd {
        key: String,
        member: String,
        score: i64,
    },
    ZRem {
        key: String,
        member: String,
    },
    SAdd {
        key: String,
        member: String,
    },
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
}

/// An ordered set of writes committed atomically
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub(crate) ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Del { key: key.into() });
        self
    }

    pub fn zadd(mut self, key: impl Into<String>, member: impl Into<String>, score: i64) -> Self {
        self.ops.push(WriteOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    pub fn zrem(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(WriteOp::ZRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn sadd(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(WriteOp::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn hset(mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        self.ops.push(WriteOp::HSet {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Store primitives the bridge core needs: strings with optional TTL,
/// sorted sequences with integer scores, sets, hashes, prefix scans and
/// atomic multi-writes.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> BridgeResult<Option<String>>;

    /// Set `key` only if absent, with a TTL. Returns whether the write won.
    /// This is the primitive behind advisory locks and pending claims.
    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> BridgeResult<bool>;

    /// Delete `key` only if it still holds `expected` (lock release)
    async fn del_if_eq(&self, key: &str, expected: &str) -> BridgeResult<bool>;

    /// All live keys starting with `prefix`, any type
    async fn scan_prefix(&self, prefix: &str) -> BridgeResult<Vec<String>>;

    async fn zscore(&self, key: &str, member: &str) -> BridgeResult<Option<i64>>;

    /// Members with `min <= score <= max`, ascending by (score, member)
    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> BridgeResult<Vec<(String, i64)>>;

    /// Members by descending (score, member); `start`/`stop` are inclusive
    /// indices, negative counts from the end
    async fn zrevrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> BridgeResult<Vec<(String, i64)>>;

    async fn smembers(&self, key: &str) -> BridgeResult<Vec<String>>;

    async fn hgetall(&self, key: &str) -> BridgeResult<HashMap<String, String>>;

    /// Commit the batch all-or-nothing
    async fn exec(&self, batch: WriteBatch) -> BridgeResult<()>;
}
