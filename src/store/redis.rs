// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Production `KvStore` backed by Redis.
//!
//! `WriteBatch` maps to a MULTI/EXEC pipeline, `del_if_eq` to a
//! compare-and-delete script, prefix scans to `SCAN MATCH`. The key
//! layout in `store::keys` is the compatibility contract with the data
//! already in the store.

use crate::error::{BridgeError, BridgeResult};
use crate::store::kv::{KvStore, WriteBatch, WriteOp};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

const DEL_IF_EQ_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

fn storage_err(e: redis::RedisError) -> BridgeError {
    BridgeError::StorageError(e.to_string())
}

pub struct RedisKvStore {
    manager: ConnectionManager,
    del_if_eq: redis::Script,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> BridgeResult<Self> {
        let client = redis::Client::open(url).map_err(storage_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(storage_err)?;
        Ok(Self {
            manager,
            del_if_eq: redis::Script::new(DEL_IF_EQ_SCRIPT),
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> BridgeResult<Option<String>> {
        let mut con = self.connection();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> BridgeResult<bool> {
        let mut con = self.connection();
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut con)
            .await
            .map_err(storage_err)?;
        Ok(reply.is_some())
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> BridgeResult<bool> {
        let mut con = self.connection();
        let deleted: i64 = self
            .del_if_eq
            .key(key)
            .arg(expected)
            .invoke_async(&mut con)
            .await
            .map_err(storage_err)?;
        Ok(deleted > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> BridgeResult<Vec<String>> {
        let mut con = self.connection();
        let pattern = format!("{}*", prefix);
        let mut keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<String> =
                con.scan_match(&pattern).await.map_err(storage_err)?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn zscore(&self, key: &str, member: &str) -> BridgeResult<Option<i64>> {
        let mut con = self.connection();
        redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> BridgeResult<Vec<(String, i64)>> {
        let mut con = self.connection();
        redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .arg("WITHSCORES")
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> BridgeResult<Vec<(String, i64)>> {
        let mut con = self.connection();
        redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(start as i64)
            .arg(stop as i64)
            .arg("WITHSCORES")
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn smembers(&self, key: &str) -> BridgeResult<Vec<String>> {
        let mut con = self.connection();
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn hgetall(&self, key: &str) -> BridgeResult<HashMap<String, String>> {
        let mut con = self.connection();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(storage_err)
    }

    async fn exec(&self, batch: WriteBatch) -> BridgeResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut con = self.connection();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &batch.ops {
            match op {
                WriteOp::Set { key, value } => {
                    pipe.cmd("SET").arg(key).arg(value).ignore();
                }
                WriteOp::Del { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                WriteOp::ZAdd { key, member, score } => {
                    pipe.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
                }
                WriteOp::ZRem { key, member } => {
                    pipe.cmd("ZREM").arg(key).arg(member).ignore();
                }
                WriteOp::SAdd { key, member } => {
                    pipe.cmd("SADD").arg(key).arg(member).ignore();
                }
                WriteOp::HSet { key, fields } => {
                    let cmd = pipe.cmd("HSET").arg(key);
                    for (field, value) in fields {
                        cmd.arg(field).arg(value);
                    }
                    cmd.ignore();
                }
            }
        }
        pipe.query_async::<_, ()>(&mut con)
            .await
            .map_err(storage_err)
    }
}
