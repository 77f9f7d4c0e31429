// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Advisory locks over the key-value store.
//!
//! A lease is a random token written with `SET NX PX`; release deletes
//! the key only while it still holds that token. The TTL reclaims leases
//! held by workers that died mid-flight. Acquisition retries a bounded
//! number of times with jitter, then fails with `LockTimeout`.

use crate::error::{BridgeError, BridgeResult};
use crate::store::keys;
use crate::store::KvStore;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Fraction of the TTL assumed lost to clock drift between store and workers
const DRIFT_FACTOR: f64 = 0.01;
const DEFAULT_RETRY_COUNT: u32 = 10;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// A held lock. Must be handed back to `LockManager::release`; the TTL is
/// the only other way out.
#[must_use = "a lease must be released"]
#[derive(Debug)]
pub struct Lease {
    resources: Vec<String>,
    token: String,
}

impl Lease {
    pub fn resources(&self) -> &[String] {
        &self.resources
    }
}

pub struct LockManager {
    kv: Arc<dyn KvStore>,
    retry_count: u32,
    retry_delay: Duration,
}

impl LockManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the retry budget (tests use a small one)
    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    /// Acquire all `resources` under one token, or fail with `LockTimeout`
    /// after the retry budget.
    pub async fn acquire(&self, resources: &[String], ttl: Duration) -> BridgeResult<Lease> {
        let token = uuid::Uuid::new_v4().to_string();

        for attempt in 0..self.retry_count {
            if attempt > 0 {
                let jitter = rand::thread_rng().gen_range(0..=self.retry_delay.as_millis() as u64);
                tokio::time::sleep(self.retry_delay + Duration::from_millis(jitter)).await;
            }

            let started = Instant::now();
            let mut acquired: Vec<String> = Vec::with_capacity(resources.len());
            let mut blocked = false;

            for resource in resources {
                match self.kv.set_nx_px(&keys::lock(resource), &token, ttl).await {
                    Ok(true) => acquired.push(resource.clone()),
                    Ok(false) => {
                        blocked = true;
                        break;
                    }
                    Err(e) => {
                        self.release_resources(&acquired, &token).await;
                        return Err(e);
                    }
                }
            }

            if blocked {
                self.release_resources(&acquired, &token).await;
                continue;
            }

            // The lease is only usable if enough validity remains after
            // acquisition latency and assumed clock drift.
            let drift = Duration::from_secs_f64(ttl.as_secs_f64() * DRIFT_FACTOR)
                + Duration::from_millis(2);
            if started.elapsed() + drift < ttl {
                return Ok(Lease {
                    resources: resources.to_vec(),
                    token,
                });
            }
            self.release_resources(resources, &token).await;
        }

        Err(BridgeError::LockTimeout(resources.join(",")))
    }

    /// Release a lease. Safe to call after the TTL fired: the token check
    /// means a lock re-acquired by someone else is left alone.
    pub async fn release(&self, lease: Lease) {
        self.release_resources(&lease.resources, &lease.token).await;
    }

    async fn release_resources(&self, resources: &[String], token: &str) {
        for resource in resources {
            if let Err(e) = self.kv.del_if_eq(&keys::lock(resource), token).await {
                warn!("failed to release lock {}: {}", resource, e);
            }
        }
    }
}
