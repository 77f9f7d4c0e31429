// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::too_many_arguments, clippy::new_without_default)]

pub mod claims;
pub mod clients;
pub mod config;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod node;
pub mod processors;
pub mod queue;
pub mod scanner;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod test_utils;

/// Retry `$call` with exponential backoff (400ms doubling up to 2min,
/// 10% jitter) until it succeeds or `$max_elapsed_time` is spent. Every
/// failure counts as transient; the budget is the only way out.
#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($call:expr, $max_elapsed_time:expr) => {{
        let policy = backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(400),
            multiplier: 2.0,
            randomization_factor: 0.1,
            max_interval: Duration::from_secs(120),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(policy, || async {
            match $call.await {
                Ok(value) => Ok(Ok::<_, std::convert::Infallible>(value)),
                Err(e) => {
                    tracing::debug!("retrying after error: {:?}", e);
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    async fn succeeds() -> anyhow::Result<u32> {
        Ok(7)
    }

    async fn never_succeeds() -> anyhow::Result<u32> {
        anyhow::bail!("still down")
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        // A tight budget is fine when the first call already succeeds
        let value = retry_with_max_elapsed_time!(succeeds(), Duration::from_millis(20))
            .unwrap()
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_retry_gives_up_once_budget_is_spent() {
        let started = std::time::Instant::now();
        retry_with_max_elapsed_time!(never_succeeds(), Duration::from_secs(2)).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
