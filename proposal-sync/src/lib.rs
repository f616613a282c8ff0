// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::new_without_default, clippy::too_many_arguments)]

pub mod config;
pub mod error;
pub mod fetcher;
pub mod ledger;
pub mod merge;
pub mod metrics;
pub mod optimistic;
pub mod orchestrator;
pub mod server;
pub mod snapshot_store;
pub mod subscriber;
pub mod types;
pub mod utils;

#[cfg(test)]
pub mod test_utils;

#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // The following delay sequence (in secs) will be used, applied with jitter
        // 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 30, 30 ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: std::time::Duration::from_secs(30),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => {
                        return Ok(result);
                    }
                    Err(e) => {
                        // Every error is treated as transient until max_elapsed_time runs out
                        tracing::debug!("Retrying due to error: {:?}", e);
                        return Err(backoff::Error::transient(e));
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}

#[cfg(test)]
mod tests {
    use crate::error::{SyncError, SyncResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn example_func_ok() -> SyncResult<()> {
        Ok(())
    }

    async fn example_func_err() -> SyncResult<()> {
        tracing::info!("example_func_err");
        Err(SyncError::Rpc("unreachable".to_string()))
    }

    #[tokio::test]
    async fn test_retry_with_max_elapsed_time() {
        // no retry is needed, should return immediately. We give it a very small
        // max_elapsed_time and it should still finish in time.
        let max_elapsed_time = Duration::from_millis(20);
        retry_with_max_elapsed_time!(example_func_ok(), max_elapsed_time)
            .unwrap()
            .unwrap();

        // now call a function that always errors and expect it to return before max_elapsed_time runs out
        let max_elapsed_time = Duration::from_secs(3);
        let instant = std::time::Instant::now();
        let err = retry_with_max_elapsed_time!(example_func_err(), max_elapsed_time).unwrap_err();
        assert_eq!(err, SyncError::Rpc("unreachable".to_string()));
        assert!(instant.elapsed() < max_elapsed_time + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let flaky = || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SyncError::Timeout("slow node".to_string()))
            } else {
                Ok(7u64)
            }
        };

        let value = retry_with_max_elapsed_time!(flaky(), Duration::from_secs(10))
            .unwrap()
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
