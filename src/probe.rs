//! Bounded availability polling for external dependencies.
//!
//! Tasks block here until their backing service answers healthy or the retry
//! budget runs out. Each dependency gets its own [`RetryPolicy`]; probes
//! never share counters.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::http::RestClient;

/// Retry budget for one external dependency. Built from configuration at
/// startup and read-only for the process lifetime.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub target: &'static str,
    pub probe_url: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(
        target: &'static str,
        probe_url: String,
        max_retries: u32,
        retry_delay_millis: u64,
    ) -> Self {
        Self {
            target,
            probe_url,
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_millis),
        }
    }
}

/// Poll `check` until it reports available or the retry budget is exhausted.
///
/// Performs at most `max_retries + 1` checks and sleeps at most `max_retries`
/// times of `retry_delay` between attempts. Returns `true` the moment a check
/// passes; `max_retries = 0` means exactly one check with no waiting.
pub async fn wait_until_available<F, Fut>(policy: &RetryPolicy, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut attempts: u32 = 0;
    loop {
        if check().await {
            info!("{} is available", policy.target);
            return true;
        }
        if attempts >= policy.max_retries {
            warn!(
                "{} did not become available after {} attempt(s)",
                policy.target,
                attempts + 1
            );
            return false;
        }
        info!("Waiting for {} to be available...", policy.target);
        sleep(policy.retry_delay).await;
        attempts += 1;
    }
}

/// Single reachability check against the policy's health URL. A success-class
/// status means available; transport errors and non-2xx responses both count
/// as "not ready" and never abort the surrounding wait.
pub async fn check_health<R: RestClient>(client: &R, policy: &RetryPolicy) -> bool {
    match client.get(&policy.probe_url, None).await {
        Ok(response) if response.is_success() => true,
        Ok(response) => {
            warn!(
                "{} is not available. Status code: {}",
                policy.target, response.status
            );
            false
        }
        Err(err) => {
            warn!("{} not ready: {}", policy.target, err);
            false
        }
    }
}

/// HTTP-backed wait for one dependency.
pub async fn wait_for_target<R: RestClient>(client: &R, policy: &RetryPolicy) -> bool {
    wait_until_available(policy, || check_health(client, policy)).await
}
