use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub call_timeout: Duration,
    pub attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(200),
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            call_timeout: env_millis(
                "MONERO_WALLET_RPC_TIMEOUT_MS",
                default.call_timeout,
            ),
            attempts: env_u64("MONERO_WALLET_RPC_ATTEMPTS", default.attempts as u64) as usize,
            base_delay: env_millis("MONERO_WALLET_RPC_BASE_DELAY_MS", default.base_delay),
            max_delay: env_millis("MONERO_WALLET_RPC_MAX_DELAY_MS", default.max_delay),
            jitter: env_millis("MONERO_WALLET_RPC_JITTER_MS", default.jitter),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt as u32));
        let capped = exp.min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            capped
        } else {
            capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        }
    }
}

fn env_u64(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}

fn env_millis(key: &str, fallback: Duration) -> Duration {
    Duration::from_millis(env_u64(key, fallback.as_millis() as u64))
}

/// Runs `action` up to `config.attempts` times, bounding each call by
/// `config.call_timeout` and backing off exponentially between failures.
pub async fn retry_rpc<T, F, Fut>(
    label: &'static str,
    config: &RetryConfig,
    mut action: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let attempts = config.attempts.max(1);
    for attempt in 0..attempts {
        let last = attempt + 1 == attempts;
        match timeout(config.call_timeout, action()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if last => return Err(err),
            Ok(Err(err)) => {
                warn!(attempt = attempt + 1, call = label, %err, "wallet RPC error; retrying");
            }
            Err(_) if last => {
                return Err(anyhow::anyhow!("wallet RPC timed out: {label}"));
            }
            Err(_) => {
                warn!(attempt = attempt + 1, call = label, "wallet RPC timeout; retrying");
            }
        }
        sleep(config.backoff(attempt)).await;
    }
    unreachable!("retry loop returns on the last attempt")
}
