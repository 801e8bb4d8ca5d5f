//! View over the swap escrow contract on the E-chain.
//!
//! The node client is a trait seam; the core only relies on the escrow's
//! observable interface: two timeouts partitioning the time axis, a
//! `set_ready` that collapses the pre-t0 refund window, and terminal
//! `claim`/`refund` calls of which at most one ever succeeds, each
//! publishing the caller's 32-byte spend secret as an event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::warn;

const READ_ATTEMPTS: usize = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Externally observable escrow state. Terminal states carry the secret
/// revealed by the winning call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowStatus {
    Pending,
    Ready,
    Claimed([u8; 32]),
    Refunded([u8; 32]),
}

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Claimed(_) | Self::Refunded(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Claimed,
    Refunded,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventKind::Claimed => "Claimed",
            EventKind::Refunded => "Refunded",
        })
    }
}

/// E-chain node client seam. Submissions confirm synchronously; the
/// chain itself enforces the timeout windows and is the time authority.
#[async_trait]
pub trait EscrowClient: Send + Sync {
    /// Deploys a new escrow holding `amount_wei`, payable to `claimant`
    /// on claim. Refunds must prove knowledge of the scalar behind
    /// `refund_key`; claims must reveal the preimage of
    /// `claim_commitment`.
    async fn new_swap(
        &self,
        amount_wei: u128,
        claimant: &str,
        refund_key: [u8; 32],
        claim_commitment: [u8; 32],
        timeout: Duration,
    ) -> anyhow::Result<String>;

    async fn set_ready(&self, address: &str) -> anyhow::Result<String>;

    async fn claim(&self, address: &str, secret: [u8; 32]) -> anyhow::Result<String>;

    async fn refund(&self, address: &str, secret: [u8; 32]) -> anyhow::Result<String>;

    /// `(t0, t1)` as unix seconds.
    async fn timeouts(&self, address: &str) -> anyhow::Result<(i64, i64)>;

    async fn status(&self, address: &str) -> anyhow::Result<EscrowStatus>;

    /// Decodes the 32-byte secret from a `Claimed` or `Refunded` event.
    async fn read_event(&self, tx_hash: &str, kind: EventKind) -> anyhow::Result<[u8; 32]>;

    async fn chain_time(&self) -> anyhow::Result<i64>;
}

/// Minimal claim-relay hook: lets the XMR-offerer submit the claim
/// through a third party (e.g. when it holds no ETH for gas).
#[async_trait]
pub trait ClaimRelayer: Send + Sync {
    async fn relay_claim(&self, address: &str, secret: [u8; 32]) -> anyhow::Result<String>;
}

/// A session's handle to one escrow instance. Reads are retried a small
/// bounded number of times; submissions never are. A failed submission
/// is the state machine's problem.
pub struct ContractView {
    client: Arc<dyn EscrowClient>,
    address: Option<String>,
}

impl ContractView {
    pub fn new(client: Arc<dyn EscrowClient>) -> Self {
        Self {
            client,
            address: None,
        }
    }

    pub fn bind(&mut self, address: String) {
        self.address = Some(address);
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.address.is_some()
    }

    fn require(&self) -> anyhow::Result<&str> {
        self.address
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no escrow bound to this session"))
    }

    /// Deploys the escrow and reads back its timeouts.
    pub async fn deploy(
        &mut self,
        amount_wei: u128,
        claimant: &str,
        refund_key: [u8; 32],
        claim_commitment: [u8; 32],
        timeout: Duration,
    ) -> anyhow::Result<(String, i64, i64)> {
        let address = self
            .client
            .new_swap(amount_wei, claimant, refund_key, claim_commitment, timeout)
            .await?;
        self.address = Some(address.clone());
        let (t0, t1) = self.timeouts().await?;
        Ok((address, t0, t1))
    }

    pub async fn set_ready(&self) -> anyhow::Result<String> {
        self.client.set_ready(self.require()?).await
    }

    pub async fn claim(&self, secret: [u8; 32]) -> anyhow::Result<String> {
        self.client.claim(self.require()?, secret).await
    }

    pub async fn refund(&self, secret: [u8; 32]) -> anyhow::Result<String> {
        self.client.refund(self.require()?, secret).await
    }

    pub async fn timeouts(&self) -> anyhow::Result<(i64, i64)> {
        let address = self.require()?.to_string();
        self.with_read_retry("timeouts", || async {
            self.client.timeouts(&address).await
        })
        .await
    }

    pub async fn status(&self) -> anyhow::Result<EscrowStatus> {
        let address = self.require()?.to_string();
        self.with_read_retry("status", || async { self.client.status(&address).await })
            .await
    }

    pub async fn read_event(&self, tx_hash: &str, kind: EventKind) -> anyhow::Result<[u8; 32]> {
        self.with_read_retry("read_event", || async {
            self.client.read_event(tx_hash, kind).await
        })
        .await
    }

    pub async fn chain_time(&self) -> anyhow::Result<i64> {
        self.with_read_retry("chain_time", || async { self.client.chain_time().await })
            .await
    }

    async fn with_read_retry<T, F, Fut>(
        &self,
        label: &'static str,
        mut action: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        for attempt in 0..READ_ATTEMPTS {
            match action().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 == READ_ATTEMPTS => return Err(err),
                Err(err) => {
                    warn!(read = label, attempt = attempt + 1, %err, "chain read failed; retrying");
                    sleep(READ_RETRY_DELAY).await;
                }
            }
        }
        unreachable!("read retry loop returns on the last attempt")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FlakyClient {
        failures: AtomicUsize,
    }

    #[async_trait]
    impl EscrowClient for FlakyClient {
        async fn new_swap(
            &self,
            _amount_wei: u128,
            _claimant: &str,
            _refund_key: [u8; 32],
            _claim_commitment: [u8; 32],
            _timeout: Duration,
        ) -> anyhow::Result<String> {
            Ok("0xescrow".to_string())
        }

        async fn set_ready(&self, _address: &str) -> anyhow::Result<String> {
            Ok("0xready".to_string())
        }

        async fn claim(&self, _address: &str, _secret: [u8; 32]) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("submissions are never retried"))
        }

        async fn refund(&self, _address: &str, _secret: [u8; 32]) -> anyhow::Result<String> {
            Ok("0xrefund".to_string())
        }

        async fn timeouts(&self, _address: &str) -> anyhow::Result<(i64, i64)> {
            Ok((100, 200))
        }

        async fn status(&self, _address: &str) -> anyhow::Result<EscrowStatus> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            })
            .is_ok()
            {
                Err(anyhow::anyhow!("node hiccup"))
            } else {
                Ok(EscrowStatus::Ready)
            }
        }

        async fn read_event(&self, _tx_hash: &str, _kind: EventKind) -> anyhow::Result<[u8; 32]> {
            Ok([9u8; 32])
        }

        async fn chain_time(&self) -> anyhow::Result<i64> {
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reads_are_retried_past_transient_failures() {
        let mut view = ContractView::new(Arc::new(FlakyClient {
            failures: AtomicUsize::new(2),
        }));
        view.bind("0xescrow".to_string());
        assert_eq!(view.status().await.unwrap(), EscrowStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_give_up_after_the_bound() {
        let mut view = ContractView::new(Arc::new(FlakyClient {
            failures: AtomicUsize::new(READ_ATTEMPTS),
        }));
        view.bind("0xescrow".to_string());
        assert!(view.status().await.is_err());
    }

    #[tokio::test]
    async fn unbound_view_rejects_calls() {
        let view = ContractView::new(Arc::new(FlakyClient {
            failures: AtomicUsize::new(0),
        }));
        assert!(view.set_ready().await.is_err());
        assert!(view.timeouts().await.is_err());
    }
}
