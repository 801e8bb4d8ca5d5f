//! Per-swap session state machines.

pub mod alice;
pub mod bob;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use monero_wallet::Network;
use tokio::time::Instant;

pub use alice::{AliceOutcome, AliceSession};
pub use bob::{BobOutcome, BobSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic session-id allocator, owned by the host. Ids are stable for
/// one swap's lifetime and never reused within a process.
#[derive(Clone, Default)]
pub struct SessionIds {
    next: Arc<AtomicU64>,
}

impl SessionIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Alice: offers ETH, wants XMR.
    OffersEth,
    /// Bob: offers XMR, wants ETH.
    OffersXmr,
}

/// Knobs shared by both session kinds.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Recovery dumps land under `<data_dir>/<session id>/swap-secret`.
    pub data_dir: PathBuf,
    pub network: Network,
    /// How long before t0 Alice gives up waiting for the XMR lock and
    /// refunds. Must cover the refund transaction's confirmation latency.
    pub refund_buffer: Duration,
    /// Escrow window length; the contract sets t0 = now + timeout and
    /// t1 = t0 + timeout.
    pub escrow_timeout: Duration,
}

impl SessionConfig {
    pub fn new(data_dir: impl Into<PathBuf>, network: Network) -> Self {
        Self {
            data_dir: data_dir.into(),
            network,
            refund_buffer: Duration::from_secs(5 * 60),
            escrow_timeout: Duration::from_secs(60 * 60),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.escrow_timeout.is_zero() {
            anyhow::bail!("escrow timeout must be greater than zero");
        }
        if self.refund_buffer >= self.escrow_timeout {
            anyhow::bail!("refund buffer must be shorter than the escrow timeout");
        }
        Ok(())
    }

    pub(crate) fn secret_path(&self, id: SessionId) -> PathBuf {
        self.data_dir.join(id.to_string()).join("swap-secret")
    }
}

pub(crate) fn validate_amount(label: &str, amount: u128) -> anyhow::Result<()> {
    if amount == 0 {
        anyhow::bail!("{label} must be greater than zero");
    }
    Ok(())
}

/// Maps a chain timestamp to a local timer deadline. The chain clock is
/// authoritative; already-passed timestamps become immediate deadlines.
pub(crate) fn deadline_at(chain_now: i64, t: i64) -> Instant {
    Instant::now() + Duration::from_secs(t.saturating_sub(chain_now).max(0) as u64)
}

pub(crate) fn until(chain_now: i64, t: i64) -> Duration {
    Duration::from_secs(t.saturating_sub(chain_now).max(0) as u64)
}
