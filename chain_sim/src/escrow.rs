//! In-memory escrow contract honouring the swap's timeout semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;
use tokio::time::Instant;

use monero_wallet::spend_key_commitment;
use swap_core::{ClaimRelayer, EscrowClient, EscrowStatus, EventKind};

struct EscrowRecord {
    amount_wei: u128,
    claimant: String,
    refund_key: [u8; 32],
    claim_commitment: [u8; 32],
    t0: i64,
    t1: i64,
    ready: bool,
    terminal: Option<(EventKind, [u8; 32])>,
}

#[derive(Default)]
struct Inner {
    swaps: HashMap<String, EscrowRecord>,
    events: HashMap<String, (EventKind, [u8; 32])>,
    next_id: u64,
}

/// The windows are enforced exactly as the real contract would:
/// refund only before t0 while not ready or at/after t1, claim only in
/// `[t0, t1)` or once ready (and before t1), and at most one of the two
/// terminal calls ever succeeds. Time flows on the tokio clock so paused
/// tests own it.
pub struct MockEscrow {
    genesis_unix: i64,
    epoch: Instant,
    inner: Mutex<Inner>,
}

impl MockEscrow {
    pub fn new(genesis_unix: i64) -> Self {
        Self {
            genesis_unix,
            epoch: Instant::now(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn now(&self) -> i64 {
        self.genesis_unix + self.epoch.elapsed().as_secs() as i64
    }

    pub fn swap_count(&self) -> usize {
        self.inner.lock().unwrap().swaps.len()
    }

    /// Snapshot of every escrow's state, for test assertions.
    pub fn statuses(&self) -> Vec<(String, EscrowStatus)> {
        let inner = self.inner.lock().unwrap();
        inner
            .swaps
            .iter()
            .map(|(address, swap)| {
                let status = match swap.terminal {
                    Some((EventKind::Claimed, secret)) => EscrowStatus::Claimed(secret),
                    Some((EventKind::Refunded, secret)) => EscrowStatus::Refunded(secret),
                    None if swap.ready => EscrowStatus::Ready,
                    None => EscrowStatus::Pending,
                };
                (address.clone(), status)
            })
            .collect()
    }
}

fn random_tx_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

#[async_trait]
impl EscrowClient for MockEscrow {
    async fn new_swap(
        &self,
        amount_wei: u128,
        claimant: &str,
        refund_key: [u8; 32],
        claim_commitment: [u8; 32],
        timeout: Duration,
    ) -> anyhow::Result<String> {
        if amount_wei == 0 {
            bail!("escrow amount must be non-zero");
        }
        if timeout.is_zero() {
            bail!("timeout duration must be non-zero");
        }
        let now = self.now();
        let window = timeout.as_secs() as i64;
        let mut inner = self.inner.lock().unwrap();
        let address = format!("0xe5c0{:04x}", inner.next_id);
        inner.next_id += 1;
        inner.swaps.insert(
            address.clone(),
            EscrowRecord {
                amount_wei,
                claimant: claimant.to_string(),
                refund_key,
                claim_commitment,
                t0: now + window,
                t1: now + 2 * window,
                ready: false,
                terminal: None,
            },
        );
        Ok(address)
    }

    async fn set_ready(&self, address: &str) -> anyhow::Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let swap = inner
            .swaps
            .get_mut(address)
            .ok_or_else(|| anyhow!("unknown escrow: {address}"))?;
        if swap.terminal.is_some() {
            bail!("escrow is already complete");
        }
        swap.ready = true;
        Ok(random_tx_hash())
    }

    async fn claim(&self, address: &str, secret: [u8; 32]) -> anyhow::Result<String> {
        let now = self.now();
        let mut inner = self.inner.lock().unwrap();
        let swap = inner
            .swaps
            .get_mut(address)
            .ok_or_else(|| anyhow!("unknown escrow: {address}"))?;
        if swap.terminal.is_some() {
            bail!("escrow is already complete");
        }
        if now >= swap.t1 {
            bail!("claim window closed at t1");
        }
        if !swap.ready && now < swap.t0 {
            bail!("too early to claim: escrow not ready and t0 not reached");
        }
        if spend_key_commitment(&secret) != swap.claim_commitment {
            bail!("claim secret does not match the commitment");
        }
        swap.terminal = Some((EventKind::Claimed, secret));
        let tx_hash = random_tx_hash();
        inner.events.insert(tx_hash.clone(), (EventKind::Claimed, secret));
        Ok(tx_hash)
    }

    async fn refund(&self, address: &str, secret: [u8; 32]) -> anyhow::Result<String> {
        let now = self.now();
        let mut inner = self.inner.lock().unwrap();
        let swap = inner
            .swaps
            .get_mut(address)
            .ok_or_else(|| anyhow!("unknown escrow: {address}"))?;
        if swap.terminal.is_some() {
            bail!("escrow is already complete");
        }
        let before_t0 = now < swap.t0 && !swap.ready;
        let after_t1 = now >= swap.t1;
        if !before_t0 && !after_t1 {
            bail!("refund not permitted inside the claim window");
        }
        let public = EdwardsPoint::mul_base(&Scalar::from_bytes_mod_order(secret))
            .compress()
            .to_bytes();
        if public != swap.refund_key {
            bail!("refund secret does not match the refund key");
        }
        swap.terminal = Some((EventKind::Refunded, secret));
        let tx_hash = random_tx_hash();
        inner
            .events
            .insert(tx_hash.clone(), (EventKind::Refunded, secret));
        Ok(tx_hash)
    }

    async fn timeouts(&self, address: &str) -> anyhow::Result<(i64, i64)> {
        let inner = self.inner.lock().unwrap();
        let swap = inner
            .swaps
            .get(address)
            .ok_or_else(|| anyhow!("unknown escrow: {address}"))?;
        Ok((swap.t0, swap.t1))
    }

    async fn status(&self, address: &str) -> anyhow::Result<EscrowStatus> {
        let inner = self.inner.lock().unwrap();
        let swap = inner
            .swaps
            .get(address)
            .ok_or_else(|| anyhow!("unknown escrow: {address}"))?;
        Ok(match swap.terminal {
            Some((EventKind::Claimed, secret)) => EscrowStatus::Claimed(secret),
            Some((EventKind::Refunded, secret)) => EscrowStatus::Refunded(secret),
            None if swap.ready => EscrowStatus::Ready,
            None => EscrowStatus::Pending,
        })
    }

    async fn read_event(&self, tx_hash: &str, kind: EventKind) -> anyhow::Result<[u8; 32]> {
        let inner = self.inner.lock().unwrap();
        let (event_kind, secret) = inner
            .events
            .get(tx_hash)
            .ok_or_else(|| anyhow!("no receipt for transaction {tx_hash}"))?;
        if *event_kind != kind {
            bail!("transaction {tx_hash} logged {event_kind}, not {kind}");
        }
        Ok(*secret)
    }

    async fn chain_time(&self) -> anyhow::Result<i64> {
        Ok(self.now())
    }
}

/// The escrow doubles as a relayer: a relayed claim is just a claim
/// submitted by someone else's signer.
#[async_trait]
impl ClaimRelayer for MockEscrow {
    async fn relay_claim(&self, address: &str, secret: [u8; 32]) -> anyhow::Result<String> {
        self.claim(address, secret).await
    }
}

/// Wrapper whose claim submissions always fail, for driving the
/// peer-never-claims paths.
pub struct FailingClaimEscrow {
    inner: Arc<MockEscrow>,
}

impl FailingClaimEscrow {
    pub fn new(inner: Arc<MockEscrow>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl EscrowClient for FailingClaimEscrow {
    async fn new_swap(
        &self,
        amount_wei: u128,
        claimant: &str,
        refund_key: [u8; 32],
        claim_commitment: [u8; 32],
        timeout: Duration,
    ) -> anyhow::Result<String> {
        self.inner
            .new_swap(amount_wei, claimant, refund_key, claim_commitment, timeout)
            .await
    }

    async fn set_ready(&self, address: &str) -> anyhow::Result<String> {
        self.inner.set_ready(address).await
    }

    async fn claim(&self, _address: &str, _secret: [u8; 32]) -> anyhow::Result<String> {
        bail!("claim transaction never confirmed")
    }

    async fn refund(&self, address: &str, secret: [u8; 32]) -> anyhow::Result<String> {
        self.inner.refund(address, secret).await
    }

    async fn timeouts(&self, address: &str) -> anyhow::Result<(i64, i64)> {
        self.inner.timeouts(address).await
    }

    async fn status(&self, address: &str) -> anyhow::Result<EscrowStatus> {
        self.inner.status(address).await
    }

    async fn read_event(&self, tx_hash: &str, kind: EventKind) -> anyhow::Result<[u8; 32]> {
        self.inner.read_event(tx_hash, kind).await
    }

    async fn chain_time(&self) -> anyhow::Result<i64> {
        self.inner.chain_time().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;

    fn secret_pair() -> ([u8; 32], [u8; 32]) {
        let secret = [3u8; 32];
        (secret, spend_key_commitment(&secret))
    }

    fn refund_pair() -> ([u8; 32], [u8; 32]) {
        let secret = [5u8; 32];
        let key = EdwardsPoint::mul_base(&Scalar::from_bytes_mod_order(secret))
            .compress()
            .to_bytes();
        (secret, key)
    }

    async fn deploy(escrow: &MockEscrow) -> (String, [u8; 32], [u8; 32]) {
        let (claim_secret, commitment) = secret_pair();
        let (refund_secret, refund_key) = refund_pair();
        let address = escrow
            .new_swap(10, "0xbob", refund_key, commitment, Duration::from_secs(60))
            .await
            .unwrap();
        (address, claim_secret, refund_secret)
    }

    #[tokio::test(start_paused = true)]
    async fn claim_needs_ready_or_t0() {
        let escrow = MockEscrow::new(1_000);
        let (address, claim_secret, _) = deploy(&escrow).await;

        assert!(escrow.claim(&address, claim_secret).await.is_err());

        escrow.set_ready(&address).await.unwrap();
        escrow.claim(&address, claim_secret).await.unwrap();
        assert!(matches!(
            escrow.status(&address).await.unwrap(),
            EscrowStatus::Claimed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn claim_is_open_in_the_window_without_ready() {
        let escrow = MockEscrow::new(1_000);
        let (address, claim_secret, _) = deploy(&escrow).await;

        sleep(Duration::from_secs(61)).await;
        escrow.claim(&address, claim_secret).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn claim_window_closes_at_t1() {
        let escrow = MockEscrow::new(1_000);
        let (address, claim_secret, _) = deploy(&escrow).await;

        sleep(Duration::from_secs(121)).await;
        assert!(escrow.claim(&address, claim_secret).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn refund_windows_are_enforced() {
        let escrow = MockEscrow::new(1_000);
        let (address, _, refund_secret) = deploy(&escrow).await;

        // inside [t0, t1): the claim window belongs to the counterparty
        sleep(Duration::from_secs(61)).await;
        assert!(escrow.refund(&address, refund_secret).await.is_err());

        // at/after t1 the refund right returns
        sleep(Duration::from_secs(60)).await;
        escrow.refund(&address, refund_secret).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn set_ready_collapses_the_early_refund_window() {
        let escrow = MockEscrow::new(1_000);
        let (address, _, refund_secret) = deploy(&escrow).await;

        escrow.set_ready(&address).await.unwrap();
        assert!(escrow.refund(&address, refund_secret).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_terminal_call_succeeds() {
        let escrow = MockEscrow::new(1_000);
        let (address, claim_secret, refund_secret) = deploy(&escrow).await;

        escrow.refund(&address, refund_secret).await.unwrap();
        sleep(Duration::from_secs(61)).await;
        assert!(escrow.claim(&address, claim_secret).await.is_err());
        sleep(Duration::from_secs(120)).await;
        assert!(escrow.refund(&address, refund_secret).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn secrets_are_checked_against_their_commitments() {
        let escrow = MockEscrow::new(1_000);
        let (address, _, _) = deploy(&escrow).await;

        escrow.set_ready(&address).await.unwrap();
        assert!(escrow.claim(&address, [9u8; 32]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn events_carry_the_revealed_secret() {
        let escrow = MockEscrow::new(1_000);
        let (address, claim_secret, _) = deploy(&escrow).await;

        escrow.set_ready(&address).await.unwrap();
        let tx_hash = escrow.claim(&address, claim_secret).await.unwrap();

        let secret = escrow
            .read_event(&tx_hash, EventKind::Claimed)
            .await
            .unwrap();
        assert_eq!(secret, claim_secret);
        assert!(escrow.read_event(&tx_hash, EventKind::Refunded).await.is_err());
    }
}
