//! Bob's side of the swap: offers XMR, wants ETH.
//!
//! Bob initiates the key exchange, locks XMR to the joint address once
//! the escrow is known, and claims the ETH either when Alice calls
//! `set_ready` or when t0 arrives on its own. If Alice refunds instead,
//! her revealed spend secret hands Bob the joint XMR account back; a
//! `NotifyRefund` is therefore accepted at any point in the protocol.

use std::sync::Arc;

use monero_wallet::{
    joint_account, recover_joint_keypair, verify_announcement, KeyAnnouncement, PeerKeys,
    SessionKeys, WalletProbe,
};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::contract::{ClaimRelayer, ContractView, EscrowStatus, EventKind};
use crate::error::SwapError;
use crate::gate::MessageGate;
use crate::message::{Message, MessageKind, SwapStream};
use crate::session::{deadline_at, until, validate_amount, Role, SessionConfig, SessionId};
use crate::watchdog::{Signal, Watchdog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BobTimer {
    T0Reached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BobOutcome {
    /// The ETH claim is mined.
    Success { tx_hash: String },
    /// Alice refunded; her revealed spend secret regained the XMR.
    XmrRecovered { xmr_address: String },
}

pub struct BobSession<S> {
    id: SessionId,
    cfg: SessionConfig,
    stream: S,
    contract: ContractView,
    probe: WalletProbe,
    relayer: Option<Arc<dyn ClaimRelayer>>,
    gate: MessageGate,
    keys: SessionKeys,
    peer: Option<PeerKeys>,
    /// Where the claimed ETH should land.
    eth_address: String,
    provides_pico: u64,
    desired_wei: u128,
    t0: i64,
    t1: i64,
    locked: bool,
    success: bool,
    ready: Signal,
    cancel: Signal,
    timer_tx: mpsc::Sender<BobTimer>,
    timer_rx: mpsc::Receiver<BobTimer>,
    watchdogs: Vec<Watchdog>,
}

impl<S: SwapStream> BobSession<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        cfg: SessionConfig,
        stream: S,
        contract: ContractView,
        probe: WalletProbe,
        eth_address: String,
        provides_pico: u64,
        desired_wei: u128,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;
        validate_amount("provided XMR amount", provides_pico as u128)?;
        validate_amount("desired ETH amount", desired_wei)?;
        if eth_address.is_empty() {
            anyhow::bail!("ETH payout address must be set");
        }
        let (timer_tx, timer_rx) = mpsc::channel(1);
        Ok(Self {
            id,
            cfg,
            stream,
            contract,
            probe,
            relayer: None,
            gate: MessageGate::new(Role::OffersXmr, MessageKind::SendKeys),
            keys: SessionKeys::generate(),
            peer: None,
            eth_address,
            provides_pico,
            desired_wei,
            t0: 0,
            t1: 0,
            locked: false,
            success: false,
            ready: Signal::new(),
            cancel: Signal::new(),
            timer_tx,
            timer_rx,
            watchdogs: Vec::new(),
        })
    }

    /// Routes the claim through a relayer instead of the node client.
    pub fn with_relayer(mut self, relayer: Arc<dyn ClaimRelayer>) -> Self {
        self.relayer = Some(relayer);
        self
    }

    /// True once the irreversible winning side-effect (claim receipt or
    /// recovered joint wallet) has happened.
    pub fn success_latched(&self) -> bool {
        self.success
    }

    /// Drives the session to a terminal state. Cancels the session scope
    /// and retires every watchdog before returning.
    pub async fn run(mut self) -> Result<BobOutcome, SwapError> {
        let result = self.drive().await;
        self.cancel.fire_if_clear();
        for dog in self.watchdogs.drain(..) {
            dog.join().await;
        }
        match &result {
            Ok(outcome) => info!(session = %self.id, ?outcome, "bob session finished"),
            Err(err) => error!(session = %self.id, %err, "bob session failed"),
        }
        result
    }

    async fn drive(&mut self) -> Result<BobOutcome, SwapError> {
        let announcement = self.keys.announcement();
        self.send(Message::SendKeys {
            public_spend_key: announcement.public_spend_key,
            private_view_key: announcement.private_view_key,
            spend_key_hash: announcement.spend_key_hash,
            eth_address: Some(self.eth_address.clone()),
        })
        .await?;

        loop {
            tokio::select! {
                biased;
                Some(BobTimer::T0Reached) = self.timer_rx.recv() => {
                    info!(session = %self.id, "t0 reached; claiming without NotifyReady");
                    if let Some(outcome) = self.claim_or_park().await? {
                        return Ok(outcome);
                    }
                },
                msg = self.stream.recv() => match msg {
                    Some(msg) => match self.handle_message(msg).await {
                        Ok(Some(outcome)) => return Ok(outcome),
                        Ok(None) => {}
                        Err(err) => return self.abort(err).await,
                    },
                    None => return self.on_stream_closed().await,
                },
            }
        }
    }

    async fn handle_message(&mut self, msg: Message) -> Result<Option<BobOutcome>, SwapError> {
        self.gate.check(&msg)?;
        match msg {
            Message::SendKeys {
                public_spend_key,
                private_view_key,
                spend_key_hash,
                ..
            } => {
                self.handle_send_keys(KeyAnnouncement {
                    public_spend_key,
                    private_view_key,
                    spend_key_hash,
                })
                .await?;
                Ok(None)
            }
            Message::NotifyContractDeployed { address } => {
                self.handle_contract_deployed(address).await?;
                Ok(None)
            }
            Message::NotifyReady => {
                debug!(session = %self.id, "peer called set_ready; claiming");
                self.ready.fire();
                self.claim_or_park().await
            }
            Message::NotifyRefund { tx_hash } => {
                Ok(Some(self.handle_refund(tx_hash).await?))
            }
            other => Err(SwapError::Protocol(format!(
                "no handler for {} on the XMR-offering side",
                other.kind()
            ))),
        }
    }

    async fn handle_send_keys(&mut self, announcement: KeyAnnouncement) -> Result<(), SwapError> {
        let peer = verify_announcement(&announcement, self.cfg.network)?;
        let peer_address = peer.address(self.cfg.network)?.to_string();
        self.probe
            .verify_view_pair(
                peer.view_bytes(),
                &peer_address,
                &format!("swap-{}-peer-view", self.id),
            )
            .await?;
        debug!(session = %self.id, "verified peer session keys");
        self.peer = Some(peer);
        self.gate.advance(MessageKind::NotifyContractDeployed);
        Ok(())
    }

    /// The escrow exists: lock the XMR to the joint address, read the
    /// timeouts, and arm the t0 watchdog.
    async fn handle_contract_deployed(&mut self, address: String) -> Result<(), SwapError> {
        if address.is_empty() {
            return Err(SwapError::Protocol("got empty escrow address".into()));
        }
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| SwapError::Protocol("escrow address before key exchange".into()))?;
        self.contract.bind(address.clone());

        let joint = joint_account(&self.keys, peer, self.cfg.network)?;
        let joint_address = joint.address.to_string();
        let lock_tx = self
            .probe
            .lock_funds(&joint_address, self.provides_pico)
            .await?;
        self.locked = true;
        info!(
            session = %self.id,
            escrow = %address,
            joint = %joint_address,
            lock_tx = %lock_tx,
            desired_wei = %self.desired_wei,
            "locked XMR to joint address"
        );

        let (t0, t1) = self.contract.timeouts().await.map_err(SwapError::Chain)?;
        self.t0 = t0;
        self.t1 = t1;
        let now = self.contract.chain_time().await.map_err(SwapError::Chain)?;
        debug!(session = %self.id, t0, t1, now, "read escrow timeouts");
        self.watchdogs.push(Watchdog::spawn(
            "t0-reached",
            deadline_at(now, t0),
            self.ready.clone(),
            self.cancel.clone(),
            self.timer_tx.clone(),
            BobTimer::T0Reached,
        ));

        self.gate.advance(MessageKind::NotifyReady);
        self.send(Message::NotifyXmrLock {
            address: joint_address,
        })
        .await?;
        Ok(())
    }

    /// Alice refunded: her spend secret is in the event log, which is
    /// everything needed to regain the locked XMR.
    async fn handle_refund(&mut self, tx_hash: String) -> Result<BobOutcome, SwapError> {
        if !self.contract.is_bound() {
            return Err(SwapError::Protocol(
                "refund notification before the escrow was announced".into(),
            ));
        }
        let secret = self
            .contract
            .read_event(&tx_hash, EventKind::Refunded)
            .await
            .map_err(SwapError::Chain)?;
        info!(session = %self.id, %tx_hash, "peer refunded; recovering joint XMR");
        let xmr_address = self.recover_joint_xmr(secret).await?;
        Ok(BobOutcome::XmrRecovered { xmr_address })
    }

    /// Claims the ETH; on success the swap is won regardless of whether
    /// the notification reaches the peer. A reverted claim against an
    /// already-refunded escrow turns into XMR recovery; against a live
    /// escrow the session parks and waits for the peer's refund.
    async fn claim_or_park(&mut self) -> Result<Option<BobOutcome>, SwapError> {
        match self.claim_once().await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(SwapError::Chain(err)) => {
                warn!(session = %self.id, %err, "claim failed; awaiting peer refund");
                self.gate.advance(MessageKind::NotifyRefund);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn claim_once(&mut self) -> Result<BobOutcome, SwapError> {
        let secret = self.keys.spend_secret();
        let submission = match (&self.relayer, self.contract.address()) {
            (Some(relayer), Some(address)) => relayer.relay_claim(address, secret).await,
            _ => self.contract.claim(secret).await,
        };
        match submission {
            Ok(tx_hash) => {
                self.success = true;
                info!(session = %self.id, %tx_hash, "claimed escrowed ETH");
                self.notify_best_effort(Message::NotifyClaimed {
                    tx_hash: tx_hash.clone(),
                })
                .await;
                Ok(BobOutcome::Success { tx_hash })
            }
            Err(err) => {
                warn!(session = %self.id, %err, "claim reverted; checking escrow state");
                match self.contract.status().await.map_err(SwapError::Chain)? {
                    EscrowStatus::Refunded(secret) => {
                        info!(session = %self.id, "escrow already refunded; recovering joint XMR");
                        let xmr_address = self.recover_joint_xmr(secret).await?;
                        Ok(BobOutcome::XmrRecovered { xmr_address })
                    }
                    _ => Err(SwapError::Chain(err)),
                }
            }
        }
    }

    async fn abort(&mut self, err: SwapError) -> Result<BobOutcome, SwapError> {
        if !self.locked {
            return Err(err);
        }
        warn!(session = %self.id, %err, "aborting session; recovering locked XMR via claim");
        match self.try_claim().await {
            Ok(outcome) => Ok(outcome),
            Err(claim_err) => {
                error!(session = %self.id, %claim_err, "recovery after abort failed");
                Err(err)
            }
        }
    }

    async fn on_stream_closed(&mut self) -> Result<BobOutcome, SwapError> {
        if !self.locked {
            // nothing of ours is on either chain yet
            return Err(SwapError::StreamClosed);
        }
        warn!(session = %self.id, "stream closed mid-swap; recovering");
        self.try_claim().await
    }

    /// Claim under the window rules: before t0 the claim is not yet
    /// permitted, so wait; past t1 the only hope is that the peer's
    /// refund (and with it her spend secret) is already on chain.
    async fn try_claim(&mut self) -> Result<BobOutcome, SwapError> {
        let now = self.contract.chain_time().await.map_err(SwapError::Chain)?;
        if now < self.t0 && !self.ready.fired() {
            let wait = until(now, self.t0);
            info!(
                session = %self.id,
                wait_secs = wait.as_secs(),
                "claim window not open yet; waiting until t0"
            );
            sleep(wait).await;
        }
        self.claim_once().await
    }

    async fn recover_joint_xmr(&mut self, secret: [u8; 32]) -> Result<String, SwapError> {
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| SwapError::Protocol("refund secret before key exchange".into()))?;
        let pair = recover_joint_keypair(&self.keys, &peer.commitment(), secret);
        // keep the keys recoverable even if wallet creation dies
        pair.write_to_file(&self.cfg.secret_path(self.id), self.cfg.network)?;
        let (xmr_address, balance) = self
            .probe
            .create_spendable(&pair, self.cfg.network, &format!("swap-{}-refunded", self.id))
            .await?;
        self.success = true;
        info!(session = %self.id, %xmr_address, balance = balance.total, "recovered joint XMR account");
        Ok(xmr_address)
    }

    async fn send(&mut self, msg: Message) -> Result<(), SwapError> {
        self.stream.send(msg).await.map_err(|_| SwapError::StreamClosed)
    }

    async fn notify_best_effort(&mut self, msg: Message) {
        if let Err(err) = self.stream.send(msg).await {
            warn!(session = %self.id, %err, "failed to notify peer");
        }
    }
}
