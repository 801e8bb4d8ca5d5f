//! Alice's side of the swap: offers ETH, wants XMR.
//!
//! Alice deploys the escrow once she has verified Bob's session keys,
//! audits the locked XMR before giving up her early refund right via
//! `set_ready`, and recovers the joint XMR account from the spend secret
//! Bob reveals when he claims. Two watchdogs bound how long she will
//! wait: one fires a safety buffer before t0 if the XMR lock never
//! happens, one at t1 if Bob never claims.

use monero_wallet::{
    joint_account, recover_joint_keypair, verify_announcement, KeyAnnouncement, PeerKeys,
    SessionKeys, WalletProbe,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::contract::{ContractView, EscrowStatus, EventKind};
use crate::error::SwapError;
use crate::gate::MessageGate;
use crate::message::{Message, MessageKind, SwapStream};
use crate::session::{deadline_at, until, validate_amount, Role, SessionConfig, SessionId};
use crate::watchdog::{Signal, Watchdog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AliceTimer {
    PreT0,
    PostT1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliceOutcome {
    /// Bob claimed the ETH; his revealed spend secret recovered the
    /// joint XMR account.
    Success { xmr_address: String },
    /// The ETH came back.
    Refunded { tx_hash: String, reason: String },
}

pub struct AliceSession<S> {
    id: SessionId,
    cfg: SessionConfig,
    stream: S,
    contract: ContractView,
    probe: WalletProbe,
    gate: MessageGate,
    keys: SessionKeys,
    peer: Option<PeerKeys>,
    peer_eth_address: Option<String>,
    provides_wei: u128,
    desired_pico: u64,
    t0: i64,
    t1: i64,
    ready_called: bool,
    success: bool,
    xmr_locked: Signal,
    claimed: Signal,
    cancel: Signal,
    timer_tx: mpsc::Sender<AliceTimer>,
    timer_rx: mpsc::Receiver<AliceTimer>,
    watchdogs: Vec<Watchdog>,
}

impl<S: SwapStream> AliceSession<S> {
    pub fn new(
        id: SessionId,
        cfg: SessionConfig,
        stream: S,
        contract: ContractView,
        probe: WalletProbe,
        provides_wei: u128,
        desired_pico: u64,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;
        validate_amount("provided ETH amount", provides_wei)?;
        validate_amount("desired XMR amount", desired_pico as u128)?;
        let (timer_tx, timer_rx) = mpsc::channel(2);
        Ok(Self {
            id,
            cfg,
            stream,
            contract,
            probe,
            gate: MessageGate::new(Role::OffersEth, MessageKind::SendKeys),
            keys: SessionKeys::generate(),
            peer: None,
            peer_eth_address: None,
            provides_wei,
            desired_pico,
            t0: 0,
            t1: 0,
            ready_called: false,
            success: false,
            xmr_locked: Signal::new(),
            claimed: Signal::new(),
            cancel: Signal::new(),
            timer_tx,
            timer_rx,
            watchdogs: Vec::new(),
        })
    }

    /// True once the irreversible winning side-effect (spendable joint
    /// wallet creation) has happened.
    pub fn success_latched(&self) -> bool {
        self.success
    }

    /// The escrow's payout target for a successful claim, once known.
    pub fn peer_eth_address(&self) -> Option<&str> {
        self.peer_eth_address.as_deref()
    }

    /// Drives the session to a terminal state. Cancels the session scope
    /// and retires every watchdog before returning.
    pub async fn run(mut self) -> Result<AliceOutcome, SwapError> {
        let result = self.drive().await;
        self.cancel.fire_if_clear();
        for dog in self.watchdogs.drain(..) {
            dog.join().await;
        }
        match &result {
            Ok(outcome) => info!(session = %self.id, ?outcome, "alice session finished"),
            Err(err) => error!(session = %self.id, %err, "alice session failed"),
        }
        result
    }

    async fn drive(&mut self) -> Result<AliceOutcome, SwapError> {
        let announcement = self.keys.announcement();
        self.send(Message::SendKeys {
            public_spend_key: announcement.public_spend_key,
            private_view_key: announcement.private_view_key,
            spend_key_hash: announcement.spend_key_hash,
            eth_address: None,
        })
        .await?;

        loop {
            tokio::select! {
                biased;
                Some(timer) = self.timer_rx.recv() => match timer {
                    AliceTimer::PreT0 => {
                        warn!(session = %self.id, "XMR was not locked in time; refunding");
                        return self.refund_or_recover("xmr lock timed out").await;
                    }
                    AliceTimer::PostT1 => {
                        warn!(session = %self.id, "no claim before t1; refunding");
                        return self.refund_or_recover("peer never claimed").await;
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

    async fn handle_message(&mut self, msg: Message) -> Result<Option<AliceOutcome>, SwapError> {
        self.gate.check(&msg)?;
        match msg {
            Message::SendKeys {
                public_spend_key,
                private_view_key,
                spend_key_hash,
                eth_address,
            } => {
                self.handle_send_keys(
                    KeyAnnouncement {
                        public_spend_key,
                        private_view_key,
                        spend_key_hash,
                    },
                    eth_address,
                )
                .await?;
                Ok(None)
            }
            Message::NotifyXmrLock { address } => {
                self.handle_xmr_lock(address).await?;
                Ok(None)
            }
            Message::NotifyClaimed { tx_hash } => Ok(Some(self.handle_claimed(tx_hash).await?)),
            other => Err(SwapError::Protocol(format!(
                "no handler for {} on the ETH-offering side",
                other.kind()
            ))),
        }
    }

    /// Bob's keys arrived: verify them, deploy the escrow, arm the
    /// pre-t0 watchdog, and tell Bob where the escrow lives.
    async fn handle_send_keys(
        &mut self,
        announcement: KeyAnnouncement,
        eth_address: Option<String>,
    ) -> Result<(), SwapError> {
        let eth_address = eth_address
            .filter(|addr| !addr.is_empty())
            .ok_or_else(|| SwapError::Protocol("peer did not send an ETH payout address".into()))?;

        let peer = verify_announcement(&announcement, self.cfg.network)?;
        let peer_address = peer.address(self.cfg.network)?.to_string();
        self.probe
            .verify_view_pair(
                peer.view_bytes(),
                &peer_address,
                &format!("swap-{}-peer-view", self.id),
            )
            .await?;
        debug!(session = %self.id, peer_eth = %eth_address, "verified peer session keys");

        let (address, t0, t1) = self
            .contract
            .deploy(
                self.provides_wei,
                &eth_address,
                self.keys.public_spend().to_compressed(),
                peer.commitment(),
                self.cfg.escrow_timeout,
            )
            .await
            .map_err(SwapError::Chain)?;
        self.t0 = t0;
        self.t1 = t1;
        self.peer = Some(peer);
        self.peer_eth_address = Some(eth_address);
        info!(session = %self.id, escrow = %address, t0, t1, "deployed escrow; waiting for XMR lock");

        let now = self.contract.chain_time().await.map_err(SwapError::Chain)?;
        let deadline = deadline_at(now, t0)
            .checked_sub(self.cfg.refund_buffer)
            .unwrap_or_else(Instant::now);
        self.watchdogs.push(Watchdog::spawn(
            "pre-t0",
            deadline,
            self.xmr_locked.clone(),
            self.cancel.clone(),
            self.timer_tx.clone(),
            AliceTimer::PreT0,
        ));

        self.gate.advance(MessageKind::NotifyXmrLock);
        self.send(Message::NotifyContractDeployed { address }).await?;
        Ok(())
    }

    /// Bob says the joint address is funded: audit it, give up the early
    /// refund right, arm the post-t1 watchdog.
    async fn handle_xmr_lock(&mut self, address: String) -> Result<(), SwapError> {
        if address.is_empty() {
            return Err(SwapError::Protocol("got empty address for locked XMR".into()));
        }
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| SwapError::Protocol("XMR lock before key exchange".into()))?;
        let joint = joint_account(&self.keys, peer, self.cfg.network)?;
        let joint_address = joint.address.to_string();
        if address != joint_address {
            return Err(SwapError::Protocol(
                "announced lock address does not match the joint address".into(),
            ));
        }

        let balance = self
            .probe
            .audit_balance(
                joint.view_bytes(),
                &joint_address,
                &format!("swap-{}-audit", self.id),
            )
            .await?;
        if balance.total < self.desired_pico {
            return Err(SwapError::Audit {
                got: balance.total,
                want: self.desired_pico,
            });
        }
        info!(session = %self.id, balance = balance.total, "locked XMR audited");

        self.xmr_locked.fire();
        let tx_hash = self.contract.set_ready().await.map_err(SwapError::Chain)?;
        self.ready_called = true;
        debug!(session = %self.id, %tx_hash, "escrow set ready");

        let now = self.contract.chain_time().await.map_err(SwapError::Chain)?;
        self.watchdogs.push(Watchdog::spawn(
            "post-t1",
            deadline_at(now, self.t1),
            self.claimed.clone(),
            self.cancel.clone(),
            self.timer_tx.clone(),
            AliceTimer::PostT1,
        ));

        self.gate.advance(MessageKind::NotifyClaimed);
        self.send(Message::NotifyReady).await?;
        Ok(())
    }

    /// Bob's claim is mined: his spend secret is in the event log, which
    /// is everything needed to own the joint XMR account.
    async fn handle_claimed(&mut self, tx_hash: String) -> Result<AliceOutcome, SwapError> {
        let secret = self
            .contract
            .read_event(&tx_hash, EventKind::Claimed)
            .await
            .map_err(SwapError::Chain)?;
        self.claimed.fire();
        let xmr_address = self.recover_joint_xmr(secret).await?;
        Ok(AliceOutcome::Success { xmr_address })
    }

    /// Recovery entry for handler errors. Nothing on chain yet means
    /// nothing to do; otherwise refund as soon as the windows allow.
    async fn abort(&mut self, err: SwapError) -> Result<AliceOutcome, SwapError> {
        if !self.contract.is_bound() {
            return Err(err);
        }
        warn!(session = %self.id, %err, "aborting session; recovering escrowed ETH");
        match self.try_refund(err.to_string()).await {
            Ok(outcome) => Ok(outcome),
            Err(refund_err) => {
                error!(session = %self.id, %refund_err, "recovery after abort failed");
                Err(err)
            }
        }
    }

    async fn on_stream_closed(&mut self) -> Result<AliceOutcome, SwapError> {
        match self.gate.next_expected() {
            // nothing on chain yet
            MessageKind::SendKeys => Err(SwapError::StreamClosed),
            _ => {
                warn!(session = %self.id, "stream closed mid-swap; recovering");
                self.try_refund("stream closed".to_string()).await
            }
        }
    }

    /// Refund under the window rules: the claim window `[t0, t1)`, and
    /// everything before t1 once `set_ready` collapsed the early refund
    /// right, belongs to Bob. Wait it out before submitting.
    async fn try_refund(&mut self, reason: String) -> Result<AliceOutcome, SwapError> {
        let now = self.contract.chain_time().await.map_err(SwapError::Chain)?;
        let claim_window_open =
            (now >= self.t0 && now < self.t1) || (self.ready_called && now < self.t1);
        if claim_window_open {
            let wait = until(now, self.t1);
            info!(
                session = %self.id,
                wait_secs = wait.as_secs(),
                "claim window belongs to peer; waiting until t1 to refund"
            );
            sleep(wait).await;
        }
        self.refund_or_recover(reason).await
    }

    /// Submits the refund; if it reverts because Bob claimed first, the
    /// claim secret is on chain and the joint XMR is recoverable instead.
    async fn refund_or_recover(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<AliceOutcome, SwapError> {
        let reason = reason.into();
        match self.contract.refund(self.keys.spend_secret()).await {
            Ok(tx_hash) => {
                info!(session = %self.id, %tx_hash, "refunded escrowed ETH");
                self.notify_best_effort(Message::NotifyRefund {
                    tx_hash: tx_hash.clone(),
                })
                .await;
                Ok(AliceOutcome::Refunded { tx_hash, reason })
            }
            Err(err) => {
                warn!(session = %self.id, %err, "refund reverted; checking escrow state");
                match self.contract.status().await.map_err(SwapError::Chain)? {
                    EscrowStatus::Claimed(secret) => {
                        info!(session = %self.id, "peer claimed first; recovering joint XMR");
                        let xmr_address = self.recover_joint_xmr(secret).await?;
                        Ok(AliceOutcome::Success { xmr_address })
                    }
                    _ => Err(SwapError::Chain(err)),
                }
            }
        }
    }

    async fn recover_joint_xmr(&mut self, secret: [u8; 32]) -> Result<String, SwapError> {
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| SwapError::Protocol("claim secret before key exchange".into()))?;
        let pair = recover_joint_keypair(&self.keys, &peer.commitment(), secret);
        // keep the keys recoverable even if wallet creation dies
        pair.write_to_file(&self.cfg.secret_path(self.id), self.cfg.network)?;
        let (xmr_address, balance) = self
            .probe
            .create_spendable(&pair, self.cfg.network, &format!("swap-{}-claimed", self.id))
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
