//! Wallet probe: audited, serialised access to the wallet daemon.
//!
//! monero-wallet-rpc holds one wallet at a time, so every
//! open→…→close sequence runs behind a process-wide mutex. Audit
//! sequences close their wallet before returning and never hold the lock
//! across protocol waits.

use std::sync::Arc;

use monero::Network;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::crypto::keys::PrivateKeyPair;
use crate::rpc::{Balance, WalletRpc};
use crate::types::{Result, WalletError};

#[derive(Clone)]
pub struct WalletProbe {
    rpc: Arc<dyn WalletRpc>,
    guard: Arc<Mutex<()>>,
    primary: Option<String>,
    account: u32,
}

impl WalletProbe {
    pub fn new(rpc: Arc<dyn WalletRpc>) -> Self {
        Self {
            rpc,
            guard: Arc::new(Mutex::new(())),
            primary: None,
            account: 0,
        }
    }

    /// A probe for a party that owns a funded wallet of its own; the
    /// wallet is re-opened after verification sequences and used as the
    /// source for [`WalletProbe::lock_funds`].
    pub fn with_primary(rpc: Arc<dyn WalletRpc>, primary: impl Into<String>) -> Self {
        Self {
            primary: Some(primary.into()),
            ..Self::new(rpc)
        }
    }

    /// Confirms the peer's private view key opens their claimed address
    /// view-only. The wallet only exists to prove the correspondence and
    /// is closed right away.
    pub async fn verify_view_pair(
        &self,
        view_key: [u8; 32],
        address: &str,
        name: &str,
    ) -> Result<()> {
        let _guard = self.guard.lock().await;
        debug!(wallet = name, address, "verifying view key against address");
        self.rpc.generate_view_only(view_key, address, name).await?;
        self.rpc.close_wallet().await?;
        self.reopen_primary().await
    }

    /// Opens a view-only wallet on the joint address, refreshes, and
    /// reads the balance. Used to audit the locked deposit before any
    /// irreversible step.
    pub async fn audit_balance(
        &self,
        view_key: [u8; 32],
        address: &str,
        name: &str,
    ) -> Result<Balance> {
        let _guard = self.guard.lock().await;
        debug!(wallet = name, address, "auditing balance via view-only wallet");
        self.rpc.generate_view_only(view_key, address, name).await?;
        self.rpc.refresh().await?;
        let balance = self.rpc.balance(self.account).await?;
        debug!(
            total = balance.total,
            unlocked = balance.unlocked,
            "audited joint account balance"
        );
        self.rpc.close_wallet().await?;
        self.reopen_primary().await?;
        Ok(balance)
    }

    /// Creates the final spendable wallet from a recovered joint key
    /// pair. The wallet stays open; it is the point of the whole swap.
    pub async fn create_spendable(
        &self,
        pair: &PrivateKeyPair,
        network: Network,
        name: &str,
    ) -> Result<(String, Balance)> {
        let address = pair.address(network)?.to_string();
        let _guard = self.guard.lock().await;
        self.rpc
            .generate_from_keys(pair.spend_bytes(), pair.view_bytes(), &address, name)
            .await?;
        self.rpc.refresh().await?;
        let balance = self.rpc.balance(self.account).await?;
        info!(wallet = name, address = %address, balance = balance.total, "created spendable wallet");
        Ok((address, balance))
    }

    /// Sends `amount` piconero from the primary wallet to `dest`.
    pub async fn lock_funds(&self, dest: &str, amount: u64) -> Result<String> {
        let primary = self.primary.as_deref().ok_or(WalletError::NoPrimaryWallet)?;
        let _guard = self.guard.lock().await;
        self.rpc.open_wallet(primary).await?;
        let tx_hash = self.rpc.transfer(dest, amount).await?;
        info!(dest, amount, tx_hash = %tx_hash, "locked funds");
        Ok(tx_hash)
    }

    async fn reopen_primary(&self) -> Result<()> {
        if let Some(primary) = self.primary.as_deref() {
            self.rpc.open_wallet(primary).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct RecordingRpc {
        calls: StdMutex<Vec<String>>,
    }

    impl RecordingRpc {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl WalletRpc for RecordingRpc {
        async fn generate_view_only(
            &self,
            _view_key: [u8; 32],
            _address: &str,
            name: &str,
        ) -> anyhow::Result<()> {
            self.record(format!("view_only:{name}"));
            Ok(())
        }

        async fn generate_from_keys(
            &self,
            _spend_key: [u8; 32],
            _view_key: [u8; 32],
            _address: &str,
            name: &str,
        ) -> anyhow::Result<()> {
            self.record(format!("from_keys:{name}"));
            Ok(())
        }

        async fn open_wallet(&self, filename: &str) -> anyhow::Result<()> {
            self.record(format!("open:{filename}"));
            Ok(())
        }

        async fn close_wallet(&self) -> anyhow::Result<()> {
            self.record("close");
            Ok(())
        }

        async fn refresh(&self) -> anyhow::Result<()> {
            self.record("refresh");
            Ok(())
        }

        async fn balance(&self, _account: u32) -> anyhow::Result<Balance> {
            self.record("balance");
            Ok(Balance {
                total: 42,
                unlocked: 42,
            })
        }

        async fn transfer(&self, _address: &str, _amount: u64) -> anyhow::Result<String> {
            self.record("transfer");
            Ok("txhash".to_string())
        }
    }

    #[tokio::test]
    async fn audit_runs_the_full_sequence_and_reopens_primary() {
        let rpc = Arc::new(RecordingRpc::default());
        let probe = WalletProbe::with_primary(rpc.clone(), "primary");

        let balance = probe
            .audit_balance([1u8; 32], "addr", "audit-wallet")
            .await
            .unwrap();
        assert_eq!(balance.total, 42);

        let calls = rpc.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "view_only:audit-wallet",
                "refresh",
                "balance",
                "close",
                "open:primary"
            ]
        );
    }

    #[tokio::test]
    async fn lock_funds_requires_a_primary_wallet() {
        let rpc = Arc::new(RecordingRpc::default());
        let probe = WalletProbe::new(rpc);
        assert!(matches!(
            probe.lock_funds("addr", 10).await,
            Err(WalletError::NoPrimaryWallet)
        ));
    }

    #[tokio::test]
    async fn concurrent_audits_do_not_interleave() {
        let rpc = Arc::new(RecordingRpc::default());
        let probe = WalletProbe::new(rpc.clone());

        let a = probe.clone();
        let b = probe.clone();
        let (ra, rb) = tokio::join!(
            a.audit_balance([1u8; 32], "addr-a", "wallet-a"),
            b.audit_balance([2u8; 32], "addr-b", "wallet-b"),
        );
        ra.unwrap();
        rb.unwrap();

        let calls = rpc.calls.lock().unwrap().clone();
        // each audit is a contiguous block of four calls
        for block in calls.chunks(4) {
            assert!(block[0].starts_with("view_only:"));
            assert_eq!(&block[1..], &["refresh", "balance", "close"]);
        }
    }
}
