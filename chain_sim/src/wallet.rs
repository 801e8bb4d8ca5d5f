//! In-memory wallet daemon over a shared ledger.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use monero::{Address, Network};
use rand::RngCore;

use monero_wallet::{Balance, PrivateKeyPair, SecretKey, WalletRpc};

/// The X-chain ledger shared by every simulated wallet: address →
/// balance in piconero.
#[derive(Clone, Default)]
pub struct SimChain {
    balances: Arc<Mutex<HashMap<String, u64>>>,
}

impl SimChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&self, address: &str, amount: u64) {
        *self.balances.lock().unwrap().entry(address.to_string()).or_default() += amount;
    }

    pub fn balance_of(&self, address: &str) -> u64 {
        self.balances
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    fn debit(&self, address: &str, amount: u64) -> anyhow::Result<()> {
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(address.to_string()).or_default();
        if *balance < amount {
            bail!("not enough unlocked balance: have {balance}, need {amount}");
        }
        *balance -= amount;
        Ok(())
    }
}

struct WalletEntry {
    address: String,
    spendable: bool,
}

#[derive(Default)]
struct Inner {
    wallets: HashMap<String, WalletEntry>,
    open: Option<String>,
}

/// One party's wallet daemon. Like the real one it holds a single open
/// wallet at a time and validates key material against the address when
/// restoring from keys.
pub struct SimWallet {
    chain: SimChain,
    inner: Mutex<Inner>,
}

impl SimWallet {
    pub fn new(chain: SimChain) -> Self {
        Self {
            chain,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A daemon with a funded, spendable wallet already on disk.
    /// Returns the wallet's address alongside.
    pub fn with_funded_primary(
        chain: SimChain,
        name: &str,
        network: Network,
        amount: u64,
    ) -> (Self, String) {
        let pair = PrivateKeyPair::new(SecretKey::random(), SecretKey::random());
        let address = pair
            .address(network)
            .expect("freshly generated keys form an address")
            .to_string();
        chain.credit(&address, amount);
        let wallet = Self::new(chain);
        wallet.inner.lock().unwrap().wallets.insert(
            name.to_string(),
            WalletEntry {
                address: address.clone(),
                spendable: true,
            },
        );
        (wallet, address)
    }

    fn check_view_key(view_key: [u8; 32], address: &Address) -> anyhow::Result<()> {
        let derived = EdwardsPoint::mul_base(&Scalar::from_bytes_mod_order(view_key))
            .compress()
            .to_bytes();
        if derived.as_slice() != address.public_view.as_bytes() {
            bail!("view key does not belong to the address");
        }
        Ok(())
    }

    fn check_spend_key(spend_key: [u8; 32], address: &Address) -> anyhow::Result<()> {
        let derived = EdwardsPoint::mul_base(&Scalar::from_bytes_mod_order(spend_key))
            .compress()
            .to_bytes();
        if derived.as_slice() != address.public_spend.as_bytes() {
            bail!("spend key does not belong to the address");
        }
        Ok(())
    }

    fn register(&self, name: &str, address: String, spendable: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.wallets.insert(
            name.to_string(),
            WalletEntry { address, spendable },
        );
        inner.open = Some(name.to_string());
    }

    fn open_entry<T>(&self, read: impl FnOnce(&WalletEntry) -> T) -> anyhow::Result<T> {
        let inner = self.inner.lock().unwrap();
        let name = inner.open.as_ref().ok_or_else(|| anyhow!("no wallet open"))?;
        let entry = inner
            .wallets
            .get(name)
            .ok_or_else(|| anyhow!("open wallet vanished"))?;
        Ok(read(entry))
    }
}

fn random_tx_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
impl WalletRpc for SimWallet {
    async fn generate_view_only(
        &self,
        view_key: [u8; 32],
        address: &str,
        filename: &str,
    ) -> anyhow::Result<()> {
        let parsed = Address::from_str(address).map_err(|err| anyhow!("invalid address: {err}"))?;
        Self::check_view_key(view_key, &parsed)?;
        self.register(filename, address.to_string(), false);
        Ok(())
    }

    async fn generate_from_keys(
        &self,
        spend_key: [u8; 32],
        view_key: [u8; 32],
        address: &str,
        filename: &str,
    ) -> anyhow::Result<()> {
        let parsed = Address::from_str(address).map_err(|err| anyhow!("invalid address: {err}"))?;
        Self::check_spend_key(spend_key, &parsed)?;
        Self::check_view_key(view_key, &parsed)?;
        self.register(filename, address.to_string(), true);
        Ok(())
    }

    async fn open_wallet(&self, filename: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.wallets.contains_key(filename) {
            bail!("no such wallet: {filename}");
        }
        inner.open = Some(filename.to_string());
        Ok(())
    }

    async fn close_wallet(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.open.take().is_none() {
            bail!("no wallet open");
        }
        Ok(())
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        self.open_entry(|_| ())
    }

    async fn balance(&self, _account: u32) -> anyhow::Result<Balance> {
        let address = self.open_entry(|entry| entry.address.clone())?;
        let total = self.chain.balance_of(&address);
        Ok(Balance {
            total,
            unlocked: total,
        })
    }

    async fn transfer(&self, address: &str, amount: u64) -> anyhow::Result<String> {
        Address::from_str(address).map_err(|err| anyhow!("invalid destination: {err}"))?;
        let (source, spendable) =
            self.open_entry(|entry| (entry.address.clone(), entry.spendable))?;
        if !spendable {
            bail!("open wallet is view-only");
        }
        self.chain.debit(&source, amount)?;
        self.chain.credit(address, amount);
        Ok(random_tx_hash())
    }
}

#[cfg(test)]
mod tests {
    use monero_wallet::derive_view_key;

    use super::*;

    fn keyed_address() -> (SecretKey, SecretKey, String) {
        let spend = SecretKey::random();
        let view = derive_view_key(&spend);
        let pair = PrivateKeyPair::new(spend.clone(), view.clone());
        let address = pair.address(Network::Stagenet).unwrap().to_string();
        (spend, view, address)
    }

    #[tokio::test]
    async fn view_only_restore_validates_the_view_key() {
        let wallet = SimWallet::new(SimChain::new());
        let (_, view, address) = keyed_address();

        wallet
            .generate_view_only(view.as_scalar().to_bytes(), &address, "ok")
            .await
            .unwrap();

        let (_, _, other_address) = keyed_address();
        assert!(wallet
            .generate_view_only(view.as_scalar().to_bytes(), &other_address, "bad")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn balance_tracks_the_shared_ledger() {
        let chain = SimChain::new();
        let wallet = SimWallet::new(chain.clone());
        let (_, view, address) = keyed_address();
        chain.credit(&address, 1_000);

        wallet
            .generate_view_only(view.as_scalar().to_bytes(), &address, "w")
            .await
            .unwrap();
        let balance = wallet.balance(0).await.unwrap();
        assert_eq!(balance.total, 1_000);
    }

    #[tokio::test]
    async fn transfer_moves_funds_and_respects_balances() {
        let chain = SimChain::new();
        let (wallet, source) =
            SimWallet::with_funded_primary(chain.clone(), "primary", Network::Stagenet, 500);
        let (_, _, dest) = keyed_address();

        wallet.open_wallet("primary").await.unwrap();
        wallet.transfer(&dest, 200).await.unwrap();
        assert_eq!(chain.balance_of(&source), 300);
        assert_eq!(chain.balance_of(&dest), 200);

        assert!(wallet.transfer(&dest, 400).await.is_err());
    }

    #[tokio::test]
    async fn view_only_wallets_cannot_spend() {
        let chain = SimChain::new();
        let wallet = SimWallet::new(chain.clone());
        let (_, view, address) = keyed_address();
        chain.credit(&address, 100);

        wallet
            .generate_view_only(view.as_scalar().to_bytes(), &address, "w")
            .await
            .unwrap();
        let (_, _, dest) = keyed_address();
        assert!(wallet.transfer(&dest, 50).await.is_err());
    }
}
