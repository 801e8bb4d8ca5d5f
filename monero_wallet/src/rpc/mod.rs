pub mod retry;
pub mod wallet;

use async_trait::async_trait;

pub use retry::{retry_rpc, RetryConfig};
pub use wallet::MoneroWallet;

/// Wallet balance in piconero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub total: u64,
    pub unlocked: u64,
}

/// The slice of the wallet daemon's JSON-RPC the swap needs. The real
/// implementation is [`MoneroWallet`]; tests substitute an in-memory
/// daemon.
#[async_trait]
pub trait WalletRpc: Send + Sync {
    /// Creates and opens a view-only wallet for `address`. Fails if the
    /// view key does not belong to the address.
    async fn generate_view_only(
        &self,
        view_key: [u8; 32],
        address: &str,
        filename: &str,
    ) -> anyhow::Result<()>;

    /// Creates and opens a spendable wallet from a full key pair.
    async fn generate_from_keys(
        &self,
        spend_key: [u8; 32],
        view_key: [u8; 32],
        address: &str,
        filename: &str,
    ) -> anyhow::Result<()>;

    async fn open_wallet(&self, filename: &str) -> anyhow::Result<()>;

    async fn close_wallet(&self) -> anyhow::Result<()>;

    async fn refresh(&self) -> anyhow::Result<()>;

    async fn balance(&self, account: u32) -> anyhow::Result<Balance>;

    /// Sends `amount` piconero from the open wallet, returning the tx hash.
    async fn transfer(&self, address: &str, amount: u64) -> anyhow::Result<String>;
}
