use std::str::FromStr;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use monero_rpc::{
    monero::{Address, Amount, PrivateKey},
    GenerateFromKeysArgs, RpcClientBuilder, TransferOptions, TransferPriority, WalletClient,
};
use tracing::debug;

use crate::rpc::{retry_rpc, Balance, RetryConfig, WalletRpc};

/// Thin wrapper over the wallet daemon's JSON-RPC, with bounded retries.
pub struct MoneroWallet {
    client: WalletClient,
    retry: RetryConfig,
}

impl MoneroWallet {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        Self::connect_with_config(url, RetryConfig::from_env()).await
    }

    pub async fn connect_with_config(url: &str, retry: RetryConfig) -> anyhow::Result<Self> {
        debug!(rpc_url = url, "connecting to monero-wallet-rpc");
        let client = RpcClientBuilder::new()
            .build(url)
            .context("build wallet RPC client")?
            .wallet();
        Ok(Self { client, retry })
    }

    async fn with_retry<T, F, Fut>(&self, label: &'static str, action: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        retry_rpc(label, &self.retry, action).await
    }

    fn generate_args(
        spend_key: Option<[u8; 32]>,
        view_key: [u8; 32],
        address: &str,
        filename: &str,
    ) -> anyhow::Result<GenerateFromKeysArgs> {
        let address = Address::from_str(address).map_err(|err| anyhow!("invalid address: {err}"))?;
        let viewkey =
            PrivateKey::from_slice(&view_key).map_err(|err| anyhow!("invalid view key: {err}"))?;
        let spendkey = spend_key
            .map(|bytes| {
                PrivateKey::from_slice(&bytes).map_err(|err| anyhow!("invalid spend key: {err}"))
            })
            .transpose()?;
        Ok(GenerateFromKeysArgs {
            restore_height: None,
            filename: filename.to_string(),
            address,
            spendkey,
            viewkey,
            password: String::new(),
            autosave_current: Some(true),
        })
    }
}

#[async_trait]
impl WalletRpc for MoneroWallet {
    async fn generate_view_only(
        &self,
        view_key: [u8; 32],
        address: &str,
        filename: &str,
    ) -> anyhow::Result<()> {
        debug!(wallet = filename, "generating view-only wallet");
        let address = address.to_string();
        let filename = filename.to_string();
        self.with_retry("generate_from_keys", || async {
            let args = Self::generate_args(None, view_key, &address, &filename)?;
            self.client.generate_from_keys(args).await?;
            Ok(())
        })
        .await
    }

    async fn generate_from_keys(
        &self,
        spend_key: [u8; 32],
        view_key: [u8; 32],
        address: &str,
        filename: &str,
    ) -> anyhow::Result<()> {
        debug!(wallet = filename, "generating spendable wallet");
        let address = address.to_string();
        let filename = filename.to_string();
        self.with_retry("generate_from_keys", || async {
            let args = Self::generate_args(Some(spend_key), view_key, &address, &filename)?;
            self.client.generate_from_keys(args).await?;
            Ok(())
        })
        .await
    }

    async fn open_wallet(&self, filename: &str) -> anyhow::Result<()> {
        debug!(wallet = filename, "opening wallet");
        let filename = filename.to_string();
        self.with_retry("open_wallet", || async {
            self.client.open_wallet(filename.clone(), None).await?;
            Ok(())
        })
        .await
    }

    async fn close_wallet(&self) -> anyhow::Result<()> {
        debug!("closing wallet");
        self.with_retry("close_wallet", || async {
            self.client.close_wallet().await?;
            Ok(())
        })
        .await
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        debug!("refreshing wallet");
        self.with_retry("refresh", || async {
            self.client.refresh(None).await?;
            Ok(())
        })
        .await
    }

    async fn balance(&self, account: u32) -> anyhow::Result<Balance> {
        self.with_retry("get_balance", || async {
            let data = self.client.get_balance(account.into(), None).await?;
            Ok(Balance {
                total: data.balance.as_pico(),
                unlocked: data.unlocked_balance.as_pico(),
            })
        })
        .await
    }

    async fn transfer(&self, address: &str, amount: u64) -> anyhow::Result<String> {
        debug!(amount, "submitting transfer");
        let destination =
            Address::from_str(address).map_err(|err| anyhow!("invalid destination: {err}"))?;
        self.with_retry("transfer", || async {
            let mut destinations = std::collections::HashMap::new();
            destinations.insert(destination, Amount::from_pico(amount));
            let transfer = self
                .client
                .transfer(destinations, TransferPriority::Default, TransferOptions::default())
                .await?;
            Ok(transfer.tx_hash.to_string())
        })
        .await
    }
}
