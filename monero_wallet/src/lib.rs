//! Monero-side building blocks for the ETH/XMR atomic swap daemon.
//!
//! Auditor notes:
//! - All curve operations live under `crypto/` and use curve25519-dalek only.
//! - RPC access is a thin wrapper over `monero-rpc`, serialised by the probe.

pub mod crypto;
pub mod probe;
pub mod rpc;
pub mod types;

pub use crypto::agreement::{
    joint_account, recover_joint_keypair, verify_announcement, JointAccount, KeyAnnouncement,
    PeerKeys, SessionKeys,
};
pub use crypto::keys::{
    derive_view_key, spend_key_commitment, view_key_from_commitment, PrivateKeyPair, PublicKey,
    SecretKey,
};
pub use probe::WalletProbe;
pub use rpc::{Balance, MoneroWallet, RetryConfig, WalletRpc};
pub use types::{KeyError, Result, WalletError};

pub use monero::Network;
