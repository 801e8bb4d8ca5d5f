use monero_wallet::{KeyError, WalletError};
use thiserror::Error;

use crate::message::MessageKind;

/// Session-fatal and recoverable failures, per the protocol's taxonomy.
#[derive(Debug, Error)]
pub enum SwapError {
    /// Wrong message kind, malformed fields, commitment mismatch, or a
    /// forged address. Fatal; the session refunds if it safely can.
    #[error("peer protocol violation: {0}")]
    Protocol(String),

    /// The locked XMR is short of what was agreed. Fatal for Alice, who
    /// has not yet given up her refund right.
    #[error("audit failed: locked {got} piconero, expected at least {want}")]
    Audit { got: u64, want: u64 },

    /// An escrow call reverted or a chain read kept failing.
    #[error("chain error: {0}")]
    Chain(#[source] anyhow::Error),

    /// Wallet RPC failure that survived the bounded retries.
    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),

    /// The protocol stream closed before the swap finished.
    #[error("protocol stream closed by peer")]
    StreamClosed,

    /// The session's scope was cancelled; not user-visible as a failure.
    #[error("session cancelled")]
    Cancelled,
}

impl SwapError {
    pub fn unexpected_message(got: MessageKind, expected: MessageKind) -> Self {
        Self::Protocol(format!("received {got}, expected {expected}"))
    }
}

impl From<KeyError> for SwapError {
    fn from(err: KeyError) -> Self {
        Self::Protocol(err.to_string())
    }
}
