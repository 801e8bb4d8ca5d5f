//! Wire messages exchanged over the per-swap protocol stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One protocol message. Keys travel as 32-byte lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Session key announcement. `eth_address` is set by the XMR-offerer
    /// only; it is where the claimed ETH should land.
    SendKeys {
        public_spend_key: String,
        private_view_key: String,
        spend_key_hash: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eth_address: Option<String>,
    },
    NotifyContractDeployed {
        address: String,
    },
    NotifyXmrLock {
        address: String,
    },
    NotifyReady,
    NotifyClaimed {
        tx_hash: String,
    },
    NotifyRefund {
        tx_hash: String,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::SendKeys { .. } => MessageKind::SendKeys,
            Message::NotifyContractDeployed { .. } => MessageKind::NotifyContractDeployed,
            Message::NotifyXmrLock { .. } => MessageKind::NotifyXmrLock,
            Message::NotifyReady => MessageKind::NotifyReady,
            Message::NotifyClaimed { .. } => MessageKind::NotifyClaimed,
            Message::NotifyRefund { .. } => MessageKind::NotifyRefund,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    SendKeys,
    NotifyContractDeployed,
    NotifyXmrLock,
    NotifyReady,
    NotifyClaimed,
    NotifyRefund,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::SendKeys => "SendKeys",
            MessageKind::NotifyContractDeployed => "NotifyContractDeployed",
            MessageKind::NotifyXmrLock => "NotifyXmrLock",
            MessageKind::NotifyReady => "NotifyReady",
            MessageKind::NotifyClaimed => "NotifyClaimed",
            MessageKind::NotifyRefund => "NotifyRefund",
        };
        f.write_str(name)
    }
}

/// The transport seam: one ordered, bidirectional stream per swap.
/// `recv` returning `None` means the peer closed the stream.
#[async_trait]
pub trait SwapStream: Send {
    async fn send(&mut self, msg: Message) -> anyhow::Result<()>;
    async fn recv(&mut self) -> Option<Message>;
}
