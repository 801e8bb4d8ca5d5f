//! Paired in-memory protocol streams.

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::mpsc;

use swap_core::{Message, SwapStream};

/// One end of a bidirectional in-memory stream. Dropping an end closes
/// it: the peer's `recv` returns `None` and its `send` starts failing.
pub struct SimStream {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
}

pub fn stream_pair() -> (SimStream, SimStream) {
    let (a_tx, b_rx) = mpsc::channel(16);
    let (b_tx, a_rx) = mpsc::channel(16);
    (
        SimStream { tx: a_tx, rx: a_rx },
        SimStream { tx: b_tx, rx: b_rx },
    )
}

#[async_trait]
impl SwapStream for SimStream {
    async fn send(&mut self, msg: Message) -> anyhow::Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("stream closed"))
    }

    async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}
