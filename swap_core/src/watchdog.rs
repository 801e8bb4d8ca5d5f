//! Timer/signal primitives for racing protocol progress against the
//! escrow deadlines.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Single-shot broadcast: fired once, observed by any number of waiters,
/// before or after the fact. Firing twice is a bug and is asserted.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { inner: Arc::new(tx) }
    }

    pub fn fire(&self) {
        let prev = self.inner.send_replace(true);
        assert!(!prev, "signal fired more than once");
    }

    /// Idempotent variant for cancellation scopes.
    pub fn fire_if_clear(&self) -> bool {
        !self.inner.send_replace(true)
    }

    pub fn fired(&self) -> bool {
        *self.inner.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.inner.subscribe();
        // the sender lives in self, so this cannot error
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhichFired {
    Deadline,
    Signal,
    Cancelled,
}

/// Races a deadline against a progress signal and the session's
/// cancellation scope. Exactly one branch is reported; cancellation wins
/// ties, progress beats the deadline.
pub async fn race(deadline: Instant, progress: &Signal, cancel: &Signal) -> WhichFired {
    tokio::select! {
        biased;
        _ = cancel.wait() => WhichFired::Cancelled,
        _ = progress.wait() => WhichFired::Signal,
        _ = sleep_until(deadline) => WhichFired::Deadline,
    }
}

/// A spawned watchdog. It never touches session state: on deadline it
/// delivers `tag` into the session's timer channel and exits; on
/// progress or cancellation it exits silently.
pub struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    pub fn spawn<T>(
        name: &'static str,
        deadline: Instant,
        progress: Signal,
        cancel: Signal,
        fires: mpsc::Sender<T>,
        tag: T,
    ) -> Self
    where
        T: Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match race(deadline, &progress, &cancel).await {
                WhichFired::Deadline => {
                    debug!(watchdog = name, "deadline reached");
                    let _ = fires.send(tag).await;
                }
                WhichFired::Signal => debug!(watchdog = name, "progress made before deadline"),
                WhichFired::Cancelled => debug!(watchdog = name, "cancelled"),
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the task to retire; used at session teardown so no
    /// timer outlives its session.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    #[should_panic(expected = "signal fired more than once")]
    fn double_fire_is_a_bug() {
        let signal = Signal::new();
        signal.fire();
        signal.fire();
    }

    #[tokio::test]
    async fn wait_after_fire_returns_immediately() {
        let signal = Signal::new();
        signal.fire();
        signal.wait().await;
        assert!(signal.fired());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_when_nothing_happens() {
        let which = race(
            Instant::now() + Duration::from_secs(60),
            &Signal::new(),
            &Signal::new(),
        )
        .await;
        assert_eq!(which, WhichFired::Deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_preempts_the_deadline() {
        let progress = Signal::new();
        progress.fire();
        let which = race(
            Instant::now() + Duration::from_secs(60),
            &progress,
            &Signal::new(),
        )
        .await;
        assert_eq!(which, WhichFired::Signal);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_everything() {
        let progress = Signal::new();
        let cancel = Signal::new();
        progress.fire();
        cancel.fire();
        let which = race(Instant::now(), &progress, &cancel).await;
        assert_eq!(which, WhichFired::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_delivers_its_tag_on_deadline() {
        let (tx, mut rx) = mpsc::channel(1);
        let _dog = Watchdog::spawn(
            "test",
            Instant::now() + Duration::from_secs(30),
            Signal::new(),
            Signal::new(),
            tx,
            7u32,
        );
        assert_eq!(rx.recv().await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_watchdog_retires_without_firing() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = Signal::new();
        let dog = Watchdog::spawn(
            "test",
            Instant::now() + Duration::from_secs(30),
            Signal::new(),
            cancel.clone(),
            tx,
            0u32,
        );
        cancel.fire();
        // the task retires promptly and the channel closes without a tag
        assert_eq!(rx.recv().await, None);
        tokio::task::yield_now().await;
        assert!(dog.is_finished());
    }
}
