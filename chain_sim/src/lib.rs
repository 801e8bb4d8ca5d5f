//! Deterministic in-memory doubles for the swap's collaborators: an
//! escrow that enforces the real timeout windows, a wallet daemon over a
//! shared ledger, and a paired protocol stream. Everything is driven by
//! the tokio clock so paused-time tests control the timeline.

pub mod escrow;
pub mod stream;
pub mod wallet;

pub use escrow::{FailingClaimEscrow, MockEscrow};
pub use stream::{stream_pair, SimStream};
pub use wallet::{SimChain, SimWallet};
