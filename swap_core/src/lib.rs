//! Per-session state machines for a trust-minimised ETH/XMR atomic swap.
//!
//! One [`session::AliceSession`] (offers ETH, wants XMR) or
//! [`session::BobSession`] (offers XMR, wants ETH) is driven per swap,
//! fed by the peer's protocol messages and by watchdog timers derived
//! from the escrow contract's two timeouts `t0 < t1`. The escrow client,
//! wallet daemon, and message transport are trait seams; everything that
//! can lose funds lives here.

pub mod contract;
pub mod error;
pub mod gate;
pub mod message;
pub mod session;
pub mod watchdog;

pub use contract::{ClaimRelayer, ContractView, EscrowClient, EscrowStatus, EventKind};
pub use error::SwapError;
pub use gate::MessageGate;
pub use message::{Message, MessageKind, SwapStream};
pub use session::{
    AliceOutcome, AliceSession, BobOutcome, BobSession, Role, SessionConfig, SessionId, SessionIds,
};
pub use watchdog::{race, Signal, Watchdog, WhichFired};
