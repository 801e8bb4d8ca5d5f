//! Cryptographic primitives for the swap key agreement.
//!
//! Auditor notes:
//! - Uses curve25519-dalek only (no custom scalar/point arithmetic).
//! - Secret scalars are zeroized on drop.

pub mod agreement;
pub mod keys;
