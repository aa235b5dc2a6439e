//! # hap-pairing
//!
//! Accessory-side pairing for HAP.
//!
//! This crate implements:
//! - The pairing store and its persistence boundary
//! - Pair-setup (SRP-6a, M1-M6) as a per-connection state machine
//! - Pair-verify (X25519 + Ed25519, M1-M4) as a per-connection state machine
//! - Pairing administration (add, remove, list)
//! - The bridge's long-term identity

pub mod identity;
pub mod pair_setup;
pub mod pair_verify;
pub mod pairings;
pub mod reply;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
mod traits;

pub use identity::BridgeIdentity;
pub use pair_setup::{PairSetup, SetupStage};
pub use pair_verify::{PairVerify, VerifyStage, VerifyStep};
pub use pairings::{handle_pairings, PairingsOutcome};
pub use reply::{error_code, error_reply};
pub use store::{ControllerId, FileDatabase, MemoryDatabase, PairingRecord, PairingStore, Permissions};
pub use traits::PairingDatabase;
