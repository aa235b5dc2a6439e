//! # hap-crypto
//!
//! Cryptographic primitives for accessory pairing and session encryption.
//!
//! This crate provides:
//! - SRP-6a (3072-bit, SHA-512) for pair-setup, accessory and controller side
//! - X25519 key agreement and Ed25519 signatures for pair-verify
//! - HKDF-SHA512 key derivation with the pairing labels
//! - ChaCha20-Poly1305 for handshake payloads and the session record layer
//! - TLV8 message encoding
//!
//! All secret material is zeroized on drop.

pub mod chacha;
pub mod curve25519;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;

pub use chacha::RecordCipher;
pub use curve25519::EcdhKeyPair;
pub use ed25519::LongTermKeyPair;
pub use keys::{EncryptionKey, SessionKeys, SharedSecret};
pub use srp::{SrpClient, SrpServer};
pub use tlv::{Method, Tlv8, TlvError, TlvType};
