//! # hap-core
//!
//! Core types and error definitions shared across the HAP accessory crates.
//!
//! This crate provides:
//! - The error taxonomy for pairing, transport, crypto and config failures
//! - Setup code validation
//! - Accessory configuration

pub mod config;
pub mod error;
pub mod setup_code;

pub use config::{AccessoryConfig, AccessoryConfigBuilder};
pub use error::{
    ConfigError, CryptoError, Error, PairingError, ParseError, Result, TransportError,
};
pub use setup_code::SetupCode;
