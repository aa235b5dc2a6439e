//! Error types for the HAP accessory.

use thiserror::Error;

/// Primary error type for all accessory operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("No live connection with id {0}")]
    UnknownConnection(u64),

    #[error("Operation timed out")]
    Timeout,
}

/// Errors raised by the pair-setup, pair-verify and pairings exchanges.
///
/// None of these are retried by the accessory; the exchange that produced
/// the error is aborted and nothing is committed to the pairing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Unknown controller: {0}")]
    UnknownController(String),

    #[error("Controller already paired: {0}")]
    AlreadyPaired(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Pairing store failure: {0}")]
    Store(String),
}

/// Record-layer errors. Every variant is fatal for the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Record decryption failed")]
    DecryptionFailed,

    #[error("Nonce counter exhausted")]
    CounterExhausted,

    #[error("Record too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Connection closed")]
    Closed,
}

/// Cryptographic operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("SRP proof mismatch")]
    ProofMismatch,
}

/// Parsing errors for wire formats.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Syntax(#[from] toml::de::Error),

    #[error("Invalid setup code: {0}")]
    InvalidSetupCode(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl From<ParseError> for PairingError {
    fn from(err: ParseError) -> Self {
        PairingError::MalformedMessage(err.to_string())
    }
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
