//! Persistence boundary for pairing records.

use hap_core::error::PairingError;

use crate::store::{ControllerId, PairingRecord};

/// Durable storage behind [`crate::PairingStore`].
///
/// Calls are made while the store holds its write lock, so implementations
/// see writes one at a time.
#[cfg_attr(test, mockall::automock)]
pub trait PairingDatabase: Send + Sync {
    /// Every persisted record, read once when the store opens.
    fn load_all(&self) -> Result<Vec<PairingRecord>, PairingError>;

    /// Persist a new or updated record.
    fn save(&self, record: &PairingRecord) -> Result<(), PairingError>;

    /// Delete a record. Deleting an absent id is not an error.
    fn delete(&self, id: &ControllerId) -> Result<(), PairingError>;
}

