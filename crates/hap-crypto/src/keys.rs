//! Session key types and derivation.

use crate::hkdf;
use hap_core::error::CryptoError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret from SRP or ECDH.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

/// 32-byte symmetric key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

/// Directional keys for one encrypted session, from the local side's view.
#[derive(Debug, Clone, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Seals what we send.
    pub send_key: EncryptionKey,
    /// Opens what we receive.
    pub recv_key: EncryptionKey,
}

impl SharedSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl EncryptionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl SessionKeys {
    /// Keys for the accessory end of a verified session.
    ///
    /// The accessory sends with `Control-Read-Encryption-Key` and receives
    /// with `Control-Write-Encryption-Key`.
    pub fn derive_accessory_keys(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        Ok(Self {
            send_key: EncryptionKey(hkdf::derive_control_read_key(shared_secret.as_bytes())?),
            recv_key: EncryptionKey(hkdf::derive_control_write_key(shared_secret.as_bytes())?),
        })
    }

    /// Keys for the controller end, the mirror of [`Self::derive_accessory_keys`].
    pub fn derive_controller_keys(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        Ok(Self {
            send_key: EncryptionKey(hkdf::derive_control_write_key(shared_secret.as_bytes())?),
            recv_key: EncryptionKey(hkdf::derive_control_read_key(shared_secret.as_bytes())?),
        })
    }

    /// Pair-setup M5/M6 key.
    pub fn derive_pair_setup_key(shared_secret: &SharedSecret) -> Result<EncryptionKey, CryptoError> {
        Ok(EncryptionKey(hkdf::derive_pair_setup_key(shared_secret.as_bytes())?))
    }

    /// Pair-verify M2/M3 key.
    pub fn derive_pair_verify_key(
        shared_secret: &SharedSecret,
    ) -> Result<EncryptionKey, CryptoError> {
        Ok(EncryptionKey(hkdf::derive_pair_verify_key(shared_secret.as_bytes())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessory_and_controller_keys_mirror() {
        let secret = SharedSecret::new(vec![0x42u8; 32]);
        let accessory = SessionKeys::derive_accessory_keys(&secret).unwrap();
        let controller = SessionKeys::derive_controller_keys(&secret).unwrap();

        assert_eq!(accessory.send_key, controller.recv_key);
        assert_eq!(accessory.recv_key, controller.send_key);
    }

    #[test]
    fn directional_keys_differ() {
        let secret = SharedSecret::new(vec![0x42u8; 32]);
        let keys = SessionKeys::derive_accessory_keys(&secret).unwrap();
        assert_ne!(keys.send_key, keys.recv_key);
    }

    #[test]
    fn different_secrets_different_keys() {
        let k1 = SessionKeys::derive_accessory_keys(&SharedSecret::new(vec![1u8; 32])).unwrap();
        let k2 = SessionKeys::derive_accessory_keys(&SharedSecret::new(vec![2u8; 32])).unwrap();
        assert_ne!(k1.send_key, k2.send_key);
    }

    #[test]
    fn debug_does_not_leak_key() {
        let key = EncryptionKey::new([0xAB; 32]);
        assert!(!format!("{:?}", key).to_lowercase().contains("ab"));
    }
}
