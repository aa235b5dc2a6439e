//! HKDF-SHA512 key derivation with the pairing salt/info labels.

use hap_core::error::CryptoError;

use hkdf::Hkdf;
use sha2::Sha512;

/// Derive `length` bytes using HKDF-SHA512.
pub fn derive_key(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".to_string()))?;
    Ok(okm)
}

/// Derive a 32-byte key.
pub fn derive_key_32(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".to_string()))?;
    Ok(okm)
}

/// Salt and info labels.
pub mod constants {
    pub const PAIR_SETUP_ENCRYPT_SALT: &[u8] = b"Pair-Setup-Encrypt-Salt";
    pub const PAIR_SETUP_ENCRYPT_INFO: &[u8] = b"Pair-Setup-Encrypt-Info";

    pub const PAIR_SETUP_CONTROLLER_SIGN_SALT: &[u8] = b"Pair-Setup-Controller-Sign-Salt";
    pub const PAIR_SETUP_CONTROLLER_SIGN_INFO: &[u8] = b"Pair-Setup-Controller-Sign-Info";

    pub const PAIR_SETUP_ACCESSORY_SIGN_SALT: &[u8] = b"Pair-Setup-Accessory-Sign-Salt";
    pub const PAIR_SETUP_ACCESSORY_SIGN_INFO: &[u8] = b"Pair-Setup-Accessory-Sign-Info";

    pub const PAIR_VERIFY_ENCRYPT_SALT: &[u8] = b"Pair-Verify-Encrypt-Salt";
    pub const PAIR_VERIFY_ENCRYPT_INFO: &[u8] = b"Pair-Verify-Encrypt-Info";

    pub const CONTROL_SALT: &[u8] = b"Control-Salt";
    /// Controller to accessory direction.
    pub const CONTROL_WRITE_KEY_INFO: &[u8] = b"Control-Write-Encryption-Key";
    /// Accessory to controller direction.
    pub const CONTROL_READ_KEY_INFO: &[u8] = b"Control-Read-Encryption-Key";
}

/// Key protecting the M5/M6 sub-TLVs.
pub fn derive_pair_setup_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::PAIR_SETUP_ENCRYPT_SALT,
        constants::PAIR_SETUP_ENCRYPT_INFO,
    )
}

/// Material the controller prefixes to its M5 signature.
pub fn derive_controller_sign_material(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::PAIR_SETUP_CONTROLLER_SIGN_SALT,
        constants::PAIR_SETUP_CONTROLLER_SIGN_INFO,
    )
}

/// Material the accessory prefixes to its M6 signature.
pub fn derive_accessory_sign_material(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::PAIR_SETUP_ACCESSORY_SIGN_SALT,
        constants::PAIR_SETUP_ACCESSORY_SIGN_INFO,
    )
}

/// Key protecting the M2/M3 verify sub-TLVs.
pub fn derive_pair_verify_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::PAIR_VERIFY_ENCRYPT_SALT,
        constants::PAIR_VERIFY_ENCRYPT_INFO,
    )
}

/// Controller to accessory session key.
pub fn derive_control_write_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::CONTROL_SALT,
        constants::CONTROL_WRITE_KEY_INFO,
    )
}

/// Accessory to controller session key.
pub fn derive_control_read_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::CONTROL_SALT,
        constants::CONTROL_READ_KEY_INFO,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    mod derive_key {
        use super::*;

        #[test]
        fn derives_requested_length() {
            let ikm = [0x0bu8; 22];
            assert_eq!(derive_key(&ikm, b"salt", b"", 16).unwrap().len(), 16);
            assert_eq!(derive_key(&ikm, b"salt", b"", 64).unwrap().len(), 64);
        }

        #[test]
        fn different_salts_produce_different_keys() {
            let ikm = [0x0bu8; 22];
            let key1 = derive_key_32(&ikm, b"salt1", b"info").unwrap();
            let key2 = derive_key_32(&ikm, b"salt2", b"info").unwrap();
            assert_ne!(key1, key2);
        }

        #[test]
        fn rejects_oversized_output() {
            // HKDF-SHA512 caps output at 255 * 64 bytes.
            let result = derive_key(&[1u8; 32], b"salt", b"info", 255 * 64 + 1);
            assert!(matches!(result, Err(CryptoError::KeyDerivation(_))));
        }

        #[test]
        fn rfc5869_style_vector_is_stable() {
            let ikm = hex::decode("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b").unwrap();
            let salt = hex::decode("000102030405060708090a0b0c").unwrap();
            let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

            let okm = derive_key(&ikm, &salt, &info, 42).unwrap();
            assert_eq!(okm.len(), 42);
            assert_eq!(okm, derive_key(&ikm, &salt, &info, 42).unwrap());
        }
    }

    mod pairing_labels {
        use super::*;

        #[test]
        fn every_label_yields_a_distinct_key() {
            let secret = [0xABu8; 64];
            let keys = [
                derive_pair_setup_key(&secret).unwrap(),
                derive_controller_sign_material(&secret).unwrap(),
                derive_accessory_sign_material(&secret).unwrap(),
                derive_pair_verify_key(&secret).unwrap(),
                derive_control_write_key(&secret).unwrap(),
                derive_control_read_key(&secret).unwrap(),
            ];

            for (i, a) in keys.iter().enumerate() {
                for b in keys.iter().skip(i + 1) {
                    assert_ne!(a, b);
                }
            }
        }

        #[test]
        fn control_keys_match_generic_derivation() {
            let secret = [0x11u8; 32];
            let expected =
                derive_key(&secret, b"Control-Salt", b"Control-Read-Encryption-Key", 32).unwrap();
            assert_eq!(derive_control_read_key(&secret).unwrap().to_vec(), expected);
        }
    }
}
