//! Accessory (bridge) long-term identity.
//!
//! The identifier and Ed25519 keypair are shown to controllers in pair-setup
//! M6 and signed over in pair-verify M2, so both must survive restarts.

use hap_crypto::ed25519::LongTermKeyPair;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Bridge identity: a stable identifier plus the Ed25519 long-term keypair.
#[derive(Clone)]
pub struct BridgeIdentity {
    /// MAC-address-like identifier, e.g. `3C:A1:0F:22:B9:04`.
    id: String,
    keypair: LongTermKeyPair,
}

impl BridgeIdentity {
    /// Generate a new identity.
    pub fn generate() -> Self {
        Self::from_keypair(LongTermKeyPair::generate())
    }

    /// Build from a keypair, deriving the identifier from the public key.
    pub fn from_keypair(keypair: LongTermKeyPair) -> Self {
        let pk = keypair.public_key();
        let id = pk[..6]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");
        Self { id, keypair }
    }

    /// Build from a keypair with an explicit identifier.
    pub fn with_id(keypair: LongTermKeyPair, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keypair,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier as sent in TLV `Identifier` items.
    pub fn id_bytes(&self) -> &[u8] {
        self.id.as_bytes()
    }

    pub fn keypair(&self) -> &LongTermKeyPair {
        &self.keypair
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }

    /// Load from disk.
    ///
    /// File format: line 1 = identifier, line 2 = hex-encoded Ed25519 seed.
    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut lines = contents.lines();

        let id = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| invalid_data("missing identifier"))?
            .trim()
            .to_string();

        let seed_hex = lines.next().ok_or_else(|| invalid_data("missing seed"))?;
        let seed: [u8; 32] = hex::decode(seed_hex.trim())
            .map_err(|e| invalid_data(&format!("invalid hex: {}", e)))?
            .try_into()
            .map_err(|v: Vec<u8>| invalid_data(&format!("seed must be 32 bytes, got {}", v.len())))?;

        Ok(Self::with_id(LongTermKeyPair::from_seed(&seed), id))
    }

    /// Save to disk, creating parent directories. On unix the file is
    /// readable by the owner only.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;

        // mode() only applies on create; tighten a pre-existing file too.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        let contents = format!("{}\n{}\n", self.id, hex::encode(self.keypair.seed()));
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    }

    /// Load the identity at `path`, or generate and save a new one.
    pub fn load_or_generate(path: &Path) -> io::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let identity = Self::generate();
            identity.save(path)?;
            tracing::info!(id = %identity.id, "Generated new bridge identity");
            Ok(identity)
        }
    }
}

impl std::fmt::Debug for BridgeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeIdentity")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_mac_like() {
        let identity = BridgeIdentity::generate();
        let parts: Vec<&str> = identity.id().split(':').collect();
        assert_eq!(parts.len(), 6);
        assert!(parts.iter().all(|p| p.len() == 2 && u8::from_str_radix(p, 16).is_ok()));
    }

    #[test]
    fn id_is_stable_for_keypair() {
        let seed = [0x33u8; 32];
        let a = BridgeIdentity::from_keypair(LongTermKeyPair::from_seed(&seed));
        let b = BridgeIdentity::from_keypair(LongTermKeyPair::from_seed(&seed));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity");

        let identity = BridgeIdentity::generate();
        identity.save(&path).unwrap();

        let loaded = BridgeIdentity::load(&path).unwrap();
        assert_eq!(loaded.id(), identity.id());
        assert_eq!(loaded.public_key(), identity.public_key());
    }

    #[cfg(unix)]
    #[test]
    fn saved_identity_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity");
        std::fs::write(&path, "stale").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        BridgeIdentity::generate().save(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(BridgeIdentity::load(&path).is_ok());
    }

    #[test]
    fn load_or_generate_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity");

        let first = BridgeIdentity::load_or_generate(&path).unwrap();
        let second = BridgeIdentity::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn load_rejects_short_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity");
        std::fs::write(&path, "AA:BB:CC:DD:EE:FF\nabcd\n").unwrap();

        let err = BridgeIdentity::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn debug_hides_key_material() {
        let identity = BridgeIdentity::generate();
        let debug = format!("{:?}", identity);
        assert!(debug.contains(identity.id()));
        assert!(!debug.contains(&hex::encode(identity.keypair().seed())));
    }
}
