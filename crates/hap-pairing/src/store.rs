//! Pairing store: which controllers may open encrypted sessions.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use hap_core::error::PairingError;
use hap_crypto::ed25519::LongTermKeyPair;
use serde::{Deserialize, Serialize};

use crate::identity::BridgeIdentity;
use crate::traits::PairingDatabase;

/// Controller identifier as sent in the `Identifier` TLV.
///
/// Opaque bytes, normally a UTF-8 UUID string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(Vec<u8>);

impl ControllerId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex form, used for file names.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<&str> for ControllerId {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for ControllerId {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "0x{}", self.to_hex()),
        }
    }
}

impl fmt::Debug for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControllerId({})", self)
    }
}

impl Serialize for ControllerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ControllerId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(Self).map_err(serde::de::Error::custom)
    }
}

/// Controller permission level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permissions {
    User,
    Admin,
}

impl Permissions {
    /// Value of the `Permissions` TLV item.
    pub fn as_byte(self) -> u8 {
        match self {
            Permissions::User => 0x00,
            Permissions::Admin => 0x01,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Permissions::User),
            0x01 => Some(Permissions::Admin),
            _ => None,
        }
    }
}

/// One paired controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRecord {
    pub controller_id: ControllerId,
    #[serde(with = "hex_key")]
    pub public_key: [u8; 32],
    pub permissions: Permissions,
}

impl PairingRecord {
    pub fn new(controller_id: ControllerId, public_key: [u8; 32], permissions: Permissions) -> Self {
        Self {
            controller_id,
            public_key,
            permissions,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.permissions == Permissions::Admin
    }
}

mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::invalid_length(v.len(), &"32 bytes"))
    }
}

/// Shared pairing state for the whole accessory.
///
/// Reads take the read lock; writes take the write lock and call the database
/// before touching the map, so a record the database rejected is never visible.
pub struct PairingStore {
    identity: Arc<BridgeIdentity>,
    records: RwLock<HashMap<ControllerId, PairingRecord>>,
    database: Box<dyn PairingDatabase>,
}

impl PairingStore {
    /// Open a store over `database`, loading every persisted record.
    pub fn open(
        identity: Arc<BridgeIdentity>,
        database: Box<dyn PairingDatabase>,
    ) -> Result<Self, PairingError> {
        let records = database
            .load_all()?
            .into_iter()
            .map(|r| (r.controller_id.clone(), r))
            .collect::<HashMap<_, _>>();

        tracing::debug!(count = records.len(), "Loaded pairing records");

        Ok(Self {
            identity,
            records: RwLock::new(records),
            database,
        })
    }

    /// Store backed by a fresh [`MemoryDatabase`].
    pub fn in_memory(identity: Arc<BridgeIdentity>) -> Self {
        Self {
            identity,
            records: RwLock::new(HashMap::new()),
            database: Box::new(MemoryDatabase::new()),
        }
    }

    pub fn identity(&self) -> &Arc<BridgeIdentity> {
        &self.identity
    }

    /// The accessory's long-term signing keypair.
    pub fn accessory_keypair(&self) -> &LongTermKeyPair {
        self.identity.keypair()
    }

    /// Look up a controller.
    pub fn find(&self, id: &ControllerId) -> Result<PairingRecord, PairingError> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| PairingError::UnknownController(id.to_string()))
    }

    /// Add a new record. Fails with `AlreadyPaired` if the id exists.
    pub fn add(&self, record: PairingRecord) -> Result<(), PairingError> {
        let mut records = self.write()?;
        if records.contains_key(&record.controller_id) {
            return Err(PairingError::AlreadyPaired(record.controller_id.to_string()));
        }
        self.database.save(&record)?;
        tracing::info!(controller = %record.controller_id, permissions = ?record.permissions, "Pairing added");
        records.insert(record.controller_id.clone(), record);
        Ok(())
    }

    /// Add a controller from pair-setup.
    ///
    /// The first controller ever paired becomes Admin, later ones are User.
    /// The decision is made under the write lock.
    pub fn add_from_setup(
        &self,
        controller_id: ControllerId,
        public_key: [u8; 32],
    ) -> Result<PairingRecord, PairingError> {
        let mut records = self.write()?;
        if records.contains_key(&controller_id) {
            return Err(PairingError::AlreadyPaired(controller_id.to_string()));
        }
        let permissions = if records.is_empty() {
            Permissions::Admin
        } else {
            Permissions::User
        };
        let record = PairingRecord::new(controller_id, public_key, permissions);
        self.database.save(&record)?;
        tracing::info!(controller = %record.controller_id, permissions = ?permissions, "Pairing added");
        records.insert(record.controller_id.clone(), record.clone());
        Ok(record)
    }

    /// Add a record, or update permissions if the id exists with the same key.
    ///
    /// An existing id with a different key is `AlreadyPaired`.
    pub fn add_or_update(&self, record: PairingRecord) -> Result<(), PairingError> {
        let mut records = self.write()?;
        if let Some(existing) = records.get(&record.controller_id) {
            if existing.public_key != record.public_key {
                return Err(PairingError::AlreadyPaired(record.controller_id.to_string()));
            }
            if existing.permissions == record.permissions {
                return Ok(());
            }
        }
        self.database.save(&record)?;
        tracing::info!(controller = %record.controller_id, permissions = ?record.permissions, "Pairing stored");
        records.insert(record.controller_id.clone(), record);
        Ok(())
    }

    /// Remove a record. Returns whether one existed.
    pub fn remove(&self, id: &ControllerId) -> Result<bool, PairingError> {
        let mut records = self.write()?;
        if !records.contains_key(id) {
            return Ok(false);
        }
        self.database.delete(id)?;
        records.remove(id);
        tracing::info!(controller = %id, "Pairing removed");
        Ok(true)
    }

    /// Snapshot of every record, ordered by controller id.
    pub fn list(&self) -> Result<Vec<PairingRecord>, PairingError> {
        let mut records: Vec<_> = self.read()?.values().cloned().collect();
        records.sort_by(|a, b| a.controller_id.cmp(&b.controller_id));
        Ok(records)
    }

    pub fn is_paired(&self) -> bool {
        self.read().map(|r| !r.is_empty()).unwrap_or(false)
    }

    pub fn has_admin(&self) -> bool {
        self.read()
            .map(|r| r.values().any(PairingRecord::is_admin))
            .unwrap_or(false)
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ControllerId, PairingRecord>>, PairingError>
    {
        self.records
            .read()
            .map_err(|_| PairingError::Store("pairing store lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ControllerId, PairingRecord>>, PairingError>
    {
        self.records
            .write()
            .map_err(|_| PairingError::Store("pairing store lock poisoned".to_string()))
    }
}

/// Records kept in process memory only.
#[derive(Default)]
pub struct MemoryDatabase {
    records: Mutex<HashMap<ControllerId, PairingRecord>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ControllerId, PairingRecord>>, PairingError> {
        self.records
            .lock()
            .map_err(|_| PairingError::Store("memory database lock poisoned".to_string()))
    }
}

impl PairingDatabase for MemoryDatabase {
    fn load_all(&self) -> Result<Vec<PairingRecord>, PairingError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn save(&self, record: &PairingRecord) -> Result<(), PairingError> {
        self.lock()?.insert(record.controller_id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, id: &ControllerId) -> Result<(), PairingError> {
        self.lock()?.remove(id);
        Ok(())
    }
}

/// One JSON file per controller, named by the hex controller id.
pub struct FileDatabase {
    dir: PathBuf,
}

impl FileDatabase {
    /// Open (and create if needed) the directory at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &ControllerId) -> PathBuf {
        self.dir.join(format!("{}.json", id.to_hex()))
    }
}

impl PairingDatabase for FileDatabase {
    fn load_all(&self) -> Result<Vec<PairingRecord>, PairingError> {
        let entries = std::fs::read_dir(&self.dir).map_err(store_err)?;
        let mut records = Vec::new();

        for entry in entries {
            let path = entry.map_err(store_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = std::fs::read_to_string(&path).map_err(store_err)?;
            match serde_json::from_str::<PairingRecord>(&contents) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable pairing record");
                }
            }
        }

        Ok(records)
    }

    fn save(&self, record: &PairingRecord) -> Result<(), PairingError> {
        let json = serde_json::to_vec_pretty(record).map_err(store_err)?;
        let path = self.path_for(&record.controller_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(store_err)?;
        std::fs::rename(&tmp, &path).map_err(store_err)
    }

    fn delete(&self, id: &ControllerId) -> Result<(), PairingError> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err(e)),
        }
    }
}

fn store_err(err: impl fmt::Display) -> PairingError {
    PairingError::Store(err.to_string())
}
