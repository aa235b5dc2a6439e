//! TLV8 encoding/decoding for pairing messages.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes]
//! Values longer than 255 bytes are fragmented across consecutive items of
//! the same type. Items keep their order so that list responses, whose
//! records are split by `Separator` items, survive a round trip.

use hap_core::error::ParseError;

/// TLV type constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    Flags = 0x13,
    Separator = 0xFF,
}

/// Values of the `Method` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    PairSetup = 0x00,
    PairSetupWithAuth = 0x01,
    PairVerify = 0x02,
    AddPairing = 0x03,
    RemovePairing = 0x04,
    ListPairings = 0x05,
}

/// Values of the `Error` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvError {
    Unknown = 0x01,
    Authentication = 0x02,
    Backoff = 0x03,
    MaxPeers = 0x04,
    MaxTries = 0x05,
    Unavailable = 0x06,
    Busy = 0x07,
}

/// Parsed TLV8 message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: Vec<(u8, Vec<u8>)>,
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Message carrying only a `State` item.
    pub fn with_state(state: u8) -> Self {
        let mut tlv = Self::new();
        tlv.set(TlvType::State, [state]);
        tlv
    }

    /// `{State, Error}` response.
    pub fn error_response(state: u8, error: TlvError) -> Self {
        let mut tlv = Self::with_state(state);
        tlv.set(TlvType::Error, [error as u8]);
        tlv
    }

    /// Parse TLV8 from bytes.
    ///
    /// Consecutive items of the same type are joined into one value.
    /// `Separator` items are kept as distinct entries.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut items: Vec<(u8, Vec<u8>)> = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(ParseError::InvalidFormat(
                    "TLV8: truncated header".to_string(),
                ));
            }

            let typ = rest[0];
            let len = rest[1] as usize;
            rest = &rest[2..];

            if rest.len() < len {
                return Err(ParseError::InvalidFormat(format!(
                    "TLV8: truncated value (expected {} bytes, got {})",
                    len,
                    rest.len()
                )));
            }
            let value = &rest[..len];
            rest = &rest[len..];

            match items.last_mut() {
                Some((prev, existing)) if *prev == typ && typ != TlvType::Separator as u8 => {
                    existing.extend_from_slice(value);
                }
                _ => items.push((typ, value.to_vec())),
            }
        }

        Ok(Self { items })
    }

    /// Encode to bytes in insertion order, fragmenting long values.
    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::new();

        for (typ, value) in &self.items {
            if value.is_empty() {
                result.push(*typ);
                result.push(0);
                continue;
            }
            for chunk in value.chunks(255) {
                result.push(*typ);
                result.push(chunk.len() as u8);
                result.extend_from_slice(chunk);
            }
        }

        result
    }

    /// First value for type.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == typ as u8)
            .map(|(_, v)| v.as_slice())
    }

    /// Value for type, or `MissingField`.
    pub fn require(&self, typ: TlvType) -> Result<&[u8], ParseError> {
        self.get(typ).ok_or(ParseError::MissingField(typ.name()))
    }

    /// Replace the value for type, or append it.
    pub fn set(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.items.iter_mut().find(|(t, _)| *t == typ as u8) {
            Some((_, existing)) => *existing = value,
            None => self.items.push((typ as u8, value)),
        }
    }

    /// Append an item even if the type is already present.
    pub fn push(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.items.push((typ as u8, value.into()));
    }

    /// Append all items of another message.
    pub fn extend(&mut self, other: Tlv8) {
        self.items.extend(other.items);
    }

    pub fn contains(&self, typ: TlvType) -> bool {
        self.get(typ).is_some()
    }

    /// Split on `Separator` items into one message per record.
    pub fn split_records(&self) -> Vec<Tlv8> {
        let mut records = vec![Tlv8::new()];
        for (typ, value) in &self.items {
            if *typ == TlvType::Separator as u8 {
                records.push(Tlv8::new());
            } else if let Some(current) = records.last_mut() {
                current.items.push((*typ, value.clone()));
            }
        }
        records.retain(|r| !r.items.is_empty());
        records
    }

    /// State value (single byte).
    pub fn state(&self) -> Option<u8> {
        self.get(TlvType::State).and_then(|v| v.first().copied())
    }

    /// Required state value.
    pub fn require_state(&self) -> Result<u8, ParseError> {
        let value = self.require(TlvType::State)?;
        match value {
            [state] => Ok(*state),
            _ => Err(ParseError::InvalidValue(format!(
                "State must be 1 byte, got {}",
                value.len()
            ))),
        }
    }

    /// Method value (single byte).
    pub fn method(&self) -> Option<u8> {
        self.get(TlvType::Method).and_then(|v| v.first().copied())
    }

    /// Error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x13 => Some(Self::Flags),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }

    /// Name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Method => "Method",
            Self::Identifier => "Identifier",
            Self::Salt => "Salt",
            Self::PublicKey => "PublicKey",
            Self::Proof => "Proof",
            Self::EncryptedData => "EncryptedData",
            Self::State => "State",
            Self::Error => "Error",
            Self::RetryDelay => "RetryDelay",
            Self::Certificate => "Certificate",
            Self::Signature => "Signature",
            Self::Permissions => "Permissions",
            Self::FragmentData => "FragmentData",
            Self::FragmentLast => "FragmentLast",
            Self::Flags => "Flags",
            Self::Separator => "Separator",
        }
    }
}

impl Method {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::PairSetup),
            0x01 => Some(Self::PairSetupWithAuth),
            0x02 => Some(Self::PairVerify),
            0x03 => Some(Self::AddPairing),
            0x04 => Some(Self::RemovePairing),
            0x05 => Some(Self::ListPairings),
            _ => None,
        }
    }
}
