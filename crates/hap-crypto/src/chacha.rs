//! ChaCha20-Poly1305 for handshake sub-TLVs and the session record layer.

use hap_core::error::{CryptoError, TransportError};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use zeroize::ZeroizeOnDrop;

use crate::keys::SessionKeys;

/// Maximum plaintext bytes per record.
pub const MAX_RECORD_LEN: usize = 0x400;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Length prefix size of each record.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Record-layer cipher for one verified connection.
///
/// Each record is `[u16 LE len][ciphertext][16-byte tag]` with the length
/// bytes as AAD. Send and receive counters start at zero, advance by one per
/// record and are never reused; a counter that reaches `u64::MAX` ends the
/// session with [`TransportError::CounterExhausted`].
#[derive(ZeroizeOnDrop)]
pub struct RecordCipher {
    send_key: [u8; 32],
    recv_key: [u8; 32],
    #[zeroize(skip)]
    send_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    recv_cipher: ChaCha20Poly1305,
    #[zeroize(skip)]
    send_counter: u64,
    #[zeroize(skip)]
    recv_counter: u64,
}

impl RecordCipher {
    /// Build from the local side's session keys.
    pub fn new(keys: &SessionKeys) -> Self {
        Self::from_keys(*keys.send_key.as_bytes(), *keys.recv_key.as_bytes())
    }

    /// Build from raw directional keys.
    pub fn from_keys(send_key: [u8; 32], recv_key: [u8; 32]) -> Self {
        Self {
            send_cipher: ChaCha20Poly1305::new(&send_key.into()),
            recv_cipher: ChaCha20Poly1305::new(&recv_key.into()),
            send_key,
            recv_key,
            send_counter: 0,
            recv_counter: 0,
        }
    }

    /// Seal `plaintext` into as many records as needed.
    ///
    /// Fails up front if the counter cannot cover every record, so a write is
    /// never partially sealed.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TransportError> {
        let records = plaintext.len().div_ceil(MAX_RECORD_LEN) as u64;
        if records > u64::MAX - self.send_counter {
            return Err(TransportError::CounterExhausted);
        }

        let mut out = Vec::with_capacity(
            plaintext.len() + records as usize * (LENGTH_PREFIX_LEN + TAG_LEN),
        );
        for chunk in plaintext.chunks(MAX_RECORD_LEN) {
            out.extend_from_slice(&self.seal_record(chunk)?);
        }
        Ok(out)
    }

    /// Seal a single record of at most [`MAX_RECORD_LEN`] bytes.
    pub fn seal_record(&mut self, chunk: &[u8]) -> Result<Vec<u8>, TransportError> {
        if chunk.len() > MAX_RECORD_LEN {
            return Err(TransportError::FrameTooLarge(chunk.len()));
        }
        if self.send_counter == u64::MAX {
            return Err(TransportError::CounterExhausted);
        }

        let aad = (chunk.len() as u16).to_le_bytes();
        let nonce = nonce_from_counter(self.send_counter);
        let sealed = self
            .send_cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: chunk, aad: &aad })
            .map_err(|_| TransportError::FrameTooLarge(chunk.len()))?;

        self.send_counter += 1;

        let mut record = Vec::with_capacity(LENGTH_PREFIX_LEN + sealed.len());
        record.extend_from_slice(&aad);
        record.extend_from_slice(&sealed);
        Ok(record)
    }

    /// Open one record given its length prefix and `len + 16` body bytes.
    ///
    /// On failure no plaintext is returned and the counter does not advance.
    pub fn open_record(
        &mut self,
        length_prefix: [u8; LENGTH_PREFIX_LEN],
        body: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let len = u16::from_le_bytes(length_prefix) as usize;
        if len > MAX_RECORD_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }
        if body.len() != len + TAG_LEN {
            return Err(TransportError::DecryptionFailed);
        }
        if self.recv_counter == u64::MAX {
            return Err(TransportError::CounterExhausted);
        }

        let nonce = nonce_from_counter(self.recv_counter);
        let plaintext = self
            .recv_cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: body,
                    aad: &length_prefix,
                },
            )
            .map_err(|_| TransportError::DecryptionFailed)?;

        self.recv_counter += 1;
        Ok(plaintext)
    }

    /// Open a buffer holding one or more complete records.
    pub fn open(&mut self, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::with_capacity(data.len());
        let mut rest = data;

        while !rest.is_empty() {
            if rest.len() < LENGTH_PREFIX_LEN {
                return Err(TransportError::DecryptionFailed);
            }
            let prefix = [rest[0], rest[1]];
            let len = u16::from_le_bytes(prefix) as usize;
            let end = LENGTH_PREFIX_LEN + len + TAG_LEN;
            if len > MAX_RECORD_LEN {
                return Err(TransportError::FrameTooLarge(len));
            }
            if rest.len() < end {
                return Err(TransportError::DecryptionFailed);
            }

            out.extend_from_slice(&self.open_record(prefix, &rest[LENGTH_PREFIX_LEN..end])?);
            rest = &rest[end..];
        }

        Ok(out)
    }

    /// Counter used for the next sealed record.
    pub fn send_counter(&self) -> u64 {
        self.send_counter
    }

    /// Counter expected for the next received record.
    pub fn recv_counter(&self) -> u64 {
        self.recv_counter
    }
}

/// 12-byte record nonce: four zero bytes then the counter, little-endian.
fn nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Handshake nonce from a label such as `PV-Msg02`, right-aligned in 12 bytes.
pub fn nonce_from_string(s: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    let len = s.len().min(12);
    nonce[12 - len..].copy_from_slice(&s[..len]);
    nonce
}

/// Encrypt a handshake sub-TLV. Returns ciphertext with the tag appended.
pub fn seal(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    ChaCha20Poly1305::new(&(*key).into())
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Decrypt a handshake sub-TLV (ciphertext with tag appended).
pub fn open(key: &[u8; 32], nonce: &[u8; 12], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption(
            "ciphertext shorter than tag".to_string(),
        ));
    }

    ChaCha20Poly1305::new(&(*key).into())
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption("authentication failed".to_string()))
}
