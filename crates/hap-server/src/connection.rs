//! Per-connection pairing and session state.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use hap_core::error::{Error, PairingError, TransportError};
use hap_core::SetupCode;
use hap_crypto::chacha::LENGTH_PREFIX_LEN;
use hap_crypto::keys::SessionKeys;
use hap_crypto::RecordCipher;
use hap_pairing::{ControllerId, PairSetup, PairVerify, PairingStore, VerifyStep};

/// Registry-assigned connection identifier.
pub type ConnectionId = u64;

/// Where a connection is in the pairing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// No exchange in flight and no session.
    Idle,
    /// Pair-setup has started and not finished.
    Setup,
    /// Pair-verify has started and not finished.
    Verify,
    /// Pair-verify completed; session keys are installed.
    Verified,
}

/// State of one TCP connection.
///
/// The cipher exists exactly when the stage is `Verified`. Encryption is
/// switched on separately, after the plaintext M4 reply has been written,
/// and never switched off.
pub struct ConnectionState {
    peer: SocketAddr,
    stage: HandshakeStage,
    setup: PairSetup,
    verify: PairVerify,
    cipher: Option<RecordCipher>,
    controller: Option<ControllerId>,
    encrypted: bool,
}

/// Shared handle to a connection's state.
pub type SharedState = Arc<Mutex<ConnectionState>>;

impl ConnectionState {
    pub fn new(peer: SocketAddr, store: Arc<PairingStore>, setup_code: SetupCode) -> Self {
        Self {
            peer,
            stage: HandshakeStage::Idle,
            setup: PairSetup::new(store.clone(), setup_code),
            verify: PairVerify::new(store),
            cipher: None,
            controller: None,
            encrypted: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stage(&self) -> HandshakeStage {
        self.stage
    }

    /// Controller authenticated by pair-verify on this connection.
    pub fn controller(&self) -> Option<&ControllerId> {
        self.controller.as_ref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// True while a setup or verify exchange waits for the next message.
    pub fn handshake_in_progress(&self) -> bool {
        matches!(self.stage, HandshakeStage::Setup | HandshakeStage::Verify)
    }

    /// Feed a pair-setup message.
    pub fn handle_setup(&mut self, message: &[u8]) -> Result<Vec<u8>, PairingError> {
        let result = self.setup.advance(message);
        self.refresh_stage();
        result
    }

    /// Feed a pair-verify message, installing session keys on success.
    pub fn handle_verify(&mut self, message: &[u8]) -> Result<Vec<u8>, PairingError> {
        let result = self.verify.advance(message);
        let reply = match result {
            Ok(VerifyStep::Reply(reply)) => Ok(reply),
            Ok(VerifyStep::Verified {
                reply,
                keys,
                controller,
            }) => {
                self.install_session(&keys, controller);
                Ok(reply)
            }
            Err(e) => Err(e),
        };
        self.refresh_stage();
        reply
    }

    /// Switch the record layer on. Requires a verified session.
    pub fn activate_encryption(&mut self) -> Result<(), PairingError> {
        if self.cipher.is_none() {
            return Err(PairingError::MalformedMessage(
                "encryption requested before pair-verify completed".to_string(),
            ));
        }
        self.encrypted = true;
        Ok(())
    }

    /// Seal outgoing bytes into records.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.cipher
            .as_mut()
            .ok_or(TransportError::Closed)?
            .seal(plaintext)
    }

    /// Open one incoming record.
    pub fn open_record(
        &mut self,
        length_prefix: [u8; LENGTH_PREFIX_LEN],
        body: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        self.cipher
            .as_mut()
            .ok_or(TransportError::Closed)?
            .open_record(length_prefix, body)
    }

    fn install_session(&mut self, keys: &SessionKeys, controller: ControllerId) {
        self.cipher = Some(RecordCipher::new(keys));
        self.controller = Some(controller);
    }

    fn refresh_stage(&mut self) {
        self.stage = if self.cipher.is_some() {
            HandshakeStage::Verified
        } else if self.verify.in_progress() {
            HandshakeStage::Verify
        } else if self.setup.in_progress() {
            HandshakeStage::Setup
        } else {
            HandshakeStage::Idle
        };
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("peer", &self.peer)
            .field("stage", &self.stage)
            .field("controller", &self.controller)
            .field("encrypted", &self.encrypted)
            .finish_non_exhaustive()
    }
}

/// Lock a connection's state. A poisoned lock ends the connection.
pub fn lock(state: &SharedState) -> Result<MutexGuard<'_, ConnectionState>, Error> {
    state
        .lock()
        .map_err(|_| Error::Transport(TransportError::Closed))
}
