//! Shared accessory context: pairing store, setup code and live connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hap_core::error::{Error, Result};
use hap_core::{AccessoryConfig, SetupCode};
use hap_pairing::{handle_pairings, ControllerId, PairingStore};

use crate::connection::{lock, ConnectionId, ConnectionState, HandshakeStage, SharedState};
use crate::registry::{ConnectionHandle, ConnectionRegistry};

/// Everything request handling needs, shared by every connection task.
pub struct HapContext {
    store: Arc<PairingStore>,
    setup_code: SetupCode,
    registry: ConnectionRegistry,
    handshake_timeout: Option<Duration>,
}

impl HapContext {
    pub fn new(store: Arc<PairingStore>, setup_code: SetupCode) -> Self {
        Self {
            store,
            setup_code,
            registry: ConnectionRegistry::new(),
            handshake_timeout: Some(Duration::from_secs(
                hap_core::config::DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            )),
        }
    }

    /// Context using the setup code and handshake timeout from `config`.
    pub fn from_config(store: Arc<PairingStore>, config: &AccessoryConfig) -> Self {
        Self::new(store, config.setup_code.clone()).with_handshake_timeout(config.handshake_timeout())
    }

    /// Bound on waiting for the next handshake message. `None` disables it.
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<PairingStore> {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    /// Create state for a new connection and register it.
    pub fn register_connection(&self, peer: SocketAddr) -> ConnectionHandle {
        let state = ConnectionState::new(peer, self.store.clone(), self.setup_code.clone());
        self.registry.register(peer, state)
    }

    /// Forget a connection. Safe to call more than once.
    pub fn unregister_connection(&self, id: ConnectionId) -> bool {
        self.registry.unregister(id)
    }

    /// Ask every live connection to close.
    pub fn close_all(&self) -> usize {
        self.registry.close_all()
    }

    /// Run one pair-setup message on `conn` and return the reply TLV.
    pub fn process_setup_message(&self, conn: ConnectionId, message: &[u8]) -> Result<Vec<u8>> {
        let state = self.state(conn)?;
        let reply = lock(&state)?.handle_setup(message)?;
        Ok(reply)
    }

    /// Run one pair-verify message on `conn` and return the reply TLV.
    ///
    /// When this completes the exchange, keys are installed but encryption
    /// stays off until [`HapContext::activate_encryption`].
    pub fn process_verify_message(&self, conn: ConnectionId, message: &[u8]) -> Result<Vec<u8>> {
        let state = self.state(conn)?;
        let reply = lock(&state)?.handle_verify(message)?;
        Ok(reply)
    }

    /// Run one pairings administration request on `conn`.
    ///
    /// Connections of a removed controller are asked to close.
    pub fn process_pairings_message(&self, conn: ConnectionId, message: &[u8]) -> Result<Vec<u8>> {
        let requester = self.controller(conn)?;
        let outcome = handle_pairings(&self.store, requester.as_ref(), message)?;

        if let Some(removed) = &outcome.removed {
            let closed = self.registry.close_controller(removed);
            tracing::info!(controller = %removed, sessions = closed, "Closing sessions of removed pairing");
        }
        Ok(outcome.reply)
    }

    pub fn is_encrypted(&self, conn: ConnectionId) -> Result<bool> {
        let state = self.state(conn)?;
        let encrypted = lock(&state)?.is_encrypted();
        Ok(encrypted)
    }

    /// Switch `conn` to the record layer.
    pub fn activate_encryption(&self, conn: ConnectionId) -> Result<()> {
        let state = self.state(conn)?;
        lock(&state)?.activate_encryption()?;
        tracing::debug!(connection = conn, "Encryption activated");
        Ok(())
    }

    pub fn handshake_in_progress(&self, conn: ConnectionId) -> Result<bool> {
        let state = self.state(conn)?;
        let in_progress = lock(&state)?.handshake_in_progress();
        Ok(in_progress)
    }

    pub fn stage(&self, conn: ConnectionId) -> Result<HandshakeStage> {
        let state = self.state(conn)?;
        let stage = lock(&state)?.stage();
        Ok(stage)
    }

    /// Controller verified on `conn`, if any.
    pub fn controller(&self, conn: ConnectionId) -> Result<Option<ControllerId>> {
        let state = self.state(conn)?;
        let controller = lock(&state)?.controller().cloned();
        Ok(controller)
    }

    fn state(&self, conn: ConnectionId) -> Result<SharedState> {
        self.registry
            .state(conn)
            .ok_or(Error::UnknownConnection(conn))
    }
}
