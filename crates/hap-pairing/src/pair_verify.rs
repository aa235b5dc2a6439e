//! Accessory side of pair-verify (M1-M4).
//!
//! A paired controller and the accessory run an X25519 exchange, each signs
//! both ephemeral keys with its long-term Ed25519 key, and the shared secret
//! becomes the source of the session keys for the record layer.

use std::sync::Arc;

use hap_core::error::{CryptoError, PairingError};
use hap_crypto::{
    chacha::{self, nonce_from_string},
    curve25519::{public_key_from_slice, EcdhKeyPair},
    ed25519,
    keys::{EncryptionKey, SessionKeys, SharedSecret},
    tlv::{Tlv8, TlvType},
};

use crate::store::{ControllerId, PairingStore};

pub(crate) const PV_MSG02_NONCE: &[u8] = b"PV-Msg02";
pub(crate) const PV_MSG03_NONCE: &[u8] = b"PV-Msg03";

/// Result of one verify step.
pub enum VerifyStep {
    /// Send this reply and wait for the next message.
    Reply(Vec<u8>),
    /// Send `reply` in plaintext, then switch the connection to `keys`.
    Verified {
        reply: Vec<u8>,
        keys: SessionKeys,
        controller: ControllerId,
    },
}

impl VerifyStep {
    pub fn reply(&self) -> &[u8] {
        match self {
            VerifyStep::Reply(reply) | VerifyStep::Verified { reply, .. } => reply,
        }
    }
}

impl std::fmt::Debug for VerifyStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyStep::Reply(reply) => f.debug_tuple("Reply").field(&reply.len()).finish(),
            VerifyStep::Verified { controller, .. } => f
                .debug_struct("Verified")
                .field("controller", controller)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStage {
    Idle,
    AwaitingM3,
    Verified,
}

enum VerifyState {
    Idle,
    AwaitingM3 {
        shared_secret: SharedSecret,
        session_key: EncryptionKey,
        accessory_public: [u8; 32],
        controller_public: [u8; 32],
    },
    Verified {
        controller: ControllerId,
    },
}

/// Pair-verify state machine for one connection.
pub struct PairVerify {
    store: Arc<PairingStore>,
    state: VerifyState,
}

impl PairVerify {
    pub fn new(store: Arc<PairingStore>) -> Self {
        Self {
            store,
            state: VerifyState::Idle,
        }
    }

    pub fn stage(&self) -> VerifyStage {
        match self.state {
            VerifyState::Idle => VerifyStage::Idle,
            VerifyState::AwaitingM3 { .. } => VerifyStage::AwaitingM3,
            VerifyState::Verified { .. } => VerifyStage::Verified,
        }
    }

    pub fn in_progress(&self) -> bool {
        matches!(self.state, VerifyState::AwaitingM3 { .. })
    }

    /// Controller authenticated on this connection.
    pub fn controller(&self) -> Option<&ControllerId> {
        match &self.state {
            VerifyState::Verified { controller } => Some(controller),
            _ => None,
        }
    }

    /// Process one controller message.
    ///
    /// A second M1 while waiting for M3 discards the attempt in flight. Any
    /// message after the connection is verified is rejected and the
    /// connection stays verified.
    pub fn advance(&mut self, message: &[u8]) -> Result<VerifyStep, PairingError> {
        if let VerifyState::Verified { controller } = &self.state {
            tracing::debug!(controller = %controller, "Pair-verify message on verified connection");
            return Err(PairingError::MalformedMessage(
                "connection is already verified".to_string(),
            ));
        }

        let state = std::mem::replace(&mut self.state, VerifyState::Idle);
        let request = Tlv8::parse(message)?;

        match (request.require_state()?, state) {
            (1, VerifyState::Idle) => {
                let (reply, next) = self.handle_m1(&request)?;
                self.state = next;
                Ok(VerifyStep::Reply(reply))
            }
            (1, VerifyState::AwaitingM3 { .. }) => Err(PairingError::MalformedMessage(
                "pair-verify M1 while an exchange is in flight".to_string(),
            )),
            (
                3,
                VerifyState::AwaitingM3 {
                    shared_secret,
                    session_key,
                    accessory_public,
                    controller_public,
                },
            ) => {
                let controller = self.handle_m3(
                    &request,
                    &session_key,
                    &accessory_public,
                    &controller_public,
                )?;
                let keys = SessionKeys::derive_accessory_keys(&shared_secret).map_err(internal)?;

                tracing::info!(controller = %controller, "Pair-verify complete, session keys derived");
                self.state = VerifyState::Verified {
                    controller: controller.clone(),
                };
                Ok(VerifyStep::Verified {
                    reply: Tlv8::with_state(4).encode(),
                    keys,
                    controller,
                })
            }
            (n, _) => Err(PairingError::MalformedMessage(format!(
                "unexpected pair-verify state {}",
                n
            ))),
        }
    }

    /// M1 -> M2: ephemeral exchange and signed accessory identity.
    fn handle_m1(&self, request: &Tlv8) -> Result<(Vec<u8>, VerifyState), PairingError> {
        let controller_public = public_key_from_slice(request.require(TlvType::PublicKey)?)
            .map_err(|e| PairingError::MalformedMessage(e.to_string()))?;

        let ephemeral = EcdhKeyPair::generate();
        let accessory_public = ephemeral.public_key();
        let shared_secret = ephemeral.diffie_hellman(&controller_public).map_err(|e| {
            tracing::warn!(error = %e, "Pair-verify M1 key agreement failed");
            PairingError::AuthenticationFailed
        })?;

        let identity = self.store.identity();
        let mut info = accessory_public.to_vec();
        info.extend_from_slice(identity.id_bytes());
        info.extend_from_slice(&controller_public);
        let signature = identity.sign(&info);

        let mut sub = Tlv8::new();
        sub.set(TlvType::Identifier, identity.id_bytes().to_vec());
        sub.set(TlvType::Signature, signature.to_vec());

        let session_key = SessionKeys::derive_pair_verify_key(&shared_secret).map_err(internal)?;
        let encrypted = chacha::seal(
            session_key.as_bytes(),
            &nonce_from_string(PV_MSG02_NONCE),
            &sub.encode(),
        )
        .map_err(internal)?;

        let mut reply = Tlv8::with_state(2);
        reply.set(TlvType::PublicKey, accessory_public.to_vec());
        reply.set(TlvType::EncryptedData, encrypted);

        tracing::debug!("Pair-verify M1 received, sent M2");
        Ok((
            reply.encode(),
            VerifyState::AwaitingM3 {
                shared_secret,
                session_key,
                accessory_public,
                controller_public,
            },
        ))
    }

    /// M3: decrypt and check the controller's signed identity.
    fn handle_m3(
        &self,
        request: &Tlv8,
        session_key: &EncryptionKey,
        accessory_public: &[u8; 32],
        controller_public: &[u8; 32],
    ) -> Result<ControllerId, PairingError> {
        let encrypted = request.require(TlvType::EncryptedData)?;
        let decrypted = chacha::open(
            session_key.as_bytes(),
            &nonce_from_string(PV_MSG03_NONCE),
            encrypted,
        )
        .map_err(|_| {
            tracing::warn!("Pair-verify M3 failed to decrypt");
            PairingError::AuthenticationFailed
        })?;

        let inner = Tlv8::parse(&decrypted)?;
        let controller = ControllerId::from(inner.require(TlvType::Identifier)?);
        let signature = inner.require(TlvType::Signature)?;

        let record = self.store.find(&controller).map_err(|e| {
            tracing::warn!(controller = %controller, "Pair-verify from unknown controller");
            e
        })?;

        let mut info = controller_public.to_vec();
        info.extend_from_slice(controller.as_bytes());
        info.extend_from_slice(accessory_public);

        ed25519::verify_slices(&record.public_key, &info, signature).map_err(|e| {
            tracing::warn!(controller = %controller, error = %e, "Pair-verify M3 signature rejected");
            PairingError::AuthenticationFailed
        })?;

        Ok(controller)
    }
}

fn internal(err: CryptoError) -> PairingError {
    PairingError::MalformedMessage(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::BridgeIdentity;
    use crate::store::{PairingRecord, Permissions};
    use crate::testing::TestController;

    fn store_with(controller: &TestController) -> Arc<PairingStore> {
        let store = Arc::new(PairingStore::in_memory(Arc::new(BridgeIdentity::generate())));
        store
            .add(PairingRecord::new(
                controller.id().clone(),
                controller.public_key(),
                Permissions::Admin,
            ))
            .unwrap();
        store
    }

    mod m1 {
        use super::*;

        #[test]
        fn returns_public_key_and_envelope() {
            let controller = TestController::new("c");
            let mut fsm = PairVerify::new(store_with(&controller));
            let mut client = controller.verify();

            let step = fsm.advance(&client.m1()).unwrap();
            let m2 = Tlv8::parse(step.reply()).unwrap();

            assert!(matches!(step, VerifyStep::Reply(_)));
            assert_eq!(m2.state(), Some(2));
            assert_eq!(m2.get(TlvType::PublicKey).map(<[u8]>::len), Some(32));
            assert!(m2.contains(TlvType::EncryptedData));
            assert_eq!(fsm.stage(), VerifyStage::AwaitingM3);
        }

        #[test]
        fn short_public_key_is_malformed() {
            let controller = TestController::new("c");
            let mut fsm = PairVerify::new(store_with(&controller));

            let mut m1 = Tlv8::with_state(1);
            m1.set(TlvType::PublicKey, vec![9u8; 16]);
            assert!(matches!(fsm.advance(&m1.encode()), Err(PairingError::MalformedMessage(_))));
        }

        #[test]
        fn duplicate_m1_discards_attempt() {
            let controller = TestController::new("c");
            let mut fsm = PairVerify::new(store_with(&controller));
            let mut client = controller.verify();

            fsm.advance(&client.m1()).unwrap();
            let result = fsm.advance(&client.m1());

            assert!(matches!(result, Err(PairingError::MalformedMessage(_))));
            assert_eq!(fsm.stage(), VerifyStage::Idle);
        }

        #[test]
        fn accessory_signature_verifies() {
            let controller = TestController::new("c");
            let store = store_with(&controller);
            let mut fsm = PairVerify::new(store.clone());
            let mut client = controller.verify();

            let step = fsm.advance(&client.m1()).unwrap();
            let accessory_ltpk = store.identity().public_key();
            assert!(client.m3(step.reply(), Some(&accessory_ltpk)).is_ok());
        }
    }

    mod m3 {
        use super::*;

        #[test]
        fn verified_session_keys_mirror_controller() {
            let controller = TestController::new("c");
            let mut fsm = PairVerify::new(store_with(&controller));

            let (controller_keys, accessory_keys) = controller.run_verify(&mut fsm).unwrap();

            assert_eq!(controller_keys.send_key, accessory_keys.recv_key);
            assert_eq!(controller_keys.recv_key, accessory_keys.send_key);
            assert_ne!(accessory_keys.send_key, accessory_keys.recv_key);
            assert_eq!(fsm.controller(), Some(controller.id()));
        }

        #[test]
        fn unknown_controller_is_rejected() {
            let paired = TestController::new("paired");
            let stranger = TestController::new("stranger");
            let mut fsm = PairVerify::new(store_with(&paired));

            let result = stranger.run_verify(&mut fsm);
            assert!(matches!(result, Err(PairingError::UnknownController(_))));
            assert_eq!(fsm.stage(), VerifyStage::Idle);
        }

        #[test]
        fn wrong_long_term_key_fails_authentication() {
            let paired = TestController::new("same-id");
            let impostor = TestController::new("same-id");
            let mut fsm = PairVerify::new(store_with(&paired));

            assert_eq!(
                impostor.run_verify(&mut fsm).unwrap_err(),
                PairingError::AuthenticationFailed
            );
        }

        #[test]
        fn tampered_envelope_fails_authentication() {
            let controller = TestController::new("c");
            let mut fsm = PairVerify::new(store_with(&controller));
            let mut client = controller.verify();

            let step = fsm.advance(&client.m1()).unwrap();
            let m3 = client.m3(step.reply(), None).unwrap();

            let mut tlv = Tlv8::parse(&m3).unwrap();
            let mut data = tlv.get(TlvType::EncryptedData).unwrap().to_vec();
            let last = data.len() - 1;
            data[last] ^= 0x80;
            tlv.set(TlvType::EncryptedData, data);

            assert_eq!(
                fsm.advance(&tlv.encode()).unwrap_err(),
                PairingError::AuthenticationFailed
            );
        }

        #[test]
        fn message_after_verified_keeps_session() {
            let controller = TestController::new("c");
            let mut fsm = PairVerify::new(store_with(&controller));
            controller.run_verify(&mut fsm).unwrap();

            let result = fsm.advance(&controller.verify().m1());
            assert!(matches!(result, Err(PairingError::MalformedMessage(_))));
            assert_eq!(fsm.stage(), VerifyStage::Verified);
        }

        #[test]
        fn m3_without_m1_is_malformed() {
            let controller = TestController::new("c");
            let mut fsm = PairVerify::new(store_with(&controller));
            let mut m3 = Tlv8::with_state(3);
            m3.set(TlvType::EncryptedData, vec![0u8; 32]);

            assert!(matches!(fsm.advance(&m3.encode()), Err(PairingError::MalformedMessage(_))));
        }
    }

    mod after_setup {
        use super::*;
        use crate::pair_setup::PairSetup;
        use hap_core::SetupCode;

        #[test]
        fn setup_then_verify() {
            let store = Arc::new(PairingStore::in_memory(Arc::new(BridgeIdentity::generate())));
            let controller = TestController::new("controller-1");

            let mut setup = PairSetup::new(store.clone(), SetupCode::default());
            let accessory_ltpk = controller.pair(&mut setup, "031-45-154").unwrap();

            let mut verify = PairVerify::new(store);
            let mut client = controller.verify();
            let step = verify.advance(&client.m1()).unwrap();
            let m3 = client.m3(step.reply(), Some(&accessory_ltpk)).unwrap();

            match verify.advance(&m3).unwrap() {
                VerifyStep::Verified { reply, controller: id, .. } => {
                    assert_eq!(Tlv8::parse(&reply).unwrap().state(), Some(4));
                    assert_eq!(&id, controller.id());
                }
                other => panic!("expected Verified, got {:?}", other),
            }
        }
    }
}
