//! Accessory side of pair-setup (M1-M6).
//!
//! The controller proves knowledge of the setup code through SRP-6a, then both
//! sides exchange long-term Ed25519 keys inside a ChaCha20-Poly1305 envelope
//! keyed from the SRP session key. A successful M5 adds the controller to the
//! [`PairingStore`].

use std::sync::Arc;

use hap_core::error::{CryptoError, PairingError};
use hap_core::SetupCode;
use hap_crypto::{
    chacha::{self, nonce_from_string},
    ed25519, hkdf,
    keys::{EncryptionKey, SessionKeys, SharedSecret},
    srp::{SrpServer, PAIR_SETUP_USERNAME},
    tlv::{Method, Tlv8, TlvType},
};

use crate::store::{ControllerId, PairingStore};

/// Nonce for the controller's M5 envelope.
pub(crate) const PS_MSG05_NONCE: &[u8] = b"PS-Msg05";
/// Nonce for the accessory's M6 envelope.
pub(crate) const PS_MSG06_NONCE: &[u8] = b"PS-Msg06";

/// Observable progress of a setup exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Idle,
    AwaitingM3,
    AwaitingM5,
    Complete,
}

enum SetupState {
    Idle,
    AwaitingM3 {
        srp: SrpServer,
    },
    AwaitingM5 {
        shared_secret: SharedSecret,
        session_key: EncryptionKey,
    },
    Complete {
        controller: ControllerId,
    },
}

/// Pair-setup state machine for one connection.
///
/// Every call to [`PairSetup::advance`] either moves the exchange forward or
/// drops all SRP and session material and returns to `Idle`.
pub struct PairSetup {
    store: Arc<PairingStore>,
    setup_code: SetupCode,
    state: SetupState,
}

impl PairSetup {
    pub fn new(store: Arc<PairingStore>, setup_code: SetupCode) -> Self {
        Self {
            store,
            setup_code,
            state: SetupState::Idle,
        }
    }

    pub fn stage(&self) -> SetupStage {
        match self.state {
            SetupState::Idle => SetupStage::Idle,
            SetupState::AwaitingM3 { .. } => SetupStage::AwaitingM3,
            SetupState::AwaitingM5 { .. } => SetupStage::AwaitingM5,
            SetupState::Complete { .. } => SetupStage::Complete,
        }
    }

    /// True while an exchange has started but not finished.
    pub fn in_progress(&self) -> bool {
        matches!(
            self.state,
            SetupState::AwaitingM3 { .. } | SetupState::AwaitingM5 { .. }
        )
    }

    /// Controller paired by the last completed exchange.
    pub fn paired_controller(&self) -> Option<&ControllerId> {
        match &self.state {
            SetupState::Complete { controller } => Some(controller),
            _ => None,
        }
    }

    /// Process one controller message and return the reply TLV.
    ///
    /// On error the exchange is back at `Idle` and nothing was stored.
    pub fn advance(&mut self, message: &[u8]) -> Result<Vec<u8>, PairingError> {
        let state = std::mem::replace(&mut self.state, SetupState::Idle);
        let request = Tlv8::parse(message)?;

        let (reply, next) = match (request.require_state()?, state) {
            (1, _) => self.handle_m1(&request)?,
            (3, SetupState::AwaitingM3 { srp }) => handle_m3(&request, &srp)?,
            (5, SetupState::AwaitingM5 {
                shared_secret,
                session_key,
            }) => self.handle_m5(&request, &shared_secret, &session_key)?,
            (n, _) => {
                tracing::debug!(state = n, "Unexpected pair-setup message");
                return Err(PairingError::MalformedMessage(format!(
                    "unexpected pair-setup state {}",
                    n
                )));
            }
        };

        self.state = next;
        Ok(reply)
    }

    /// M1 -> M2: start SRP and send salt and B.
    fn handle_m1(&self, request: &Tlv8) -> Result<(Vec<u8>, SetupState), PairingError> {
        match request.method().and_then(Method::from_byte) {
            Some(Method::PairSetup) | Some(Method::PairSetupWithAuth) => {}
            other => {
                return Err(PairingError::MalformedMessage(format!(
                    "pair-setup M1 with method {:?}",
                    other
                )))
            }
        }

        let srp = SrpServer::new(PAIR_SETUP_USERNAME, self.setup_code.as_bytes());
        let challenge = srp.challenge();

        let mut reply = Tlv8::with_state(2);
        reply.set(TlvType::Salt, challenge.salt.to_vec());
        reply.set(TlvType::PublicKey, challenge.server_public_key);

        tracing::debug!("Pair-setup M1 received, sent M2");
        Ok((reply.encode(), SetupState::AwaitingM3 { srp }))
    }

    /// M5 -> M6: check the controller's signed identity, store it, answer with ours.
    fn handle_m5(
        &self,
        request: &Tlv8,
        shared_secret: &SharedSecret,
        session_key: &EncryptionKey,
    ) -> Result<(Vec<u8>, SetupState), PairingError> {
        let encrypted = request.require(TlvType::EncryptedData)?;
        let decrypted = chacha::open(
            session_key.as_bytes(),
            &nonce_from_string(PS_MSG05_NONCE),
            encrypted,
        )
        .map_err(|_| {
            tracing::warn!("Pair-setup M5 failed to decrypt");
            PairingError::AuthenticationFailed
        })?;

        let inner = Tlv8::parse(&decrypted)?;
        let controller_id = inner.require(TlvType::Identifier)?;
        let controller_ltpk: [u8; 32] = inner
            .require(TlvType::PublicKey)?
            .try_into()
            .map_err(|_| PairingError::MalformedMessage("controller LTPK must be 32 bytes".into()))?;
        let signature = inner.require(TlvType::Signature)?;

        let controller_x = hkdf::derive_controller_sign_material(shared_secret.as_bytes())
            .map_err(internal)?;
        let mut signed = controller_x.to_vec();
        signed.extend_from_slice(controller_id);
        signed.extend_from_slice(&controller_ltpk);

        ed25519::verify_slices(&controller_ltpk, &signed, signature).map_err(|e| {
            tracing::warn!(error = %e, "Pair-setup M5 signature rejected");
            PairingError::AuthenticationFailed
        })?;

        let reply = self.build_m6(shared_secret, session_key)?;

        let controller = ControllerId::from(controller_id);
        let record = self.store.add_from_setup(controller.clone(), controller_ltpk)?;
        tracing::info!(
            controller = %controller,
            admin = record.is_admin(),
            "Pair-setup complete"
        );

        Ok((reply, SetupState::Complete { controller }))
    }

    fn build_m6(
        &self,
        shared_secret: &SharedSecret,
        session_key: &EncryptionKey,
    ) -> Result<Vec<u8>, PairingError> {
        let identity = self.store.identity();
        let accessory_x = hkdf::derive_accessory_sign_material(shared_secret.as_bytes())
            .map_err(internal)?;
        let accessory_ltpk = identity.public_key();

        let mut info = accessory_x.to_vec();
        info.extend_from_slice(identity.id_bytes());
        info.extend_from_slice(&accessory_ltpk);
        let signature = identity.sign(&info);

        let mut sub = Tlv8::new();
        sub.set(TlvType::Identifier, identity.id_bytes().to_vec());
        sub.set(TlvType::PublicKey, accessory_ltpk.to_vec());
        sub.set(TlvType::Signature, signature.to_vec());

        let encrypted = chacha::seal(
            session_key.as_bytes(),
            &nonce_from_string(PS_MSG06_NONCE),
            &sub.encode(),
        )
        .map_err(internal)?;

        let mut reply = Tlv8::with_state(6);
        reply.set(TlvType::EncryptedData, encrypted);
        Ok(reply.encode())
    }
}

/// M3 -> M4: check the controller's SRP proof and send ours.
fn handle_m3(request: &Tlv8, srp: &SrpServer) -> Result<(Vec<u8>, SetupState), PairingError> {
    let client_public = request.require(TlvType::PublicKey)?;
    let client_proof = request.require(TlvType::Proof)?;

    let verified = srp.verify_client(client_public, client_proof).map_err(|e| {
        tracing::warn!(error = %e, "Pair-setup M3 proof rejected");
        match e {
            CryptoError::ProofMismatch | CryptoError::InvalidPublicKey(_) => {
                PairingError::AuthenticationFailed
            }
            other => internal(other),
        }
    })?;

    let shared_secret = SharedSecret::new(verified.shared_secret.clone());
    let session_key = SessionKeys::derive_pair_setup_key(&shared_secret).map_err(internal)?;

    let mut reply = Tlv8::with_state(4);
    reply.set(TlvType::Proof, verified.server_proof.clone());

    tracing::debug!("Pair-setup M3 proof accepted, sent M4");
    Ok((
        reply.encode(),
        SetupState::AwaitingM5 {
            shared_secret,
            session_key,
        },
    ))
}

fn internal(err: CryptoError) -> PairingError {
    PairingError::MalformedMessage(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::BridgeIdentity;
    use crate::store::Permissions;
    use crate::testing::TestController;
    use hap_crypto::tlv::TlvError;

    const CODE: &str = "031-45-154";

    fn setup() -> (Arc<PairingStore>, PairSetup) {
        let store = Arc::new(PairingStore::in_memory(Arc::new(BridgeIdentity::generate())));
        let fsm = PairSetup::new(store.clone(), SetupCode::parse(CODE).unwrap());
        (store, fsm)
    }

    mod m1 {
        use super::*;

        #[test]
        fn returns_salt_and_public_key() {
            let (_, mut fsm) = setup();
            let m2 = Tlv8::parse(&fsm.advance(&TestController::new("c").setup(CODE).m1()).unwrap())
                .unwrap();

            assert_eq!(m2.state(), Some(2));
            assert_eq!(m2.get(TlvType::Salt).map(<[u8]>::len), Some(16));
            assert_eq!(m2.get(TlvType::PublicKey).map(<[u8]>::len), Some(384));
            assert_eq!(fsm.stage(), SetupStage::AwaitingM3);
        }

        #[test]
        fn rejects_missing_method() {
            let (_, mut fsm) = setup();
            let result = fsm.advance(&Tlv8::with_state(1).encode());
            assert!(matches!(result, Err(PairingError::MalformedMessage(_))));
            assert_eq!(fsm.stage(), SetupStage::Idle);
        }

        #[test]
        fn new_m1_restarts_exchange() {
            let (_, mut fsm) = setup();
            let controller = TestController::new("c");
            let first = fsm.advance(&controller.setup(CODE).m1()).unwrap();
            let second = fsm.advance(&controller.setup(CODE).m1()).unwrap();

            assert_ne!(first, second);
            assert_eq!(fsm.stage(), SetupStage::AwaitingM3);
        }
    }

    mod m3 {
        use super::*;

        #[test]
        fn wrong_code_fails_authentication() {
            let (store, mut fsm) = setup();
            let mut client = TestController::new("c").setup("111-22-333");

            let m2 = fsm.advance(&client.m1()).unwrap();
            let m3 = client.m3(&m2).unwrap();
            let result = fsm.advance(&m3);

            assert_eq!(result, Err(PairingError::AuthenticationFailed));
            assert_eq!(fsm.stage(), SetupStage::Idle);
            assert!(!store.is_paired());
        }

        #[test]
        fn m3_before_m1_is_malformed() {
            let (_, mut fsm) = setup();
            let mut m3 = Tlv8::with_state(3);
            m3.set(TlvType::PublicKey, vec![1u8; 384]);
            m3.set(TlvType::Proof, vec![0u8; 64]);

            assert!(matches!(fsm.advance(&m3.encode()), Err(PairingError::MalformedMessage(_))));
        }

        #[test]
        fn zero_public_key_fails_authentication() {
            let (_, mut fsm) = setup();
            fsm.advance(&TestController::new("c").setup(CODE).m1()).unwrap();

            let mut m3 = Tlv8::with_state(3);
            m3.set(TlvType::PublicKey, vec![0u8; 384]);
            m3.set(TlvType::Proof, vec![0u8; 64]);
            assert_eq!(fsm.advance(&m3.encode()), Err(PairingError::AuthenticationFailed));
        }

        #[test]
        fn accepted_proof_returns_server_proof() {
            let (_, mut fsm) = setup();
            let mut client = TestController::new("c").setup(CODE);

            let m2 = fsm.advance(&client.m1()).unwrap();
            let m4 = fsm.advance(&client.m3(&m2).unwrap()).unwrap();

            assert_eq!(Tlv8::parse(&m4).unwrap().state(), Some(4));
            assert_eq!(fsm.stage(), SetupStage::AwaitingM5);
            assert!(client.m5(&m4).is_ok());
        }
    }

    mod m5 {
        use super::*;

        #[test]
        fn full_exchange_stores_controller_key() {
            let (store, mut fsm) = setup();
            let controller = TestController::new("controller-1");

            let accessory_ltpk = controller.pair(&mut fsm, CODE).unwrap();

            let record = store.find(controller.id()).unwrap();
            assert_eq!(record.public_key, controller.public_key());
            assert_eq!(record.permissions, Permissions::Admin);
            assert_eq!(accessory_ltpk, store.identity().public_key());
            assert_eq!(fsm.stage(), SetupStage::Complete);
            assert_eq!(fsm.paired_controller(), Some(controller.id()));
        }

        #[test]
        fn second_controller_is_user() {
            let (store, _) = setup();
            let code = SetupCode::parse(CODE).unwrap();

            let first = TestController::new("first");
            let second = TestController::new("second");
            first.pair(&mut PairSetup::new(store.clone(), code.clone()), CODE).unwrap();
            second.pair(&mut PairSetup::new(store.clone(), code), CODE).unwrap();

            assert_eq!(store.find(second.id()).unwrap().permissions, Permissions::User);
        }

        #[test]
        fn already_paired_id_is_rejected() {
            let (store, _) = setup();
            let code = SetupCode::parse(CODE).unwrap();
            let controller = TestController::new("dup");

            controller.pair(&mut PairSetup::new(store.clone(), code.clone()), CODE).unwrap();

            let mut fsm = PairSetup::new(store.clone(), code);
            let result = controller.pair(&mut fsm, CODE);
            assert!(matches!(result, Err(PairingError::AlreadyPaired(_))));
            assert_eq!(fsm.stage(), SetupStage::Idle);
            assert_eq!(store.list().unwrap().len(), 1);
        }

        #[test]
        fn tampered_envelope_fails_authentication() {
            let (store, mut fsm) = setup();
            let mut client = TestController::new("c").setup(CODE);

            let m2 = fsm.advance(&client.m1()).unwrap();
            let m4 = fsm.advance(&client.m3(&m2).unwrap()).unwrap();
            let m5 = client.m5(&m4).unwrap();

            let mut tlv = Tlv8::parse(&m5).unwrap();
            let mut data = tlv.get(TlvType::EncryptedData).unwrap().to_vec();
            data[0] ^= 0x01;
            tlv.set(TlvType::EncryptedData, data);

            assert_eq!(fsm.advance(&tlv.encode()), Err(PairingError::AuthenticationFailed));
            assert!(!store.is_paired());
        }

        #[test]
        fn error_reply_uses_next_state() {
            let (_, mut fsm) = setup();
            let mut client = TestController::new("c").setup("999-88-777");
            let m2 = fsm.advance(&client.m1()).unwrap();
            let m3 = client.m3(&m2).unwrap();

            let err = fsm.advance(&m3).unwrap_err();
            let reply = Tlv8::parse(&crate::reply::error_reply(&m3, &err)).unwrap();
            assert_eq!(reply.state(), Some(4));
            assert_eq!(reply.error(), Some(TlvError::Authentication as u8));
        }
    }
}
