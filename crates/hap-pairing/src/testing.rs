//! Controller-side message builders for driving the accessory in tests.
//!
//! Available with the `test-support` feature.

use hap_core::error::PairingError;
use hap_crypto::{
    chacha::{self, nonce_from_string},
    curve25519::{public_key_from_slice, EcdhKeyPair},
    ed25519::{self, LongTermKeyPair},
    hkdf,
    keys::{SessionKeys, SharedSecret},
    srp::{SrpChallenge, SrpClient, SrpProof, PAIR_SETUP_USERNAME, SALT_LEN},
    tlv::{Method, Tlv8, TlvType},
};

use crate::pair_setup::{PairSetup, PS_MSG05_NONCE, PS_MSG06_NONCE};
use crate::pair_verify::{PairVerify, VerifyStep, PV_MSG02_NONCE, PV_MSG03_NONCE};
use crate::store::ControllerId;

/// A controller with its own identifier and long-term key.
pub struct TestController {
    id: ControllerId,
    keypair: LongTermKeyPair,
}

impl TestController {
    pub fn new(id: &str) -> Self {
        Self {
            id: ControllerId::from(id),
            keypair: LongTermKeyPair::generate(),
        }
    }

    pub fn id(&self) -> &ControllerId {
        &self.id
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    /// Start a setup exchange using `code`.
    pub fn setup(&self, code: &str) -> SetupClient {
        SetupClient {
            id: self.id.clone(),
            keypair: self.keypair.clone(),
            srp: SrpClient::new(PAIR_SETUP_USERNAME, code.as_bytes()),
            proof: None,
            session_key: None,
        }
    }

    /// Start a verify exchange.
    pub fn verify(&self) -> VerifyClient {
        VerifyClient {
            id: self.id.clone(),
            keypair: self.keypair.clone(),
            ephemeral: None,
            shared_secret: None,
        }
    }

    /// Run M1-M6 against `fsm`. Returns the accessory's long-term public key.
    pub fn pair(&self, fsm: &mut PairSetup, code: &str) -> Result<[u8; 32], PairingError> {
        let mut client = self.setup(code);
        let m2 = fsm.advance(&client.m1())?;
        let m4 = fsm.advance(&client.m3(&m2)?)?;
        let m6 = fsm.advance(&client.m5(&m4)?)?;
        client.finish(&m6)
    }

    /// Run M1-M4 against `fsm`. Returns `(controller keys, accessory keys)`.
    pub fn run_verify(&self, fsm: &mut PairVerify) -> Result<(SessionKeys, SessionKeys), PairingError> {
        let mut client = self.verify();
        let m2 = fsm.advance(&client.m1())?;
        let m3 = client.m3(m2.reply(), None)?;
        match fsm.advance(&m3)? {
            VerifyStep::Verified { keys, .. } => Ok((client.session_keys()?, keys)),
            VerifyStep::Reply(_) => Err(malformed("accessory did not finish pair-verify")),
        }
    }
}

/// Controller half of pair-setup.
pub struct SetupClient {
    id: ControllerId,
    keypair: LongTermKeyPair,
    srp: SrpClient,
    proof: Option<SrpProof>,
    session_key: Option<[u8; 32]>,
}

impl SetupClient {
    pub fn m1(&self) -> Vec<u8> {
        let mut tlv = Tlv8::with_state(1);
        tlv.set(TlvType::Method, [Method::PairSetup as u8]);
        tlv.encode()
    }

    /// Consume M2, produce M3.
    pub fn m3(&mut self, m2: &[u8]) -> Result<Vec<u8>, PairingError> {
        let tlv = expect_state(m2, 2)?;
        let salt: [u8; SALT_LEN] = tlv
            .require(TlvType::Salt)?
            .try_into()
            .map_err(|_| malformed("salt length"))?;
        let challenge = SrpChallenge {
            salt,
            server_public_key: tlv.require(TlvType::PublicKey)?.to_vec(),
        };
        let proof = self
            .srp
            .process_challenge(&challenge)
            .map_err(|e| malformed(&e.to_string()))?;

        let mut m3 = Tlv8::with_state(3);
        m3.set(TlvType::PublicKey, self.srp.public_key());
        m3.set(TlvType::Proof, proof.client_proof.clone());
        self.proof = Some(proof);
        Ok(m3.encode())
    }

    /// Consume M4, produce M5.
    pub fn m5(&mut self, m4: &[u8]) -> Result<Vec<u8>, PairingError> {
        let tlv = expect_state(m4, 4)?;
        let proof = self.proof.as_ref().ok_or_else(|| malformed("M4 before M2"))?;
        if !self
            .srp
            .verify_server_proof(tlv.require(TlvType::Proof)?, &proof.expected_server_proof)
        {
            return Err(PairingError::AuthenticationFailed);
        }

        let session_key = hkdf::derive_pair_setup_key(&proof.shared_secret).map_err(crypto)?;
        let controller_x =
            hkdf::derive_controller_sign_material(&proof.shared_secret).map_err(crypto)?;

        let ltpk = self.keypair.public_key();
        let mut info = controller_x.to_vec();
        info.extend_from_slice(self.id.as_bytes());
        info.extend_from_slice(&ltpk);

        let mut sub = Tlv8::new();
        sub.set(TlvType::Identifier, self.id.as_bytes().to_vec());
        sub.set(TlvType::PublicKey, ltpk.to_vec());
        sub.set(TlvType::Signature, self.keypair.sign(&info).to_vec());

        let encrypted = chacha::seal(&session_key, &nonce_from_string(PS_MSG05_NONCE), &sub.encode())
            .map_err(crypto)?;
        self.session_key = Some(session_key);

        let mut m5 = Tlv8::with_state(5);
        m5.set(TlvType::EncryptedData, encrypted);
        Ok(m5.encode())
    }

    /// Consume M6. Returns the accessory's verified long-term public key.
    pub fn finish(&self, m6: &[u8]) -> Result<[u8; 32], PairingError> {
        let tlv = expect_state(m6, 6)?;
        let key = self.session_key.as_ref().ok_or_else(|| malformed("M6 before M4"))?;
        let proof = self.proof.as_ref().ok_or_else(|| malformed("M6 before M2"))?;

        let decrypted = chacha::open(
            key,
            &nonce_from_string(PS_MSG06_NONCE),
            tlv.require(TlvType::EncryptedData)?,
        )
        .map_err(|_| PairingError::AuthenticationFailed)?;
        let inner = Tlv8::parse(&decrypted)?;

        let accessory_id = inner.require(TlvType::Identifier)?;
        let accessory_ltpk: [u8; 32] = inner
            .require(TlvType::PublicKey)?
            .try_into()
            .map_err(|_| malformed("accessory LTPK length"))?;

        let accessory_x =
            hkdf::derive_accessory_sign_material(&proof.shared_secret).map_err(crypto)?;
        let mut info = accessory_x.to_vec();
        info.extend_from_slice(accessory_id);
        info.extend_from_slice(&accessory_ltpk);

        ed25519::verify_slices(&accessory_ltpk, &info, inner.require(TlvType::Signature)?)
            .map_err(|_| PairingError::AuthenticationFailed)?;
        Ok(accessory_ltpk)
    }
}

/// Controller half of pair-verify.
pub struct VerifyClient {
    id: ControllerId,
    keypair: LongTermKeyPair,
    ephemeral: Option<EcdhKeyPair>,
    shared_secret: Option<SharedSecret>,
}

impl VerifyClient {
    pub fn m1(&mut self) -> Vec<u8> {
        let ephemeral = EcdhKeyPair::generate();
        let mut tlv = Tlv8::with_state(1);
        tlv.set(TlvType::PublicKey, ephemeral.public_key().to_vec());
        self.ephemeral = Some(ephemeral);
        tlv.encode()
    }

    /// Consume M2, produce M3.
    ///
    /// With `accessory_ltpk` the accessory's signature is checked too.
    pub fn m3(
        &mut self,
        m2: &[u8],
        accessory_ltpk: Option<&[u8; 32]>,
    ) -> Result<Vec<u8>, PairingError> {
        let tlv = expect_state(m2, 2)?;
        let ephemeral = self.ephemeral.take().ok_or_else(|| malformed("M2 before M1"))?;
        let own_public = ephemeral.public_key();
        let accessory_public =
            public_key_from_slice(tlv.require(TlvType::PublicKey)?).map_err(crypto)?;

        let shared = ephemeral.diffie_hellman(&accessory_public).map_err(crypto)?;
        let key = hkdf::derive_pair_verify_key(shared.as_bytes()).map_err(crypto)?;

        let decrypted = chacha::open(
            &key,
            &nonce_from_string(PV_MSG02_NONCE),
            tlv.require(TlvType::EncryptedData)?,
        )
        .map_err(|_| PairingError::AuthenticationFailed)?;

        if let Some(ltpk) = accessory_ltpk {
            let inner = Tlv8::parse(&decrypted)?;
            let mut info = accessory_public.to_vec();
            info.extend_from_slice(inner.require(TlvType::Identifier)?);
            info.extend_from_slice(&own_public);
            ed25519::verify_slices(ltpk, &info, inner.require(TlvType::Signature)?)
                .map_err(|_| PairingError::AuthenticationFailed)?;
        }

        let mut info = own_public.to_vec();
        info.extend_from_slice(self.id.as_bytes());
        info.extend_from_slice(&accessory_public);

        let mut sub = Tlv8::new();
        sub.set(TlvType::Identifier, self.id.as_bytes().to_vec());
        sub.set(TlvType::Signature, self.keypair.sign(&info).to_vec());

        let encrypted = chacha::seal(&key, &nonce_from_string(PV_MSG03_NONCE), &sub.encode())
            .map_err(crypto)?;
        self.shared_secret = Some(shared);

        let mut m3 = Tlv8::with_state(3);
        m3.set(TlvType::EncryptedData, encrypted);
        Ok(m3.encode())
    }

    /// Controller-side session keys once M3 has been built.
    pub fn session_keys(&self) -> Result<SessionKeys, PairingError> {
        let shared = self.shared_secret.as_ref().ok_or_else(|| malformed("no shared secret"))?;
        SessionKeys::derive_controller_keys(shared).map_err(crypto)
    }
}

fn expect_state(message: &[u8], state: u8) -> Result<Tlv8, PairingError> {
    let tlv = Tlv8::parse(message)?;
    if let Some(code) = tlv.error() {
        return Err(malformed(&format!("accessory returned error {}", code)));
    }
    if tlv.state() != Some(state) {
        return Err(malformed(&format!("expected state {}", state)));
    }
    Ok(tlv)
}

fn malformed(msg: &str) -> PairingError {
    PairingError::MalformedMessage(msg.to_string())
}

fn crypto(err: hap_core::error::CryptoError) -> PairingError {
    PairingError::MalformedMessage(err.to_string())
}
