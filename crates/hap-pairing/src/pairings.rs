//! Pairing administration: add, remove and list pairings.
//!
//! Only an admin controller on a verified connection may call these.

use hap_core::error::PairingError;
use hap_crypto::tlv::{Method, Tlv8, TlvType};

use crate::store::{ControllerId, PairingRecord, PairingStore, Permissions};

/// Reply for an administration request plus any side effect the caller must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingsOutcome {
    pub reply: Vec<u8>,
    /// Controller whose pairing was removed; its live sessions should close.
    pub removed: Option<ControllerId>,
}

impl PairingsOutcome {
    fn reply(reply: Tlv8) -> Self {
        Self {
            reply: reply.encode(),
            removed: None,
        }
    }
}

/// Handle one `/pairings` request from `requester`.
///
/// `requester` is the controller authenticated on the connection, or `None`
/// if the connection has not completed pair-verify.
pub fn handle_pairings(
    store: &PairingStore,
    requester: Option<&ControllerId>,
    request: &[u8],
) -> Result<PairingsOutcome, PairingError> {
    let requester = requester.ok_or_else(|| {
        tracing::warn!("Pairings request on unverified connection");
        PairingError::AuthenticationFailed
    })?;

    let is_admin = store
        .find(requester)
        .map(|r| r.is_admin())
        .unwrap_or(false);
    if !is_admin {
        tracing::warn!(controller = %requester, "Pairings request from non-admin controller");
        return Err(PairingError::AuthenticationFailed);
    }

    let tlv = Tlv8::parse(request)?;
    if tlv.require_state()? != 1 {
        return Err(PairingError::MalformedMessage(
            "pairings request must have state 1".to_string(),
        ));
    }

    match tlv.method().and_then(Method::from_byte) {
        Some(Method::AddPairing) => add_pairing(store, &tlv),
        Some(Method::RemovePairing) => remove_pairing(store, &tlv),
        Some(Method::ListPairings) => list_pairings(store),
        other => Err(PairingError::MalformedMessage(format!(
            "unsupported pairings method {:?}",
            other
        ))),
    }
}

fn add_pairing(store: &PairingStore, tlv: &Tlv8) -> Result<PairingsOutcome, PairingError> {
    let id = ControllerId::from(tlv.require(TlvType::Identifier)?);
    let public_key: [u8; 32] = tlv
        .require(TlvType::PublicKey)?
        .try_into()
        .map_err(|_| PairingError::MalformedMessage("public key must be 32 bytes".to_string()))?;
    let permissions = tlv
        .require(TlvType::Permissions)?
        .first()
        .copied()
        .and_then(Permissions::from_byte)
        .ok_or_else(|| PairingError::MalformedMessage("invalid permissions".to_string()))?;

    store
        .add_or_update(PairingRecord::new(id, public_key, permissions))
        .map_err(|e| match e {
            PairingError::AlreadyPaired(id) => {
                PairingError::MalformedMessage(format!("{} is paired with a different key", id))
            }
            other => other,
        })?;

    Ok(PairingsOutcome::reply(Tlv8::with_state(2)))
}

fn remove_pairing(store: &PairingStore, tlv: &Tlv8) -> Result<PairingsOutcome, PairingError> {
    let id = ControllerId::from(tlv.require(TlvType::Identifier)?);
    let existed = store.remove(&id)?;

    Ok(PairingsOutcome {
        reply: Tlv8::with_state(2).encode(),
        removed: existed.then_some(id),
    })
}

fn list_pairings(store: &PairingStore) -> Result<PairingsOutcome, PairingError> {
    let mut reply = Tlv8::with_state(2);
    for (i, record) in store.list()?.iter().enumerate() {
        if i > 0 {
            reply.push(TlvType::Separator, Vec::new());
        }
        reply.push(TlvType::Identifier, record.controller_id.as_bytes().to_vec());
        reply.push(TlvType::PublicKey, record.public_key.to_vec());
        reply.push(TlvType::Permissions, vec![record.permissions.as_byte()]);
    }
    Ok(PairingsOutcome::reply(reply))
}
