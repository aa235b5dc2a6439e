//! Error replies for failed pairing messages.

use hap_core::error::PairingError;
use hap_crypto::tlv::{Tlv8, TlvError};

/// TLV error code sent to the controller for `err`.
pub fn error_code(err: &PairingError) -> TlvError {
    match err {
        PairingError::AuthenticationFailed | PairingError::UnknownController(_) => {
            TlvError::Authentication
        }
        PairingError::AlreadyPaired(_) => TlvError::Unavailable,
        PairingError::MalformedMessage(_) | PairingError::Store(_) => TlvError::Unknown,
    }
}

/// `{State = n + 1, Error}` reply for a request that failed.
///
/// `n` is the request's State item, or 1 if it could not be read.
pub fn error_reply(request: &[u8], err: &PairingError) -> Vec<u8> {
    let state = Tlv8::parse(request)
        .ok()
        .and_then(|tlv| tlv.state())
        .unwrap_or(1);
    Tlv8::error_response(state.saturating_add(1), error_code(err)).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hap_crypto::tlv::TlvType;

    #[test]
    fn codes_per_error() {
        assert_eq!(error_code(&PairingError::AuthenticationFailed), TlvError::Authentication);
        assert_eq!(
            error_code(&PairingError::UnknownController("x".into())),
            TlvError::Authentication
        );
        assert_eq!(error_code(&PairingError::AlreadyPaired("x".into())), TlvError::Unavailable);
        assert_eq!(error_code(&PairingError::MalformedMessage("x".into())), TlvError::Unknown);
    }

    #[test]
    fn reply_state_follows_request() {
        let request = Tlv8::with_state(3).encode();
        let reply = Tlv8::parse(&error_reply(&request, &PairingError::AuthenticationFailed)).unwrap();
        assert_eq!(reply.state(), Some(4));
        assert_eq!(reply.error(), Some(TlvError::Authentication as u8));
    }

    #[test]
    fn unreadable_request_gets_state_two() {
        let reply = Tlv8::parse(&error_reply(&[0x06], &PairingError::MalformedMessage("x".into())))
            .unwrap();
        assert_eq!(reply.state(), Some(2));
        assert!(reply.contains(TlvType::Error));
    }
}
