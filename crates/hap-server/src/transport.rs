//! Dual-mode stream: plaintext until pair-verify completes, then records.

use hap_core::error::{Error, Result, TransportError};
use hap_crypto::chacha::{LENGTH_PREFIX_LEN, MAX_RECORD_LEN, TAG_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::connection::{lock, SharedState};

/// Size of a plaintext read.
const PLAINTEXT_READ_LEN: usize = 4096;

/// How bytes cross the wire right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Plaintext,
    Encrypted,
}

/// A connection's stream, framed by its current mode.
///
/// The mode is read from the connection state on every call, so switching
/// on encryption takes effect for the next read or write.
pub struct SessionTransport<S> {
    stream: S,
    state: SharedState,
}

impl<S> SessionTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, state: SharedState) -> Self {
        Self { stream, state }
    }

    pub fn mode(&self) -> Result<TransportMode> {
        Ok(if lock(&self.state)?.is_encrypted() {
            TransportMode::Encrypted
        } else {
            TransportMode::Plaintext
        })
    }

    /// Read the next chunk of application bytes.
    ///
    /// Returns `None` on a clean end of stream. In encrypted mode a chunk is
    /// exactly one record's plaintext.
    pub async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.mode()? {
            TransportMode::Plaintext => self.read_plaintext().await,
            TransportMode::Encrypted => self.read_record().await,
        }
    }

    /// Write application bytes, sealing them first in encrypted mode.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let wire = match self.mode()? {
            TransportMode::Plaintext => data.to_vec(),
            TransportMode::Encrypted => lock(&self.state)?.seal(data)?,
        };
        self.stream.write_all(&wire).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn read_plaintext(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; PLAINTEXT_READ_LEN];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        match self.stream.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u16::from_le_bytes(prefix) as usize;
        if len > MAX_RECORD_LEN {
            return Err(TransportError::FrameTooLarge(len).into());
        }

        let mut body = vec![0u8; len + TAG_LEN];
        self.stream.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Transport(TransportError::Closed)
            } else {
                Error::Io(e)
            }
        })?;

        let plaintext = lock(&self.state)?.open_record(prefix, &body).map_err(|e| {
            tracing::warn!(error = %e, "Dropping connection after record failure");
            e
        })?;
        Ok(Some(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use hap_core::SetupCode;
    use hap_crypto::keys::SessionKeys;
    use hap_crypto::RecordCipher;
    use hap_pairing::testing::TestController;
    use hap_pairing::{BridgeIdentity, PairingRecord, PairingStore, Permissions};
    use std::sync::{Arc, Mutex};
    use tokio::io::{duplex, DuplexStream};

    /// A verified, encrypted connection state plus the controller's keys.
    fn encrypted_state() -> (SharedState, SessionKeys) {
        let controller = TestController::new("c");
        let store = Arc::new(PairingStore::in_memory(Arc::new(BridgeIdentity::generate())));
        store
            .add(PairingRecord::new(
                controller.id().clone(),
                controller.public_key(),
                Permissions::Admin,
            ))
            .unwrap();

        let mut state = ConnectionState::new("127.0.0.1:1".parse().unwrap(), store, SetupCode::default());
        let mut client = controller.verify();
        let m2 = state.handle_verify(&client.m1()).unwrap();
        state.handle_verify(&client.m3(&m2, None).unwrap()).unwrap();
        state.activate_encryption().unwrap();

        (Arc::new(Mutex::new(state)), client.session_keys().unwrap())
    }

    fn plaintext_state() -> SharedState {
        let store = Arc::new(PairingStore::in_memory(Arc::new(BridgeIdentity::generate())));
        Arc::new(Mutex::new(ConnectionState::new(
            "127.0.0.1:1".parse().unwrap(),
            store,
            SetupCode::default(),
        )))
    }

    async fn read_all(stream: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    mod plaintext {
        use super::*;

        #[tokio::test]
        async fn passes_bytes_through() {
            let (server, mut client) = duplex(8192);
            let mut transport = SessionTransport::new(server, plaintext_state());

            transport.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
            assert_eq!(read_all(&mut client, 19).await, b"HTTP/1.1 200 OK\r\n\r\n");

            client.write_all(b"hello").await.unwrap();
            assert_eq!(transport.read_chunk().await.unwrap(), Some(b"hello".to_vec()));
        }

        #[tokio::test]
        async fn end_of_stream_is_none() {
            let (server, client) = duplex(64);
            let mut transport = SessionTransport::new(server, plaintext_state());
            drop(client);
            assert_eq!(transport.read_chunk().await.unwrap(), None);
        }
    }

    mod encrypted {
        use super::*;

        #[tokio::test]
        async fn write_is_sealed_for_controller() {
            let (server, mut client) = duplex(8192);
            let (state, keys) = encrypted_state();
            let mut transport = SessionTransport::new(server, state);
            let mut controller = RecordCipher::new(&keys);

            let payload = vec![0x5Au8; 1500];
            transport.write_all(&payload).await.unwrap();

            // 1500 bytes = two records
            let wire = read_all(&mut client, 1500 + 2 * (LENGTH_PREFIX_LEN + TAG_LEN)).await;
            assert_eq!(controller.open(&wire).unwrap(), payload);
        }

        #[tokio::test]
        async fn reads_one_record_per_chunk() {
            let (server, mut client) = duplex(8192);
            let (state, keys) = encrypted_state();
            let mut transport = SessionTransport::new(server, state);
            let mut controller = RecordCipher::new(&keys);

            client.write_all(&controller.seal(b"first").unwrap()).await.unwrap();
            client.write_all(&controller.seal(b"second").unwrap()).await.unwrap();

            assert_eq!(transport.read_chunk().await.unwrap(), Some(b"first".to_vec()));
            assert_eq!(transport.read_chunk().await.unwrap(), Some(b"second".to_vec()));
        }

        #[tokio::test]
        async fn tampered_record_fails() {
            let (server, mut client) = duplex(8192);
            let (state, keys) = encrypted_state();
            let mut transport = SessionTransport::new(server, state);
            let mut controller = RecordCipher::new(&keys);

            let mut record = controller.seal(b"GET / HTTP/1.1\r\n\r\n").unwrap();
            record[4] ^= 0x01;
            client.write_all(&record).await.unwrap();

            let err = transport.read_chunk().await.unwrap_err();
            assert!(matches!(err, Error::Transport(TransportError::DecryptionFailed)));
        }

        #[tokio::test]
        async fn oversized_length_is_rejected() {
            let (server, mut client) = duplex(8192);
            let (state, _) = encrypted_state();
            let mut transport = SessionTransport::new(server, state);

            client.write_all(&[0x01, 0x08]).await.unwrap();
            let err = transport.read_chunk().await.unwrap_err();
            assert!(matches!(err, Error::Transport(TransportError::FrameTooLarge(0x801))));
        }

        #[tokio::test]
        async fn truncated_record_is_closed() {
            let (server, mut client) = duplex(8192);
            let (state, _) = encrypted_state();
            let mut transport = SessionTransport::new(server, state);

            client.write_all(&[0x10, 0x00, 0xAA, 0xBB]).await.unwrap();
            drop(client);
            let err = transport.read_chunk().await.unwrap_err();
            assert!(matches!(err, Error::Transport(TransportError::Closed)));
        }
    }
}
