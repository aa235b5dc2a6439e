//! TCP accept loop and per-connection tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use hap_core::error::{Error, ParseError, Result};
use hap_core::AccessoryConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::context::HapContext;
use crate::http::HttpRequest;
use crate::registry::ConnectionHandle;
use crate::router::{Endpoint, Router};
use crate::transport::SessionTransport;

type StopCallback = Box<dyn Fn() + Send + Sync>;

/// Accessory HTTP server.
pub struct HapServer {
    listener: TcpListener,
    port: u16,
    context: Arc<HapContext>,
    router: Router,
    on_stop: Option<StopCallback>,
}

impl HapServer {
    /// Bind `0.0.0.0:<config.port>`. Port 0 lets the OS choose.
    pub async fn bind(config: &AccessoryConfig, context: Arc<HapContext>) -> Result<Self> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], config.port)), context).await
    }

    /// Bind an explicit address.
    pub async fn bind_addr(addr: SocketAddr, context: Arc<HapContext>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        tracing::info!(port, "HAP server listening");

        Ok(Self {
            listener,
            port,
            router: Router::new(context.clone()),
            context,
            on_stop: None,
        })
    }

    /// Add an application endpoint.
    pub fn with_endpoint(mut self, path: impl Into<String>, endpoint: Arc<dyn Endpoint>) -> Self {
        self.router = self.router.with_endpoint(path, endpoint);
        self
    }

    /// Run `callback` when the server stops.
    pub fn on_stop(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Box::new(callback));
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &Arc<HapContext> {
        &self.context
    }

    /// Accept connections until `shutdown` turns true, then [`HapServer::stop`].
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let router = Arc::new(self.router.clone());
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer, router.clone()),
                        Err(e) => tracing::warn!(error = %e, "Accept failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop();
        Ok(())
    }

    /// Close every connection and run the stop callback.
    pub fn stop(&self) {
        let closed = self.context.close_all();
        tracing::info!(connections = closed, "HAP server stopped");
        if let Some(callback) = &self.on_stop {
            callback();
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, router: Arc<Router>) {
        let _ = stream.set_nodelay(true);
        let context = self.context.clone();

        tokio::spawn(async move {
            serve_connection(stream, peer, context, router).await;
        });
    }
}

/// Drive one connection from accept to close, then unregister it.
pub async fn serve_connection<S>(stream: S, peer: SocketAddr, context: Arc<HapContext>, router: Arc<Router>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handle = context.register_connection(peer);
    let id = handle.id();
    tracing::debug!(connection = id, %peer, "Connection opened");

    match run_connection(stream, &mut handle, &context, &router).await {
        Ok(()) => tracing::debug!(connection = id, "Connection closed"),
        Err(Error::Timeout) => {
            tracing::warn!(connection = id, %peer, "Handshake timed out, closing connection")
        }
        Err(e) => tracing::warn!(connection = id, %peer, error = %e, "Connection ended with error"),
    }

    context.unregister_connection(id);
}

async fn run_connection<S>(
    stream: S,
    handle: &mut ConnectionHandle,
    context: &HapContext,
    router: &Router,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = handle.id();
    let mut transport = SessionTransport::new(stream, handle.state().clone());
    let mut buffer = Vec::new();
    // Deadline for the next complete handshake message, fixed when the
    // previous reply went out.
    let mut deadline: Option<Instant> = None;

    loop {
        while let Some((request, used)) = HttpRequest::parse(&buffer)? {
            buffer.drain(..used);
            deadline = None;

            let routed = router.route(id, request).await?;
            transport.write_all(&routed.response.serialize()).await?;
            if routed.activate_encryption {
                // Anything read alongside M3 arrived unauthenticated.
                if !buffer.is_empty() {
                    return Err(Error::Parse(ParseError::InvalidFormat(
                        "plaintext data after pair-verify".to_string(),
                    )));
                }
                context.activate_encryption(id)?;
            }
            if handle.is_closed() {
                return Ok(());
            }
        }

        if !context.handshake_in_progress(id)? {
            deadline = None;
        } else if deadline.is_none() {
            deadline = context.handshake_timeout().map(|limit| Instant::now() + limit);
        }

        tokio::select! {
            chunk = read_until(&mut transport, deadline) => {
                match chunk? {
                    Some(bytes) => buffer.extend_from_slice(&bytes),
                    None => return Ok(()),
                }
            }
            _ = handle.closed() => return Ok(()),
        }
    }
}

async fn read_until<S>(
    transport: &mut SessionTransport<S>,
    deadline: Option<Instant>,
) -> Result<Option<Vec<u8>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, transport.read_chunk())
            .await
            .map_err(|_| Error::Timeout)?,
        None => transport.read_chunk().await,
    }
}
