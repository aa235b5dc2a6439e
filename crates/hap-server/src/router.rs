//! Request routing: pairing endpoints plus application endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hap_core::error::{Error, Result};
use hap_pairing::{error_reply, ControllerId};

use crate::connection::ConnectionId;
use crate::context::HapContext;
use crate::http::{HttpRequest, HttpResponse};

pub const PAIR_SETUP_PATH: &str = "/pair-setup";
pub const PAIR_VERIFY_PATH: &str = "/pair-verify";
pub const PAIRINGS_PATH: &str = "/pairings";

/// Application endpoint, reachable only over an encrypted session.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Endpoint: Send + Sync {
    /// Handle a request from the verified `controller`.
    async fn handle(&self, request: HttpRequest, controller: ControllerId) -> HttpResponse;
}

/// A routed response and what to do once it is on the wire.
#[derive(Debug)]
pub struct Routed {
    pub response: HttpResponse,
    /// Switch the connection to encrypted mode after writing `response`.
    pub activate_encryption: bool,
}

impl Routed {
    fn reply(response: HttpResponse) -> Self {
        Self {
            response,
            activate_encryption: false,
        }
    }
}

/// Maps request paths to handlers.
#[derive(Clone)]
pub struct Router {
    context: Arc<HapContext>,
    endpoints: HashMap<String, Arc<dyn Endpoint>>,
}

impl Router {
    pub fn new(context: Arc<HapContext>) -> Self {
        Self {
            context,
            endpoints: HashMap::new(),
        }
    }

    /// Register an application endpoint at `path`.
    pub fn with_endpoint(mut self, path: impl Into<String>, endpoint: Arc<dyn Endpoint>) -> Self {
        self.endpoints.insert(path.into(), endpoint);
        self
    }

    pub fn context(&self) -> &Arc<HapContext> {
        &self.context
    }

    /// Route one request on `conn`.
    ///
    /// Pairing failures become TLV error replies. Only connection-level
    /// errors are returned as `Err`, and they end the connection.
    pub async fn route(&self, conn: ConnectionId, request: HttpRequest) -> Result<Routed> {
        tracing::debug!(connection = conn, method = %request.method, path = %request.path, "Request");

        let path = request.path.clone();
        match path.as_str() {
            PAIR_SETUP_PATH | PAIR_VERIFY_PATH | PAIRINGS_PATH if request.method != "POST" => {
                Ok(Routed::reply(HttpResponse::new(405)))
            }
            PAIR_SETUP_PATH => {
                let result = self.context.process_setup_message(conn, &request.body);
                tlv_reply(&request.body, result).map(Routed::reply)
            }
            PAIR_VERIFY_PATH => {
                let result = self.context.process_verify_message(conn, &request.body);
                let verified_now = result.is_ok()
                    && !self.context.is_encrypted(conn)?
                    && self.context.controller(conn)?.is_some();
                let response = tlv_reply(&request.body, result)?;
                Ok(Routed {
                    response,
                    activate_encryption: verified_now,
                })
            }
            PAIRINGS_PATH => {
                let result = self.context.process_pairings_message(conn, &request.body);
                tlv_reply(&request.body, result).map(Routed::reply)
            }
            path => match self.endpoints.get(path) {
                Some(endpoint) => {
                    let controller = match self.context.controller(conn)? {
                        Some(controller) if self.context.is_encrypted(conn)? => controller,
                        _ => {
                            tracing::debug!(connection = conn, path, "Endpoint needs an encrypted session");
                            return Ok(Routed::reply(HttpResponse::authorization_required()));
                        }
                    };
                    let response = endpoint.handle(request, controller).await;
                    Ok(Routed::reply(response))
                }
                None => Ok(Routed::reply(HttpResponse::not_found())),
            },
        }
    }
}

/// Wrap a pairing result as a TLV8 response, turning pairing errors into
/// `{State, Error}` replies.
fn tlv_reply(request_body: &[u8], result: Result<Vec<u8>>) -> Result<HttpResponse> {
    match result {
        Ok(reply) => Ok(HttpResponse::tlv8(reply)),
        Err(Error::Pairing(err)) => {
            tracing::debug!(error = %err, "Pairing request failed");
            Ok(HttpResponse::tlv8(error_reply(request_body, &err)))
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hap_core::SetupCode;
    use hap_crypto::tlv::{Tlv8, TlvError, TlvType};
    use hap_pairing::testing::TestController;
    use hap_pairing::{BridgeIdentity, PairingRecord, PairingStore, Permissions};
    use std::net::SocketAddr;

    fn context_with(controller: &TestController) -> Arc<HapContext> {
        let store = Arc::new(PairingStore::in_memory(Arc::new(BridgeIdentity::generate())));
        store
            .add(PairingRecord::new(
                controller.id().clone(),
                controller.public_key(),
                Permissions::Admin,
            ))
            .unwrap();
        Arc::new(HapContext::new(store, SetupCode::default()))
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn post(path: &str, body: Vec<u8>) -> HttpRequest {
        HttpRequest::new("POST", path)
            .header("Content-Type", crate::http::PAIRING_TLV8)
            .body(body)
    }

    mod pairing_routes {
        use super::*;

        #[tokio::test]
        async fn verify_m4_requests_encryption() {
            let controller = TestController::new("c");
            let context = context_with(&controller);
            let router = Router::new(context.clone());
            let handle = context.register_connection(peer());
            let mut client = controller.verify();

            let m2 = router.route(handle.id(), post(PAIR_VERIFY_PATH, client.m1())).await.unwrap();
            assert!(!m2.activate_encryption);

            let m3 = client.m3(&m2.response.body, None).unwrap();
            let m4 = router.route(handle.id(), post(PAIR_VERIFY_PATH, m3)).await.unwrap();

            assert!(m4.activate_encryption);
            assert_eq!(Tlv8::parse(&m4.response.body).unwrap().state(), Some(4));
            assert!(!context.is_encrypted(handle.id()).unwrap());
        }

        #[tokio::test]
        async fn pairing_error_becomes_tlv_reply() {
            let controller = TestController::new("c");
            let context = context_with(&controller);
            let router = Router::new(context.clone());
            let handle = context.register_connection(peer());

            let routed = router
                .route(handle.id(), post(PAIR_SETUP_PATH, Tlv8::with_state(3).encode()))
                .await
                .unwrap();

            assert_eq!(routed.response.status, 200);
            let reply = Tlv8::parse(&routed.response.body).unwrap();
            assert_eq!(reply.state(), Some(4));
            assert_eq!(reply.error(), Some(TlvError::Unknown as u8));
        }

        #[tokio::test]
        async fn garbage_body_gets_error_reply() {
            let controller = TestController::new("c");
            let context = context_with(&controller);
            let router = Router::new(context.clone());
            let handle = context.register_connection(peer());

            let routed = router
                .route(handle.id(), post(PAIR_VERIFY_PATH, vec![0x06]))
                .await
                .unwrap();
            let reply = Tlv8::parse(&routed.response.body).unwrap();
            assert!(reply.contains(TlvType::Error));
        }

        #[tokio::test]
        async fn get_on_pairing_path_is_rejected() {
            let controller = TestController::new("c");
            let context = context_with(&controller);
            let router = Router::new(context.clone());
            let handle = context.register_connection(peer());

            let routed = router
                .route(handle.id(), HttpRequest::new("GET", PAIR_SETUP_PATH))
                .await
                .unwrap();
            assert_eq!(routed.response.status, 405);
        }
    }

    mod endpoints {
        use super::*;

        fn verified_router(endpoint: MockEndpoint) -> (Router, crate::registry::ConnectionHandle, ControllerId) {
            let controller = TestController::new("c");
            let context = context_with(&controller);
            let router = Router::new(context.clone()).with_endpoint("/accessories", Arc::new(endpoint));
            let handle = context.register_connection(peer());

            let mut client = controller.verify();
            let m2 = context.process_verify_message(handle.id(), &client.m1()).unwrap();
            context
                .process_verify_message(handle.id(), &client.m3(&m2, None).unwrap())
                .unwrap();
            context.activate_encryption(handle.id()).unwrap();
            (router, handle, controller.id().clone())
        }

        #[tokio::test]
        async fn plaintext_connection_gets_470() {
            let controller = TestController::new("c");
            let context = context_with(&controller);
            let mut endpoint = MockEndpoint::new();
            endpoint.expect_handle().never();
            let router = Router::new(context.clone()).with_endpoint("/accessories", Arc::new(endpoint));
            let handle = context.register_connection(peer());

            let routed = router
                .route(handle.id(), HttpRequest::new("GET", "/accessories"))
                .await
                .unwrap();
            assert_eq!(routed.response.status, 470);
        }

        #[tokio::test]
        async fn encrypted_connection_reaches_endpoint() {
            let mut endpoint = MockEndpoint::new();
            endpoint.expect_handle().times(1).returning(|_request, controller| {
                Box::pin(async move {
                    HttpResponse::new(200).body(controller.as_bytes().to_vec())
                })
            });
            let (router, handle, controller) = verified_router(endpoint);

            let routed = router
                .route(handle.id(), HttpRequest::new("GET", "/accessories"))
                .await
                .unwrap();
            assert_eq!(routed.response.status, 200);
            assert_eq!(routed.response.body, controller.as_bytes());
        }

        #[tokio::test]
        async fn unknown_path_is_404() {
            let (router, handle, _) = verified_router(MockEndpoint::new());
            let routed = router
                .route(handle.id(), HttpRequest::new("GET", "/nothing"))
                .await
                .unwrap();
            assert_eq!(routed.response.status, 404);
        }
    }
}
