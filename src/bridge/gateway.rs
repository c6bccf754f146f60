use std::{sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::{
    correlator::RequestCorrelator,
    error::{BridgeError, CLOSE_SESSION_EXPIRED},
    frame::{ClientFrame, ServerFrame},
    identity::IdentityVerifier,
    registry::SessionRegistry,
    socket::ClientSocket,
};

#[derive(Clone)]
pub(crate) struct ConnectionGateway {
    registry: Arc<SessionRegistry>,
    correlator: Arc<RequestCorrelator>,
    verifier: Arc<dyn IdentityVerifier>,
    outbound_buffer: usize,
}

impl ConnectionGateway {
    pub(crate) fn new(
        registry: Arc<SessionRegistry>,
        correlator: Arc<RequestCorrelator>,
        verifier: Arc<dyn IdentityVerifier>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            registry,
            correlator,
            verifier,
            outbound_buffer,
        }
    }

    pub(crate) async fn serve_socket(&self, socket: WebSocket, credential: Option<String>) {
        let (mut socket_tx, mut socket_rx) = socket.split();
        let (client, mut rx) = ClientSocket::channel(self.outbound_buffer);

        let writer_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if socket_tx.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        let (user_id, credential) = match self.authenticate(credential).await {
            Ok(identity) => identity,
            Err(error) => {
                warn!(error = %error, "rejecting connection");
                if let Some((code, reason)) = error.close_frame() {
                    let _ = client.close(code, reason);
                }
                drop(client);
                let _ = writer_task.await;
                return;
            }
        };

        let session_id = self.registry.register(client.clone(), user_id, credential);
        let expires_at = self
            .registry
            .get(&session_id)
            .map(|session| session.expires_at.timestamp_millis())
            .unwrap_or_default();

        let welcome = ServerFrame::Connected {
            session_id: session_id.clone(),
            expires_at,
        };
        if let Err(error) = client.send_frame(&welcome) {
            warn!(session_id = %session_id, error = %error, "failed to send welcome frame");
            self.teardown(&session_id);
            writer_task.abort();
            return;
        }
        info!(session_id = %session_id, user_id, "client connected");

        while let Some(message) = socket_rx.next().await {
            match message {
                Ok(Message::Text(text)) => self.dispatch(&session_id, &client, text.as_str()),
                Ok(Message::Binary(bytes)) => {
                    debug!(session_id = %session_id, size = bytes.len(), "ignoring binary frame");
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(error) => {
                    warn!(session_id = %session_id, error = %error, "websocket error");
                    break;
                }
            }
        }

        self.teardown(&session_id);
        writer_task.abort();
    }

    async fn authenticate(&self, credential: Option<String>) -> Result<(u64, String), BridgeError> {
        let credential = credential
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(BridgeError::MissingToken)?;
        let user_id = self.verifier.verify(&credential).await?;
        Ok((user_id, credential))
    }

    fn dispatch(&self, session_id: &str, client: &ClientSocket, text: &str) {
        match ClientFrame::parse(text) {
            Ok(ClientFrame::Response(frame)) => {
                let _ = self.correlator.handle_response(session_id, frame);
            }
            Ok(ClientFrame::Ping) => {
                if let Err(error) = client.send_frame(&ServerFrame::Pong) {
                    warn!(session_id, error = %error, "failed to send pong");
                }
            }
            Ok(ClientFrame::Unrecognized(kind)) => {
                warn!(session_id, frame_type = %kind, "ignoring unrecognized frame type");
            }
            Err(error) => {
                warn!(session_id, error = %error, "dropping malformed frame");
            }
        }
    }

    fn teardown(&self, session_id: &str) {
        let removed = self.registry.unregister(session_id);
        let failed = self.correlator.fail_session(session_id);
        if let Some(session) = removed {
            info!(
                session_id,
                user_id = session.user_id,
                connected_secs = (Utc::now() - session.created_at).num_seconds(),
                rejected_requests = failed,
                "client disconnected"
            );
        }
    }

    pub(crate) fn sweep_expired(&self) -> usize {
        let expired = self.registry.expired(Utc::now());
        for session_id in &expired {
            if let Some(session) = self.registry.get(session_id) {
                let _ = session.socket.close(CLOSE_SESSION_EXPIRED, "session expired");
            }
            self.teardown(session_id);
        }
        expired.len()
    }

    pub(crate) fn spawn_expiry_sweep(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                let _ = ticker.tick().await;
                let closed = gateway.sweep_expired();
                if closed > 0 {
                    info!(closed, "closed expired sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::{ws::WebSocketUpgrade, Query, State},
        response::Response,
        routing::get,
        Router,
    };
    use serde::Deserialize;
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio_tungstenite::{
        connect_async, tungstenite::Message as ClientMessage, MaybeTlsStream, WebSocketStream,
    };

    use super::*;
    use crate::bridge::{correlator::DEFAULT_REQUEST_TIMEOUT, identity::StaticTokenVerifier};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    #[derive(Deserialize)]
    struct TokenQuery {
        token: Option<String>,
    }

    struct TestBridge {
        url: String,
        gateway: ConnectionGateway,
        registry: Arc<SessionRegistry>,
        correlator: Arc<RequestCorrelator>,
    }

    async fn ws_route(
        ws: WebSocketUpgrade,
        State(gateway): State<ConnectionGateway>,
        Query(query): Query<TokenQuery>,
    ) -> Response {
        ws.on_upgrade(move |socket| async move { gateway.serve_socket(socket, query.token).await })
    }

    async fn spawn_bridge(session_ttl: Duration) -> TestBridge {
        let registry = Arc::new(SessionRegistry::new(session_ttl));
        let correlator = Arc::new(RequestCorrelator::new(
            Arc::clone(&registry),
            DEFAULT_REQUEST_TIMEOUT,
        ));
        let gateway = ConnectionGateway::new(
            Arc::clone(&registry),
            Arc::clone(&correlator),
            Arc::new(StaticTokenVerifier::new("good", 42)),
            32,
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind gateway");
        let addr = listener.local_addr().expect("local addr");
        let app = Router::new()
            .route("/ws", get(ws_route))
            .with_state(gateway.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        TestBridge {
            url: format!("ws://{addr}/ws"),
            gateway,
            registry,
            correlator,
        }
    }

    async fn next_json(client: &mut Client) -> Value {
        loop {
            let message = client
                .next()
                .await
                .expect("socket open")
                .expect("socket message");
            if let ClientMessage::Text(text) = message {
                return serde_json::from_str(text.as_str()).expect("frame json");
            }
        }
    }

    async fn next_close(client: &mut Client) -> (u16, String) {
        loop {
            match client.next().await {
                Some(Ok(ClientMessage::Close(Some(frame)))) => {
                    return (u16::from(frame.code), frame.reason.as_str().to_string());
                }
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    }

    async fn connect(url: &str) -> (Client, String) {
        let (mut client, _) = connect_async(format!("{url}?token=good"))
            .await
            .expect("connect");
        let welcome = next_json(&mut client).await;
        assert_eq!(welcome["type"], "connected");
        assert!(welcome["expires_at"].is_i64());
        let session_id = welcome["session_id"].as_str().expect("session id").to_string();
        (client, session_id)
    }

    async fn wait_for_connections(registry: &SessionRegistry, expected: usize) {
        for _ in 0..100 {
            if registry.stats().connection_count == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection count never reached {expected}");
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let bridge = spawn_bridge(Duration::from_secs(3600)).await;
        let (mut client, _) = connect_async(bridge.url.as_str()).await.expect("connect");
        assert_eq!(next_close(&mut client).await, (4001, "missing token".to_string()));
        assert_eq!(bridge.registry.stats().connection_count, 0);
    }

    #[tokio::test]
    async fn invalid_token_is_rejected() {
        let bridge = spawn_bridge(Duration::from_secs(3600)).await;
        let (mut client, _) = connect_async(format!("{}?token=bad", bridge.url))
            .await
            .expect("connect");
        assert_eq!(
            next_close(&mut client).await,
            (4003, "authentication failed".to_string())
        );
        assert_eq!(bridge.registry.stats().connection_count, 0);
    }

    #[tokio::test]
    async fn authenticated_client_is_registered_and_answers_pings() {
        let bridge = spawn_bridge(Duration::from_secs(3600)).await;
        let (mut client, session_id) = connect(&bridge.url).await;

        let session = bridge.registry.get(&session_id).expect("registered");
        assert_eq!(session.user_id, 42);
        assert_eq!(session.credential, "good");
        assert!(session.expires_at > Utc::now());

        client
            .send(ClientMessage::text(r#"{"type":"ping"}"#))
            .await
            .expect("send ping");
        assert_eq!(next_json(&mut client).await, json!({ "type": "pong" }));
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_keep_the_connection_open() {
        let bridge = spawn_bridge(Duration::from_secs(3600)).await;
        let (mut client, session_id) = connect(&bridge.url).await;

        for text in ["{oops", r#"{"type":"subscribe"}"#, r#"{"type":"response"}"#, "[]"] {
            client.send(ClientMessage::text(text)).await.expect("send noise");
        }
        client
            .send(ClientMessage::text(r#"{"type":"ping"}"#))
            .await
            .expect("send ping");
        assert_eq!(next_json(&mut client).await, json!({ "type": "pong" }));
        assert!(bridge.registry.has(&session_id));
    }

    #[tokio::test]
    async fn request_round_trip_over_socket() {
        let bridge = spawn_bridge(Duration::from_secs(3600)).await;
        let (mut client, session_id) = connect(&bridge.url).await;

        let correlator = Arc::clone(&bridge.correlator);
        let call = tokio::spawn(async move {
            correlator
                .send_request(&session_id, "read_title", json!({ "tab": 1 }))
                .await
        });

        let request = next_json(&mut client).await;
        assert_eq!(request["type"], "request");
        assert_eq!(request["action"], "read_title");
        assert_eq!(request["payload"], json!({ "tab": 1 }));
        let response = json!({
            "id": request["id"],
            "type": "response",
            "success": true,
            "data": { "title": "Inbox" }
        });
        client
            .send(ClientMessage::text(response.to_string()))
            .await
            .expect("send response");

        assert_eq!(call.await.expect("join"), Ok(json!({ "title": "Inbox" })));
    }

    #[tokio::test]
    async fn disconnect_unregisters_and_rejects_pending_requests() {
        let bridge = spawn_bridge(Duration::from_secs(3600)).await;
        let (mut client, session_id) = connect(&bridge.url).await;

        let correlator = Arc::clone(&bridge.correlator);
        let target = session_id.clone();
        let call = tokio::spawn(async move { correlator.send_request(&target, "a", json!({})).await });
        let _ = next_json(&mut client).await;

        client.close(None).await.expect("close");
        assert_eq!(call.await.expect("join"), Err(BridgeError::Disconnected));
        wait_for_connections(&bridge.registry, 0).await;
        assert!(!bridge.registry.has(&session_id));
    }

    #[tokio::test]
    async fn expiry_sweep_closes_expired_sessions() {
        let bridge = spawn_bridge(Duration::ZERO).await;
        let (mut client, session_id) = connect(&bridge.url).await;

        assert_eq!(bridge.gateway.sweep_expired(), 1);
        assert!(!bridge.registry.has(&session_id));
        assert_eq!(next_close(&mut client).await, (4004, "session expired".to_string()));
    }
}
