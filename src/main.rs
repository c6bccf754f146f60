mod bridge;

use std::{env, sync::Arc, time::Duration, time::Instant};

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bridge::{
    correlator::DEFAULT_REQUEST_TIMEOUT, BridgeError, ConnectionGateway, HttpIdentityVerifier,
    IdentityVerifier, RequestCorrelator, SessionRegistry, StaticTokenVerifier,
};

#[derive(Debug, Clone)]
struct BridgeConfig {
    host: String,
    port: u16,
    identity_url: Option<String>,
    identity_timeout: Duration,
    auth_token: Option<String>,
    static_user_id: u64,
    request_timeout: Duration,
    session_ttl: Duration,
    enforce_session_expiry: bool,
    expiry_sweep_interval: Duration,
    outbound_buffer: usize,
}

impl BridgeConfig {
    fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let host = lookup("BRIDGE_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = lookup("BRIDGE_PORT")
            .and_then(|v| v.trim().parse::<u16>().ok())
            .unwrap_or(8787);

        let identity_url = read_non_empty(&lookup, "BRIDGE_IDENTITY_URL");
        let auth_token = read_non_empty(&lookup, "BRIDGE_AUTH_TOKEN");
        if identity_url.is_none() && auth_token.is_none() {
            return Err(
                "BRIDGE_IDENTITY_URL is required. Set BRIDGE_AUTH_TOKEN instead only for local development."
                    .to_string(),
            );
        }

        let identity_timeout =
            Duration::from_millis(parse_u64(&lookup, "BRIDGE_IDENTITY_TIMEOUT_MS", 5_000));
        let static_user_id = parse_u64(&lookup, "BRIDGE_STATIC_USER_ID", 0);
        let request_timeout = Duration::from_millis(parse_u64(
            &lookup,
            "BRIDGE_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
        ));
        let session_ttl = Duration::from_secs(
            parse_u64(&lookup, "BRIDGE_SESSION_TTL_SECS", 24 * 60 * 60).min(365 * 24 * 60 * 60),
        );
        let enforce_session_expiry = parse_bool(&lookup, "BRIDGE_ENFORCE_SESSION_EXPIRY");
        let expiry_sweep_interval =
            Duration::from_secs(parse_u64(&lookup, "BRIDGE_EXPIRY_SWEEP_SECS", 60).max(1));
        let outbound_buffer = parse_u64(&lookup, "BRIDGE_OUTBOUND_BUFFER", 256).max(1) as usize;

        Ok(Self {
            host,
            port,
            identity_url,
            identity_timeout,
            auth_token,
            static_user_id,
            request_timeout,
            session_ttl,
            enforce_session_expiry,
            expiry_sweep_interval,
            outbound_buffer,
        })
    }

    fn build_verifier(&self) -> Result<Arc<dyn IdentityVerifier>, String> {
        if let Some(url) = &self.identity_url {
            return Ok(Arc::new(HttpIdentityVerifier::new(
                url.clone(),
                self.identity_timeout,
            )?));
        }

        match &self.auth_token {
            Some(token) => Ok(Arc::new(StaticTokenVerifier::new(
                token.clone(),
                self.static_user_id,
            ))),
            None => Err("no identity verifier configured".to_string()),
        }
    }
}

struct AppState {
    config: Arc<BridgeConfig>,
    started_at: Instant,
    registry: Arc<SessionRegistry>,
    correlator: Arc<RequestCorrelator>,
    gateway: ConnectionGateway,
}

impl AppState {
    fn new(config: Arc<BridgeConfig>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session_ttl));
        let correlator = Arc::new(RequestCorrelator::new(
            Arc::clone(&registry),
            config.request_timeout,
        ));
        let gateway = ConnectionGateway::new(
            Arc::clone(&registry),
            Arc::clone(&correlator),
            verifier,
            config.outbound_buffer,
        );

        Self {
            config,
            started_at: Instant::now(),
            registry,
            correlator,
            gateway,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvokeToolRequest {
    session_id: String,
    action: String,
    #[serde(default = "empty_payload")]
    payload: Value,
    timeout_ms: Option<u64>,
}

fn empty_payload() -> Value {
    json!({})
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tab_bridge=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match BridgeConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(message) => {
            error!("{message}");
            std::process::exit(1);
        }
    };

    let verifier = match config.build_verifier() {
        Ok(verifier) => verifier,
        Err(message) => {
            error!("{message}");
            std::process::exit(1);
        }
    };

    if config.identity_url.is_none() {
        warn!("BRIDGE_IDENTITY_URL is not set; accepting the static BRIDGE_AUTH_TOKEN (local development only)");
    }

    let state = Arc::new(AppState::new(config.clone(), verifier));

    if config.enforce_session_expiry {
        let _ = state.gateway.spawn_expiry_sweep(config.expiry_sweep_interval);
        info!(
            sweep_secs = config.expiry_sweep_interval.as_secs(),
            "session expiry enforcement enabled"
        );
    }

    let app = build_router(state);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %bind_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %bind_addr, version = env!("CARGO_PKG_VERSION"), "tab-bridge listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/tools/invoke", post(invoke_tool_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "at": Utc::now().to_rfc3339(),
        "uptimeSec": state.started_at.elapsed().as_secs(),
        "connectionCount": state.registry.stats().connection_count,
        "pendingCount": state.correlator.stats().pending_count,
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ConnectQuery>,
) -> Response {
    let credential = query
        .token
        .filter(|token| !token.trim().is_empty())
        .or_else(|| bearer_token(&headers));

    ws.on_upgrade(move |socket| async move {
        state.gateway.serve_socket(socket, credential).await;
    })
}

async fn invoke_tool_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvokeToolRequest>,
) -> Response {
    if !state.registry.has(&request.session_id) {
        return error_response(&BridgeError::NotConnected);
    }

    let InvokeToolRequest {
        session_id,
        action,
        payload,
        timeout_ms,
    } = request;

    let result = match timeout_ms {
        Some(ms) => {
            let wait = Duration::from_millis(ms.clamp(100, 120_000));
            state
                .correlator
                .send_request_with_timeout(&session_id, &action, payload, wait)
                .await
        }
        None => state.correlator.send_request(&session_id, &action, payload).await,
    };

    match result {
        Ok(data) => Json(json!({ "success": true, "data": data })).into_response(),
        Err(error) => {
            warn!(session_id = %session_id, action = %action, error = %error, "tool invocation failed");
            error_response(&error)
        }
    }
}

fn error_response(error: &BridgeError) -> Response {
    (
        error.status(),
        Json(json!({
            "success": false,
            "error": error.code(),
            "message": error.to_string(),
        })),
    )
        .into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn read_non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> bool {
    lookup(name)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str, fallback: u64) -> u64 {
    lookup(name)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(fallback)
}
