//! `packwright dev` command implementation.
//!
//! Builds once, then serves the last-known-good artifacts while a watcher
//! feeds the orchestrator:
//!
//! ```text
//! notify callback → change queue → rebuild task → artifacts + live reload event
//! GET /any/path   → route: artifact | static file | proxy | history fallback | 404
//! ```

use axum::{
    body::{Body, Bytes},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use miette::{IntoDiagnostic, Result};
use packwright_core::dev::queue::{change_queue, COALESCE_WINDOW};
use packwright_core::dev::route::{content_type, Route};
use packwright_core::dev::watch::spawn_watcher;
use packwright_core::dev::{
    self, inject_client_script, LiveReloadEvent, Orchestrator, CLIENT_PATH, LIVE_RELOAD_CLIENT,
    LIVE_RELOAD_PATH,
};
use packwright_core::{Bundler, Mode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Proxy request timeout.
const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest request body forwarded to a proxy target.
const MAX_PROXY_BODY: usize = 16 * 1024 * 1024;

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub cwd: PathBuf,
    /// Explicit config file path (overrides auto-discovery).
    pub config: Option<PathBuf>,
    pub mode: Option<Mode>,
    pub port: Option<u16>,
    pub host: Option<String>,
}

/// A proxy target could not be reached. Answered with 502; the server keeps
/// running.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy target {url} is unavailable: {source}")]
    Unavailable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read request body: {0}")]
    Body(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        warn!("{self}");
        (StatusCode::BAD_GATEWAY, self.to_string()).into_response()
    }
}

struct ServerState {
    orchestrator: Arc<Orchestrator>,
    client: reqwest::Client,
    live_reload: bool,
}

type AppState = Arc<ServerState>;

/// Run the dev server until interrupted.
pub fn run(action: DevAction) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?
        .block_on(serve(action))
}

async fn serve(action: DevAction) -> Result<()> {
    let mut config = super::load(&action.cwd, action.config, action.mode, Mode::Development)?;
    if let Some(port) = action.port {
        config.dev_server.port = port;
    }
    if let Some(host) = action.host {
        config.dev_server.host = host;
    }

    let root = config.root.clone();
    let out_dir = config.output.dir.clone();
    let dev_server = config.dev_server.clone();

    let bundler = Bundler::new(config).into_diagnostic()?;
    let orchestrator = Arc::new(Orchestrator::new(bundler));

    let initial = Arc::clone(&orchestrator);
    match tokio::task::spawn_blocking(move || initial.start())
        .await
        .into_diagnostic()?
    {
        Ok(modules) => info!(modules, "initial build finished"),
        Err(e) => error!("initial build failed, waiting for changes: {e}"),
    }

    let (queue, receiver) = change_queue(COALESCE_WINDOW);
    let _watcher = spawn_watcher(&root, vec![out_dir], queue).into_diagnostic()?;
    tokio::spawn(dev::run(Arc::clone(&orchestrator), receiver));

    let client = reqwest::Client::builder()
        .timeout(PROXY_TIMEOUT)
        .build()
        .into_diagnostic()?;
    let state = Arc::new(ServerState {
        orchestrator,
        client,
        live_reload: dev_server.live_reload,
    });

    let app = router(state);
    let listener = bind(&dev_server.host, dev_server.port)
        .await
        .into_diagnostic()?;

    println!();
    println!(
        "  Dev server running at http://{}:{}",
        dev_server.host, dev_server.port
    );
    for (prefix, target) in &dev_server.proxy {
        println!("  Proxying {prefix} -> {target}");
    }
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .into_diagnostic()?;

    Ok(())
}

/// Listen on `host`, which may be a name such as `localhost` or an address.
async fn bind(host: &str, port: u16) -> std::io::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind((host, port)).await
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(LIVE_RELOAD_PATH, get(live_reload_socket))
        .route(CLIENT_PATH, get(serve_client))
        .fallback(serve_request)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Serve the live reload client at `/__packwright/client.js`.
async fn serve_client() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        LIVE_RELOAD_CLIENT,
    )
}

/// Everything that is not a dev server endpoint.
async fn serve_request(State(state): State<AppState>, request: Request) -> Response {
    let target = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), |pq| pq.as_str().to_string());

    match state.orchestrator.route(&target) {
        Route::Artifact(artifact) | Route::Document(artifact) => {
            file_response(&state, &artifact.path, artifact.bytes)
        }
        Route::Static(path) => match tokio::fs::read(&path).await {
            Ok(bytes) => file_response(&state, &path.to_string_lossy(), bytes),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "static file vanished");
                StatusCode::NOT_FOUND.into_response()
            }
        },
        Route::Proxy(url) => match forward(&state.client, url, request).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        },
        Route::NotFound => (StatusCode::NOT_FOUND, format!("Not found: {target}")).into_response(),
    }
}

fn file_response(state: &ServerState, name: &str, bytes: Vec<u8>) -> Response {
    let bytes = if state.live_reload && name.ends_with(".html") {
        inject_client_script(&String::from_utf8_lossy(&bytes)).into_bytes()
    } else {
        bytes
    };
    (
        [
            (header::CONTENT_TYPE, content_type(name)),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        bytes,
    )
        .into_response()
}

/// Forward `request` unchanged to `url`.
async fn forward(
    client: &reqwest::Client,
    url: String,
    request: Request,
) -> std::result::Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let body: Bytes = axum::body::to_bytes(body, MAX_PROXY_BODY)
        .await
        .map_err(|e| ProxyError::Body(e.to_string()))?;

    let mut headers = parts.headers;
    headers.remove(header::HOST);

    let upstream = client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|source| ProxyError::Unavailable {
            url: url.clone(),
            source,
        })?;

    let status = upstream.status();
    let mut headers: HeaderMap = upstream.headers().clone();
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONNECTION);
    let bytes = upstream
        .bytes()
        .await
        .map_err(|source| ProxyError::Unavailable { url, source })?;

    Ok((status, headers, Body::from(bytes)).into_response())
}

// ============================================================================
// WebSocket live reload
// ============================================================================

async fn live_reload_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.orchestrator.subscribe();

    if socket
        .send(Message::Text(LiveReloadEvent::Connected.to_json()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if socket.send(Message::Text(event.to_json())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "live reload client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
