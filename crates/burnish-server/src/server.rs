//! Development server: static files, live reload and the watch loop.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderValue, Response},
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use burnish_pipeline::{BuildOrchestrator, RegistryError};

use crate::binding::{BindingScheduler, WatchBinding};
use crate::watcher::{FileWatcher, DEFAULT_DEBOUNCE};
use crate::websocket::{
    inject_script, reload_client_script, ReloadHub, ReloadMessage, RELOAD_PATH, SCRIPT_PATH,
};

/// Largest HTML body the script injector will buffer.
const MAX_INJECT_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for the development server.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Directory served over HTTP
    pub root: PathBuf,

    /// Directory watched for changes
    pub watch_dir: PathBuf,

    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    pub host: String,

    /// Open browser on start
    pub open: bool,

    /// Allow cross-origin requests
    pub cors: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            watch_dir: PathBuf::from("source"),
            port: 3000,
            host: "127.0.0.1".to_string(),
            open: false,
            cors: true,
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    BindError(SocketAddr, String),

    #[error("Server error on {0}: {1}")]
    ServeError(SocketAddr, String),

    #[error("File watch error: {0}")]
    WatchError(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Development server.
///
/// Serves the output directory, rebuilds on source changes and tells
/// connected pages to reload.
pub struct DevServer {
    config: DevServerConfig,
    orchestrator: BuildOrchestrator,
    hub: ReloadHub,
}

impl DevServer {
    pub fn new(config: DevServerConfig, orchestrator: BuildOrchestrator) -> Self {
        Self {
            config,
            orchestrator,
            hub: ReloadHub::new(),
        }
    }

    pub fn hub(&self) -> &ReloadHub {
        &self.hub
    }

    pub fn address(&self) -> Result<SocketAddr, ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        addr.parse().map_err(|_| ServerError::InvalidAddress(addr))
    }

    /// The HTTP routes without the watch loop.
    pub fn router(&self) -> Router {
        let app = Router::new()
            .route(RELOAD_PATH, get(ws_handler))
            .route(SCRIPT_PATH, get(script_handler))
            .fallback_service(ServeDir::new(&self.config.root))
            .layer(middleware::map_response(inject_reload_script))
            .with_state(self.hub.clone());

        if self.config.cors {
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }

    /// Watch, rebuild and serve until `shutdown` resolves.
    pub async fn start(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.address()?;

        let bindings = self
            .orchestrator
            .registry()
            .bindings()
            .iter()
            .map(|def| WatchBinding::from_def(def, &self.orchestrator))
            .collect::<Result<Vec<_>, _>>()?;

        let scheduler = BindingScheduler::spawn(
            bindings,
            self.orchestrator.clone(),
            Arc::new(self.hub.clone()),
            None,
        );

        let (watcher, mut rx) = FileWatcher::new(&[self.config.watch_dir.clone()], DEFAULT_DEBOUNCE)
            .map_err(|e| ServerError::WatchError(e.to_string()))?;

        let watch_root = self
            .config
            .watch_dir
            .canonicalize()
            .unwrap_or_else(|_| self.config.watch_dir.clone());
        let dispatch = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(relative) = relative_to(&watch_root, &event.path) else {
                    continue;
                };
                let accepted = scheduler.dispatch(&relative);
                if accepted.is_empty() {
                    tracing::debug!("Ignoring {:?} {}", event.kind, relative.display());
                }
            }
            scheduler.shutdown().await;
            drop(watcher);
        });

        let app = self.router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        tracing::info!("Serving {} at http://{}", self.config.root.display(), addr);
        tracing::info!("Watching {}", self.config.watch_dir.display());

        if self.config.open {
            let url = format!("http://{}", addr);
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        }

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::ServeError(addr, e.to_string()));

        dispatch.abort();
        tracing::info!("Server stopped");
        served
    }
}

/// A watcher path relative to the watched root.
fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    path.strip_prefix(root).ok().map(Path::to_path_buf)
}

/// Handler for the live-reload WebSocket endpoint.
async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<ReloadHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, hub))
}

/// Forward reload messages to one client until it goes away.
async fn handle_ws(mut socket: WebSocket, hub: ReloadHub) {
    let mut rx = hub.subscribe();

    if send(&mut socket, &ReloadMessage::Connected).await.is_err() {
        return;
    }

    while let Ok(msg) = rx.recv().await {
        if send(&mut socket, &msg).await.is_err() {
            break;
        }
    }
}

async fn send(socket: &mut WebSocket, msg: &ReloadMessage) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

/// Handler for the client script.
async fn script_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        reload_client_script(),
    )
}

/// Add the reload script to HTML responses.
async fn inject_reload_script(response: Response<Body>) -> Response<Body> {
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"));
    if !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_INJECT_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to buffer HTML response: {}", e);
            return Response::from_parts(parts, Body::empty());
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    if let Ok(len) = HeaderValue::from_str(&html.len().to_string()) {
        parts.headers.insert(header::CONTENT_LENGTH, len);
    }
    Response::from_parts(parts, Body::from(html))
}
