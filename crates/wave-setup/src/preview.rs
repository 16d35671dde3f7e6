//! Local preview server for opening an experiment before deployment.
//!
//! The server runs on its own tokio task. Bind or serve failures are logged
//! and published through [`ServerState`]; they never reach the caller of
//! [`PreviewServer::start`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Port used when none is configured.
pub const DEFAULT_PREVIEW_PORT: u16 = 8080;

/// Directory served when none is configured.
pub const DEFAULT_PREVIEW_ROOT: &str = "..";

/// Delay granted to the background task to bind before `start` returns.
pub const DEFAULT_WARM_UP: Duration = Duration::from_secs(2);

const TASK_ENDED: &str = "server task ended unexpectedly";

/// Lifecycle of a preview server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Running,
    Stopped,
    Failed(String),
}

/// Errors detected before the server task is spawned.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("failed to resolve preview root '{shown}': {source}", shown = .path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("preview root '{shown}' is not a directory", shown = .0.display())]
    NotADirectory(PathBuf),
}

/// Preview startup options.
#[derive(Debug, Clone)]
pub struct PreviewOptions {
    pub warm_up: Duration,
    pub open_browser: bool,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            warm_up: DEFAULT_WARM_UP,
            open_browser: true,
        }
    }
}

/// Handle to a running preview server.
///
/// Dropping the handle leaves the server running until process exit; call
/// [`PreviewServer::stop`] for a graceful shutdown.
#[derive(Debug)]
pub struct PreviewServer {
    url: String,
    root: PathBuf,
    port: u16,
    state: watch::Receiver<ServerState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PreviewServer {
    /// Start serving `root` on `port`.
    ///
    /// `root` is resolved to an absolute path first, so later working
    /// directory changes do not affect the server. Returns once `warm_up`
    /// has elapsed; the URL is not guaranteed reachable if binding failed.
    pub async fn start(
        root: impl AsRef<Path>,
        port: u16,
        warm_up: Duration,
    ) -> Result<Self, PreviewError> {
        let root = resolve_root(root.as_ref())?;
        let (state_tx, state_rx) = watch::channel(ServerState::Starting);
        let cancel = CancellationToken::new();

        info!(root = %root.display(), port, "Starting preview server");
        let task = tokio::spawn(serve(root.clone(), port, state_tx, cancel.clone()));

        tokio::time::sleep(warm_up).await;

        Ok(Self {
            url: format!("http://localhost:{}/", port),
            root,
            port,
            state: state_rx,
            cancel,
            task,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Absolute directory being served.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state.borrow().clone()
    }

    /// Wait until the server leaves `Running` (stopped or failed).
    ///
    /// A task that ends without publishing a final state is reported as
    /// `Failed`.
    pub async fn closed(&mut self) -> ServerState {
        let finished = self
            .state
            .wait_for(|s| matches!(s, ServerState::Stopped | ServerState::Failed(_)))
            .await
            .map(|state| state.clone());
        match finished {
            Ok(state) => state,
            Err(_) => {
                error!(port = self.port, "Preview server task ended unexpectedly");
                ServerState::Failed(TASK_ENDED.to_string())
            }
        }
    }

    /// Shut the server down gracefully and wait for its task to finish.
    pub async fn stop(self) -> ServerState {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Preview server task panicked");
            return ServerState::Failed(e.to_string());
        }
        let state = self.state.borrow().clone();
        info!(port = self.port, state = ?state, "Preview server stopped");
        state
    }
}

/// Start a preview server and, if requested, open it in the system browser.
///
/// Failing to open the browser is logged and otherwise ignored.
pub async fn start_preview_server(
    root: impl AsRef<Path>,
    port: u16,
    options: &PreviewOptions,
) -> Result<PreviewServer, PreviewError> {
    let server = PreviewServer::start(root, port, options.warm_up).await?;

    if let ServerState::Failed(reason) = server.state() {
        warn!(port, reason = %reason, "Preview server failed to start; URL may be unreachable");
    }

    if options.open_browser {
        match open_in_browser(server.url()).await {
            Ok(()) => info!(url = %server.url(), "Opened preview in browser"),
            Err(e) => warn!(
                url = %server.url(),
                error = %e,
                "Failed to open browser; open the URL manually"
            ),
        }
    }

    Ok(server)
}

fn resolve_root(root: &Path) -> Result<PathBuf, PreviewError> {
    let resolved = root.canonicalize().map_err(|source| PreviewError::Resolve {
        path: root.to_path_buf(),
        source,
    })?;
    if !resolved.is_dir() {
        return Err(PreviewError::NotADirectory(resolved));
    }
    Ok(resolved)
}

fn router(root: &Path) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(root).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http())
}

async fn serve(
    root: PathBuf,
    port: u16,
    state_tx: watch::Sender<ServerState>,
    cancel: CancellationToken,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind preview server");
            let _ = state_tx.send(ServerState::Failed(format!("bind {}: {}", addr, e)));
            return;
        }
    };

    let _ = state_tx.send(ServerState::Running);
    info!(addr = %addr, root = %root.display(), "Preview server listening");

    let result = axum::serve(listener, router(&root))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;

    match result {
        Ok(()) => {
            let _ = state_tx.send(ServerState::Stopped);
        }
        Err(e) => {
            error!(error = %e, "Preview server error");
            let _ = state_tx.send(ServerState::Failed(e.to_string()));
        }
    }
}

/// Open `url` with the platform's default browser.
pub async fn open_in_browser(url: &str) -> std::io::Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        tokio::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = tokio::process::Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        tokio::process::Command::new("xdg-open")
    };

    let status = command
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("browser opener exited with {}", status),
        ))
    }
}
