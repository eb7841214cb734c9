//! Gateway assembly and lifecycle.
//!
//! Startup binds HTTP, writes the PID file and starts the IPC listener.
//! Shutdown runs in the reverse dependency order: HTTP stops accepting and
//! drains, the IPC listener disconnects its clients, the broker closes, and
//! the logger drains its queue to disk.

use crate::api::{create_router, AppState};
use crate::auth::Credentials;
use crate::config::Config;
use anyhow::{Context, Result};
use axum::Router;
use lgh_events::EventContext;
use lgh_git::{GitHttpBackend, TransportBackend};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A configured gateway, ready to serve.
pub struct Gateway {
    config: Config,
    events: EventContext,
    backend: Arc<dyn TransportBackend>,
}

impl Gateway {
    /// Validate `config`, prepare the data directories, open the event
    /// pipeline and locate `git http-backend`.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let repos_dir = config.repos_dir();
        std::fs::create_dir_all(&repos_dir)
            .with_context(|| format!("cannot create repos dir {}", repos_dir.display()))?;

        let events = EventContext::open(config.events_dir())
            .with_context(|| format!("cannot open event log in {}", config.events_dir().display()))?;
        let backend = GitHttpBackend::locate(&repos_dir)
            .await
            .context("cannot locate git http-backend")?;

        Ok(Self::with_parts(config, events, Arc::new(backend)))
    }

    /// Assemble a gateway from prepared parts.
    pub fn with_parts(
        config: Config,
        events: EventContext,
        backend: Arc<dyn TransportBackend>,
    ) -> Self {
        Self {
            config,
            events,
            backend,
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Event pipeline.
    pub fn events(&self) -> &EventContext {
        &self.events
    }

    /// Shared handler state.
    pub fn state(&self) -> AppState {
        let auth = self.config.auth_enabled.then(|| {
            Arc::new(Credentials::new(
                self.config.auth_user.clone(),
                self.config.auth_password_hash.clone(),
            ))
        });
        AppState {
            events: self.events.clone(),
            backend: self.backend.clone(),
            repos_dir: self.config.repos_dir(),
            read_only: self.config.read_only,
            auth,
        }
    }

    /// HTTP router.
    pub fn router(&self) -> Router {
        create_router(self.state())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        TcpListener::bind(&addr)
            .await
            .with_context(|| format!("cannot listen on {} (port already in use?)", addr))
    }

    /// Serve on `listener` until `shutdown` completes, then stop every
    /// component in order.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let pid_path = self.config.pid_path();
        write_pid_file(&pid_path);

        let ipc_shutdown = CancellationToken::new();
        let ipc_task = self.start_ipc(ipc_shutdown.clone());

        info!(
            address = %local_addr,
            repos_dir = %self.config.repos_dir().display(),
            read_only = self.config.read_only,
            auth = self.config.auth_enabled,
            "LGH gateway started"
        );
        if !self.config.is_loopback_bind() && !self.config.auth_enabled && !self.config.read_only {
            warn!("running in unsafe mode: network access without authentication or read-only");
        }

        let served = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        info!("HTTP server stopped");
        ipc_shutdown.cancel();
        if let Some(task) = ipc_task {
            if let Err(e) = task.await {
                warn!(error = %e, "IPC listener task failed");
            }
        }
        if let Err(e) = self.events.shutdown() {
            warn!(error = %e, "event pipeline did not shut down cleanly");
        }
        remove_pid_file(&pid_path);
        info!("LGH gateway stopped");

        served.context("HTTP server error")
    }

    #[cfg(unix)]
    fn start_ipc(&self, shutdown: CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
        match crate::ipc::IpcListener::bind(self.config.socket_path()) {
            Ok(listener) => Some(tokio::spawn(
                listener.run(self.events.broker().clone(), shutdown),
            )),
            Err(e) => {
                warn!(error = %e, "IPC listener unavailable; live streaming disabled");
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn start_ipc(&self, _shutdown: CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
        None
    }
}

fn write_pid_file(path: &Path) {
    let pid = std::process::id().to_string();
    let written = {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options
            .open(path)
            .and_then(|mut file| std::io::Write::write_all(&mut file, pid.as_bytes()))
    };
    if let Err(e) = written {
        warn!(path = %path.display(), error = %e, "failed to write PID file");
    }
}

fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove PID file");
        }
    }
}
