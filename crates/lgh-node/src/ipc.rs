//! Local event stream over a Unix domain socket.
//!
//! Every accepted connection becomes a broker subscriber and receives one
//! JSON-encoded event per line until it disconnects or the listener stops.

use lgh_events::{Broker, Event};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// IPC errors.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Nothing is listening on the socket.
    #[error("no LGH server listening on {0} (is the server running?)")]
    NotRunning(PathBuf),

    /// Event encoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for IPC operations.
pub type Result<T> = std::result::Result<T, IpcError>;

/// Accepts local subscribers on a Unix socket.
#[derive(Debug)]
pub struct IpcListener {
    path: PathBuf,
    listener: UnixListener,
}

impl IpcListener {
    /// Bind the socket, replacing a stale socket file, and restrict it to
    /// the current user.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&path)?;
        if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)) {
            warn!(path = %path.display(), error = %e, "failed to restrict socket permissions");
        }

        info!(path = %path.display(), "IPC listener started");
        Ok(Self { path, listener })
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` fires, then disconnect every
    /// client and remove the socket file.
    pub async fn run(self, broker: Arc<Broker>, shutdown: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(serve_connection(stream, broker.clone(), shutdown.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "IPC accept failed");
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        while connections.join_next().await.is_some() {}
        drop(self.listener);
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove socket");
            }
        }
        info!("IPC listener stopped");
    }
}

/// Stream events to one client until it goes away.
async fn serve_connection(stream: UnixStream, broker: Arc<Broker>, shutdown: CancellationToken) {
    let mut subscription = broker.subscribe_client();
    let id = subscription.id();
    debug!(subscriber = id, "IPC client connected");

    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 64];

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            read = reader.read(&mut scratch) => {
                // Clients never send; EOF or error means they left.
                if matches!(read, Ok(0) | Err(_)) {
                    break;
                }
            }
            event = subscription.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = write_event(&mut writer, &event).await {
                    debug!(subscriber = id, error = %e, "IPC client write failed");
                    break;
                }
            }
        }
    }

    broker.unsubscribe_client(id);
    debug!(subscriber = id, "IPC client disconnected");
}

async fn write_event<W>(writer: &mut W, event: &Event) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Connect to a running gateway and call `on_event` for every streamed
/// event until the server closes the stream. Malformed lines are skipped.
pub async fn watch<F>(path: &Path, mut on_event: F) -> Result<()>
where
    F: FnMut(Event),
{
    let stream = match UnixStream::connect(path).await {
        Ok(stream) => stream,
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
            ) =>
        {
            return Err(IpcError::NotRunning(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => on_event(event),
            Err(e) => debug!(error = %e, "skipping malformed event line"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lgh_events::EventType;
    use std::time::Duration;

    async fn wait_for_subscribers(broker: &Broker, n: usize) {
        for _ in 0..200 {
            if broker.subscriber_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} subscribers, have {}", n, broker.subscriber_count());
    }

    #[tokio::test]
    async fn test_stream_events_to_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lgh.sock");
        let broker = Arc::new(Broker::new());
        let shutdown = CancellationToken::new();

        let listener = IpcListener::bind(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let server = tokio::spawn(listener.run(broker.clone(), shutdown.clone()));

        let client_path = path.clone();
        let client = tokio::spawn(async move {
            let mut received = Vec::new();
            watch(&client_path, |event| received.push(event)).await.unwrap();
            received
        });

        wait_for_subscribers(&broker, 1).await;
        let first = Event::new(EventType::GitPush, "demo", None);
        let second = Event::new(EventType::RepoAdded, "other", None);
        broker.broadcast(&first);
        broker.broadcast(&second);

        // Let the writes land before closing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        server.await.unwrap();

        let received = client.await.unwrap();
        assert_eq!(received, vec![first, second]);
        assert_eq!(broker.subscriber_count(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_client_disconnect_unsubscribes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lgh.sock");
        let broker = Arc::new(Broker::new());
        let shutdown = CancellationToken::new();

        let listener = IpcListener::bind(&path).unwrap();
        let server = tokio::spawn(listener.run(broker.clone(), shutdown.clone()));

        let client = UnixStream::connect(&path).await.unwrap();
        wait_for_subscribers(&broker, 1).await;
        drop(client);
        wait_for_subscribers(&broker, 0).await;

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lgh.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = IpcListener::bind(&path).unwrap();
        assert_eq!(listener.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_watch_without_server() {
        let dir = tempfile::tempdir().unwrap();
        let result = watch(&dir.path().join("lgh.sock"), |_| {}).await;
        assert!(matches!(result, Err(IpcError::NotRunning(_))));
    }
}
