//! Asynchronous append-only event log.
//!
//! [`EventLogger`] is a bus handler that never blocks the publisher: events
//! are offered to a bounded queue and dropped when it is full. One worker
//! thread drains the queue and appends each event as a JSON line, rotating
//! the file once it reaches [`MAX_LOG_SIZE`].

use crate::bus::EventHandler;
use crate::error::{EventError, Result};
use crate::event::Event;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Size at which the active log file is rotated (10 MiB).
pub const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of events that may wait for the worker.
pub const QUEUE_CAPACITY: usize = 100;

/// File name of the active log inside the events directory.
pub const LOG_FILE_NAME: &str = "events.jsonl";

/// Timestamp suffix format for rotated files.
const ROTATION_SUFFIX_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Tunables for [`EventLogger`].
#[derive(Debug, Clone, Copy)]
pub struct LoggerConfig {
    /// Rotation threshold in bytes.
    pub max_size: u64,
    /// Queue capacity.
    pub queue_capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            max_size: MAX_LOG_SIZE,
            queue_capacity: QUEUE_CAPACITY,
        }
    }
}

/// Counters describing what happened to offered events.
#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
}

/// Snapshot of logger counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerStats {
    /// Events accepted into the queue.
    pub accepted: u64,
    /// Events dropped because the queue was full or closed.
    pub dropped: u64,
    /// Events appended to disk.
    pub written: u64,
}

/// Event log writer backed by a single background thread.
pub struct EventLogger {
    path: PathBuf,
    sender: RwLock<Option<mpsc::Sender<Event>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl EventLogger {
    /// Open `<dir>/events.jsonl` with default settings and start the worker.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(dir, LoggerConfig::default())
    }

    /// Open `<dir>/events.jsonl` with explicit settings and start the worker.
    pub fn with_config(dir: impl AsRef<Path>, config: LoggerConfig) -> Result<Self> {
        let (logger, receiver, writer) = Self::prepare(dir.as_ref(), config)?;
        logger.start(receiver, writer)?;
        Ok(logger)
    }

    fn prepare(
        dir: &Path,
        config: LoggerConfig,
    ) -> Result<(Self, mpsc::Receiver<Event>, LogWriter)> {
        create_private_dir(dir)?;

        let path = dir.join(LOG_FILE_NAME);
        let writer = LogWriter::open(path.clone(), config.max_size)?;
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));

        let logger = Self {
            path,
            sender: RwLock::new(Some(sender)),
            worker: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        };
        Ok((logger, receiver, writer))
    }

    fn start(&self, mut receiver: mpsc::Receiver<Event>, mut writer: LogWriter) -> Result<()> {
        let counters = self.counters.clone();
        let handle = std::thread::Builder::new()
            .name("lgh-event-logger".to_string())
            .spawn(move || {
                while let Some(event) = receiver.blocking_recv() {
                    if writer.append(&event) {
                        counters.written.fetch_add(1, Ordering::Relaxed);
                    }
                }
                debug!("Event logger worker drained");
            })
            .map_err(|e| EventError::WorkerSpawn(e.to_string()))?;

        *self.worker.lock() = Some(handle);
        info!(path = %self.path.display(), "Event logger started");
        Ok(())
    }

    /// Path of the active log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offer an event to the queue. Returns `false` if it was dropped.
    pub fn enqueue(&self, event: &Event) -> bool {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sender.try_send(event.clone()) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(dropped)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = dropped.id(), "Event log queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Stop accepting events, wait for the worker to drain the queue, and
    /// close the file. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        // Dropping the sender ends the worker loop once the queue is empty.
        self.sender.write().take();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| EventError::WorkerPanicked)?;
            let stats = self.stats();
            info!(
                written = stats.written,
                dropped = stats.dropped,
                "Event logger closed"
            );
        }
        Ok(())
    }

    /// Current counters.
    pub fn stats(&self) -> LoggerStats {
        LoggerStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
        }
    }
}

impl EventHandler for EventLogger {
    fn handle(&self, event: &Event) -> Result<()> {
        self.enqueue(event);
        Ok(())
    }

    fn name(&self) -> &str {
        "event-logger"
    }
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Event logger did not shut down cleanly");
        }
    }
}

impl std::fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogger")
            .field("path", &self.path)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Owns the active log file. Only the worker thread touches it.
struct LogWriter {
    path: PathBuf,
    file: Option<File>,
    max_size: u64,
}

impl LogWriter {
    fn open(path: PathBuf, max_size: u64) -> Result<Self> {
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Some(file),
            max_size,
        })
    }

    /// Append one event. Failures are logged and swallowed.
    fn append(&mut self, event: &Event) -> bool {
        if let Err(e) = self.rotate_if_needed() {
            warn!(path = %self.path.display(), error = %e, "Event log rotation failed");
        }

        let mut line = match serde_json::to_vec(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(event_id = event.id(), error = %e, "Failed to serialize event");
                return false;
            }
        };
        line.push(b'\n');

        if self.file.is_none() {
            match open_append(&self.path) {
                Ok(file) => self.file = Some(file),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Event log unavailable");
                    return false;
                }
            }
        }

        let Some(file) = self.file.as_mut() else {
            return false;
        };
        match file.write_all(&line) {
            Ok(()) => true,
            Err(e) => {
                warn!(event_id = event.id(), error = %e, "Failed to write event");
                false
            }
        }
    }

    fn rotate_if_needed(&mut self) -> Result<()> {
        let size = match &self.file {
            Some(file) => file.metadata()?.len(),
            None => return Ok(()),
        };
        if size < self.max_size {
            return Ok(());
        }

        // Close before renaming.
        self.file = None;

        let rotated = rotated_path(&self.path, chrono::Local::now());
        if let Err(e) = fs::rename(&self.path, &rotated) {
            warn!(from = %self.path.display(), to = %rotated.display(), error = %e, "Failed to rename event log");
        } else {
            info!(rotated = %rotated.display(), size, "Event log rotated");
        }

        self.file = Some(open_append(&self.path)?);
        Ok(())
    }
}

/// Name for a rotated log: `<path>.<YYYYMMDD-HHMMSS>`, with `-N` appended
/// when a file of that name already exists.
fn rotated_path(path: &Path, now: chrono::DateTime<chrono::Local>) -> PathBuf {
    let base = format!(
        "{}.{}",
        path.display(),
        now.format(ROTATION_SUFFIX_FORMAT)
    );
    let mut candidate = PathBuf::from(&base);
    let mut n = 1;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{}-{}", base, n));
        n += 1;
    }
    candidate
}

fn open_append(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use std::io::{BufRead, BufReader};

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        let file = File::open(path).unwrap();
        BufReader::new(file)
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect()
    }

    fn rotated_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("events.jsonl."))
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_events_are_written_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::open(dir.path()).unwrap();

        logger.handle(&Event::new(EventType::RepoAdded, "one", None)).unwrap();
        logger.handle(&Event::new(EventType::GitPush, "two", None)).unwrap();
        logger.close().unwrap();

        let lines = read_lines(&dir.path().join(LOG_FILE_NAME));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "repo.added");
        assert_eq!(lines[0]["repo"], "one");
        assert_eq!(lines[1]["type"], "git.push");
        assert_eq!(lines[1]["repo"], "two");
    }

    #[test]
    fn test_full_queue_drops_events() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggerConfig {
            queue_capacity: 3,
            ..LoggerConfig::default()
        };
        // Worker not started yet, so nothing drains the queue.
        let (logger, receiver, writer) = EventLogger::prepare(dir.path(), config).unwrap();

        let results: Vec<bool> = (0..5)
            .map(|i| logger.enqueue(&Event::new(EventType::GitPush, format!("r{}", i), None)))
            .collect();
        assert_eq!(results, vec![true, true, true, false, false]);

        logger.start(receiver, writer).unwrap();
        logger.close().unwrap();

        let stats = logger.stats();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.written, 3);

        let lines = read_lines(&dir.path().join(LOG_FILE_NAME));
        let repos: Vec<_> = lines.iter().map(|l| l["repo"].clone()).collect();
        assert_eq!(repos, vec!["r0", "r1", "r2"]);
    }

    #[test]
    fn test_close_drains_pending_events() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::open(dir.path()).unwrap();

        for i in 0..50 {
            logger.enqueue(&Event::new(EventType::GitPush, format!("r{}", i), None));
        }
        logger.close().unwrap();

        let stats = logger.stats();
        let lines = read_lines(&dir.path().join(LOG_FILE_NAME));
        assert_eq!(lines.len() as u64, stats.accepted);
        assert_eq!(stats.written, stats.accepted);
    }

    #[test]
    fn test_enqueue_after_close_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::open(dir.path()).unwrap();
        logger.close().unwrap();
        logger.close().unwrap();

        assert!(!logger.enqueue(&Event::new(EventType::GitPush, "late", None)));
        assert_eq!(logger.stats().dropped, 1);
    }

    #[test]
    fn test_rotation_moves_old_events_aside() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggerConfig {
            max_size: 1,
            ..LoggerConfig::default()
        };
        let logger = EventLogger::with_config(dir.path(), config).unwrap();

        logger.enqueue(&Event::new(EventType::GitPush, "first", None));
        logger.close().unwrap();

        let logger = EventLogger::with_config(dir.path(), config).unwrap();
        logger.enqueue(&Event::new(EventType::GitPush, "second", None));
        logger.close().unwrap();

        let active = read_lines(&dir.path().join(LOG_FILE_NAME));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0]["repo"], "second");

        let rotated = rotated_files(dir.path());
        assert_eq!(rotated.len(), 1);
        let old = read_lines(&rotated[0]);
        assert_eq!(old.len(), 1);
        assert_eq!(old[0]["repo"], "first");
    }

    #[test]
    fn test_rotation_preserves_total_count() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggerConfig {
            max_size: 400,
            queue_capacity: 1000,
        };
        let logger = EventLogger::with_config(dir.path(), config).unwrap();

        for i in 0..20 {
            logger.enqueue(&Event::new(EventType::GitPush, format!("repo-{}", i), None));
        }
        logger.close().unwrap();

        let mut total = read_lines(&dir.path().join(LOG_FILE_NAME)).len();
        for file in rotated_files(dir.path()) {
            total += read_lines(&file).len();
        }
        assert_eq!(total as u64, logger.stats().accepted);
        assert_eq!(total, 20);
    }

    #[test]
    fn test_rotated_path_disambiguates_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        let now = chrono::Local::now();

        let first = rotated_path(&path, now);
        fs::write(&first, b"").unwrap();
        let second = rotated_path(&path, now);

        assert_ne!(first, second);
        assert!(second.display().to_string().ends_with("-1"));
    }

    #[test]
    fn test_concurrent_enqueue_never_interleaves_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(EventLogger::open(dir.path()).unwrap());

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let logger = logger.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let payload = serde_json::json!({"thread": t, "seq": i, "pad": "x".repeat(256)});
                        logger.enqueue(&Event::new(
                            EventType::GitPush,
                            format!("t{}", t),
                            payload.as_object().cloned(),
                        ));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        logger.close().unwrap();

        let lines = read_lines(&dir.path().join(LOG_FILE_NAME));
        let stats = logger.stats();
        assert!(lines.len() <= 800);
        assert_eq!(lines.len() as u64, stats.accepted);
        assert_eq!(stats.accepted + stats.dropped, 800);
    }
}
