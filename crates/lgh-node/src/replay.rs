//! Replay of logged events to live subscribers.
//!
//! Events are read from the persistent log and POSTed one at a time to the
//! running gateway's loopback-only `/debug/events` endpoint, which tags them
//! as replayed and hands them to the broker. Replay never writes to the log.

use lgh_events::{read_events, select_last, Event, EventError};
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Events replayed when no count is given.
pub const DEFAULT_REPLAY_COUNT: usize = 10;

/// Per-request timeout.
pub const REPLAY_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between consecutive events.
pub const REPLAY_INTERVAL: Duration = Duration::from_millis(10);

/// Replay errors.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The event log could not be read.
    #[error("failed to read event log: {0}")]
    Log(#[from] EventError),

    /// The gateway did not answer.
    #[error("failed to send event {event_id} to {url}: {source} (is server running?)")]
    Unreachable {
        event_id: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result type for replay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Outcome of one replayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The gateway accepted the event.
    Accepted,
    /// The gateway answered with a non-200 status.
    Rejected(StatusCode),
    /// The gateway could not be reached; replay stops here.
    Failed,
}

/// Summary of a replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Events selected from the log.
    pub selected: usize,
    /// Events the gateway accepted.
    pub accepted: usize,
}

/// Sends events to a gateway's injection endpoint.
#[derive(Debug, Clone)]
pub struct Replayer {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl Replayer {
    /// Target the gateway on the loopback interface at `port`.
    pub fn new(port: u16) -> Result<Self> {
        Self::with_base_url(format!("http://127.0.0.1:{}", port))
    }

    /// Target an explicit base URL such as `http://127.0.0.1:9418`.
    pub fn with_base_url(base_url: impl AsRef<str>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REPLAY_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: format!("{}/debug/events", base_url.as_ref().trim_end_matches('/')),
            interval: REPLAY_INTERVAL,
        })
    }

    /// Override the pause between events.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Injection endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one event.
    pub async fn send(&self, event: &Event) -> Result<Delivery> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|source| ReplayError::Unreachable {
                event_id: event.id().to_string(),
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            Ok(Delivery::Accepted)
        } else {
            warn!(event_id = %event.id(), status = %status, "gateway rejected replayed event");
            Ok(Delivery::Rejected(status))
        }
    }

    /// Send events in order, stopping at the first transport failure.
    ///
    /// `on_delivery` observes every event after it was sent, including the
    /// one that failed with [`Delivery::Failed`] before the error is returned.
    pub async fn replay<F>(&self, events: &[Event], mut on_delivery: F) -> Result<ReplayReport>
    where
        F: FnMut(&Event, Delivery),
    {
        let mut report = ReplayReport {
            selected: events.len(),
            accepted: 0,
        };

        for (i, event) in events.iter().enumerate() {
            let delivery = match self.send(event).await {
                Ok(delivery) => delivery,
                Err(e) => {
                    on_delivery(event, Delivery::Failed);
                    return Err(e);
                }
            };
            if delivery == Delivery::Accepted {
                report.accepted += 1;
            }
            on_delivery(event, delivery);

            if i + 1 < events.len() && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
        }

        debug!(selected = report.selected, accepted = report.accepted, "replay finished");
        Ok(report)
    }

    /// Replay the last `limit` events of `event_type` (all types when
    /// `None`) from the log at `log_path`.
    pub async fn replay_log<F>(
        &self,
        log_path: &Path,
        limit: usize,
        event_type: Option<&str>,
        on_delivery: F,
    ) -> Result<ReplayReport>
    where
        F: FnMut(&Event, Delivery),
    {
        let events = select_last(read_events(log_path)?, limit, event_type);
        self.replay(&events, on_delivery).await
    }
}
