//! Reading the persisted event log.

use crate::error::Result;
use crate::event::Event;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;
use tracing::debug;

/// Read every well-formed event from a log file, oldest first.
///
/// Malformed lines are skipped. A missing file reads as an empty log.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => events.push(event),
            Err(e) => debug!(line = index + 1, error = %e, "Skipping malformed event line"),
        }
    }
    Ok(events)
}

/// Keep the last `limit` events matching `type_filter`, in their original
/// order.
pub fn select_last(events: Vec<Event>, limit: usize, type_filter: Option<&str>) -> Vec<Event> {
    let mut matching: Vec<Event> = events
        .into_iter()
        .filter(|e| type_filter.map_or(true, |t| e.event_type().as_str() == t))
        .collect();

    let start = matching.len().saturating_sub(limit);
    matching.drain(..start);
    matching
}
