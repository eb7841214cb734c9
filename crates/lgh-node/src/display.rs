//! One-line rendering of events for the terminal.

use chrono::Local;
use lgh_events::{Event, EventType};
use serde_json::Value;

/// `HH:MM:SS  <type>  <repo>  <summary>` in local time.
pub fn format_event_line(event: &Event) -> String {
    format!(
        "{}  {:<12}  {:<15}  {}",
        event.timestamp().with_timezone(&Local).format("%H:%M:%S"),
        event.event_type().as_str(),
        event.repo_name(),
        summarize(event),
    )
    .trim_end()
    .to_string()
}

/// Short description of the payload.
///
/// Pushes list their refs as `+branch:sha`, `~branch:sha` or `-branch`.
fn summarize(event: &Event) -> String {
    let Some(payload) = event.payload() else {
        return String::new();
    };

    let mut summary = match event.event_type() {
        EventType::GitPush => payload
            .get("changes")
            .and_then(Value::as_object)
            .map(|changes| {
                changes
                    .iter()
                    .map(|(name, change)| ref_label(name, change))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default(),
        EventType::GitTag => payload
            .get("tag")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        EventType::RepoAdded => payload
            .get("bare")
            .and_then(Value::as_str)
            .map(|bare| bare.rsplit('/').next().unwrap_or(bare).to_string())
            .unwrap_or_default(),
        _ => String::new(),
    };

    if event.is_replayed() {
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str("(replayed)");
    }
    summary
}

fn ref_label(name: &str, change: &Value) -> String {
    let action = change.get("action").and_then(Value::as_str).unwrap_or("");
    let new = change.get("new").and_then(Value::as_str).unwrap_or("");

    let short = name.strip_prefix("refs/heads/").unwrap_or(name);
    let symbol = match action {
        "created" => "+",
        "deleted" => "-",
        _ => "~",
    };

    let mut label = format!("{}{}", symbol, short);
    if action != "deleted" {
        if let Some(hash) = new.get(..7) {
            if hash != "0000000" {
                label.push(':');
                label.push_str(hash);
            }
        }
    }
    label
}
