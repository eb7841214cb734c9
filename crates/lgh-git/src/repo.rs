//! Repository inspection: bare detection, ref snapshots and ref diffs.

use crate::error::GitError;
use crate::Result;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tokio::process::Command;

/// Object id used for the missing side of a created or deleted ref.
pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Ref name to object id.
pub type RefSnapshot = BTreeMap<String, String>;

/// Whether `path` is a bare git repository.
///
/// The directory must contain `HEAD` and a `config` whose `[core]` section
/// sets `bare = true`.
pub fn is_bare_repo(path: &Path) -> bool {
    if !path.join("HEAD").is_file() {
        return false;
    }
    match fs::read_to_string(path.join("config")) {
        Ok(config) => config_is_bare(&config),
        Err(_) => false,
    }
}

fn config_is_bare(config: &str) -> bool {
    let mut in_core = false;
    for line in config.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            let section = line.trim_start_matches('[').trim_end_matches(']').trim();
            in_core = section.eq_ignore_ascii_case("core");
            continue;
        }
        if !in_core {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim().eq_ignore_ascii_case("bare") {
                return value.trim().eq_ignore_ascii_case("true");
            }
        }
    }
    false
}

/// Read every ref of a repository with `git show-ref`.
///
/// A repository without refs yields an empty snapshot.
pub async fn snapshot_refs(repo_path: &Path) -> Result<RefSnapshot> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_path)
        .arg("show-ref")
        .output()
        .await
        .map_err(|e| GitError::GitUnavailable(e.to_string()))?;

    // show-ref exits with 1 when there are no refs at all.
    if !output.status.success() {
        if output.status.code() == Some(1) && output.stdout.is_empty() {
            return Ok(RefSnapshot::new());
        }
        return Err(GitError::CommandFailed {
            command: format!("git -C {} show-ref", repo_path.display()),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(parse_show_ref(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `git show-ref` output (`<sha> <ref>` per line).
pub fn parse_show_ref(output: &str) -> RefSnapshot {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let sha = parts.next()?;
            let name = parts.next()?;
            Some((name.to_string(), sha.to_string()))
        })
        .collect()
}

/// What happened to a ref during a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefAction {
    Created,
    Updated,
    Deleted,
}

/// A single ref change between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefChange {
    /// Full ref name, e.g. `refs/heads/main`.
    pub name: String,
    pub action: RefAction,
    /// Previous object id, [`ZERO_SHA`] when created.
    pub old: String,
    /// New object id, [`ZERO_SHA`] when deleted.
    pub new: String,
}

impl RefChange {
    /// Whether the change concerns a tag.
    pub fn is_tag(&self) -> bool {
        self.name.starts_with("refs/tags/")
    }

    /// Short tag name, if this is a tag ref.
    pub fn tag_name(&self) -> Option<&str> {
        self.name.strip_prefix("refs/tags/")
    }

    fn to_json(&self) -> Value {
        json!({
            "action": self.action,
            "old": self.old,
            "new": self.new,
        })
    }
}

/// Compare two snapshots, returning changes ordered by ref name.
pub fn diff_refs(before: &RefSnapshot, after: &RefSnapshot) -> Vec<RefChange> {
    let mut changes = Vec::new();

    for (name, new) in after {
        match before.get(name) {
            None => changes.push(RefChange {
                name: name.clone(),
                action: RefAction::Created,
                old: ZERO_SHA.to_string(),
                new: new.clone(),
            }),
            Some(old) if old != new => changes.push(RefChange {
                name: name.clone(),
                action: RefAction::Updated,
                old: old.clone(),
                new: new.clone(),
            }),
            Some(_) => {}
        }
    }

    for (name, old) in before {
        if !after.contains_key(name) {
            changes.push(RefChange {
                name: name.clone(),
                action: RefAction::Deleted,
                old: old.clone(),
                new: ZERO_SHA.to_string(),
            });
        }
    }

    changes.sort_by(|a, b| a.name.cmp(&b.name));
    changes
}

/// Build the `git.push` payload: `{"changes": {<ref>: {action, old, new}}}`.
pub fn push_payload(changes: &[RefChange]) -> Map<String, Value> {
    let refs: Map<String, Value> = changes
        .iter()
        .map(|c| (c.name.clone(), c.to_json()))
        .collect();
    let mut payload = Map::new();
    payload.insert("changes".to_string(), Value::Object(refs));
    payload
}

/// Build the `git.tag` payload for a single tag change.
pub fn tag_payload(change: &RefChange) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(
        "tag".to_string(),
        Value::String(change.tag_name().unwrap_or(&change.name).to_string()),
    );
    payload.insert("ref".to_string(), Value::String(change.name.clone()));
    if let Value::Object(fields) = change.to_json() {
        payload.extend(fields);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, &str)]) -> RefSnapshot {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_is_bare() {
        let config = "[core]\n\trepositoryformatversion = 0\n\tfilemode = true\n\tbare = true\n";
        assert!(config_is_bare(config));
        assert!(!config_is_bare("[core]\n\tbare = false\n"));
        assert!(!config_is_bare("[remote \"origin\"]\n\tbare = true\n"));
        assert!(!config_is_bare(""));
    }

    #[test]
    fn test_is_bare_repo() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("demo.git");
        fs::create_dir(&repo).unwrap();
        assert!(!is_bare_repo(&repo));

        fs::write(repo.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        assert!(!is_bare_repo(&repo));

        fs::write(repo.join("config"), "[core]\n\tbare = true\n").unwrap();
        assert!(is_bare_repo(&repo));

        assert!(!is_bare_repo(&dir.path().join("missing.git")));
    }

    #[test]
    fn test_parse_show_ref() {
        let out = "1111111111111111111111111111111111111111 refs/heads/main\n\
                   2222222222222222222222222222222222222222 refs/tags/v1.0\n\n";
        let refs = parse_show_ref(out);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs["refs/tags/v1.0"], "2222222222222222222222222222222222222222");
    }

    #[test]
    fn test_diff_refs() {
        let before = snapshot(&[("refs/heads/main", "aaa"), ("refs/heads/old", "bbb")]);
        let after = snapshot(&[
            ("refs/heads/main", "ccc"),
            ("refs/heads/new", "ddd"),
            ("refs/tags/v1", "eee"),
        ]);

        let changes = diff_refs(&before, &after);
        let summary: Vec<_> = changes.iter().map(|c| (c.name.as_str(), c.action)).collect();
        assert_eq!(
            summary,
            vec![
                ("refs/heads/main", RefAction::Updated),
                ("refs/heads/new", RefAction::Created),
                ("refs/heads/old", RefAction::Deleted),
                ("refs/tags/v1", RefAction::Created),
            ]
        );
        assert_eq!(changes[1].old, ZERO_SHA);
        assert_eq!(changes[2].new, ZERO_SHA);
        assert!(changes[3].is_tag());
        assert_eq!(changes[3].tag_name(), Some("v1"));
    }

    #[test]
    fn test_diff_refs_unchanged() {
        let refs = snapshot(&[("refs/heads/main", "aaa")]);
        assert!(diff_refs(&refs, &refs).is_empty());
    }

    #[test]
    fn test_push_payload_shape() {
        let before = RefSnapshot::new();
        let after = snapshot(&[("refs/heads/main", "abc1234")]);
        let payload = push_payload(&diff_refs(&before, &after));

        let value = Value::Object(payload);
        assert_eq!(value["changes"]["refs/heads/main"]["action"], "created");
        assert_eq!(value["changes"]["refs/heads/main"]["new"], "abc1234");
        assert_eq!(value["changes"]["refs/heads/main"]["old"], ZERO_SHA);
    }

    #[test]
    fn test_tag_payload() {
        let change = RefChange {
            name: "refs/tags/v2.0".to_string(),
            action: RefAction::Created,
            old: ZERO_SHA.to_string(),
            new: "fff".to_string(),
        };
        let payload = tag_payload(&change);
        assert_eq!(payload["tag"], "v2.0");
        assert_eq!(payload["ref"], "refs/tags/v2.0");
        assert_eq!(payload["action"], "created");
    }
}
