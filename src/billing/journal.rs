//! Append-only journal of billing lifecycle events.
//!
//! One JSON object per line. With hash chaining enabled, each event carries
//! the SHA-256 of its own serialization (`hash`) and its predecessor's hash
//! (`prev_hash`), so truncation or edits in the middle of the file are
//! detectable. A journal failure is logged and never fails the billing
//! operation that triggered it.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::JournalConfig;

#[derive(Debug, Serialize)]
struct JournalEvent<'a> {
    ts: String,
    event_type: &'a str,
    details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

pub struct EventJournal {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Mutex<Option<String>>,
}

impl EventJournal {
    /// Opens a journal at `path`, continuing the hash chain of any events
    /// already in the file.
    pub fn new(path: impl Into<PathBuf>, hash_chain: bool) -> Self {
        let path = path.into();
        let last_hash = if hash_chain {
            read_last_hash(&path)
        } else {
            None
        };
        Self {
            path,
            hash_chain,
            last_hash: Mutex::new(last_hash),
        }
    }

    /// `None` when the journal is disabled.
    pub fn from_config(config: &JournalConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.path.clone(), config.hash_chain))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, event_type: &str, details: serde_json::Value) {
        // Hold the chain state through the append so hashes stay ordered.
        let mut last_hash = match self.last_hash.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("Billing journal state lock poisoned: {}", e);
                return;
            }
        };

        let mut event = JournalEvent {
            ts: Utc::now().to_rfc3339(),
            event_type,
            details,
            prev_hash: last_hash.clone(),
            hash: None,
        };

        let mut next_hash = None;
        if self.hash_chain {
            let to_hash = match serde_json::to_string(&event) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to serialize journal event for hashing: {}", e);
                    return;
                }
            };
            let mut hasher = Sha256::new();
            hasher.update(to_hash.as_bytes());
            let hash = format!("{:x}", hasher.finalize());
            event.hash = Some(hash.clone());
            next_hash = Some(hash);
        }

        let line = match serde_json::to_string(&event) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to serialize billing journal event: {}", e);
                return;
            }
        };

        if self.append(&line) && next_hash.is_some() {
            *last_hash = next_hash;
        }
    }

    fn append(&self, line: &str) -> bool {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::warn!("Failed to create billing journal dir {:?}: {}", parent, e);
            return false;
        }

        // Owner-only file; refuse to append to one with broader permissions.
        let mut open_opts = OpenOptions::new();
        open_opts.create(true).append(true);
        #[cfg(unix)]
        open_opts.mode(0o600);
        let mut file = match open_opts.open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Failed to open billing journal {:?}: {}", self.path, e);
                return false;
            }
        };

        #[cfg(unix)]
        {
            let mode = match file.metadata() {
                Ok(meta) => meta.permissions().mode() & 0o777,
                Err(e) => {
                    tracing::warn!(
                        "Failed to read permissions for billing journal {:?}: {}",
                        self.path,
                        e
                    );
                    return false;
                }
            };
            if mode != 0o600 {
                tracing::warn!(
                    "Refusing to write billing journal event; insecure mode {:o} on {:?} (expected 600)",
                    mode,
                    self.path
                );
                return false;
            }
        }

        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!("Failed to append billing journal event: {}", e);
            return false;
        }
        true
    }
}

fn read_last_hash(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let last_line = BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter(|line| !line.trim().is_empty())
        .last()?;
    let value: serde_json::Value = serde_json::from_str(&last_line).ok()?;
    value.get("hash")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::EventJournal;

    fn read_events(path: &std::path::Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .expect("journal file")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }

    #[test]
    fn hash_chain_links_consecutive_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("journal.jsonl");
        let journal = EventJournal::new(&path, true);

        journal.record("timer_started", serde_json::json!({"client_id": 1}));
        journal.record("timer_stopped", serde_json::json!({"entry_id": 5}));

        let events = read_events(&path);
        assert_eq!(events.len(), 2);
        assert!(events[0].get("prev_hash").is_none());
        assert_eq!(events[1]["prev_hash"], events[0]["hash"]);
        assert_eq!(events[1]["event_type"], "timer_stopped");
        assert_eq!(events[1]["details"]["entry_id"], 5);
    }

    #[test]
    fn reopened_journal_continues_the_chain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("journal.jsonl");
        EventJournal::new(&path, true).record("invoice_created", serde_json::json!({}));
        EventJournal::new(&path, true).record("invoice_finalized", serde_json::json!({}));

        let events = read_events(&path);
        assert_eq!(events[1]["prev_hash"], events[0]["hash"]);
    }

    #[test]
    fn unchained_journal_omits_hashes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("journal.jsonl");
        EventJournal::new(&path, false).record("invoice_paid", serde_json::json!({"id": 3}));

        let events = read_events(&path);
        assert!(events[0].get("hash").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn journal_file_is_owner_only_and_broader_modes_are_refused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("journal.jsonl");
        let journal = EventJournal::new(&path, true);
        journal.record("invoice_created", serde_json::json!({}));

        let mode = std::fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).expect("chmod");
        journal.record("invoice_sent", serde_json::json!({}));
        assert_eq!(read_events(&path).len(), 1);
    }
}
