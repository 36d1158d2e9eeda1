//! Chat transcript: log entries and the append-only message log
//!
//! These structures are platform-agnostic and shared between the CLI
//! and the browser build.

use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Serialize, Serializer};
use tracing::trace;

/// Sender name for locally sent messages
pub const SENDER_YOU: &str = "You";
/// Sender name for frames received from the peer
pub const SENDER_SERVER: &str = "Server";
/// Sender name for connection notices
pub const SENDER_SYSTEM: &str = "System";

/// Who a log entry came from, relative to this client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Origin {
    Sent,
    /// Remote frames and system notices
    Received,
}

/// One line of the chat transcript
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogEntry {
    sender: String,
    content: String,
    timestamp: DateTime<Utc>,
    origin: Origin,
}

impl LogEntry {
    fn new(sender: &str, content: String, origin: Origin) -> Self {
        Self {
            sender: sender.to_string(),
            content,
            timestamp: Utc::now(),
            origin,
        }
    }

    pub fn sent(text: impl Into<String>) -> Self {
        Self::new(SENDER_YOU, text.into(), Origin::Sent)
    }

    pub fn received_text(text: impl Into<String>) -> Self {
        Self::new(SENDER_SERVER, text.into(), Origin::Received)
    }

    /// Binary payloads are kept as lowercase hex text
    pub fn received_binary(bytes: &[u8]) -> Self {
        Self::new(SENDER_SERVER, hex::encode(bytes), Origin::Received)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SENDER_SYSTEM, text.into(), Origin::Received)
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_received(&self) -> bool {
        self.origin == Origin::Received
    }

    /// Local `HH:MM:SS` stamp shown under each message
    pub fn clock_time(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string()
    }
}

/// Frozen view of the transcript at one point in time
///
/// Cloning is one reference count; later appends never show up here.
#[derive(Clone, Debug, Default)]
pub struct LogSnapshot {
    entries: Arc<Vec<Arc<LogEntry>>>,
}

impl LogSnapshot {
    /// Entries after the first `seen` ones
    pub fn since(&self, seen: usize) -> &[Arc<LogEntry>] {
        self.entries.get(seen..).unwrap_or(&[])
    }
}

impl Deref for LogSnapshot {
    type Target = [Arc<LogEntry>];

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

impl Serialize for LogSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter().map(|entry| entry.as_ref()))
    }
}

/// Append-only, insertion-ordered chat transcript
///
/// Entries are never mutated or removed once appended. Storage is shared
/// copy-on-write with outstanding snapshots: taking a snapshot is O(1), and
/// the next append copies the pointer list only if a snapshot still holds it.
#[derive(Clone, Debug, Default)]
pub struct MessageLog {
    entries: Arc<Vec<Arc<LogEntry>>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry`, returning the shared handle now stored in the log
    pub fn append(&mut self, entry: LogEntry) -> Arc<LogEntry> {
        trace!(
            sender = entry.sender(),
            origin = ?entry.origin(),
            len = entry.content().len(),
            index = self.entries.len(),
            "Log entry appended"
        );
        let entry = Arc::new(entry);
        Arc::make_mut(&mut self.entries).push(Arc::clone(&entry));
        entry
    }

    pub fn snapshot(&self) -> LogSnapshot {
        LogSnapshot {
            entries: Arc::clone(&self.entries),
        }
    }

    /// Entries appended after the first `seen` ones
    pub fn since(&self, seen: usize) -> Vec<Arc<LogEntry>> {
        self.entries.get(seen..).map_or_else(Vec::new, <[Arc<LogEntry>]>::to_vec)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last().map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().map(Arc::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_payload_is_lowercase_hex() {
        let entry = LogEntry::received_binary(&[0xAB, 0xCD, 0x01]);
        assert_eq!(entry.content(), "abcd01");
        assert_eq!(entry.sender(), SENDER_SERVER);
        assert_eq!(entry.origin(), Origin::Received);
    }

    #[test]
    fn test_system_notices_count_as_received() {
        let entry = LogEntry::system("Connected to server");
        assert_eq!(entry.sender(), SENDER_SYSTEM);
        assert!(entry.is_received());
    }

    #[test]
    fn test_sent_entry_keeps_text() {
        let entry = LogEntry::sent("hello");
        assert_eq!(entry.sender(), SENDER_YOU);
        assert_eq!(entry.content(), "hello");
        assert_eq!(entry.origin(), Origin::Sent);
    }

    #[test]
    fn test_append_preserves_order() {
        let mut log = MessageLog::new();
        assert!(log.is_empty());
        for i in 0..5 {
            log.append(LogEntry::received_text(format!("msg {i}")));
        }
        let contents: Vec<&str> = log.iter().map(LogEntry::content).collect();
        assert_eq!(contents, ["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
        assert_eq!(log.last().map(LogEntry::content), Some("msg 4"));
    }

    #[test]
    fn test_snapshot_is_frozen_while_log_grows() {
        let mut log = MessageLog::new();
        log.append(LogEntry::sent("a"));
        let before = log.snapshot();
        log.append(LogEntry::sent("b"));
        log.append(LogEntry::sent("c"));

        assert_eq!(before.len(), 1);
        assert_eq!(log.len(), 3);
        let after = log.snapshot();
        assert!(Arc::ptr_eq(&before[0], &after[0]));
        assert_eq!(after.since(1).len(), 2);
    }

    #[test]
    fn test_snapshot_shares_storage_until_next_append() {
        let mut log = MessageLog::new();
        log.append(LogEntry::sent("a"));
        let first = log.snapshot();
        let second = log.snapshot();
        assert!(Arc::ptr_eq(&first.entries, &second.entries));
        log.append(LogEntry::sent("b"));
        assert!(!Arc::ptr_eq(&first.entries, &log.snapshot().entries));
    }

    #[test]
    fn test_since_returns_only_new_entries() {
        let mut log = MessageLog::new();
        log.append(LogEntry::sent("a"));
        log.append(LogEntry::sent("b"));
        log.append(LogEntry::sent("c"));
        let fresh: Vec<String> = log.since(1).iter().map(|e| e.content().to_string()).collect();
        assert_eq!(fresh, ["b", "c"]);
        assert!(log.since(3).is_empty());
        assert!(log.since(10).is_empty());
        assert!(log.snapshot().since(10).is_empty());
    }

    #[test]
    fn test_snapshot_serializes_as_entry_array() {
        let mut log = MessageLog::new();
        log.append(LogEntry::sent("hi"));
        let json = serde_json::to_value(log.snapshot()).expect("serialize");
        assert_eq!(json[0]["sender"], "You");
        assert_eq!(json[0]["content"], "hi");
        assert_eq!(json[0]["origin"], "Sent");
    }

    #[test]
    fn test_clock_time_format() {
        let stamp = LogEntry::sent("x").clock_time();
        assert_eq!(stamp.len(), 8);
        assert_eq!(stamp.matches(':').count(), 2);
    }
}
