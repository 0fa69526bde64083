//! The activity log and the notification inbox.
//!
//! Both are newest-first and bounded; the oldest entries fall off the end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

const MAX_LOG_ENTRIES: usize = 200;
const MAX_INBOX_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Success,
    Update,
    Config,
    Alert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeCategory {
    System,
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub time: DateTime<Utc>,
    pub category: NoticeCategory,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    logs: VecDeque<LogEntry>,
    inbox: VecDeque<InboxItem>,
}

impl Journal {
    pub fn new(logs: Vec<LogEntry>, inbox: Vec<InboxItem>) -> Self {
        Self {
            logs: logs.into_iter().take(MAX_LOG_ENTRIES).collect(),
            inbox: inbox.into_iter().take(MAX_INBOX_ENTRIES).collect(),
        }
    }

    pub fn log(&mut self, kind: LogKind, title: &str, description: &str, at: DateTime<Utc>) {
        self.logs.push_front(LogEntry {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            timestamp: at,
            kind,
        });
        self.logs.truncate(MAX_LOG_ENTRIES);
    }

    pub fn notify(&mut self, category: NoticeCategory, title: &str, description: &str, at: DateTime<Utc>) {
        self.inbox.push_front(InboxItem {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            time: at,
            category,
            read: false,
        });
        self.inbox.truncate(MAX_INBOX_ENTRIES);
    }

    /// Marks one inbox item read. Returns `false` if the id is unknown.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.inbox.iter_mut().find(|n| n.id == id) {
            Some(item) => {
                item.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        self.inbox.iter_mut().for_each(|n| n.read = true);
    }

    pub fn unread_count(&self) -> usize {
        self.inbox.iter().filter(|n| !n.read).count()
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn inbox(&self) -> impl Iterator<Item = &InboxItem> {
        self.inbox.iter()
    }

    pub fn logs_vec(&self) -> Vec<LogEntry> {
        self.logs.iter().cloned().collect()
    }

    pub fn inbox_vec(&self) -> Vec<InboxItem> {
        self.inbox.iter().cloned().collect()
    }
}
