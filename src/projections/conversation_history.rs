//! ConversationHistory - the message log of a session
//!
//! Keeps every user and agent message in order. The policy reads a window of
//! it when it hands a turn to a language model.

use serde::{Deserialize, Serialize};

use crate::value_objects::{ContextMessage, DialogRole};

/// A message and its position in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence_number: u64,
    pub message: ContextMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
    last_sequence: u64,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, message: ContextMessage) {
        self.last_sequence += 1;
        self.entries.push(HistoryEntry {
            sequence_number: self.last_sequence,
            message,
        });
    }

    pub fn record_user(&mut self, content: impl Into<String>) {
        self.record(ContextMessage::user(content));
    }

    pub fn record_system(&mut self, content: impl Into<String>) {
        self.record(ContextMessage::system(content));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Last `size` messages, oldest first
    pub fn window(&self, size: usize) -> Vec<ContextMessage> {
        let start = self.entries.len().saturating_sub(size);
        self.entries[start..]
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn by_role(&self, role: DialogRole) -> Vec<&HistoryEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.message.role == role)
            .collect()
    }

    /// Get paginated entries
    pub fn get_page(&self, offset: usize, limit: usize) -> &[HistoryEntry] {
        let start = offset.min(self.entries.len());
        let end = (start + limit).min(self.entries.len());
        &self.entries[start..end]
    }

    /// Case-insensitive search over message contents
    pub fn search(&self, query: &str) -> Vec<&HistoryEntry> {
        let query = query.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry.message.content.to_lowercase().contains(&query))
            .collect()
    }
}
