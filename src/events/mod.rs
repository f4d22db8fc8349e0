//! Dialog session events
//!
//! Recorded by the belief tracker and the policy while a turn is processed,
//! then drained by the owning session into its read models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{SlotValues, TopicKey};

/// Common surface of every session event
pub trait SessionEvent {
    /// Subject the event would be published under
    fn subject(&self) -> String;

    /// Session the event belongs to
    fn session_id(&self) -> Uuid;

    fn event_type(&self) -> &'static str;
}

/// A topic entered the context for the first time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicOpened {
    pub session_id: Uuid,
    pub topic: TopicKey,
    pub opened_at: DateTime<Utc>,
}

impl SessionEvent for TopicOpened {
    fn subject(&self) -> String {
        "dialog.topic.opened.v1".to_string()
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn event_type(&self) -> &'static str {
        "TopicOpened"
    }
}

/// A dormant topic was brought back after another one interrupted it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResumed {
    pub session_id: Uuid,
    pub topic: TopicKey,
    pub turn: u64,
    pub resumed_at: DateTime<Utc>,
}

impl SessionEvent for TopicResumed {
    fn subject(&self) -> String {
        "dialog.topic.resumed.v1".to_string()
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn event_type(&self) -> &'static str {
        "TopicResumed"
    }
}

/// Every state of a topic was dropped from the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicReset {
    pub session_id: Uuid,
    pub topic: TopicKey,
    pub removed: usize,
    pub reset_at: DateTime<Utc>,
}

impl SessionEvent for TopicReset {
    fn subject(&self) -> String {
        "dialog.topic.reset.v1".to_string()
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn event_type(&self) -> &'static str {
        "TopicReset"
    }
}

/// The whole context was emptied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextCleared {
    pub session_id: Uuid,
    pub dropped_topics: usize,
    pub cleared_at: DateTime<Utc>,
}

impl SessionEvent for ContextCleared {
    fn subject(&self) -> String {
        "dialog.context.cleared.v1".to_string()
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn event_type(&self) -> &'static str {
        "ContextCleared"
    }
}

/// The user was asked for the slots an operation still lacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotsRequested {
    pub session_id: Uuid,
    pub operation: String,
    pub missing: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

impl SessionEvent for SlotsRequested {
    fn subject(&self) -> String {
        "dialog.slots.requested.v1".to_string()
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn event_type(&self) -> &'static str {
        "SlotsRequested"
    }
}

/// An operation is waiting for the user's confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequested {
    pub session_id: Uuid,
    pub operation: String,
    pub slots: SlotValues,
    pub requested_at: DateTime<Utc>,
}

impl SessionEvent for ConfirmationRequested {
    fn subject(&self) -> String {
        "dialog.confirmation.requested.v1".to_string()
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn event_type(&self) -> &'static str {
        "ConfirmationRequested"
    }
}

/// An operation was carried out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationExecuted {
    pub session_id: Uuid,
    pub operation: String,
    pub slots: SlotValues,
    pub executed_at: DateTime<Utc>,
}

impl SessionEvent for OperationExecuted {
    fn subject(&self) -> String {
        "dialog.operation.executed.v1".to_string()
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn event_type(&self) -> &'static str {
        "OperationExecuted"
    }
}

/// The user refused a pending operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCancelled {
    pub session_id: Uuid,
    pub operation: String,
    pub cancelled_at: DateTime<Utc>,
}

impl SessionEvent for OperationCancelled {
    fn subject(&self) -> String {
        "dialog.operation.cancelled.v1".to_string()
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn event_type(&self) -> &'static str {
        "OperationCancelled"
    }
}

/// Every event a dialog session can record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DialogDomainEvent {
    TopicOpened(TopicOpened),
    TopicResumed(TopicResumed),
    TopicReset(TopicReset),
    ContextCleared(ContextCleared),
    SlotsRequested(SlotsRequested),
    ConfirmationRequested(ConfirmationRequested),
    OperationExecuted(OperationExecuted),
    OperationCancelled(OperationCancelled),
}

impl DialogDomainEvent {
    fn inner(&self) -> &dyn SessionEvent {
        match self {
            Self::TopicOpened(e) => e,
            Self::TopicResumed(e) => e,
            Self::TopicReset(e) => e,
            Self::ContextCleared(e) => e,
            Self::SlotsRequested(e) => e,
            Self::ConfirmationRequested(e) => e,
            Self::OperationExecuted(e) => e,
            Self::OperationCancelled(e) => e,
        }
    }
}

impl SessionEvent for DialogDomainEvent {
    fn subject(&self) -> String {
        self.inner().subject()
    }

    fn session_id(&self) -> Uuid {
        self.inner().session_id()
    }

    fn event_type(&self) -> &'static str {
        self.inner().event_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope() {
        let session_id = Uuid::new_v4();
        let event = DialogDomainEvent::SlotsRequested(SlotsRequested {
            session_id,
            operation: "transferencia".to_string(),
            missing: vec!["valor".to_string()],
            requested_at: Utc::now(),
        });

        assert_eq!(event.session_id(), session_id);
        assert_eq!(event.event_type(), "SlotsRequested");
        assert_eq!(event.subject(), "dialog.slots.requested.v1");
    }
}
