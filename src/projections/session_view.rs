//! Per-session read model built from dialog events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SessionProjection;
use crate::events::*;
use crate::value_objects::{SlotValues, TopicKey};

/// An operation the agent carried out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedOperation {
    pub operation: String,
    pub slots: SlotValues,
    pub executed_at: DateTime<Utc>,
}

/// Snapshot of one user's session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub user: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turns: u64,
    /// Topics currently in the context, oldest first
    pub open_topics: Vec<TopicKey>,
    /// Operations waiting for a yes or no
    pub awaiting_confirmation: Vec<String>,
    pub executed_operations: Vec<ExecutedOperation>,
    pub cancelled_operations: Vec<String>,
    pub slot_requests: usize,
    pub resumed_topics: usize,
}

impl SessionView {
    pub fn new(session_id: Uuid, user: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user: user.into(),
            started_at: now,
            last_activity: now,
            turns: 0,
            open_topics: Vec::new(),
            awaiting_confirmation: Vec::new(),
            executed_operations: Vec::new(),
            cancelled_operations: Vec::new(),
            slot_requests: 0,
            resumed_topics: 0,
        }
    }

    /// Count a processed user message
    pub fn record_turn(&mut self, at: DateTime<Utc>) {
        self.turns += 1;
        self.last_activity = at;
    }

    pub fn is_awaiting_confirmation(&self) -> bool {
        !self.awaiting_confirmation.is_empty()
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_activity {
            self.last_activity = at;
        }
    }

    fn settle(&mut self, operation: &str) {
        self.awaiting_confirmation.retain(|pending| pending != operation);
    }
}

impl SessionProjection for SessionView {
    fn apply_event(&mut self, event: &DialogDomainEvent) {
        if event.session_id() != self.session_id {
            return;
        }

        match event {
            DialogDomainEvent::TopicOpened(e) => {
                if !self.open_topics.contains(&e.topic) {
                    self.open_topics.push(e.topic.clone());
                }
                self.touch(e.opened_at);
            }
            DialogDomainEvent::TopicResumed(e) => {
                self.resumed_topics += 1;
                self.touch(e.resumed_at);
            }
            DialogDomainEvent::TopicReset(e) => {
                self.open_topics.retain(|topic| *topic != e.topic);
                self.touch(e.reset_at);
            }
            DialogDomainEvent::ContextCleared(e) => {
                self.open_topics.clear();
                self.awaiting_confirmation.clear();
                self.touch(e.cleared_at);
            }
            DialogDomainEvent::SlotsRequested(e) => {
                self.slot_requests += 1;
                self.touch(e.requested_at);
            }
            DialogDomainEvent::ConfirmationRequested(e) => {
                if !self.awaiting_confirmation.contains(&e.operation) {
                    self.awaiting_confirmation.push(e.operation.clone());
                }
                self.touch(e.requested_at);
            }
            DialogDomainEvent::OperationExecuted(e) => {
                self.settle(&e.operation);
                self.executed_operations.push(ExecutedOperation {
                    operation: e.operation.clone(),
                    slots: e.slots.clone(),
                    executed_at: e.executed_at,
                });
                self.touch(e.executed_at);
            }
            DialogDomainEvent::OperationCancelled(e) => {
                self.settle(&e.operation);
                self.cancelled_operations.push(e.operation.clone());
                self.touch(e.cancelled_at);
            }
        }
    }

    fn id(&self) -> Uuid {
        self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::Intent;

    #[test]
    fn test_confirmation_lifecycle() {
        let session_id = Uuid::new_v4();
        let mut view = SessionView::new(session_id, "ana");

        view.apply_event(&DialogDomainEvent::TopicOpened(TopicOpened {
            session_id,
            topic: TopicKey::perform("transferencia"),
            opened_at: Utc::now(),
        }));
        view.apply_event(&DialogDomainEvent::ConfirmationRequested(ConfirmationRequested {
            session_id,
            operation: "transferencia".to_string(),
            slots: SlotValues::new(),
            requested_at: Utc::now(),
        }));
        assert!(view.is_awaiting_confirmation());

        view.apply_event(&DialogDomainEvent::OperationExecuted(OperationExecuted {
            session_id,
            operation: "transferencia".to_string(),
            slots: SlotValues::new(),
            executed_at: Utc::now(),
        }));
        view.apply_event(&DialogDomainEvent::TopicReset(TopicReset {
            session_id,
            topic: TopicKey::new(Intent::Perform, Some("transferencia".to_string())),
            removed: 1,
            reset_at: Utc::now(),
        }));

        assert!(!view.is_awaiting_confirmation());
        assert!(view.open_topics.is_empty());
        assert_eq!(view.executed_operations.len(), 1);
    }

    #[test]
    fn test_foreign_events_are_ignored() {
        let mut view = SessionView::new(Uuid::new_v4(), "ana");
        view.apply_event(&DialogDomainEvent::SlotsRequested(SlotsRequested {
            session_id: Uuid::new_v4(),
            operation: "transferencia".to_string(),
            missing: vec!["valor".to_string()],
            requested_at: Utc::now(),
        }));
        assert_eq!(view.slot_requests, 0);
    }
}
