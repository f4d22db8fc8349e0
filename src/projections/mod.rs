//! Dialog projections for read models
//!
//! Sessions drain the events recorded by their tracker and policy into these
//! views after every turn; queries read them without touching the tracker.

use uuid::Uuid;

use crate::events::DialogDomainEvent;

pub mod conversation_history;
pub mod session_view;

pub use conversation_history::{ConversationHistory, HistoryEntry};
pub use session_view::{ExecutedOperation, SessionView};

/// Common trait for session projections
pub trait SessionProjection: Send + Sync {
    /// Update the projection based on an event
    fn apply_event(&mut self, event: &DialogDomainEvent);

    /// Session the projection describes
    fn id(&self) -> Uuid;

    /// Apply a batch of events in order
    fn apply_all(&mut self, events: &[DialogDomainEvent]) {
        for event in events {
            self.apply_event(event);
        }
    }
}
