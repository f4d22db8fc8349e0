//! Belief tracker - the per-user context of tracked topics
//!
//! Each user session owns exactly one [`BeliefTracker`]. It keeps a
//! [`Context`] of [`DialogState`]s, one per `(intent, operation)` topic, and
//! merges every turn's [`SemanticExtraction`] into it:
//! - clauses naming a known topic reuse that topic's state
//! - clauses without an intent amend the most recently appended state
//! - everything touched in the turn ends up at the tail, in touch order
//!
//! States are only dropped by [`BeliefTracker::reset`] and
//! [`BeliefTracker::clear`]; merging never removes a topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

use crate::events::{ContextCleared, DialogDomainEvent, TopicOpened, TopicReset, TopicResumed};
use crate::value_objects::{
    Clause, DEFAULT_DOMAIN, Intent, Question, SemanticExtraction, Slots, TopicKey,
};

/// Marker left on a state when its topic comes back after an interruption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevantEvent {
    /// Tracker turn in which the topic was resumed
    pub turn: u64,
    pub recorded_at: DateTime<Utc>,
}

/// One tracked conversational topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogState {
    pub intent: Intent,
    pub operation: Option<String>,
    pub question: Option<Question>,
    /// Touched during the latest turn
    pub current: bool,
    pub emotion: Option<String>,
    pub slots: Slots,
    pub relevant_events: Vec<RelevantEvent>,
    pub out_of_context: bool,
    pub domain: String,
    pub dependent: bool,
}

impl DialogState {
    /// Create a fresh, current state
    pub fn new(intent: Intent, operation: Option<String>, question: Option<Question>) -> Self {
        Self {
            intent,
            operation,
            question,
            current: true,
            emotion: None,
            slots: Slots::new(),
            relevant_events: Vec::new(),
            out_of_context: false,
            domain: DEFAULT_DOMAIN.to_string(),
            dependent: false,
        }
    }

    /// Identity of this state's topic
    pub fn key(&self) -> TopicKey {
        TopicKey::new(self.intent.clone(), self.operation.clone())
    }

    /// Whether this state tracks the `(intent, operation)` topic
    pub fn matches(&self, intent: &Intent, operation: Option<&str>) -> bool {
        self.intent == *intent && self.operation.as_deref() == operation
    }

    /// Merge slots, newer values replace older ones
    pub fn update_slots(&mut self, slots: &Slots) {
        self.slots
            .extend(slots.iter().map(|(name, value)| (name.clone(), value.clone())));
    }

    /// Replace the question, but never with nothing
    pub fn update_question(&mut self, question: Option<Question>) {
        if question.is_some() {
            self.question = question;
        }
    }

    /// Whether the topic was resumed after being interrupted
    pub fn was_resumed(&self) -> bool {
        !self.relevant_events.is_empty()
    }

    fn fill(&mut self, extraction: &SemanticExtraction, slots: &Slots) {
        self.update_slots(slots);
        self.out_of_context = extraction.out_of_context;
        self.dependent = extraction.dependent;
        if !extraction.domain.trim().is_empty() {
            self.domain = extraction.domain.clone();
        }
        if !extraction.sentiment.trim().is_empty() {
            self.emotion = Some(extraction.sentiment.clone());
        }
    }
}

/// Ordered, double-ended collection of a session's states
///
/// The tail holds the most recently touched topics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    states: VecDeque<DialogState>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &DialogState> {
        self.states.iter()
    }

    /// Most recently appended state
    pub fn back(&self) -> Option<&DialogState> {
        self.states.back()
    }

    pub fn push_back(&mut self, state: DialogState) {
        self.states.push_back(state);
    }

    pub fn push_front(&mut self, state: DialogState) {
        self.states.push_front(state);
    }

    pub fn pop_back(&mut self) -> Option<DialogState> {
        self.states.pop_back()
    }

    pub fn pop_front(&mut self) -> Option<DialogState> {
        self.states.pop_front()
    }

    /// Index of the state tracking `(intent, operation)`
    pub fn position(&self, intent: &Intent, operation: Option<&str>) -> Option<usize> {
        self.states
            .iter()
            .position(|state| state.matches(intent, operation))
    }

    /// Take the state at `index` out, keeping the others in order
    pub fn take(&mut self, index: usize) -> Option<DialogState> {
        self.states.remove(index)
    }

    /// Drop every state of a topic; returns how many were dropped
    pub fn remove_topic(&mut self, intent: &Intent, operation: Option<&str>) -> usize {
        let before = self.states.len();
        self.states
            .retain(|state| !state.matches(intent, operation));
        before - self.states.len()
    }

    /// Move current states to the tail, keeping each group's order
    pub fn prioritize_current(&mut self) {
        self.states.make_contiguous().sort_by_key(|state| state.current);
    }

    /// Empty the context; returns how many states were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.states.len();
        self.states.clear();
        dropped
    }

    fn mark_all_stale(&mut self) {
        for state in self.states.iter_mut() {
            state.current = false;
        }
    }

    fn back_mut(&mut self) -> Option<&mut DialogState> {
        self.states.back_mut()
    }

    pub fn to_vec(&self) -> Vec<DialogState> {
        self.states.iter().cloned().collect()
    }
}

/// Belief tracker for a single user
#[derive(Debug, Clone)]
pub struct BeliefTracker {
    session_id: Uuid,
    user: String,
    context: Context,
    turn: u64,
    uncommitted_events: Vec<DialogDomainEvent>,
}

impl BeliefTracker {
    /// Create a tracker with an empty context
    pub fn new(user: impl Into<String>) -> Self {
        Self::with_session_id(Uuid::new_v4(), user)
    }

    pub fn with_session_id(session_id: Uuid, user: impl Into<String>) -> Self {
        Self {
            session_id,
            user: user.into(),
            context: Context::new(),
            turn: 0,
            uncommitted_events: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Number of turns merged so far
    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Merge one turn's extraction and return the whole context
    pub fn update_state(&mut self, extraction: &SemanticExtraction) -> Vec<DialogState> {
        self.turn += 1;
        self.context.mark_all_stale();

        let slots = extraction.slots();
        let previous_tail = self.context.back().map(DialogState::key);

        for clause in extraction.clauses() {
            if self.context.is_empty() {
                debug!(user = %self.user, "creating first state");
                let intent = clause.intent.clone().unwrap_or(Intent::Other(String::new()));
                let mut state = DialogState::new(intent, clause.operation.clone(), clause.question);
                state.fill(extraction, &slots);
                self.record_opened(&state);
                self.context.push_back(state);
                continue;
            }

            match clause.intent.clone() {
                None => self.continue_last(extraction, &slots, &clause),
                Some(intent) => {
                    self.merge_topic(intent, extraction, &slots, &clause, previous_tail.as_ref())
                }
            }
        }

        self.context.prioritize_current();
        debug!(user = %self.user, states = self.context.len(), "context updated");
        self.context.to_vec()
    }

    /// Drop every state of the `(intent, operation)` topic
    pub fn reset(&mut self, intent: &Intent, operation: Option<&str>) -> usize {
        let removed = self.context.remove_topic(intent, operation);
        debug!(user = %self.user, %intent, ?operation, removed, "reset topic");
        if removed > 0 {
            self.uncommitted_events
                .push(DialogDomainEvent::TopicReset(TopicReset {
                    session_id: self.session_id,
                    topic: TopicKey::new(intent.clone(), operation.map(str::to_string)),
                    removed,
                    reset_at: Utc::now(),
                }));
        }
        removed
    }

    /// Forget every topic
    pub fn clear(&mut self) {
        let dropped_topics = self.context.clear();
        debug!(user = %self.user, dropped_topics, "context cleared");
        self.uncommitted_events
            .push(DialogDomainEvent::ContextCleared(ContextCleared {
                session_id: self.session_id,
                dropped_topics,
                cleared_at: Utc::now(),
            }));
    }

    /// Drain the events recorded since the last call
    pub fn take_events(&mut self) -> Vec<DialogDomainEvent> {
        std::mem::take(&mut self.uncommitted_events)
    }

    fn continue_last(&mut self, extraction: &SemanticExtraction, slots: &Slots, clause: &Clause) {
        debug!(user = %self.user, "updating last state");
        if let Some(state) = self.context.back_mut() {
            state.fill(extraction, slots);
            state.update_question(clause.question);
            state.current = true;
        }
    }

    fn merge_topic(
        &mut self,
        intent: Intent,
        extraction: &SemanticExtraction,
        slots: &Slots,
        clause: &Clause,
        previous_tail: Option<&TopicKey>,
    ) {
        let operation = clause.operation.as_deref();
        let found = self
            .context
            .position(&intent, operation)
            .and_then(|index| self.context.take(index));

        let mut state = match found {
            Some(mut state) => {
                let resumed = !state.current && previous_tail != Some(&state.key());
                if resumed {
                    self.record_resumed(&mut state);
                }
                state
            }
            None => {
                debug!(user = %self.user, %intent, ?operation, "no state for topic, creating one");
                let state = DialogState::new(intent, clause.operation.clone(), clause.question);
                self.record_opened(&state);
                state
            }
        };

        state.fill(extraction, slots);
        state.update_question(clause.question);
        state.current = true;
        self.context.push_back(state);
    }

    fn record_opened(&mut self, state: &DialogState) {
        self.uncommitted_events
            .push(DialogDomainEvent::TopicOpened(TopicOpened {
                session_id: self.session_id,
                topic: state.key(),
                opened_at: Utc::now(),
            }));
    }

    fn record_resumed(&mut self, state: &mut DialogState) {
        let now = Utc::now();
        debug!(user = %self.user, topic = %state.key(), "topic resumed");
        state.relevant_events.push(RelevantEvent {
            turn: self.turn,
            recorded_at: now,
        });
        self.uncommitted_events
            .push(DialogDomainEvent::TopicResumed(TopicResumed {
                session_id: self.session_id,
                topic: state.key(),
                turn: self.turn,
                resumed_at: now,
            }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::Entity;

    fn perform(operation: &str) -> SemanticExtraction {
        SemanticExtraction::default().with_clause(Some(Intent::Perform), Some(operation), None)
    }

    #[test]
    fn test_first_state_is_created() {
        let mut tracker = BeliefTracker::new("ana");
        let states = tracker.update_state(
            &perform("transferencia").with_entity(Entity::labeled("TED", "tipo_transferencia")),
        );

        assert_eq!(states.len(), 1);
        assert_eq!(states[0].intent, Intent::Perform);
        assert_eq!(states[0].operation.as_deref(), Some("transferencia"));
        assert_eq!(states[0].slots["tipo_transferencia"], "TED");
        assert!(states[0].current);
    }

    #[test]
    fn test_empty_extraction_only_clears_current() {
        let mut tracker = BeliefTracker::new("ana");
        tracker.update_state(&perform("transferencia"));

        let states = tracker.update_state(&SemanticExtraction::default());
        assert_eq!(states.len(), 1);
        assert!(!states[0].current);
        assert_eq!(states[0].operation.as_deref(), Some("transferencia"));
    }

    #[test]
    fn test_prioritize_current_is_stable() {
        let mut context = Context::new();
        for (operation, current) in [("a", true), ("b", false), ("c", true), ("d", false)] {
            let mut state = DialogState::new(Intent::Perform, Some(operation.to_string()), None);
            state.current = current;
            context.push_back(state);
        }

        context.prioritize_current();
        let order: Vec<_> = context
            .iter()
            .map(|state| state.operation.clone().unwrap_or_default())
            .collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_resumed_topic_gets_relevant_event() {
        let mut tracker = BeliefTracker::new("ana");
        tracker.update_state(&perform("transferencia"));
        tracker.update_state(&perform("consulta_de_saldo"));
        let states = tracker.update_state(&perform("transferencia"));

        let transfer = states.last().unwrap();
        assert_eq!(transfer.operation.as_deref(), Some("transferencia"));
        assert_eq!(transfer.relevant_events.len(), 1);
        assert_eq!(transfer.relevant_events[0].turn, 3);
    }

    #[test]
    fn test_repeating_the_tail_topic_is_not_a_resume() {
        let mut tracker = BeliefTracker::new("ana");
        tracker.update_state(&perform("transferencia"));
        let states = tracker.update_state(&perform("transferencia"));

        assert_eq!(states.len(), 1);
        assert!(states[0].relevant_events.is_empty());
    }

    #[test]
    fn test_events_are_drained() {
        let mut tracker = BeliefTracker::new("ana");
        tracker.update_state(&perform("transferencia"));
        tracker.reset(&Intent::Perform, Some("transferencia"));

        let events = tracker.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DialogDomainEvent::TopicOpened(_)));
        assert!(matches!(events[1], DialogDomainEvent::TopicReset(_)));
        assert!(tracker.take_events().is_empty());
    }
}
