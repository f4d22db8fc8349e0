//! Action selection policy
//!
//! The policy reads the states the tracker marked current in this turn and
//! decides, per state, what the agent does next. Dispatch is a closed match
//! over [`Intent`]; every branch yields a renderable [`Action`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregate::{BeliefTracker, DialogState};
use crate::errors::DialogError;
use crate::events::{
    ConfirmationRequested, DialogDomainEvent, OperationCancelled, OperationExecuted,
    SlotsRequested,
};
use crate::knowledge::KnowledgeService;
use crate::value_objects::{
    ContextMessage, Intent, Question, SlotValues, Slots, TopicKey, slot_values,
};

/// Kind of response the agent produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionIntent {
    Greeting,
    Farewell,
    /// Execute an operation or state a fact
    Inform,
    /// Request missing slots
    Ask,
    /// Request confirmation of a pending operation
    Confirm,
    /// Acknowledge a refused operation
    Reject,
    Summarize,
    DelegateToModel,
    OutOfContext,
    /// The extractor itself judged the turn off-topic
    OutOfContextViaModel,
    /// Something failed while deciding; say sorry
    Apologize,
}

impl ActionIntent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Farewell => "farewell",
            Self::Inform => "inform",
            Self::Ask => "ask",
            Self::Confirm => "confirm",
            Self::Reject => "reject",
            Self::Summarize => "summarize",
            Self::DelegateToModel => "delegate_to_model",
            Self::OutOfContext => "out_of_context",
            Self::OutOfContextViaModel => "out_of_context_via_model",
            Self::Apologize => "apologize",
        }
    }
}

impl fmt::Display for ActionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A policy decision, rendered to text downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub intent: ActionIntent,
    pub operation: Option<String>,
    pub question: Option<Question>,
    pub emotion: Option<String>,
    pub slots: SlotValues,
    /// Hint that the topic was interrupted and should be phrased as resumed
    pub remember: bool,
    pub context_messages: Vec<ContextMessage>,
}

impl Action {
    pub fn new(intent: ActionIntent) -> Self {
        Self {
            intent,
            operation: None,
            question: None,
            emotion: None,
            slots: SlotValues::new(),
            remember: false,
            context_messages: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_question(mut self, question: Option<Question>) -> Self {
        self.question = question;
        self
    }

    pub fn with_slot(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.slots.insert(name.into(), value.into());
        self
    }

    pub fn with_slots(mut self, slots: &Slots) -> Self {
        self.slots.extend(slot_values(slots));
        self
    }

    pub fn with_remember(mut self, remember: bool) -> Self {
        self.remember = remember;
        self
    }

    pub fn with_context_messages(mut self, messages: Vec<ContextMessage>) -> Self {
        self.context_messages = messages;
        self
    }

    /// Text value of a slot
    pub fn slot_str(&self, name: &str) -> Option<&str> {
        self.slots.get(name).and_then(serde_json::Value::as_str)
    }
}

/// What the policy knows about the turn besides the tracked states
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub user: &'a str,
    pub display_name: Option<&'a str>,
    pub original_message: &'a str,
    /// Earlier messages of the session, oldest first
    pub history: &'a [ContextMessage],
}

impl<'a> TurnContext<'a> {
    pub fn new(user: &'a str, original_message: &'a str) -> Self {
        Self {
            user,
            display_name: None,
            original_message,
            history: &[],
        }
    }

    pub fn with_display_name(mut self, display_name: Option<&'a str>) -> Self {
        self.display_name = display_name;
        self
    }

    pub fn with_history(mut self, history: &'a [ContextMessage]) -> Self {
        self.history = history;
        self
    }
}

/// Operations waiting for the user's confirmation, one per topic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingConfirmations {
    entries: Vec<(TopicKey, Action)>,
}

impl PendingConfirmations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the action to run once `key` is confirmed, replacing any older one
    pub fn stash(&mut self, key: TopicKey, action: Action) {
        self.entries.retain(|(existing, _)| *existing != key);
        self.entries.push((key, action));
    }

    pub fn take(&mut self, key: &TopicKey) -> Option<Action> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Remove the most recently stashed entry
    pub fn take_latest(&mut self) -> Option<(TopicKey, Action)> {
        self.entries.pop()
    }

    pub fn get(&self, key: &TopicKey) -> Option<&Action> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, action)| action)
    }

    pub fn keys(&self) -> impl Iterator<Item = &TopicKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Policy for one user session
pub struct PolicyEngine {
    knowledge: Arc<dyn KnowledgeService>,
    use_model_delegation: bool,
    history_window: usize,
    pending: PendingConfirmations,
    uncommitted_events: Vec<DialogDomainEvent>,
}

impl PolicyEngine {
    pub fn new(knowledge: Arc<dyn KnowledgeService>) -> Self {
        Self {
            knowledge,
            use_model_delegation: false,
            history_window: 10,
            pending: PendingConfirmations::new(),
            uncommitted_events: Vec::new(),
        }
    }

    /// Hand unmatched turns to a language model instead of refusing them
    pub fn with_model_delegation(mut self, enabled: bool) -> Self {
        self.use_model_delegation = enabled;
        self
    }

    /// How many earlier messages a delegation carries
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    pub fn pending(&self) -> &PendingConfirmations {
        &self.pending
    }

    /// Drain the events recorded since the last call
    pub fn take_events(&mut self) -> Vec<DialogDomainEvent> {
        std::mem::take(&mut self.uncommitted_events)
    }

    /// Decide the actions for a turn.
    ///
    /// `states` is the context returned by [`BeliefTracker::update_state`];
    /// `tracker` is the same tracker, used for topic resets and clearing.
    pub fn act(
        &mut self,
        turn: &TurnContext<'_>,
        states: &[DialogState],
        tracker: &mut BeliefTracker,
    ) -> Vec<Action> {
        select_states(states)
            .into_iter()
            .map(|state| {
                let mut action = self.act_single_state(turn, state, states, tracker);
                if action.emotion.is_none() {
                    action.emotion = state.emotion.clone();
                }
                action
            })
            .collect()
    }

    fn act_single_state(
        &mut self,
        turn: &TurnContext<'_>,
        state: &DialogState,
        states: &[DialogState],
        tracker: &mut BeliefTracker,
    ) -> Action {
        if state.out_of_context {
            return Action::new(ActionIntent::OutOfContextViaModel);
        }

        match &state.intent {
            Intent::Greeting => self.act_greeting(turn, states),
            Intent::Farewell => self.act_farewell(tracker),
            Intent::Perform => match state.operation.as_deref() {
                Some(operation) => self.act_perform(state, operation, tracker),
                None => self.act_fallback(turn, state),
            },
            Intent::Inform => self.act_inform(turn, state),
            Intent::Confirm => self
                .act_confirmation(state, tracker)
                .unwrap_or_else(|| self.act_fallback(turn, state)),
            Intent::Deny => self
                .act_denial(state, tracker)
                .unwrap_or_else(|| self.act_fallback(turn, state)),
            Intent::Summarize => act_summary(states),
            Intent::Other(_) => self.act_fallback(turn, state),
        }
    }

    fn act_greeting(&self, turn: &TurnContext<'_>, states: &[DialogState]) -> Action {
        let mut action = Action::new(ActionIntent::Greeting).with_slot("user", turn.user);
        if let Some(name) = turn.display_name {
            action = action.with_slot("nome", name);
        }

        let interrupted = states.iter().rev().find(|state| {
            !state.current && state.intent == Intent::Perform && state.operation.is_some()
        });
        if let Some(operation) = interrupted.and_then(|state| state.operation.as_deref()) {
            action = action
                .with_remember(true)
                .with_slot("restored_operation", operation);
        }
        action
    }

    fn act_farewell(&mut self, tracker: &mut BeliefTracker) -> Action {
        tracker.clear();
        self.pending.clear();
        Action::new(ActionIntent::Farewell)
    }

    fn act_perform(
        &mut self,
        state: &DialogState,
        operation: &str,
        tracker: &mut BeliefTracker,
    ) -> Action {
        let required = match self.knowledge.primary_slots(operation, &state.domain) {
            Ok(required) => required,
            Err(err) => return apologize(&err),
        };

        let missing: Vec<String> = required
            .into_iter()
            .filter(|slot| !state.slots.contains_key(slot))
            .collect();
        if !missing.is_empty() {
            self.uncommitted_events
                .push(DialogDomainEvent::SlotsRequested(SlotsRequested {
                    session_id: tracker.session_id(),
                    operation: operation.to_string(),
                    missing: missing.clone(),
                    requested_at: Utc::now(),
                }));
            return Action::new(ActionIntent::Ask)
                .with_operation(operation)
                .with_slot("info", missing);
        }

        let needs_confirmation = match self.knowledge.confirmation_demand(operation, &state.domain) {
            Ok(needs_confirmation) => needs_confirmation,
            Err(err) => return apologize(&err),
        };

        if needs_confirmation {
            debug!(operation, "pending confirmation");
            let execution = Action::new(ActionIntent::Inform)
                .with_operation(operation)
                .with_slots(&state.slots);
            self.pending.stash(TopicKey::perform(operation), execution);
            self.uncommitted_events
                .push(DialogDomainEvent::ConfirmationRequested(ConfirmationRequested {
                    session_id: tracker.session_id(),
                    operation: operation.to_string(),
                    slots: slot_values(&state.slots),
                    requested_at: Utc::now(),
                }));
            return Action::new(ActionIntent::Confirm)
                .with_operation(operation)
                .with_slots(&state.slots)
                .with_remember(state.was_resumed());
        }

        tracker.reset(&state.intent, Some(operation));
        self.record_executed(tracker, operation, slot_values(&state.slots));
        Action::new(ActionIntent::Inform)
            .with_operation(operation)
            .with_slots(&state.slots)
    }

    fn act_inform(&self, turn: &TurnContext<'_>, state: &DialogState) -> Action {
        if state.question == Some(Question::What) {
            for slot in self.knowledge.definable_slots(&state.domain) {
                let Some(label) = state.slots.get(&slot) else {
                    continue;
                };
                match self.knowledge.definition(label, &state.domain) {
                    Ok(Some(definition)) => {
                        return Action::new(ActionIntent::Inform)
                            .with_question(state.question)
                            .with_slot("definition", definition);
                    }
                    Ok(None) => debug!(%label, "no definition known"),
                    Err(err) => return apologize(&err),
                }
            }
        }

        self.delegate(turn, state)
    }

    fn act_confirmation(
        &mut self,
        state: &DialogState,
        tracker: &mut BeliefTracker,
    ) -> Option<Action> {
        let (key, execution) = self.take_pending(state)?;
        let operation = key.operation.clone().unwrap_or_default();

        tracker.reset(&key.intent, key.operation.as_deref());
        tracker.reset(&state.intent, state.operation.as_deref());
        self.record_executed(tracker, &operation, execution.slots.clone());
        Some(execution)
    }

    fn act_denial(&mut self, state: &DialogState, tracker: &mut BeliefTracker) -> Option<Action> {
        let (key, _) = self.take_pending(state)?;
        let operation = key.operation.clone().unwrap_or_default();

        tracker.reset(&key.intent, key.operation.as_deref());
        tracker.reset(&state.intent, state.operation.as_deref());
        self.uncommitted_events
            .push(DialogDomainEvent::OperationCancelled(OperationCancelled {
                session_id: tracker.session_id(),
                operation: operation.clone(),
                cancelled_at: Utc::now(),
            }));
        Some(Action::new(ActionIntent::Reject).with_operation(operation))
    }

    fn act_fallback(&self, turn: &TurnContext<'_>, state: &DialogState) -> Action {
        if self.use_model_delegation {
            self.delegate(turn, state)
        } else {
            Action::new(ActionIntent::OutOfContext)
        }
    }

    fn delegate(&self, turn: &TurnContext<'_>, state: &DialogState) -> Action {
        let mut action = Action::new(ActionIntent::DelegateToModel)
            .with_question(state.question)
            .with_slot("domain", state.domain.as_str())
            .with_context_messages(self.context_messages(turn));

        match self
            .knowledge
            .query_knowledge(turn.original_message, &state.domain)
        {
            Ok(Some(passage)) => action = action.with_slot("retrieved_context", passage),
            Ok(None) => {}
            Err(err) => warn!(%err, "retrieval failed, delegating without it"),
        }
        action
    }

    fn context_messages(&self, turn: &TurnContext<'_>) -> Vec<ContextMessage> {
        let start = turn.history.len().saturating_sub(self.history_window);
        let mut messages = turn.history[start..].to_vec();
        if !turn.original_message.trim().is_empty() {
            messages.push(ContextMessage::user(turn.original_message));
        }
        messages
    }

    /// Pending entry a confirm or deny clause refers to
    fn take_pending(&mut self, state: &DialogState) -> Option<(TopicKey, Action)> {
        match state.operation.as_deref() {
            Some(operation) => {
                let key = TopicKey::perform(operation);
                self.pending.take(&key).map(|action| (key, action))
            }
            None => self.pending.take_latest(),
        }
    }

    fn record_executed(&mut self, tracker: &BeliefTracker, operation: &str, slots: SlotValues) {
        self.uncommitted_events
            .push(DialogDomainEvent::OperationExecuted(OperationExecuted {
                session_id: tracker.session_id(),
                operation: operation.to_string(),
                slots,
                executed_at: Utc::now(),
            }));
    }
}

/// States to act on: the current ones, else the last one
pub fn select_states(states: &[DialogState]) -> Vec<&DialogState> {
    let current: Vec<&DialogState> = states.iter().filter(|state| state.current).collect();
    if current.is_empty() {
        states.last().into_iter().collect()
    } else {
        current
    }
}

fn act_summary(states: &[DialogState]) -> Action {
    let topics: Vec<serde_json::Value> = states
        .iter()
        .filter(|state| !state.current && state.intent == Intent::Perform)
        .filter_map(|state| {
            let operation = state.operation.as_deref()?;
            Some(serde_json::json!({
                "operation": operation,
                "slots": state.slots,
            }))
        })
        .collect();
    Action::new(ActionIntent::Summarize).with_slot("topics", topics)
}

fn apologize(err: &DialogError) -> Action {
    warn!(%err, "knowledge lookup failed");
    Action::new(ActionIntent::Apologize)
}
