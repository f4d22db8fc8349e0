//! Dialog agent module
//!
//! Core of a task-oriented conversational agent. It provides:
//! - Belief tracking of conversational topics across turns, with slot filling
//! - A policy that asks for missing information, requests confirmation and
//!   executes operations
//! - Template based rendering of the chosen actions
//! - Per-user sessions with history, read models and queries
//!
//! A turn flows through [`session::Agent::chat`]: filter the input, extract
//! its semantics, merge them into the user's [`aggregate::BeliefTracker`],
//! let the [`policy::PolicyEngine`] pick actions and render them with the
//! [`generation::ResponseGenerator`].

pub mod aggregate;
pub mod config;
pub mod errors;
pub mod events;
pub mod filters;
pub mod generation;
pub mod knowledge;
pub mod nlu;
pub mod policy;
pub mod projections;
pub mod queries;
pub mod session;
pub mod value_objects;

// Re-export main types
pub use aggregate::{BeliefTracker, Context, DialogState, RelevantEvent};

pub use config::AgentConfig;

pub use errors::{DialogError, DialogResult};

pub use events::{
    ConfirmationRequested, ContextCleared, DialogDomainEvent, OperationCancelled,
    OperationExecuted, SessionEvent, SlotsRequested, TopicOpened, TopicReset, TopicResumed,
};

pub use filters::{BlocklistFilter, MessageFilter, PassThroughFilter};
pub use generation::{ResponseGenerator, Templates};
pub use knowledge::{InMemoryKnowledge, KnowledgeService, OperationSpec};
pub use nlu::{LanguageUnderstanding, RuleBasedNlu};
pub use policy::{Action, ActionIntent, PendingConfirmations, PolicyEngine, TurnContext};
pub use projections::{ConversationHistory, SessionProjection, SessionView};
pub use queries::{SessionQuery, SessionQueryHandler, SessionQueryResult, SessionStatistics};
pub use session::{Agent, DialogSession, SessionRegistry};

pub use value_objects::{
    Clause, ContextMessage, DialogRole, Entity, EntityValue, FilterResult, InputMessage, Intent,
    Question, SemanticExtraction, SlotValues, Slots, TopicKey,
};
