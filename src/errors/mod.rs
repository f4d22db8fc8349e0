//! Error types for the dialog agent
//!
//! The tracker and the policy never surface these to their callers: every
//! variant here is recovered into an action, a fallback string or a refusal
//! before it can leave a turn.

use thiserror::Error;

/// Errors raised by the collaborators around the dialog core
#[derive(Debug, Error)]
pub enum DialogError {
    /// The extraction carried no analysis at all
    #[error("extraction is empty")]
    EmptyExtraction,

    /// A knowledge lookup failed
    #[error("knowledge lookup for `{subject}` failed: {reason}")]
    Knowledge { subject: String, reason: String },

    /// A response template references a slot the action does not carry
    #[error("template for {intent} needs slot `{slot}`")]
    MissingTemplateSlot { intent: String, slot: String },

    /// A response template failed to render
    #[error("template rendering failed: {0}")]
    Template(#[from] tera::Error),

    /// An input or output filter could not run
    #[error("message filter failed: {0}")]
    Filter(String),

    /// The language understanding step failed
    #[error("language understanding failed: {0}")]
    Nlu(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl DialogError {
    /// Shorthand for a knowledge failure
    pub fn knowledge(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Knowledge {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias used across the crate
pub type DialogResult<T> = Result<T, DialogError>;
