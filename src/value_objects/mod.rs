//! Value objects for the dialog agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Domain assumed when an extraction or a message names none
pub const DEFAULT_DOMAIN: &str = "transacional";

/// Slot values accumulated by a dialog state, keyed by slot name
pub type Slots = HashMap<String, String>;

/// Structured payload carried by an action
pub type SlotValues = HashMap<String, serde_json::Value>;

/// Lift plain slots into an action payload
pub fn slot_values(slots: &Slots) -> SlotValues {
    slots
        .iter()
        .map(|(name, value)| (name.clone(), serde_json::Value::from(value.as_str())))
        .collect()
}

/// What the user wants from a clause
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intent {
    /// Opening the conversation
    Greeting,
    /// Closing the conversation
    Farewell,
    /// Asking for (or providing) information
    Inform,
    /// Requesting an operation to be carried out
    Perform,
    /// Accepting a pending operation
    Confirm,
    /// Refusing a pending operation
    Deny,
    /// Asking for a recap of open topics
    Summarize,
    /// Anything the agent has no dedicated handling for
    Other(String),
}

impl Intent {
    /// Interpret a label produced by an NLU component.
    ///
    /// Portuguese and English labels are accepted, with or without accents.
    /// Unrecognised labels are kept verbatim in [`Intent::Other`].
    pub fn parse(label: &str) -> Self {
        let folded = fold_text(label);
        match folded.trim().replace('_', " ").as_str() {
            "saudacao" | "greeting" => Self::Greeting,
            "despedida" | "farewell" => Self::Farewell,
            "informar" | "inform" => Self::Inform,
            "realizar" | "perform" => Self::Perform,
            "confirmar" | "confirm" => Self::Confirm,
            "nao confirmar" | "deny" => Self::Deny,
            "sumarizar" | "summarize" => Self::Summarize,
            _ => Self::Other(label.trim().to_string()),
        }
    }

    /// Canonical label of this intent
    pub fn label(&self) -> &str {
        match self {
            Self::Greeting => "saudação",
            Self::Farewell => "despedida",
            Self::Inform => "informar",
            Self::Perform => "realizar",
            Self::Confirm => "confirmar",
            Self::Deny => "não confirmar",
            Self::Summarize => "sumarizar",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for Intent {
    fn from(label: String) -> Self {
        Self::parse(&label)
    }
}

impl From<Intent> for String {
    fn from(intent: Intent) -> Self {
        intent.label().to_string()
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind of factual question asked in a clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Question {
    #[serde(rename = "o que", alias = "o_que", alias = "what")]
    What,
    #[serde(rename = "onde", alias = "where")]
    Where,
    #[serde(rename = "quando", alias = "when")]
    When,
    #[serde(rename = "como", alias = "how")]
    How,
}

impl Question {
    /// Recognise a question kind from a label or from the question text itself
    pub fn parse(text: &str) -> Option<Self> {
        let folded = fold_text(text).replace('_', " ");
        let folded = folded.trim();
        if folded.starts_with("o que") || folded.starts_with("what") {
            Some(Self::What)
        } else if folded.starts_with("onde") || folded.starts_with("where") {
            Some(Self::Where)
        } else if folded.starts_with("quando") || folded.starts_with("when") {
            Some(Self::When)
        } else if folded.starts_with("como") || folded.starts_with("how") {
            Some(Self::How)
        } else {
            None
        }
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::What => "o que",
            Self::Where => "onde",
            Self::When => "quando",
            Self::How => "como",
        };
        f.write_str(label)
    }
}

/// Scalar value of a labelled entity
///
/// Model extractors emit amounts as numbers as often as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl From<String> for EntityValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for EntityValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
            Self::Flag(flag) => write!(f, "{flag}"),
        }
    }
}

/// An entity found in a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entity {
    /// `(value, label)` pair
    Pair(EntityValue, String),
    /// Object form emitted by model based extractors
    Tagged {
        entity: EntityValue,
        #[serde(rename = "type")]
        label: String,
    },
    /// A lone value with no label
    Bare(String),
    /// Anything else; carries no slot
    Malformed(serde_json::Value),
}

impl Entity {
    /// Build a labelled entity
    pub fn labeled(value: impl Into<EntityValue>, label: impl Into<String>) -> Self {
        Self::Pair(value.into(), label.into())
    }

    /// Slot `(name, value)` this entity contributes, if any.
    ///
    /// A bare value maps to itself.
    pub fn to_slot(&self) -> Option<(String, String)> {
        match self {
            Self::Pair(value, label) => Some((label.clone(), value.to_string())),
            Self::Tagged { entity, label } => Some((label.clone(), entity.to_string())),
            Self::Bare(value) => Some((value.clone(), value.clone())),
            Self::Malformed(_) => None,
        }
    }
}

/// Convert entities to slots, last write wins on repeated labels
pub fn entities_to_slots(entities: &[Entity]) -> Slots {
    let mut slots = Slots::new();
    for entity in entities {
        match entity.to_slot() {
            Some((name, value)) => {
                slots.insert(name, value);
            }
            None => tracing::warn!(?entity, "ignoring entity without a usable value"),
        }
    }
    slots
}

/// One clause of an extraction: the values found at a single index
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub intent: Option<Intent>,
    pub operation: Option<String>,
    pub question: Option<Question>,
}

/// Per-turn semantic extraction produced by a language understanding step
///
/// `intents`, `operations` and `questions` are index aligned: index `i` of
/// each describes the same clause, with `None` for "nothing found".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticExtraction {
    #[serde(default)]
    pub intents: Vec<Option<Intent>>,
    #[serde(default)]
    pub operations: Vec<Option<String>>,
    #[serde(default)]
    pub questions: Vec<Option<Question>>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub sentiment: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub dependent: bool,
    #[serde(default)]
    pub out_of_context: bool,
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

impl Default for SemanticExtraction {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN)
    }
}

impl SemanticExtraction {
    /// Create an empty extraction for a domain
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            intents: Vec::new(),
            operations: Vec::new(),
            questions: Vec::new(),
            entities: Vec::new(),
            sentiment: String::new(),
            domain: domain.into(),
            dependent: false,
            out_of_context: false,
        }
    }

    /// Append a clause, keeping the three sequences aligned
    pub fn with_clause(
        mut self,
        intent: Option<Intent>,
        operation: Option<&str>,
        question: Option<Question>,
    ) -> Self {
        self.push_clause(Clause {
            intent,
            operation: operation.map(str::to_string),
            question,
        });
        self
    }

    /// Add an entity
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Set the sentiment
    pub fn with_sentiment(mut self, sentiment: impl Into<String>) -> Self {
        self.sentiment = sentiment.into();
        self
    }

    /// Mark whether the turn depends on earlier context
    pub fn with_dependent(mut self, dependent: bool) -> Self {
        self.dependent = dependent;
        self
    }

    /// Mark the turn as outside the agent's subject
    pub fn with_out_of_context(mut self, out_of_context: bool) -> Self {
        self.out_of_context = out_of_context;
        self
    }

    /// Push a clause, padding shorter sequences first so indices stay aligned
    pub fn push_clause(&mut self, clause: Clause) {
        let index = self.clause_count();
        self.intents.resize(index, None);
        self.operations.resize(index, None);
        self.questions.resize(index, None);
        self.intents.push(clause.intent);
        self.operations.push(clause.operation);
        self.questions.push(clause.question);
    }

    /// Number of clauses; the longest of the three sequences
    pub fn clause_count(&self) -> usize {
        self.intents
            .len()
            .max(self.operations.len())
            .max(self.questions.len())
    }

    /// Clause at `index`, absent entries read as `None`
    pub fn clause(&self, index: usize) -> Clause {
        Clause {
            intent: self.intents.get(index).cloned().flatten(),
            operation: self.operations.get(index).cloned().flatten(),
            question: self.questions.get(index).copied().flatten(),
        }
    }

    /// All clauses in order
    pub fn clauses(&self) -> impl Iterator<Item = Clause> + '_ {
        (0..self.clause_count()).map(|index| self.clause(index))
    }

    /// Whether any clause carries an intent
    pub fn has_intent(&self) -> bool {
        self.intents.iter().any(Option::is_some)
    }

    /// Slots contributed by this turn's entities
    pub fn slots(&self) -> Slots {
        entities_to_slots(&self.entities)
    }
}

/// Who produced a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogRole {
    User,
    System,
}

impl fmt::Display for DialogRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::System => f.write_str("system"),
        }
    }
}

/// A prior message handed to model delegation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub content: String,
    pub role: DialogRole,
    pub sent_time: DateTime<Utc>,
}

impl ContextMessage {
    /// Message written by the user now
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: DialogRole::User,
            sent_time: Utc::now(),
        }
    }

    /// Message written by the agent now
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: DialogRole::System,
            sent_time: Utc::now(),
        }
    }

    /// `ROLE: content` line for prompt assembly
    pub fn to_prompt_line(&self) -> String {
        format!("{}: {}", self.role.to_string().to_uppercase(), self.content)
    }
}

/// Raw message received at the session boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub message: String,
    pub user: String,
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl InputMessage {
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user: user.into(),
            domain: default_domain(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }
}

/// Verdict of an input or output filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterResult {
    pub valid: bool,
    pub error_code: Option<String>,
    pub whitelisted: bool,
}

impl FilterResult {
    pub fn accept() -> Self {
        Self {
            valid: true,
            error_code: None,
            whitelisted: false,
        }
    }

    pub fn reject(error_code: impl Into<String>) -> Self {
        Self {
            valid: false,
            error_code: Some(error_code.into()),
            whitelisted: false,
        }
    }
}

/// Identity of a topic: the `(intent, operation)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicKey {
    pub intent: Intent,
    pub operation: Option<String>,
}

impl TopicKey {
    pub fn new(intent: Intent, operation: Option<String>) -> Self {
        Self { intent, operation }
    }

    /// Key of a `Perform` topic for an operation
    pub fn perform(operation: impl Into<String>) -> Self {
        Self::new(Intent::Perform, Some(operation.into()))
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operation {
            Some(operation) => write!(f, "{}/{}", self.intent, operation),
            None => write!(f, "{}", self.intent),
        }
    }
}

/// Lower-case a text and strip the Portuguese diacritics
pub fn fold_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_labels() {
        assert_eq!(Intent::parse("Saudação"), Intent::Greeting);
        assert_eq!(Intent::parse("saudacao"), Intent::Greeting);
        assert_eq!(Intent::parse("REALIZAR"), Intent::Perform);
        assert_eq!(Intent::parse("nao_confirmar"), Intent::Deny);
        assert_eq!(
            Intent::parse("information_request"),
            Intent::Other("information_request".to_string())
        );

        let json = serde_json::to_string(&Intent::Deny).unwrap();
        assert_eq!(json, "\"não confirmar\"");
        let back: Intent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Intent::Deny);
    }

    #[test]
    fn test_question_parse() {
        assert_eq!(Question::parse("o_que"), Some(Question::What));
        assert_eq!(Question::parse("O que é TED?"), Some(Question::What));
        assert_eq!(Question::parse("Quando cai o pix?"), Some(Question::When));
        assert_eq!(Question::parse("qual o saldo"), None);
    }

    #[test]
    fn test_entity_shapes() {
        let entities: Vec<Entity> = serde_json::from_str(
            r#"[["TED", "tipo_transferencia"], {"entity": "Ana", "type": "pessoa"}, "PIX", 42]"#,
        )
        .unwrap();

        assert_eq!(entities[0], Entity::labeled("TED", "tipo_transferencia"));
        assert!(matches!(entities[1], Entity::Tagged { .. }));
        assert_eq!(entities[2], Entity::Bare("PIX".to_string()));
        assert!(matches!(entities[3], Entity::Malformed(_)));

        let slots = entities_to_slots(&entities);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots["tipo_transferencia"], "TED");
        assert_eq!(slots["pessoa"], "Ana");
        assert_eq!(slots["PIX"], "PIX");
    }

    #[test]
    fn test_scalar_entity_values() {
        let entities: Vec<Entity> = serde_json::from_str(
            r#"[[100, "valor"], {"entity": 250.5, "type": "limite"}, [true, "agendado"], [["x"], "lista"]]"#,
        )
        .unwrap();

        let slots = entities_to_slots(&entities);
        assert_eq!(slots["valor"], "100");
        assert_eq!(slots["limite"], "250.5");
        assert_eq!(slots["agendado"], "true");
        assert!(!slots.contains_key("lista"));
        assert!(matches!(entities[3], Entity::Malformed(_)));
    }

    #[test]
    fn test_slots_last_write_wins() {
        let slots = entities_to_slots(&[
            Entity::labeled("DOC", "tipo_transferencia"),
            Entity::labeled("PIX", "tipo_transferencia"),
        ]);
        assert_eq!(slots["tipo_transferencia"], "PIX");
    }

    #[test]
    fn test_clauses_are_padded() {
        let extraction = SemanticExtraction {
            intents: vec![Some(Intent::Greeting), Some(Intent::Perform)],
            operations: vec![None, Some("transferencia".to_string())],
            questions: vec![],
            ..SemanticExtraction::default()
        };

        assert_eq!(extraction.clause_count(), 2);
        let clauses: Vec<Clause> = extraction.clauses().collect();
        assert_eq!(clauses[1].operation.as_deref(), Some("transferencia"));
        assert_eq!(clauses[1].question, None);
    }

    #[test]
    fn test_push_clause_keeps_alignment() {
        let mut extraction = SemanticExtraction {
            intents: vec![Some(Intent::Greeting)],
            ..SemanticExtraction::default()
        };
        extraction.push_clause(Clause {
            intent: None,
            operation: Some("consulta_de_saldo".to_string()),
            question: None,
        });

        assert_eq!(extraction.intents.len(), 2);
        assert_eq!(extraction.operations.len(), 2);
        assert_eq!(extraction.questions.len(), 2);
        assert_eq!(extraction.operations[0], None);
    }

    #[test]
    fn test_fold_text() {
        assert_eq!(fold_text("Olá, transferência"), "ola, transferencia");
    }

    #[test]
    fn test_context_message_prompt_line() {
        let message = ContextMessage::user("qual o meu saldo?");
        assert_eq!(message.to_prompt_line(), "USER: qual o meu saldo?");
    }
}
