//! Language understanding
//!
//! Produces the per-turn [`SemanticExtraction`] the belief tracker consumes.
//! Two sources are supported: the JSON document a language model returns,
//! and [`RuleBasedNlu`], a keyword classifier for the banking vocabulary.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::errors::{DialogError, DialogResult};
use crate::value_objects::{
    Clause, Entity, InputMessage, Intent, Question, SemanticExtraction, fold_text,
};

/// Anything that can turn a raw message into an extraction
#[async_trait]
pub trait LanguageUnderstanding: Send + Sync {
    async fn process(&self, message: &InputMessage) -> DialogResult<SemanticExtraction>;
}

#[derive(Debug, Deserialize)]
struct ModelDocument {
    #[serde(default)]
    original_sentence: Option<String>,
    #[serde(default)]
    analysis: Option<ModelAnalysis>,
}

#[derive(Debug, Deserialize)]
struct ModelAnalysis {
    #[serde(default, deserialize_with = "null_as_default")]
    intents: Vec<Option<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    operations: Vec<Option<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    questions: Vec<Option<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    entities: Vec<Entity>,
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    dependent: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    out_of_context: bool,
}

/// Explicit `null` reads like a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

impl SemanticExtraction {
    /// Parse the analysis document returned by a model based extractor.
    ///
    /// Markdown code fences around the document are tolerated. A document
    /// whose `analysis` is missing or `null` is [`DialogError::EmptyExtraction`].
    pub fn from_model_json(raw: &str) -> DialogResult<Self> {
        let body = strip_code_fence(raw);
        let document: ModelDocument = serde_json::from_str(body)?;
        let analysis = document.analysis.ok_or(DialogError::EmptyExtraction)?;
        debug!(sentence = ?document.original_sentence, "parsed model analysis");

        Ok(Self {
            intents: analysis
                .intents
                .into_iter()
                .map(|label| non_blank(label).map(|label| Intent::parse(&label)))
                .collect(),
            operations: analysis.operations.into_iter().map(non_blank).collect(),
            questions: analysis
                .questions
                .into_iter()
                .map(|text| non_blank(text).and_then(|text| Question::parse(&text)))
                .collect(),
            entities: analysis.entities,
            sentiment: analysis.sentiment.unwrap_or_default(),
            domain: analysis.domain.unwrap_or_default(),
            dependent: analysis.dependent,
            out_of_context: analysis.out_of_context,
        })
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Keyword classifier for Portuguese banking messages
///
/// Each sentence becomes one clause; entities are taken from the whole
/// message.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedNlu;

impl RuleBasedNlu {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous form of [`LanguageUnderstanding::process`]
    pub fn extract(&self, message: &InputMessage) -> SemanticExtraction {
        let mut extraction = SemanticExtraction::new(message.domain.clone());
        for sentence in split_sentences(&message.message) {
            extraction.push_clause(classify(&sentence));
        }
        for entity in extract_entities(&message.message) {
            extraction = extraction.with_entity(entity);
        }
        debug!(
            user = %message.user,
            clauses = extraction.clause_count(),
            entities = extraction.entities.len(),
            "rule based extraction"
        );
        extraction
    }
}

#[async_trait]
impl LanguageUnderstanding for RuleBasedNlu {
    async fn process(&self, message: &InputMessage) -> DialogResult<SemanticExtraction> {
        Ok(self.extract(message))
    }
}

/// Split on `.`, `!` and `?` when followed by whitespace or the end
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_none_or(|next| next.is_whitespace());
        if boundary {
            sentences.push(std::mem::take(&mut current));
        }
    }
    sentences.push(current);

    sentences
        .into_iter()
        .map(|sentence| {
            fold_text(&sentence)
                .trim()
                .trim_end_matches(['.', '!', '?'])
                .trim()
                .to_string()
        })
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

fn classify(sentence: &str) -> Clause {
    let first_word = sentence
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_alphanumeric());
    let clause = |intent: Intent, operation: Option<&str>, question: Option<Question>| Clause {
        intent: Some(intent),
        operation: operation.map(str::to_string),
        question,
    };

    match first_word {
        "ola" | "oi" | "bom" | "boa" => return clause(Intent::Greeting, None, None),
        "tchau" => return clause(Intent::Farewell, None, None),
        "sim" => return clause(Intent::Confirm, None, None),
        "nao" => return clause(Intent::Deny, None, None),
        _ => {}
    }

    if sentence.starts_with("ate logo") {
        clause(Intent::Farewell, None, None)
    } else if sentence.starts_with("resum") {
        clause(Intent::Summarize, None, None)
    } else if sentence.starts_with("o que") {
        clause(Intent::Inform, None, Some(Question::What))
    } else if sentence.contains("transferir") || sentence.contains("transferencia") {
        clause(Intent::Perform, Some("transferencia"), None)
    } else if sentence.starts_with("qual") || sentence.contains("saldo") {
        clause(Intent::Perform, Some("consulta_de_saldo"), None)
    } else if let Some(question) = Question::parse(sentence) {
        clause(Intent::Inform, None, Some(question))
    } else {
        Clause {
            intent: None,
            operation: None,
            question: None,
        }
    }
}

fn clean_token(token: &str) -> &str {
    token.trim_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '"' | '\''))
}

fn is_amount(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
}

fn extract_entities(text: &str) -> Vec<Entity> {
    let tokens: Vec<&str> = text.split_whitespace().map(clean_token).collect();
    let mut entities = Vec::new();

    for (index, token) in tokens.iter().enumerate() {
        let folded = fold_text(token);
        let next = tokens.get(index + 1).copied();

        match folded.as_str() {
            "ted" | "doc" | "pix" => {
                entities.push(Entity::labeled(token.to_uppercase(), "tipo_transferencia"));
            }
            "r$" => {
                if let Some(amount) = next.filter(|next| is_amount(next)) {
                    entities.push(Entity::labeled(format!("R$ {amount}"), "valor"));
                }
            }
            "para" => {
                let name = next.filter(|next| next.starts_with(char::is_uppercase));
                if let Some(name) = name {
                    entities.push(Entity::labeled(name, "pessoa"));
                }
            }
            _ => {
                if let Some(amount) = folded.strip_prefix("r$").filter(|rest| is_amount(rest)) {
                    entities.push(Entity::labeled(format!("R$ {amount}"), "valor"));
                } else if is_amount(token)
                    && next.is_some_and(|next| fold_text(next) == "reais")
                {
                    entities.push(Entity::labeled(format!("R$ {token}"), "valor"));
                }
            }
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots_of(text: &str) -> crate::value_objects::Slots {
        RuleBasedNlu::new()
            .extract(&InputMessage::new("u1", text))
            .slots()
    }

    #[test]
    fn test_model_json_extraction() {
        let raw = r#"```json
        {
          "original_sentence": "Quero fazer um pix de 50 reais para a Ana",
          "analysis": {
            "intents": ["realizar"],
            "operations": ["transferencia"],
            "questions": [],
            "entities": [["PIX", "tipo_transferencia"], {"entity": "Ana", "type": "pessoa"}],
            "sentiment": "neutro",
            "domain": "transacional",
            "dependent": false
          }
        }
        ```"#;

        let extraction = SemanticExtraction::from_model_json(raw).unwrap();
        assert_eq!(extraction.intents, vec![Some(Intent::Perform)]);
        assert_eq!(extraction.clause_count(), 1);
        assert_eq!(extraction.clause(0).question, None);
        assert_eq!(extraction.slots()["pessoa"], "Ana");
        assert_eq!(extraction.sentiment, "neutro");
    }

    #[test]
    fn test_null_analysis_is_empty() {
        let raw = r#"{"original_sentence": null, "analysis": null}"#;
        assert!(matches!(
            SemanticExtraction::from_model_json(raw),
            Err(DialogError::EmptyExtraction)
        ));
        assert!(matches!(
            SemanticExtraction::from_model_json("not json"),
            Err(DialogError::Serialization(_))
        ));
    }

    #[test]
    fn test_null_fields_read_as_empty() {
        let raw = r#"{"original_sentence": "oi", "analysis": {"intents": ["saudação"], "operations": null,
            "questions": null, "entities": null, "sentiment": null, "domain": null,
            "dependent": null, "out_of_context": null}}"#;

        let extraction = SemanticExtraction::from_model_json(raw).unwrap();
        assert_eq!(extraction.intents, vec![Some(Intent::Greeting)]);
        assert!(extraction.operations.is_empty());
        assert!(extraction.questions.is_empty());
        assert!(extraction.entities.is_empty());
        assert!(!extraction.dependent);
        assert!(!extraction.out_of_context);
    }

    #[test]
    fn test_numeric_amount_fills_slot() {
        let raw = r#"{"analysis": {"intents": ["realizar"], "operations": ["transferencia"],
            "entities": [[100, "valor"], ["Ana", "pessoa"], {"entity": "TED", "type": "tipo_transferencia"}]}}"#;

        let slots = SemanticExtraction::from_model_json(raw).unwrap().slots();
        assert_eq!(slots["valor"], "100");
        assert_eq!(slots["pessoa"], "Ana");
        assert_eq!(slots["tipo_transferencia"], "TED");
    }

    #[test]
    fn test_commas_do_not_split_sentences() {
        let extraction = RuleBasedNlu::new()
            .extract(&InputMessage::new("u1", "Oi, quero transferir 10 reais. Tchau!"));
        let clauses: Vec<Clause> = extraction.clauses().collect();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].intent, Some(Intent::Greeting));
        assert_eq!(clauses[1].intent, Some(Intent::Farewell));
    }

    #[test]
    fn test_blank_labels_become_none() {
        let raw = r#"{"analysis": {"intents": ["", "saudação"], "operations": [" "], "questions": ["o que é pix?"]}}"#;
        let extraction = SemanticExtraction::from_model_json(raw).unwrap();
        assert_eq!(extraction.intents, vec![None, Some(Intent::Greeting)]);
        assert_eq!(extraction.operations, vec![None]);
        assert_eq!(extraction.questions, vec![Some(Question::What)]);
        assert_eq!(extraction.domain, "");
    }

    #[test]
    fn test_rule_based_clauses() {
        let extraction = RuleBasedNlu::new()
            .extract(&InputMessage::new("u1", "Olá! Quero transferir 100 reais para Ana via TED."));

        let clauses: Vec<Clause> = extraction.clauses().collect();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].intent, Some(Intent::Greeting));
        assert_eq!(clauses[1].intent, Some(Intent::Perform));
        assert_eq!(clauses[1].operation.as_deref(), Some("transferencia"));

        let slots = extraction.slots();
        assert_eq!(slots["valor"], "R$ 100");
        assert_eq!(slots["pessoa"], "Ana");
        assert_eq!(slots["tipo_transferencia"], "TED");
    }

    #[test]
    fn test_rule_based_questions_and_answers() {
        let nlu = RuleBasedNlu::new();
        let what = nlu.extract(&InputMessage::new("u1", "O que é pix?"));
        assert_eq!(what.clause(0).intent, Some(Intent::Inform));
        assert_eq!(what.clause(0).question, Some(Question::What));
        assert_eq!(what.slots()["tipo_transferencia"], "PIX");

        let yes = nlu.extract(&InputMessage::new("u1", "Sim"));
        assert_eq!(yes.clause(0).intent, Some(Intent::Confirm));
        let no = nlu.extract(&InputMessage::new("u1", "Não, obrigado"));
        assert_eq!(no.clause(0).intent, Some(Intent::Deny));

        let balance = nlu.extract(&InputMessage::new("u1", "Qual é o meu saldo?"));
        assert_eq!(balance.clause(0).operation.as_deref(), Some("consulta_de_saldo"));
    }

    #[test]
    fn test_amount_forms() {
        assert_eq!(slots_of("R$ 1.500,00 para Bia")["valor"], "R$ 1.500,00");
        assert_eq!(slots_of("R$250")["valor"], "R$ 250");
        assert!(!slots_of("para a conta").contains_key("pessoa"));
    }

    #[test]
    fn test_unclassified_sentence_has_no_intent() {
        let extraction = RuleBasedNlu::new().extract(&InputMessage::new("u1", "100 reais"));
        assert_eq!(extraction.clause_count(), 1);
        assert!(!extraction.has_intent());
    }
}
