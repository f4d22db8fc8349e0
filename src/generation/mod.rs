//! Response rendering
//!
//! Turns policy actions into user-facing text. Every [`ActionIntent`] has a
//! branch; a branch that cannot be rendered falls back to the apology text.
//! Templates are Tera templates rendered against the action's slots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tera::{Context, Tera};
use tracing::{error, warn};

use crate::errors::{DialogError, DialogResult};
use crate::policy::{Action, ActionIntent};
use crate::value_objects::Question;

/// Response texts; `{{ name }}` expressions are filled from action slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Templates {
    pub greeting: String,
    pub greeting_named: String,
    /// Appended to the greeting when an interrupted operation can be resumed
    pub greeting_restore: String,
    pub farewell: String,
    pub ask: String,
    /// Per-operation confirmation prompts
    pub confirmations: HashMap<String, String>,
    pub confirmation_default: String,
    /// Prefix for confirmations of a resumed topic
    pub resume_prefix: String,
    /// Per-operation execution reports
    pub operation_done: HashMap<String, String>,
    pub operation_done_default: String,
    pub reject: String,
    pub summarize: String,
    pub summarize_empty: String,
    pub delegate: String,
    pub out_of_context: String,
    pub out_of_context_via_model: String,
    pub apology: String,
}

impl Default for Templates {
    fn default() -> Self {
        let confirmations = HashMap::from([(
            "transferencia".to_string(),
            "Confirma a transferência de {{ valor }} para {{ pessoa }} via {{ tipo_transferencia }}?"
                .to_string(),
        )]);
        let operation_done = HashMap::from([
            (
                "transferencia".to_string(),
                "Transferência realizada no valor de {{ valor }} para {{ pessoa }}".to_string(),
            ),
            (
                "consulta_de_saldo".to_string(),
                "Seu saldo é de R$ 5.000,00".to_string(),
            ),
        ]);

        Self {
            greeting: "Olá! Como posso te ajudar hoje?".to_string(),
            greeting_named: "Olá, {{ nome }}! Como posso te ajudar hoje?".to_string(),
            greeting_restore:
                "\nGostaria de continuar a {{ restored_operation }} que estava fazendo anteriormente?"
                    .to_string(),
            farewell: "Até logo!".to_string(),
            ask: "Para concluir a operação de {{ operation }} preciso que me informe {{ info | human_list }}"
                .to_string(),
            confirmations,
            confirmation_default: "Deseja confirmar a operação de {{ operation }}?".to_string(),
            resume_prefix: "Voltando à operação de {{ operation }}. ".to_string(),
            operation_done,
            operation_done_default: "Operação de {{ operation }} realizada com sucesso".to_string(),
            reject: "Tudo bem, a operação de {{ operation }} foi cancelada.".to_string(),
            summarize: "Temos em aberto: {{ topics | human_list }}.".to_string(),
            summarize_empty: "Não há operações em aberto no momento.".to_string(),
            delegate: "buscando respostas com llm...".to_string(),
            out_of_context: "Ainda não sei comentar sobre essa dúvida, mas posso te orientar sobre operações de transferência, pagamento e consulta de saldo.".to_string(),
            out_of_context_via_model: "Desculpe, mas parece que esse assunto está fora do esperado para essa conversa. Se quiser falar sobre assuntos bancários eu posso te ajudar".to_string(),
            apology: "Desculpe, não consegui processar o seu pedido agora.".to_string(),
        }
    }
}

const GREETING: &str = "greeting";
const GREETING_NAMED: &str = "greeting_named";
const GREETING_RESTORE: &str = "greeting_restore";
const FAREWELL: &str = "farewell";
const ASK: &str = "ask";
const CONFIRMATION_DEFAULT: &str = "confirmation_default";
const RESUME_PREFIX: &str = "resume_prefix";
const OPERATION_DONE_DEFAULT: &str = "operation_done_default";
const REJECT: &str = "reject";
const SUMMARIZE: &str = "summarize";
const SUMMARIZE_EMPTY: &str = "summarize_empty";
const DELEGATE: &str = "delegate";
const OUT_OF_CONTEXT: &str = "out_of_context";
const OUT_OF_CONTEXT_VIA_MODEL: &str = "out_of_context_via_model";

fn confirmation_name(operation: &str) -> String {
    format!("confirmation/{operation}")
}

fn operation_done_name(operation: &str) -> String {
    format!("operation_done/{operation}")
}

/// Register the filters response templates may use.
///
/// - `human_list`: `a`, `a e b`, `a, b e c`
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("human_list", human_list_filter);
}

fn human_list_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let items: Vec<String> = match value {
        Value::Array(items) => items.iter().map(plain_text).collect(),
        Value::Null => return Err(tera::Error::msg("human_list filter got null")),
        other => vec![plain_text(other)],
    };

    let text = match items.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} e {}", init.join(", "), last),
    };
    Ok(Value::String(text))
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Renders actions with a set of templates
#[derive(Debug, Clone)]
pub struct ResponseGenerator {
    templates: Templates,
    tera: Tera,
}

impl Default for ResponseGenerator {
    fn default() -> Self {
        Self::new(Templates::default())
    }
}

impl ResponseGenerator {
    /// Compile the templates.
    ///
    /// A template that does not parse is logged and left out; actions that
    /// need it render the apology instead.
    pub fn new(templates: Templates) -> Self {
        let mut tera = Tera::default();
        tera.autoescape_on(Vec::new());
        register_template_filters(&mut tera);

        let fixed = [
            (GREETING, &templates.greeting),
            (GREETING_NAMED, &templates.greeting_named),
            (GREETING_RESTORE, &templates.greeting_restore),
            (FAREWELL, &templates.farewell),
            (ASK, &templates.ask),
            (CONFIRMATION_DEFAULT, &templates.confirmation_default),
            (RESUME_PREFIX, &templates.resume_prefix),
            (OPERATION_DONE_DEFAULT, &templates.operation_done_default),
            (REJECT, &templates.reject),
            (SUMMARIZE, &templates.summarize),
            (SUMMARIZE_EMPTY, &templates.summarize_empty),
            (DELEGATE, &templates.delegate),
            (OUT_OF_CONTEXT, &templates.out_of_context),
            (OUT_OF_CONTEXT_VIA_MODEL, &templates.out_of_context_via_model),
        ]
        .map(|(name, source)| (name.to_string(), source));
        let confirmations = templates
            .confirmations
            .iter()
            .map(|(operation, source)| (confirmation_name(operation), source));
        let reports = templates
            .operation_done
            .iter()
            .map(|(operation, source)| (operation_done_name(operation), source));

        for (name, source) in fixed.into_iter().chain(confirmations).chain(reports) {
            if let Err(err) = tera.add_raw_template(&name, source) {
                warn!(template = %name, %err, "response template does not parse");
            }
        }

        Self { templates, tera }
    }

    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    /// Text for an action; never empty
    pub fn generate(&self, action: &Action) -> String {
        match self.render(action) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                error!(intent = %action.intent, "rendered an empty response");
                self.templates.apology.clone()
            }
            Err(err) => {
                error!(intent = %action.intent, %err, "could not render response");
                self.templates.apology.clone()
            }
        }
    }

    fn render(&self, action: &Action) -> DialogResult<String> {
        let context = slot_context(action);
        let render = |name: &str| -> DialogResult<String> {
            Ok(self.tera.render(name, &context)?)
        };

        match action.intent {
            ActionIntent::Greeting => {
                let base = if action.slots.contains_key("nome") {
                    GREETING_NAMED
                } else {
                    GREETING
                };
                let mut text = render(base)?;
                if action.remember {
                    text.push_str(&render(GREETING_RESTORE)?);
                }
                Ok(text)
            }
            ActionIntent::Farewell => render(FAREWELL),
            ActionIntent::Ask => render(ASK),
            ActionIntent::Confirm => {
                let prompt = match action.operation.as_deref() {
                    Some(operation) if self.templates.confirmations.contains_key(operation) => {
                        render(&confirmation_name(operation))?
                    }
                    _ => render(CONFIRMATION_DEFAULT)?,
                };
                if action.remember {
                    Ok(format!("{}{}", render(RESUME_PREFIX)?, prompt))
                } else {
                    Ok(prompt)
                }
            }
            ActionIntent::Inform => {
                if action.question == Some(Question::What) {
                    return action
                        .slot_str("definition")
                        .map(str::to_string)
                        .ok_or_else(|| missing(action, "definition"));
                }

                let operation = action
                    .operation
                    .as_deref()
                    .ok_or_else(|| missing(action, "operation"))?;
                if self.templates.operation_done.contains_key(operation) {
                    render(&operation_done_name(operation))
                } else {
                    render(OPERATION_DONE_DEFAULT)
                }
            }
            ActionIntent::Reject => render(REJECT),
            ActionIntent::Summarize => {
                if topic_labels(action).is_empty() {
                    render(SUMMARIZE_EMPTY)
                } else {
                    render(SUMMARIZE)
                }
            }
            ActionIntent::DelegateToModel => render(DELEGATE),
            ActionIntent::OutOfContext => render(OUT_OF_CONTEXT),
            ActionIntent::OutOfContextViaModel => render(OUT_OF_CONTEXT_VIA_MODEL),
            ActionIntent::Apologize => Ok(self.templates.apology.clone()),
        }
    }
}

/// Template context: non-null slots, the readable operation name and the
/// summarized topic names
fn slot_context(action: &Action) -> Context {
    let mut context = Context::new();
    for (name, value) in &action.slots {
        if !value.is_null() {
            context.insert(name.as_str(), value);
        }
    }
    if let Some(operation) = action.operation.as_deref() {
        context.insert("operation", &operation_label(operation));
    }
    if action.intent == ActionIntent::Summarize {
        context.insert("topics", &topic_labels(action));
    }
    context
}

/// Readable name of an operation identifier
pub fn operation_label(operation: &str) -> String {
    operation.replace('_', " ")
}

fn topic_labels(action: &Action) -> Vec<String> {
    action
        .slots
        .get("topics")
        .and_then(Value::as_array)
        .map(|topics| {
            topics
                .iter()
                .filter_map(|topic| topic.get("operation").and_then(Value::as_str))
                .map(operation_label)
                .collect()
        })
        .unwrap_or_default()
}

fn missing(action: &Action, slot: &str) -> DialogError {
    DialogError::MissingTemplateSlot {
        intent: action.intent.to_string(),
        slot: slot.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> ResponseGenerator {
        ResponseGenerator::default()
    }

    #[test]
    fn test_human_list_filter() {
        let mut tera = Tera::default();
        register_template_filters(&mut tera);
        tera.add_raw_template("list", "{{ items | human_list }}").unwrap();

        let render = |items: Value| {
            let mut context = Context::new();
            context.insert("items", &items);
            tera.render("list", &context).unwrap()
        };
        assert_eq!(render(serde_json::json!([])), "");
        assert_eq!(render(serde_json::json!(["valor"])), "valor");
        assert_eq!(render(serde_json::json!(["valor", "pessoa"])), "valor e pessoa");
        assert_eq!(
            render(serde_json::json!(["valor", "pessoa", "tipo_transferencia"])),
            "valor, pessoa e tipo_transferencia"
        );
        assert_eq!(render(serde_json::json!("valor")), "valor");
    }

    #[test]
    fn test_greeting_variants() {
        let plain = Action::new(ActionIntent::Greeting).with_slot("user", "u1");
        assert_eq!(generator().generate(&plain), "Olá! Como posso te ajudar hoje?");

        let named = plain.clone().with_slot("nome", "Ana");
        assert_eq!(generator().generate(&named), "Olá, Ana! Como posso te ajudar hoje?");

        let restore = plain
            .with_remember(true)
            .with_slot("restored_operation", "transferencia");
        assert!(generator()
            .generate(&restore)
            .ends_with("continuar a transferencia que estava fazendo anteriormente?"));
    }

    #[test]
    fn test_ask_lists_missing_slots() {
        let action = Action::new(ActionIntent::Ask)
            .with_operation("transferencia")
            .with_slot("info", vec!["valor", "pessoa"]);
        assert_eq!(
            generator().generate(&action),
            "Para concluir a operação de transferencia preciso que me informe valor e pessoa"
        );
    }

    #[test]
    fn test_inform_operation() {
        let action = Action::new(ActionIntent::Inform)
            .with_operation("transferencia")
            .with_slot("valor", "R$ 100")
            .with_slot("pessoa", "Ana");
        assert_eq!(
            generator().generate(&action),
            "Transferência realizada no valor de R$ 100 para Ana"
        );
    }

    #[test]
    fn test_missing_slot_falls_back_to_apology() {
        let action = Action::new(ActionIntent::Inform).with_operation("transferencia");
        assert_eq!(generator().generate(&action), Templates::default().apology);

        let definition = Action::new(ActionIntent::Inform).with_question(Some(Question::What));
        assert_eq!(generator().generate(&definition), Templates::default().apology);
    }

    #[test]
    fn test_numeric_slot_renders() {
        let action = Action::new(ActionIntent::Confirm)
            .with_operation("transferencia")
            .with_slot("valor", 100)
            .with_slot("pessoa", "Ana")
            .with_slot("tipo_transferencia", "PIX");
        assert_eq!(
            generator().generate(&action),
            "Confirma a transferência de 100 para Ana via PIX?"
        );
    }

    #[test]
    fn test_unparsable_template_falls_back_to_apology() {
        let templates = Templates {
            reject: "Tudo bem, {{ operation ".to_string(),
            ..Templates::default()
        };
        let generator = ResponseGenerator::new(templates);
        let action = Action::new(ActionIntent::Reject).with_operation("transferencia");
        assert_eq!(generator.generate(&action), Templates::default().apology);

        let farewell = Action::new(ActionIntent::Farewell);
        assert_eq!(generator.generate(&farewell), "Até logo!");
    }

    #[test]
    fn test_resumed_confirmation_is_prefixed() {
        let action = Action::new(ActionIntent::Confirm)
            .with_operation("consulta_de_saldo")
            .with_remember(true);
        assert_eq!(
            generator().generate(&action),
            "Voltando à operação de consulta de saldo. Deseja confirmar a operação de consulta de saldo?"
        );
    }

    #[test]
    fn test_summary() {
        let empty = Action::new(ActionIntent::Summarize).with_slot("topics", Vec::<Value>::new());
        assert_eq!(generator().generate(&empty), Templates::default().summarize_empty);

        let topics = vec![
            serde_json::json!({"operation": "transferencia", "slots": {}}),
            serde_json::json!({"operation": "consulta_de_saldo", "slots": {}}),
        ];
        let action = Action::new(ActionIntent::Summarize).with_slot("topics", topics);
        assert_eq!(
            generator().generate(&action),
            "Temos em aberto: transferencia e consulta de saldo."
        );
    }

    #[test]
    fn test_every_intent_renders_something() {
        for intent in [
            ActionIntent::Farewell,
            ActionIntent::DelegateToModel,
            ActionIntent::OutOfContext,
            ActionIntent::OutOfContextViaModel,
            ActionIntent::Apologize,
        ] {
            assert!(!generator().generate(&Action::new(intent)).is_empty());
        }
    }
}
