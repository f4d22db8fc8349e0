//! Knowledge service used by the policy
//!
//! Tells the policy which slots an operation needs, whether it must be
//! confirmed, and how to define the things users ask about. Every lookup is
//! synchronous and read-only.

use std::collections::HashMap;

use crate::errors::DialogResult;

/// Slot metadata and definitions for the operations an agent supports
pub trait KnowledgeService: Send + Sync {
    /// Slots that must be filled before `operation` can run
    fn primary_slots(&self, operation: &str, domain: &str) -> DialogResult<Vec<String>>;

    /// Whether `operation` must be confirmed before it runs
    fn confirmation_demand(&self, operation: &str, domain: &str) -> DialogResult<bool>;

    /// Definition of a value such as a transfer type
    fn definition(&self, label: &str, domain: &str) -> DialogResult<Option<String>>;

    /// Slot names whose values can be looked up with [`Self::definition`]
    fn definable_slots(&self, domain: &str) -> Vec<String>;

    /// Retrieval over a document base; nothing by default
    fn query_knowledge(&self, _question: &str, _domain: &str) -> DialogResult<Option<String>> {
        Ok(None)
    }
}

/// Requirements of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSpec {
    pub required_slots: Vec<String>,
    pub needs_confirmation: bool,
}

impl OperationSpec {
    pub fn new<I, S>(required_slots: I, needs_confirmation: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_slots: required_slots.into_iter().map(Into::into).collect(),
            needs_confirmation,
        }
    }
}

/// In-memory knowledge base
///
/// Operations are not split by domain; the domain argument is accepted for
/// interface compatibility.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledge {
    operations: HashMap<String, OperationSpec>,
    definitions: HashMap<String, String>,
    definable_slots: Vec<String>,
}

impl InMemoryKnowledge {
    /// Empty knowledge base
    pub fn new() -> Self {
        Self::default()
    }

    /// Knowledge for the retail banking assistant: transfers, balance
    /// queries and the DOC/TED/PIX transfer types
    pub fn banking() -> Self {
        Self::new()
            .with_operation(
                "transferencia",
                OperationSpec::new(["valor", "pessoa", "tipo_transferencia"], true),
            )
            .with_operation("consulta_de_saldo", OperationSpec::new(Vec::<String>::new(), false))
            .with_definable_slot("tipo_transferencia")
            .with_definition(
                "DOC",
                "Documento de Ordem de Crédito (DOC) é o meio usado para transações com o valor máximo de até R$ 4.999,99.",
            )
            .with_definition(
                "TED",
                "A Transferência Eletrônica Disponível (TED) é a movimentação de dinheiro entre contas sem restrição de valor.",
            )
            .with_definition(
                "PIX",
                "Criado pelo Banco Central do Brasil, o Pix é um meio de pagamentos instantâneo: o dinheiro é enviado e recebido na hora, em questão de instantes.",
            )
    }

    pub fn with_operation(mut self, operation: impl Into<String>, spec: OperationSpec) -> Self {
        self.operations.insert(operation.into(), spec);
        self
    }

    pub fn with_definition(mut self, label: impl Into<String>, text: impl Into<String>) -> Self {
        self.definitions.insert(label.into(), text.into());
        self
    }

    pub fn with_definable_slot(mut self, slot: impl Into<String>) -> Self {
        self.definable_slots.push(slot.into());
        self
    }
}

impl KnowledgeService for InMemoryKnowledge {
    fn primary_slots(&self, operation: &str, _domain: &str) -> DialogResult<Vec<String>> {
        Ok(self
            .operations
            .get(operation)
            .map(|spec| spec.required_slots.clone())
            .unwrap_or_default())
    }

    fn confirmation_demand(&self, operation: &str, _domain: &str) -> DialogResult<bool> {
        Ok(self
            .operations
            .get(operation)
            .is_some_and(|spec| spec.needs_confirmation))
    }

    fn definition(&self, label: &str, _domain: &str) -> DialogResult<Option<String>> {
        Ok(self.definitions.get(label).cloned())
    }

    fn definable_slots(&self, _domain: &str) -> Vec<String> {
        self.definable_slots.clone()
    }
}
