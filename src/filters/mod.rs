//! Input and output message filters

use async_trait::async_trait;
use tracing::warn;

use crate::errors::DialogResult;
use crate::value_objects::{FilterResult, fold_text};

/// Screens user messages before understanding and responses before delivery
#[async_trait]
pub trait MessageFilter: Send + Sync {
    async fn filter_input(&self, text: &str) -> DialogResult<FilterResult>;

    async fn filter_output(&self, text: &str) -> DialogResult<FilterResult>;
}

/// Accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughFilter;

#[async_trait]
impl MessageFilter for PassThroughFilter {
    async fn filter_input(&self, _text: &str) -> DialogResult<FilterResult> {
        Ok(FilterResult::accept())
    }

    async fn filter_output(&self, _text: &str) -> DialogResult<FilterResult> {
        Ok(FilterResult::accept())
    }
}

/// Rejects texts containing any configured term, ignoring case and accents
#[derive(Debug, Clone, Default)]
pub struct BlocklistFilter {
    terms: Vec<String>,
}

impl BlocklistFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|term| fold_text(term.as_ref()))
                .filter(|term| !term.trim().is_empty())
                .collect(),
        }
    }

    fn check(&self, text: &str, error_code: &str) -> FilterResult {
        let folded = fold_text(text);
        match self.terms.iter().find(|term| folded.contains(term.as_str())) {
            Some(term) => {
                warn!(%term, error_code, "message blocked");
                FilterResult::reject(error_code)
            }
            None => FilterResult::accept(),
        }
    }
}

#[async_trait]
impl MessageFilter for BlocklistFilter {
    async fn filter_input(&self, text: &str) -> DialogResult<FilterResult> {
        Ok(self.check(text, "blocked_input"))
    }

    async fn filter_output(&self, text: &str) -> DialogResult<FilterResult> {
        Ok(self.check(text, "blocked_output"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocklist() {
        let filter = BlocklistFilter::new(["senha", ""]);

        let blocked = filter.filter_input("Qual é a minha SENHA?").await.unwrap();
        assert!(!blocked.valid);
        assert_eq!(blocked.error_code.as_deref(), Some("blocked_input"));

        let allowed = filter.filter_output("Seu saldo é de R$ 5.000,00").await.unwrap();
        assert!(allowed.valid);
    }

    #[tokio::test]
    async fn test_pass_through() {
        let result = PassThroughFilter.filter_input("qualquer coisa").await.unwrap();
        assert_eq!(result, FilterResult::accept());
    }
}
