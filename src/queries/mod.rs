//! Session queries
//!
//! Read-only questions about the running sessions, answered from their
//! [`SessionView`]s.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::projections::SessionView;
use crate::session::SessionRegistry;

/// Query types over the session registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionQuery {
    /// View of one user's session
    GetSession { user: String },

    /// Sessions with at least one open topic
    ActiveSessions,

    /// Sessions waiting for the user to confirm an operation
    AwaitingConfirmation,

    /// Totals across all sessions
    Statistics,
}

/// Query result for session queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionQueryResult {
    Session(Option<SessionView>),
    Sessions(Vec<SessionView>),
    Statistics(SessionStatistics),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub awaiting_confirmation: usize,
    pub total_turns: u64,
    pub executed_operations: usize,
    pub cancelled_operations: usize,
    pub average_turn_count: f64,
}

/// Session query handler
pub struct SessionQueryHandler {
    registry: Arc<SessionRegistry>,
}

impl SessionQueryHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Execute a query
    pub async fn execute(&self, query: SessionQuery) -> SessionQueryResult {
        match query {
            SessionQuery::GetSession { user } => self.get_session(&user).await,
            SessionQuery::ActiveSessions => {
                self.filtered(|view| !view.open_topics.is_empty()).await
            }
            SessionQuery::AwaitingConfirmation => {
                self.filtered(SessionView::is_awaiting_confirmation).await
            }
            SessionQuery::Statistics => self.statistics().await,
        }
    }

    async fn get_session(&self, user: &str) -> SessionQueryResult {
        let view = match self.registry.get(user).await {
            Some(session) => Some(session.lock().await.view().clone()),
            None => None,
        };
        SessionQueryResult::Session(view)
    }

    async fn filtered(&self, keep: impl Fn(&SessionView) -> bool) -> SessionQueryResult {
        let mut views: Vec<SessionView> = self
            .registry
            .views()
            .await
            .into_iter()
            .filter(|view| keep(view))
            .collect();
        views.sort_by(|a, b| a.user.cmp(&b.user));
        SessionQueryResult::Sessions(views)
    }

    async fn statistics(&self) -> SessionQueryResult {
        let views = self.registry.views().await;

        let total_sessions = views.len();
        let total_turns: u64 = views.iter().map(|view| view.turns).sum();
        let average_turn_count = if total_sessions > 0 {
            total_turns as f64 / total_sessions as f64
        } else {
            0.0
        };

        SessionQueryResult::Statistics(SessionStatistics {
            total_sessions,
            active_sessions: views.iter().filter(|view| !view.open_topics.is_empty()).count(),
            awaiting_confirmation: views
                .iter()
                .filter(|view| view.is_awaiting_confirmation())
                .count(),
            total_turns,
            executed_operations: views.iter().map(|view| view.executed_operations.len()).sum(),
            cancelled_operations: views.iter().map(|view| view.cancelled_operations.len()).sum(),
            average_turn_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::session::Agent;

    #[tokio::test]
    async fn test_query_handler() {
        let agent = Agent::banking(AgentConfig::default());
        agent
            .chat("ana", "Quero transferir R$ 100 para Bia via PIX")
            .await;
        agent.chat("caio", "Qual é o meu saldo?").await;

        let handler = SessionQueryHandler::new(Arc::clone(agent.sessions()));

        match handler.execute(SessionQuery::GetSession { user: "ana".to_string() }).await {
            SessionQueryResult::Session(Some(view)) => assert_eq!(view.turns, 1),
            other => panic!("Expected session result, got {other:?}"),
        }

        match handler.execute(SessionQuery::AwaitingConfirmation).await {
            SessionQueryResult::Sessions(views) => {
                assert_eq!(views.len(), 1);
                assert_eq!(views[0].user, "ana");
                assert_eq!(views[0].awaiting_confirmation, vec!["transferencia"]);
            }
            other => panic!("Expected sessions result, got {other:?}"),
        }

        match handler.execute(SessionQuery::Statistics).await {
            SessionQueryResult::Statistics(stats) => {
                assert_eq!(stats.total_sessions, 2);
                assert_eq!(stats.active_sessions, 1);
                assert_eq!(stats.executed_operations, 1);
                assert_eq!(stats.total_turns, 2);
            }
            other => panic!("Expected statistics result, got {other:?}"),
        }

        match handler.execute(SessionQuery::GetSession { user: "zoe".to_string() }).await {
            SessionQueryResult::Session(view) => assert!(view.is_none()),
            other => panic!("Expected session result, got {other:?}"),
        }
    }
}
