//! Sessions and the chat entry point
//!
//! A [`DialogSession`] owns one user's belief tracker and policy; the
//! [`SessionRegistry`] hands out one session per user and serializes turns
//! of the same user behind a mutex. [`Agent::chat`] runs the full turn:
//! input filter, language understanding, tracking, policy, rendering and
//! output filter.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::BeliefTracker;
use crate::config::AgentConfig;
use crate::filters::{MessageFilter, PassThroughFilter};
use crate::generation::ResponseGenerator;
use crate::knowledge::{InMemoryKnowledge, KnowledgeService};
use crate::nlu::{LanguageUnderstanding, RuleBasedNlu};
use crate::policy::{Action, PolicyEngine, TurnContext};
use crate::projections::{ConversationHistory, SessionProjection, SessionView};
use crate::value_objects::{InputMessage, SemanticExtraction};

/// Dialog state of a single user
pub struct DialogSession {
    tracker: BeliefTracker,
    policy: PolicyEngine,
    history: ConversationHistory,
    view: SessionView,
    display_name: Option<String>,
}

impl DialogSession {
    pub fn new(
        user: impl Into<String>,
        knowledge: Arc<dyn KnowledgeService>,
        config: &AgentConfig,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let user = user.into();
        Self {
            view: SessionView::new(session_id, user.clone()),
            tracker: BeliefTracker::with_session_id(session_id, user),
            policy: PolicyEngine::new(knowledge)
                .with_model_delegation(config.use_model_delegation)
                .with_history_window(config.history_window),
            history: ConversationHistory::new(),
            display_name: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.tracker.session_id()
    }

    pub fn tracker(&self) -> &BeliefTracker {
        &self.tracker
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    /// Name used to personalise greetings
    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = Some(name.into());
    }

    /// Run tracker and policy for one understood message.
    ///
    /// Returns no actions when the tracker has no state to act on.
    pub fn process(&mut self, message: &str, extraction: &SemanticExtraction) -> Vec<Action> {
        let states = self.tracker.update_state(extraction);
        let actions = if states.is_empty() {
            debug!(user = %self.tracker.user(), "no state to act on");
            Vec::new()
        } else {
            let user = self.tracker.user().to_string();
            let earlier = self.history.window(self.policy.history_window());
            let turn = TurnContext::new(&user, message)
                .with_display_name(self.display_name.as_deref())
                .with_history(&earlier);
            self.policy.act(&turn, &states, &mut self.tracker)
        };

        self.history.record_user(message);
        self.view.record_turn(Utc::now());
        self.commit_events();
        actions
    }

    /// Log an agent reply
    pub fn record_reply(&mut self, reply: &str) {
        self.history.record_system(reply);
    }

    fn commit_events(&mut self) {
        let mut events = self.tracker.take_events();
        events.extend(self.policy.take_events());
        self.view.apply_all(&events);
    }
}

/// One session per user, created on first contact
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<DialogSession>>>>,
    knowledge: Arc<dyn KnowledgeService>,
    config: AgentConfig,
}

impl SessionRegistry {
    pub fn new(knowledge: Arc<dyn KnowledgeService>, config: AgentConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            knowledge,
            config,
        }
    }

    pub async fn get(&self, user: &str) -> Option<Arc<Mutex<DialogSession>>> {
        self.sessions.read().await.get(user).cloned()
    }

    pub async fn get_or_create(&self, user: &str) -> Arc<Mutex<DialogSession>> {
        if let Some(session) = self.get(user).await {
            return session;
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user.to_string())
            .or_insert_with(|| {
                info!(%user, "starting dialog session");
                Arc::new(Mutex::new(DialogSession::new(
                    user,
                    Arc::clone(&self.knowledge),
                    &self.config,
                )))
            })
            .clone()
    }

    /// Drop a user's session; returns whether one existed
    pub async fn end_session(&self, user: &str) -> bool {
        let removed = self.sessions.write().await.remove(user).is_some();
        if removed {
            info!(%user, "dialog session ended");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshot of every session's view
    pub async fn views(&self) -> Vec<SessionView> {
        let sessions: Vec<Arc<Mutex<DialogSession>>> =
            self.sessions.read().await.values().cloned().collect();

        let mut views = Vec::with_capacity(sessions.len());
        for session in sessions {
            views.push(session.lock().await.view().clone());
        }
        views
    }
}

/// The conversational agent
pub struct Agent {
    config: AgentConfig,
    nlu: Arc<dyn LanguageUnderstanding>,
    filter: Arc<dyn MessageFilter>,
    generator: ResponseGenerator,
    sessions: Arc<SessionRegistry>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        nlu: Arc<dyn LanguageUnderstanding>,
        filter: Arc<dyn MessageFilter>,
        knowledge: Arc<dyn KnowledgeService>,
    ) -> Self {
        Self {
            generator: ResponseGenerator::new(config.templates.clone()),
            sessions: Arc::new(SessionRegistry::new(knowledge, config.clone())),
            config,
            nlu,
            filter,
        }
    }

    /// Banking assistant with the rule based understanding and no filtering
    pub fn banking(config: AgentConfig) -> Self {
        Self::new(
            config,
            Arc::new(RuleBasedNlu::new()),
            Arc::new(PassThroughFilter),
            Arc::new(InMemoryKnowledge::banking()),
        )
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub async fn set_display_name(&self, user: &str, name: &str) {
        let session = self.sessions.get_or_create(user).await;
        session.lock().await.set_display_name(name);
    }

    /// Answer one user message; always at least one reply
    pub async fn chat(&self, user: &str, text: &str) -> Vec<String> {
        let message = InputMessage::new(user, text).with_domain(self.config.default_domain.clone());

        match self.filter.filter_input(&message.message).await {
            Ok(result) if result.valid => {}
            Ok(result) => {
                debug!(%user, code = ?result.error_code, "input rejected");
                return self.refuse();
            }
            Err(err) => {
                warn!(%user, %err, "input filter failed");
                return self.refuse();
            }
        }

        let extraction = match self.nlu.process(&message).await {
            Ok(extraction) if !extraction.intents.is_empty() => extraction,
            Ok(_) => {
                debug!(%user, "nothing understood");
                return self.refuse();
            }
            Err(err) => {
                warn!(%user, %err, "language understanding failed");
                return self.refuse();
            }
        };

        let session = self.sessions.get_or_create(user).await;
        let mut session = session.lock().await;
        let actions = session.process(&message.message, &extraction);
        if actions.is_empty() {
            return self.refuse();
        }

        let mut replies = Vec::with_capacity(actions.len());
        for action in &actions {
            let reply = self.screen_output(self.generator.generate(action)).await;
            session.record_reply(&reply);
            replies.push(reply);
        }
        replies
    }

    async fn screen_output(&self, reply: String) -> String {
        match self.filter.filter_output(&reply).await {
            Ok(result) if result.valid => reply,
            Ok(_) => self.config.output_refusal_message.clone(),
            Err(err) => {
                warn!(%err, "output filter failed");
                self.config.output_refusal_message.clone()
            }
        }
    }

    fn refuse(&self) -> Vec<String> {
        vec![self.config.refusal_message.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::Intent;

    #[tokio::test]
    async fn test_sessions_are_per_user() {
        let agent = Agent::banking(AgentConfig::default());
        agent.chat("u1", "Quero transferir 100 reais").await;
        agent.chat("u2", "Olá").await;

        assert_eq!(agent.sessions().len().await, 2);
        let first = agent.sessions().get("u1").await.unwrap();
        let first = first.lock().await;
        assert_eq!(first.tracker().context().len(), 1);
        assert_eq!(
            first.tracker().context().back().unwrap().intent,
            Intent::Perform
        );

        assert!(agent.sessions().end_session("u2").await);
        assert!(!agent.sessions().end_session("u2").await);
    }

    #[test]
    fn test_process_records_history_and_view() {
        let knowledge: Arc<dyn KnowledgeService> = Arc::new(InMemoryKnowledge::banking());
        let mut session = DialogSession::new("ana", knowledge, &AgentConfig::default());
        let extraction = RuleBasedNlu::new().extract(&InputMessage::new("ana", "Qual é o meu saldo?"));

        let actions = session.process("Qual é o meu saldo?", &extraction);
        assert_eq!(actions.len(), 1);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.view().turns, 1);
        assert_eq!(session.view().executed_operations.len(), 1);
        assert!(session.view().open_topics.is_empty());
    }

    #[test]
    fn test_delegation_sees_only_the_history_window() {
        let knowledge: Arc<dyn KnowledgeService> = Arc::new(InMemoryKnowledge::banking());
        let config = AgentConfig {
            history_window: 2,
            ..AgentConfig::default().with_model_delegation(true)
        };
        let mut session = DialogSession::new("ana", knowledge, &config);
        let nlu = RuleBasedNlu::new();

        for text in ["Olá", "Qual é o meu saldo?", "O que é PIX?"] {
            let extraction = nlu.extract(&InputMessage::new("ana", text));
            session.process(text, &extraction);
            session.record_reply("ok");
        }

        let text = "Me conta uma piada";
        let extraction = SemanticExtraction::default().with_clause(
            Some(Intent::Other("conversa".to_string())),
            None,
            None,
        );
        let actions = session.process(text, &extraction);

        let delegated = actions
            .iter()
            .find(|action| action.intent == crate::policy::ActionIntent::DelegateToModel)
            .unwrap();
        assert_eq!(delegated.context_messages.len(), 3);
        assert_eq!(delegated.context_messages[2].content, text);
        assert_eq!(session.history().len(), 7);
    }
}
