//! Conversation-facing service: binds one session per conversation and routes text to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::agent::builder::{AgentDescriptor, BuildError};
use crate::agent::intake::IntakeState;
use crate::agent::registry::SessionRegistry;
use crate::agent::session::{AgentSession, SessionId, SessionParams, URL_PARAM};

/// One end-user chat context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn telegram(chat_id: i64) -> Self {
        Self(format!("tg:{}", chat_id))
    }

    pub fn api(id: &str) -> Self {
        Self(format!("api:{}", id))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
struct Conversation {
    current: Option<SessionId>,
    intake: IntakeState,
}

impl Conversation {
    fn is_vacant(&self) -> bool {
        self.current.is_none() && self.intake == IntakeState::Idle
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingFailure {
    Failed(String),
    TimedOut(Duration),
}

/// Every failure the selection and dispatch paths report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    UnknownAgentType(String),
    Construction {
        agent_type: String,
        reason: String,
        /// The conversation is still waiting for a (new) URL.
        awaiting_url: bool,
    },
    NoActiveSession,
    AgentProcessing(ProcessingFailure),
}

impl AgentError {
    fn from_build(err: BuildError, agent_type: &str, awaiting_url: bool) -> Self {
        match err {
            BuildError::UnknownAgentType(name) => Self::UnknownAgentType(name),
            BuildError::Construction(reason) => Self::Construction {
                agent_type: agent_type.to_string(),
                reason,
                awaiting_url,
            },
        }
    }

    /// Text shown to the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::UnknownAgentType(name) => {
                format!("Unknown agent \"{}\". Use /agents to see what's available.", name)
            }
            Self::Construction {
                agent_type,
                awaiting_url: true,
                ..
            } => format!(
                "Invalid URL or error creating {} agent. Please send another URL.",
                agent_type
            ),
            Self::Construction { reason, .. } => format!("Error selecting agent: {}", reason),
            Self::NoActiveSession => "Please select an agent first using /agents command".to_string(),
            Self::AgentProcessing(ProcessingFailure::TimedOut(_)) => {
                "Sorry, the agent took too long to answer. Please try again.".to_string()
            }
            Self::AgentProcessing(ProcessingFailure::Failed(_)) => {
                "Sorry, there was an error processing your message.".to_string()
            }
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAgentType(name) => write!(f, "unknown agent type '{}'", name),
            Self::Construction {
                agent_type, reason, ..
            } => write!(f, "failed to build {} agent: {}", agent_type, reason),
            Self::NoActiveSession => write!(f, "no active session"),
            Self::AgentProcessing(ProcessingFailure::Failed(e)) => {
                write!(f, "agent processing failed: {}", e)
            }
            Self::AgentProcessing(ProcessingFailure::TimedOut(limit)) => {
                write!(f, "agent timed out after {:?}", limit)
            }
        }
    }
}

impl std::error::Error for AgentError {}

/// Outcome of selecting an agent type.
#[derive(Debug)]
pub enum Selection {
    Selected(AgentSession),
    AwaitingUrl { agent_type: String },
}

/// Outcome of a text message.
#[derive(Debug)]
pub enum Reply {
    /// The bound agent answered.
    Agent(String),
    /// The text was taken as a URL and a session was built from it.
    SessionReady(AgentSession),
}

/// What a conversation is currently bound to.
#[derive(Debug, Default)]
pub struct ConversationStatus {
    pub session: Option<AgentSession>,
    pub awaiting_url_for: Option<String>,
}

/// Keeps exactly one current agent session per conversation.
///
/// Each conversation has its own async lock, so messages from one chat are
/// handled one at a time while different chats proceed independently.
pub struct AgentService {
    registry: Arc<SessionRegistry>,
    conversations: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<Conversation>>>>,
    agent_timeout: Option<Duration>,
}

impl AgentService {
    pub fn new(registry: Arc<SessionRegistry>, agent_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            conversations: Mutex::new(HashMap::new()),
            agent_timeout,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn agent_types(&self) -> Vec<AgentDescriptor> {
        self.registry.agent_types()
    }

    fn conversation(&self, id: &ConversationId) -> Arc<tokio::sync::Mutex<Conversation>> {
        self.conversations
            .lock()
            .expect("conversation map lock poisoned")
            .entry(id.clone())
            .or_default()
            .clone()
    }

    /// Bind `conversation` to a fresh agent of `agent_type`.
    ///
    /// URL-requiring types only record the intent; the session is built when
    /// the URL arrives through [`AgentService::handle_text`].
    pub async fn select_agent(
        &self,
        conversation: &ConversationId,
        agent_type: &str,
    ) -> Result<Selection, AgentError> {
        let descriptor = self
            .registry
            .describe(agent_type)
            .ok_or_else(|| AgentError::UnknownAgentType(agent_type.to_string()))?;

        let slot = self.conversation(conversation);
        let mut conv = slot.lock().await;

        if descriptor.requires_url {
            if let Some(old) = conv.current.take() {
                self.registry.remove_session(&old);
            }
            conv.intake.select(agent_type);
            info!("🔗 {} waiting for a URL for {}", conversation, agent_type);
            return Ok(Selection::AwaitingUrl {
                agent_type: agent_type.to_string(),
            });
        }

        let session = self
            .registry
            .create_session(agent_type, SessionParams::new())
            .await
            .map_err(|e| {
                warn!("Failed to build {} for {}: {}", agent_type, conversation, e);
                AgentError::from_build(e, agent_type, false)
            })?;

        conv.intake.reset();
        if let Some(old) = conv.current.replace(session.session_id) {
            self.registry.remove_session(&old);
        }
        info!("🤖 {} now using {} ({})", conversation, agent_type, session.session_id);
        Ok(Selection::Selected(session))
    }

    /// Route a text message: URL intake if one is pending, otherwise dispatch.
    pub async fn handle_text(
        &self,
        conversation: &ConversationId,
        text: &str,
    ) -> Result<Reply, AgentError> {
        let slot = self.conversation(conversation);
        let mut conv = slot.lock().await;

        let Some((agent_type, url)) = conv.intake.accept(text) else {
            return self
                .dispatch_locked(&mut conv, conversation, text)
                .await
                .map(Reply::Agent);
        };

        let mut params = SessionParams::new();
        params.insert(URL_PARAM.to_string(), url.clone());
        match self.registry.create_session(&agent_type, params).await {
            Ok(session) => {
                conv.intake.built();
                if let Some(old) = conv.current.replace(session.session_id) {
                    self.registry.remove_session(&old);
                }
                info!("📖 {} now using {} on {}", conversation, agent_type, url);
                Ok(Reply::SessionReady(session))
            }
            Err(e) => {
                conv.intake.failed();
                warn!("Failed to build {} from {:?}: {}", agent_type, url, e);
                Err(AgentError::from_build(e, &agent_type, true))
            }
        }
    }

    /// Send `text` to the conversation's current agent, bypassing URL intake.
    #[cfg(test)]
    pub(crate) async fn dispatch(
        &self,
        conversation: &ConversationId,
        text: &str,
    ) -> Result<String, AgentError> {
        let slot = self.conversation(conversation);
        let mut conv = slot.lock().await;
        self.dispatch_locked(&mut conv, conversation, text).await
    }

    async fn dispatch_locked(
        &self,
        conv: &mut Conversation,
        conversation: &ConversationId,
        text: &str,
    ) -> Result<String, AgentError> {
        let session_id = conv.current.ok_or(AgentError::NoActiveSession)?;

        let Some((agent, _in_use)) = self.registry.checkout(&session_id) else {
            info!("Session {} for {} is gone, unbinding", session_id, conversation);
            conv.current = None;
            return Err(AgentError::NoActiveSession);
        };

        let call = agent.process(text, &session_id);
        let result = match self.agent_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("⏱️ Session {} timed out after {:?}", session_id, limit);
                    return Err(AgentError::AgentProcessing(ProcessingFailure::TimedOut(limit)));
                }
            },
            None => call.await,
        };

        match result {
            Ok(reply) => {
                self.registry.touch(&session_id);
                Ok(reply)
            }
            Err(e) => {
                error!("Error processing message in session {}: {}", session_id, e);
                Err(AgentError::AgentProcessing(ProcessingFailure::Failed(e)))
            }
        }
    }

    /// Select an agent and phrase the outcome for the user.
    pub async fn select_and_describe(&self, conversation: &ConversationId, agent_type: &str) -> String {
        match self.select_agent(conversation, agent_type).await {
            Ok(Selection::Selected(session)) => format!("Selected agent: {}", session.agent_type),
            Ok(Selection::AwaitingUrl { .. }) => {
                "Please send the web URL you want to read".to_string()
            }
            Err(e) => e.user_message(),
        }
    }

    /// Handle a text message and phrase the outcome for the user.
    pub async fn respond(&self, conversation: &ConversationId, text: &str) -> String {
        match self.handle_text(conversation, text).await {
            Ok(Reply::Agent(reply)) => reply,
            Ok(Reply::SessionReady(session)) => session_ready_message(&session),
            Err(e) => e.user_message(),
        }
    }

    /// Drop the conversation's current session and any pending URL intake.
    pub async fn reset(&self, conversation: &ConversationId) -> bool {
        let slot = self.conversation(conversation);
        let mut conv = slot.lock().await;
        let had_state = !conv.is_vacant();
        if let Some(old) = conv.current.take() {
            self.registry.remove_session(&old);
        }
        conv.intake.reset();
        had_state
    }

    pub async fn status(&self, conversation: &ConversationId) -> ConversationStatus {
        let slot = self.conversation(conversation);
        let conv = slot.lock().await;
        ConversationStatus {
            session: conv.current.and_then(|id| self.registry.get_session(&id)),
            awaiting_url_for: conv.intake.awaiting_url_for().map(str::to_string),
        }
    }

    /// Evict sessions idle for at least `max_age` and forget vacant conversations.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let evicted = self.registry.evict_older_than(max_age);

        let mut conversations = self.conversations.lock().expect("conversation map lock poisoned");
        conversations.retain(|_, slot| {
            // A handler holding the slot, locked or about to lock it, keeps the entry.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(mut conv) = slot.try_lock() else {
                return true;
            };
            if let Some(id) = conv.current
                && self.registry.get_session(&id).is_none()
            {
                conv.current = None;
            }
            !conv.is_vacant()
        });

        evicted
    }

    #[cfg(test)]
    pub(crate) fn conversation_count(&self) -> usize {
        self.conversations.lock().expect("conversation map lock poisoned").len()
    }
}

/// Confirmation shown when URL intake produced a session.
pub fn session_ready_message(session: &AgentSession) -> String {
    format!(
        "{} agent created with URL: {}",
        capitalize(&session.agent_type),
        session.url().unwrap_or_default()
    )
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{EchoAgent, ScriptedBuilder};

    #[test]
    fn test_conversation_ids_are_namespaced() {
        assert_eq!(ConversationId::telegram(-100).to_string(), "tg:-100");
        assert_eq!(ConversationId::api("abc").to_string(), "api:abc");
        assert_ne!(ConversationId::telegram(1), ConversationId::api("1"));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            AgentError::NoActiveSession.user_message(),
            "Please select an agent first using /agents command"
        );
        let err = AgentError::Construction {
            agent_type: "reader".to_string(),
            reason: "bad url".to_string(),
            awaiting_url: true,
        };
        assert!(err.user_message().contains("Please send another URL"));
        assert!(!err.user_message().contains("bad url"));
    }

    fn service() -> AgentService {
        let registry = Arc::new(SessionRegistry::new(Arc::new(ScriptedBuilder::new())));
        AgentService::new(registry, None)
    }

    #[tokio::test]
    async fn test_sweep_keeps_slot_held_by_pending_handler() {
        let service = service();
        let c = ConversationId::telegram(1);

        // A handler fetched the slot but has not locked it yet.
        let slot = service.conversation(&c);
        service.sweep(Duration::from_secs(3600));
        assert!(Arc::ptr_eq(&slot, &service.conversation(&c)));

        let session = service
            .registry()
            .create_session("assistant", SessionParams::new())
            .await
            .unwrap();
        slot.lock().await.current = Some(session.session_id);
        drop(slot);

        let status = service.status(&c).await;
        assert_eq!(status.session.map(|s| s.session_id), Some(session.session_id));
    }

    #[tokio::test]
    async fn test_sweep_drops_unheld_vacant_slot() {
        let service = service();
        let c = ConversationId::telegram(1);
        drop(service.conversation(&c));

        service.sweep(Duration::from_secs(3600));
        assert_eq!(service.conversation_count(), 0);
    }

    #[test]
    fn test_session_ready_message() {
        let mut params = SessionParams::new();
        params.insert(URL_PARAM.to_string(), "https://example.com".to_string());
        let session = AgentSession::new("reader", Arc::new(EchoAgent), params);
        assert_eq!(
            session_ready_message(&session),
            "Reader agent created with URL: https://example.com"
        );
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("reader"), "Reader");
        assert_eq!(capitalize(""), "");
    }
}
