//! In-memory store of live agent sessions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::agent::builder::{Agent, AgentBuilder, AgentDescriptor, BuildError};
use crate::agent::session::{AgentSession, InUse, SessionId, SessionParams, URL_PARAM};

/// Owns every live `AgentSession`, addressable by `SessionId`.
///
/// The map lock is only held for short synchronous mutations; agent
/// construction happens before the record is inserted, so lookups never
/// observe a half-built session.
pub struct SessionRegistry {
    builder: Arc<dyn AgentBuilder>,
    sessions: RwLock<HashMap<SessionId, AgentSession>>,
}

impl SessionRegistry {
    pub fn new(builder: Arc<dyn AgentBuilder>) -> Self {
        Self {
            builder,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn agent_types(&self) -> Vec<AgentDescriptor> {
        self.builder.list_agent_types()
    }

    pub fn describe(&self, agent_type: &str) -> Option<AgentDescriptor> {
        self.builder.describe(agent_type)
    }

    /// Build an agent of `agent_type` and register a new session for it.
    pub async fn create_session(
        &self,
        agent_type: &str,
        params: SessionParams,
    ) -> Result<AgentSession, BuildError> {
        let descriptor = self
            .describe(agent_type)
            .ok_or_else(|| BuildError::UnknownAgentType(agent_type.to_string()))?;

        if descriptor.requires_url
            && params.get(URL_PARAM).is_none_or(|u| u.trim().is_empty())
        {
            return Err(BuildError::Construction(format!(
                "agent '{}' needs a source URL",
                agent_type
            )));
        }

        debug!("Building {} agent", agent_type);
        let agent = self.builder.build(agent_type, &params).await?;
        let mut session = AgentSession::new(agent_type, agent, params);

        let mut sessions = self.sessions.write().expect("session map lock poisoned");
        while sessions.contains_key(&session.session_id) {
            session.session_id = SessionId::new();
        }
        sessions.insert(session.session_id, session.clone());
        drop(sessions);

        info!("🆕 Created {} session {}", agent_type, session.session_id);
        Ok(session)
    }

    pub fn get_session(&self, session_id: &SessionId) -> Option<AgentSession> {
        self.sessions
            .read()
            .expect("session map lock poisoned")
            .get(session_id)
            .cloned()
    }

    /// Refresh `last_used_at`. Returns false if the session does not exist.
    pub fn touch(&self, session_id: &SessionId) -> bool {
        self.touch_at(session_id, Instant::now())
    }

    pub(crate) fn touch_at(&self, session_id: &SessionId, now: Instant) -> bool {
        let mut sessions = self.sessions.write().expect("session map lock poisoned");
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.touch_at(now);
                true
            }
            None => false,
        }
    }

    /// Touch the session and mark it busy in one step, returning its agent.
    ///
    /// The session is exempt from eviction until the guard is dropped.
    pub(crate) fn checkout(&self, session_id: &SessionId) -> Option<(Arc<dyn Agent>, InUse)> {
        let mut sessions = self.sessions.write().expect("session map lock poisoned");
        let session = sessions.get_mut(session_id)?;
        session.touch_at(Instant::now());
        Some((session.agent.clone(), session.begin_use()))
    }

    /// Delete a session. Removing an absent id is not an error.
    pub fn remove_session(&self, session_id: &SessionId) -> bool {
        let removed = self
            .sessions
            .write()
            .expect("session map lock poisoned")
            .remove(session_id)
            .is_some();
        if removed {
            info!("🗑️ Removed session {}", session_id);
        }
        removed
    }

    /// Remove every session idle for at least `max_age`. Returns the count removed.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        self.evict_stale(max_age, Instant::now())
    }

    pub(crate) fn evict_stale(&self, max_age: Duration, now: Instant) -> usize {
        // Staleness is checked under the write lock, so a concurrent touch
        // either lands before the check (and saves the session) or after removal.
        let mut sessions = self.sessions.write().expect("session map lock poisoned");
        let before = sessions.len();
        sessions.retain(|id, session| {
            let stale = session.idle_for(now) >= max_age && !session.is_busy();
            if stale {
                debug!("Evicting idle session {} ({})", id, session.agent_type);
            }
            !stale
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("session map lock poisoned").len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
