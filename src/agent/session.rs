//! Agent session records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::agent::builder::Agent;

/// Construction parameters recorded with a session (e.g. `url` for the reader).
pub type SessionParams = BTreeMap<String, String>;

/// Metadata key holding the source URL of URL-grounded agents.
pub const URL_PARAM: &str = "url";

/// Opaque unique session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A constructed agent plus its bookkeeping.
///
/// `AgentSession` values handed out by the registry are snapshots: the
/// timestamps reflect the moment of the lookup.
#[derive(Clone)]
pub struct AgentSession {
    pub session_id: SessionId,
    pub agent_type: String,
    pub agent: Arc<dyn Agent>,
    pub created_at: Instant,
    pub last_used_at: Instant,
    /// Wall-clock creation time, for display only.
    pub created_wall: DateTime<Utc>,
    pub metadata: SessionParams,
    in_flight: Arc<AtomicUsize>,
}

impl AgentSession {
    pub(crate) fn new(agent_type: &str, agent: Arc<dyn Agent>, metadata: SessionParams) -> Self {
        let now = Instant::now();
        Self {
            session_id: SessionId::new(),
            agent_type: agent_type.to_string(),
            agent,
            created_at: now,
            last_used_at: now,
            created_wall: Utc::now(),
            metadata,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Source URL for URL-grounded sessions.
    pub fn url(&self) -> Option<&str> {
        self.metadata.get(URL_PARAM).map(String::as_str)
    }

    /// Time since the last processed message (or creation).
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    pub(crate) fn touch_at(&mut self, now: Instant) {
        // Instant is monotonic, but a caller-supplied `now` may lag behind.
        if now > self.last_used_at {
            self.last_used_at = now;
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn begin_use(&self) -> InUse {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InUse {
            counter: self.in_flight.clone(),
        }
    }
}

impl fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSession")
            .field("session_id", &self.session_id)
            .field("agent_type", &self.agent_type)
            .field("created_wall", &self.created_wall)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Marks a session as having a dispatch in progress. Eviction skips busy sessions.
pub struct InUse {
    counter: Arc<AtomicUsize>,
}

impl Drop for InUse {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Format a duration as a short human string ("3h 12m", "45s").
pub fn format_age(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::EchoAgent;

    fn session() -> AgentSession {
        AgentSession::new("assistant", Arc::new(EchoAgent), SessionParams::new())
    }

    #[test]
    fn test_session_id_roundtrips_through_display() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_new_session_is_untouched() {
        let s = session();
        assert_eq!(s.created_at, s.last_used_at);
        assert!(s.url().is_none());
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut s = session();
        let later = s.created_at + Duration::from_secs(5);
        s.touch_at(later);
        assert_eq!(s.last_used_at, later);

        s.touch_at(s.created_at);
        assert_eq!(s.last_used_at, later);
    }

    #[test]
    fn test_in_use_guard_releases_on_drop() {
        let s = session();
        assert!(!s.is_busy());
        let guard = s.begin_use();
        assert!(s.is_busy());
        drop(guard);
        assert!(!s.is_busy());
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Duration::from_secs(45)), "45s");
        assert_eq!(format_age(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_age(Duration::from_secs(3 * 3600 + 12 * 60)), "3h 12m");
    }
}
