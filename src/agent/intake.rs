//! URL-intake state machine for agents that need a source URL before they can be built.
//!
//! ```text
//! Idle ──select──▶ AwaitingUrl ──text──▶ Ready ──built──▶ Idle
//!                      ▲                   │
//!                      └──────failed───────┘
//! ```
//! Selecting a URL-requiring agent from any state resets to `AwaitingUrl`.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IntakeState {
    #[default]
    Idle,
    /// Next text message from the conversation is taken as the URL.
    AwaitingUrl { agent_type: String },
    /// A URL was accepted and the agent is being built.
    Ready { agent_type: String, url: String },
}

impl IntakeState {
    /// Record the intent to build `agent_type` once a URL arrives, discarding any prior intent.
    pub fn select(&mut self, agent_type: &str) {
        *self = Self::AwaitingUrl {
            agent_type: agent_type.to_string(),
        };
    }

    /// Agent type waiting for its URL, if any.
    pub fn awaiting_url_for(&self) -> Option<&str> {
        match self {
            Self::AwaitingUrl { agent_type } => Some(agent_type),
            _ => None,
        }
    }

    /// Take `text` as the URL. Returns `(agent_type, url)` to build, or `None`
    /// if no URL is pending.
    pub fn accept(&mut self, text: &str) -> Option<(String, String)> {
        let Self::AwaitingUrl { agent_type } = self else {
            return None;
        };
        let agent_type = std::mem::take(agent_type);
        let url = text.trim().to_string();
        *self = Self::Ready {
            agent_type: agent_type.clone(),
            url: url.clone(),
        };
        Some((agent_type, url))
    }

    /// The pending agent was built; the conversation goes back to chatting.
    pub fn built(&mut self) {
        if matches!(self, Self::Ready { .. }) {
            *self = Self::Idle;
        }
    }

    /// Construction failed; wait for another URL.
    pub fn failed(&mut self) {
        if let Self::Ready { agent_type, .. } = self {
            *self = Self::AwaitingUrl {
                agent_type: std::mem::take(agent_type),
            };
        }
    }

    pub fn reset(&mut self) {
        *self = Self::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let state = IntakeState::default();
        assert_eq!(state, IntakeState::Idle);
        assert_eq!(state.awaiting_url_for(), None);
    }

    #[test]
    fn test_accept_without_select_is_ignored() {
        let mut state = IntakeState::Idle;
        assert_eq!(state.accept("https://example.com"), None);
        assert_eq!(state, IntakeState::Idle);
    }

    #[test]
    fn test_successful_intake_returns_to_idle() {
        let mut state = IntakeState::Idle;
        state.select("reader");
        assert_eq!(state.awaiting_url_for(), Some("reader"));

        let (agent_type, url) = state.accept("  https://example.com \n").unwrap();
        assert_eq!(agent_type, "reader");
        assert_eq!(url, "https://example.com");
        assert!(matches!(state, IntakeState::Ready { .. }));

        state.built();
        assert_eq!(state, IntakeState::Idle);
    }

    #[test]
    fn test_failed_construction_keeps_waiting() {
        let mut state = IntakeState::Idle;
        state.select("reader");
        state.accept("notaurl").unwrap();
        state.failed();
        assert_eq!(
            state,
            IntakeState::AwaitingUrl {
                agent_type: "reader".to_string()
            }
        );

        // The retry is accepted like the first attempt.
        assert!(state.accept("https://example.com").is_some());
    }

    #[test]
    fn test_reselect_resets_pending_intent() {
        let mut state = IntakeState::Idle;
        state.select("reader");
        state.accept("https://a.example").unwrap();

        state.select("reader");
        assert_eq!(
            state,
            IntakeState::AwaitingUrl {
                agent_type: "reader".to_string()
            }
        );
    }

    #[test]
    fn test_built_and_failed_are_noops_outside_ready() {
        let mut state = IntakeState::Idle;
        state.failed();
        assert_eq!(state, IntakeState::Idle);

        state.select("reader");
        state.built();
        assert_eq!(state.awaiting_url_for(), Some("reader"));
    }
}
