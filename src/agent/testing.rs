//! Scripted agents and builder for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::builder::{Agent, AgentBuilder, AgentDescriptor, BuildError};
use crate::agent::session::{SessionId, SessionParams, URL_PARAM};

/// Replies with `echo: <text>`.
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn process(&self, text: &str, _session_id: &SessionId) -> Result<String, String> {
        Ok(format!("echo: {}", text))
    }
}

/// Replies with the URL it was built from.
pub struct UrlAgent {
    url: String,
}

#[async_trait]
impl Agent for UrlAgent {
    async fn process(&self, text: &str, _session_id: &SessionId) -> Result<String, String> {
        Ok(format!("{} says: {}", self.url, text))
    }
}

/// Always fails.
pub struct BrokenAgent;

#[async_trait]
impl Agent for BrokenAgent {
    async fn process(&self, _text: &str, _session_id: &SessionId) -> Result<String, String> {
        Err("model exploded".to_string())
    }
}

/// Answers after a delay.
pub struct SlowAgent(pub Duration);

#[async_trait]
impl Agent for SlowAgent {
    async fn process(&self, text: &str, _session_id: &SessionId) -> Result<String, String> {
        tokio::time::sleep(self.0).await;
        Ok(format!("slowly: {}", text))
    }
}

/// Builds `assistant`, `reader` (URL must start with http), `broken`, `slow`,
/// and `slow_start` (an echo agent that takes a while to build).
pub struct ScriptedBuilder {
    builds: AtomicUsize,
    slow_delay: Duration,
}

impl ScriptedBuilder {
    pub fn new() -> Self {
        Self {
            builds: AtomicUsize::new(0),
            slow_delay: SLOW_DELAY,
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentBuilder for ScriptedBuilder {
    fn list_agent_types(&self) -> Vec<AgentDescriptor> {
        [
            ("assistant", false),
            ("broken", false),
            ("reader", true),
            ("slow", false),
            ("slow_start", false),
        ]
        .into_iter()
        .map(|(name, requires_url)| AgentDescriptor {
            name: name.to_string(),
            description: format!("{} agent", name),
            requires_url,
        })
        .collect()
    }

    async fn build(
        &self,
        agent_type: &str,
        params: &SessionParams,
    ) -> Result<Arc<dyn Agent>, BuildError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        match agent_type {
            "assistant" => Ok(Arc::new(EchoAgent)),
            "broken" => Ok(Arc::new(BrokenAgent)),
            "slow" => Ok(Arc::new(SlowAgent(self.slow_delay))),
            "slow_start" => {
                tokio::time::sleep(self.slow_delay).await;
                Ok(Arc::new(EchoAgent))
            }
            "reader" => {
                let url = params.get(URL_PARAM).cloned().unwrap_or_default();
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(BuildError::Construction(format!("not a URL: {:?}", url)));
                }
                Ok(Arc::new(UrlAgent { url }))
            }
            other => Err(BuildError::UnknownAgentType(other.to_string())),
        }
    }
}

/// How long `slow` agents take to answer and `slow_start` agents take to build.
pub const SLOW_DELAY: Duration = Duration::from_millis(200);

pub fn url_params(url: &str) -> SessionParams {
    let mut params = SessionParams::new();
    params.insert(URL_PARAM.to_string(), url.to_string());
    params
}
