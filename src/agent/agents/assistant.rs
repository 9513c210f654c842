//! Plain chat agent.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::agent::agents::History;
use crate::agent::builder::{Agent, AgentFactory};
use crate::agent::session::{SessionId, SessionParams};
use crate::llm;

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Respond to the user's request.";
const MAX_TOKENS: u32 = 1024;

pub struct AssistantAgent {
    llm: Arc<llm::Client>,
    history: History,
}

#[async_trait]
impl Agent for AssistantAgent {
    async fn process(&self, text: &str, session_id: &SessionId) -> Result<String, String> {
        let prompt = self.history.prompt(SYSTEM_PROMPT, text);
        let reply = self
            .llm
            .complete(&prompt, MAX_TOKENS)
            .await
            .map_err(|e| e.to_string())?;
        info!("💬 [{}] assistant replied ({} chars)", session_id, reply.len());
        self.history.record(text, &reply);
        Ok(reply)
    }
}

pub struct AssistantFactory {
    llm: Arc<llm::Client>,
}

impl AssistantFactory {
    pub fn new(llm: Arc<llm::Client>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl AgentFactory for AssistantFactory {
    async fn create(&self, _params: &SessionParams) -> Result<Arc<dyn Agent>, String> {
        Ok(Arc::new(AssistantAgent {
            llm: self.llm.clone(),
            history: History::default(),
        }))
    }
}
