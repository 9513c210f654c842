//! Built-in agents backed by the LLM client.

pub mod assistant;
pub mod reader;

use std::sync::{Arc, Mutex};

use crate::agent::builder::AgentCatalog;
use crate::llm::{self, Message};

/// Name of the plain chat agent.
pub const ASSISTANT: &str = "assistant";
/// Name of the URL-grounded agent.
pub const READER: &str = "reader";

/// Max messages of history kept per agent (user + assistant turns).
const MAX_HISTORY: usize = 20;

/// Register the built-in agents.
pub fn register_builtin(catalog: &mut AgentCatalog, llm: Arc<llm::Client>) {
    catalog
        .register(
            ASSISTANT,
            "General-purpose chat assistant",
            false,
            assistant::AssistantFactory::new(llm.clone()),
        )
        .register(
            READER,
            "Answers questions about a web page you send",
            true,
            reader::ReaderFactory::new(llm),
        );
}

/// Rolling chat history owned by one agent instance.
#[derive(Default)]
pub struct History {
    messages: Mutex<Vec<Message>>,
}

impl History {
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().expect("history lock poisoned").clone()
    }

    pub fn record(&self, user: &str, reply: &str) {
        let mut messages = self.messages.lock().expect("history lock poisoned");
        messages.push(Message::user(user));
        messages.push(Message::assistant(reply));
        if messages.len() > MAX_HISTORY {
            let excess = messages.len() - MAX_HISTORY;
            messages.drain(..excess);
        }
    }

    /// System prompt, prior turns, then the new user message.
    pub fn prompt(&self, system: &str, text: &str) -> Vec<Message> {
        let mut prompt = Vec::with_capacity(MAX_HISTORY + 2);
        prompt.push(Message::system(system));
        prompt.extend(self.snapshot());
        prompt.push(Message::user(text));
        prompt
    }
}
