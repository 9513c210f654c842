//! Agent module - session registry, conversation binding and built-in agents.

pub mod agents;
pub mod builder;
pub mod intake;
pub mod registry;
pub mod service;
pub mod session;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{AgentCatalog, AgentDescriptor};
pub use registry::SessionRegistry;
pub use service::{AgentError, AgentService, ConversationId, ProcessingFailure, Reply, Selection};
