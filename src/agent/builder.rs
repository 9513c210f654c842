//! Agent construction: the capability traits and the registration table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::agent::session::{SessionId, SessionParams};

/// A constructed conversational agent.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce a reply to `text`. `session_id` is a correlation key only.
    async fn process(&self, text: &str, session_id: &SessionId) -> Result<String, String>;
}

/// Describes one buildable agent type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    /// Construction is deferred until a source URL is supplied.
    pub requires_url: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    UnknownAgentType(String),
    Construction(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAgentType(name) => write!(f, "unknown agent type '{}'", name),
            Self::Construction(reason) => write!(f, "agent construction failed: {}", reason),
        }
    }
}

impl std::error::Error for BuildError {}

/// Factory for agent instances, addressed by type name.
#[async_trait]
pub trait AgentBuilder: Send + Sync {
    fn list_agent_types(&self) -> Vec<AgentDescriptor>;

    async fn build(&self, agent_type: &str, params: &SessionParams)
        -> Result<Arc<dyn Agent>, BuildError>;

    fn describe(&self, agent_type: &str) -> Option<AgentDescriptor> {
        self.list_agent_types()
            .into_iter()
            .find(|d| d.name == agent_type)
    }
}

/// Constructor for a single agent type.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(&self, params: &SessionParams) -> Result<Arc<dyn Agent>, String>;
}

struct CatalogEntry {
    descriptor: AgentDescriptor,
    factory: Box<dyn AgentFactory>,
}

/// Registration table of agent types, populated at startup.
#[derive(Default)]
pub struct AgentCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent type. A later registration under the same name replaces the earlier one.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        requires_url: bool,
        factory: impl AgentFactory + 'static,
    ) -> &mut Self {
        let descriptor = AgentDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            requires_url,
        };
        self.entries.insert(
            name.to_string(),
            CatalogEntry {
                descriptor,
                factory: Box::new(factory),
            },
        );
        self
    }
}

#[async_trait]
impl AgentBuilder for AgentCatalog {
    fn list_agent_types(&self) -> Vec<AgentDescriptor> {
        self.entries.values().map(|e| e.descriptor.clone()).collect()
    }

    async fn build(
        &self,
        agent_type: &str,
        params: &SessionParams,
    ) -> Result<Arc<dyn Agent>, BuildError> {
        let entry = self
            .entries
            .get(agent_type)
            .ok_or_else(|| BuildError::UnknownAgentType(agent_type.to_string()))?;
        entry
            .factory
            .create(params)
            .await
            .map_err(BuildError::Construction)
    }

    fn describe(&self, agent_type: &str) -> Option<AgentDescriptor> {
        self.entries.get(agent_type).map(|e| e.descriptor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::EchoAgent;

    struct EchoFactory;

    #[async_trait]
    impl AgentFactory for EchoFactory {
        async fn create(&self, _params: &SessionParams) -> Result<Arc<dyn Agent>, String> {
            Ok(Arc::new(EchoAgent))
        }
    }

    struct FailingFactory;

    #[async_trait]
    impl AgentFactory for FailingFactory {
        async fn create(&self, _params: &SessionParams) -> Result<Arc<dyn Agent>, String> {
            Err("upstream unavailable".to_string())
        }
    }

    fn catalog() -> AgentCatalog {
        let mut catalog = AgentCatalog::new();
        catalog
            .register("assistant", "General chat", false, EchoFactory)
            .register("reader", "Chat about a web page", true, FailingFactory);
        catalog
    }

    #[test]
    fn test_lists_registered_types_sorted() {
        let names: Vec<_> = catalog()
            .list_agent_types()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["assistant", "reader"]);
    }

    #[test]
    fn test_describe_reports_url_requirement() {
        let catalog = catalog();
        assert!(catalog.describe("reader").unwrap().requires_url);
        assert!(!catalog.describe("assistant").unwrap().requires_url);
        assert!(catalog.describe("bogus").is_none());
    }

    #[tokio::test]
    async fn test_build_known_type() {
        let agent = catalog()
            .build("assistant", &SessionParams::new())
            .await
            .unwrap();
        let reply = agent.process("hi", &SessionId::new()).await.unwrap();
        assert_eq!(reply, "echo: hi");
    }

    #[tokio::test]
    async fn test_build_unknown_type() {
        let err = catalog()
            .build("bogus", &SessionParams::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err, BuildError::UnknownAgentType("bogus".to_string()));
    }

    #[tokio::test]
    async fn test_build_failure_is_construction_error() {
        let err = catalog()
            .build("reader", &SessionParams::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Construction(ref r) if r == "upstream unavailable"));
    }
}
