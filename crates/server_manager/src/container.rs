//! Container collaborator used to inspect a server's backing container

use crate::error::InspectionError;
use async_trait::async_trait;
use harbor_types::{current_timestamp, RuntimeFacts, Server};

#[async_trait]
pub trait ContainerInspector: Send + Sync {
    /// Reads the runtime facts of the container backing `server`.
    async fn inspect(&self, server: &Server) -> Result<RuntimeFacts, InspectionError>;
}

/// Reports the server's own configuration as its runtime facts.
///
/// Used when no container engine is configured.
#[derive(Debug, Clone)]
pub struct StaticInspector {
    status: String,
    memory_limit: Option<u64>,
    cpu_limit: Option<f64>,
}

impl StaticInspector {
    pub fn new() -> Self {
        Self {
            status: "created".to_string(),
            memory_limit: None,
            cpu_limit: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_limits(mut self, memory_limit: Option<u64>, cpu_limit: Option<f64>) -> Self {
        self.memory_limit = memory_limit;
        self.cpu_limit = cpu_limit;
        self
    }
}

impl Default for StaticInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerInspector for StaticInspector {
    async fn inspect(&self, server: &Server) -> Result<RuntimeFacts, InspectionError> {
        Ok(RuntimeFacts {
            status: self.status.clone(),
            ports: server.ports.clone(),
            memory_limit: self.memory_limit,
            cpu_limit: self.cpu_limit,
            inspected_at: current_timestamp(),
        })
    }
}

/// Inspector for hosts without a container engine; every call fails.
#[derive(Debug, Clone, Default)]
pub struct UnavailableInspector {
    reason: String,
}

impl UnavailableInspector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl ContainerInspector for UnavailableInspector {
    async fn inspect(&self, _server: &Server) -> Result<RuntimeFacts, InspectionError> {
        Err(InspectionError::Unavailable(self.reason.clone()))
    }
}
