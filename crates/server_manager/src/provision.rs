//! Result of a full provisioning request

use composition_system::PipelineReport;
use harbor_types::{Server, ServerState};
use serde::Serialize;

/// Overall outcome of provisioning.
///
/// Both variants mean the server was created; `Created` servers are
/// registered but their container could not be inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStatus {
    Ready,
    Created,
}

#[derive(Debug, Serialize)]
pub struct ProvisionReport {
    pub server: Server,
    /// Why the container inspection failed, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspection_error: Option<String>,
    /// Absent when the composition run could not start
    pub compositions: Option<PipelineReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ProvisionReport {
    pub fn status(&self) -> ProvisionStatus {
        match self.server.state {
            ServerState::Ready => ProvisionStatus::Ready,
            _ => ProvisionStatus::Created,
        }
    }

    /// Human-readable notices that did not prevent creation.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(error) = &self.inspection_error {
            warnings.push(format!("Container inspection failed: {error}"));
        }
        if let Some(error) = self
            .compositions
            .as_ref()
            .and_then(|report| report.protocol_error.as_ref())
        {
            warnings.push(format!("Front end protocol error: {error}"));
        }
        warnings.extend(self.notes.iter().cloned());
        warnings
    }

    /// Whether every requested composition was applied.
    pub fn compositions_applied(&self) -> bool {
        self.compositions.as_ref().is_some_and(PipelineReport::is_success)
    }
}
