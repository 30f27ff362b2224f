//! Error types for composition application

use thiserror::Error;

/// Raw options could not be bound to an options shape.
///
/// Every variant carries the dotted path of the offending field, e.g.
/// `rcon.port`. The root of the mapping is reported as `(root)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsBindingError {
    #[error("missing required option `{path}`")]
    MissingField { path: String },

    #[error("unknown option `{path}`")]
    UnknownField { path: String },

    #[error("option `{path}` must be {expected}")]
    TypeMismatch { path: String, expected: &'static str },

    #[error("options at `{path}` must be a mapping")]
    NotAMapping { path: String },

    #[error("options do not fit `{target}`: {message}")]
    Deserialize { target: &'static str, message: String },
}

/// Failures of the interactive protocol between a run and its front end.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The front end sent a packet kind the protocol does not define.
    #[error("unsupported packet kind `{0}`")]
    UnsupportedOp(String),

    #[error("malformed packet: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("answer for prompt {got} arrived while prompt {expected} was pending")]
    UnexpectedAnswer { expected: u64, got: u64 },

    #[error("front end disconnected")]
    Disconnected,

    #[error("transport error: {0}")]
    Transport(String),

    /// A prompt could not be answered; the producer is released with this error.
    #[error("prompt \"{prompt}\" could not be answered: {reason}")]
    PromptUnanswerable { prompt: String, reason: String },
}

impl ProtocolError {
    /// Whether the error ends the drain loop of the run.
    ///
    /// An unanswerable prompt only fails the composition that asked it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::PromptUnanswerable { .. })
    }
}

/// Failure while creating, applying or writing a single composition.
#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("options binding failed: {0}")]
    OptionsBinding(#[from] OptionsBindingError),

    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    #[error("answer \"{answer}\" is not valid for \"{prompt}\": {reason}")]
    InvalidAnswer {
        prompt: String,
        answer: String,
        reason: String,
    },

    #[error("composition `{0}` cannot be created by this factory")]
    Creation(String),

    #[error("write failed: {0}")]
    Write(String),
}

impl CompositionError {
    /// Whether the failure came from an unanswerable prompt.
    pub fn is_prompt_unanswerable(&self) -> bool {
        matches!(
            self,
            CompositionError::Protocol(ProtocolError::PromptUnanswerable { .. })
        )
    }
}

/// Outcome of one requested composition that did not apply.
///
/// None of these abort a pipeline run; they are collected into the report.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Factory not found for composition {0}.")]
    FactoryNotFound(String),

    #[error("{name} is registered but not applicable for factory {factory}.")]
    KeyNotFound { name: String, factory: String },

    #[error("The {0} composition is applied by default, it cannot be defined explicitly.")]
    DefaultCompositionRejected(String),

    #[error("The composition \"{name}\" is unique, it cannot perform together with \"{conflicting}\", which is also unique.")]
    SingleCompositionConflict { name: String, conflicting: String },

    #[error("{0}")]
    Failed(#[from] CompositionError),

    #[error("composition worker aborted: {0}")]
    WorkerAborted(String),
}

impl ItemError {
    /// Stable machine-readable code used in serialized reports.
    pub fn code(&self) -> &'static str {
        match self {
            ItemError::FactoryNotFound(_) => "factory_not_found",
            ItemError::KeyNotFound { .. } => "key_not_found",
            ItemError::DefaultCompositionRejected(_) => "default_composition_rejected",
            ItemError::SingleCompositionConflict { .. } => "single_composition_conflict",
            ItemError::Failed(CompositionError::OptionsBinding(_)) => "options_binding_error",
            ItemError::Failed(error) if error.is_prompt_unanswerable() => "prompt_unanswerable",
            ItemError::Failed(_) => "composition_failed",
            ItemError::WorkerAborted(_) => "worker_aborted",
        }
    }
}

/// Errors that prevent a pipeline run from starting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("a composition run is already in progress for server {0}")]
    RunInProgress(String),

    #[error("server {server} is {state} and cannot accept compositions yet")]
    NotRegistered {
        server: String,
        state: harbor_types::ServerState,
    },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
pub type CompositionResult<T> = Result<T, CompositionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_error_messages() {
        let err = ItemError::SingleCompositionConflict {
            name: "port-mapping".to_string(),
            conflicting: "host-network".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "The composition \"port-mapping\" is unique, it cannot perform together with \"host-network\", which is also unique."
        );
        assert_eq!(err.code(), "single_composition_conflict");
    }

    #[test]
    fn test_prompt_unanswerable_code() {
        let err = ItemError::Failed(CompositionError::Protocol(ProtocolError::PromptUnanswerable {
            prompt: "Host port".to_string(),
            reason: "no input".to_string(),
        }));
        assert_eq!(err.code(), "prompt_unanswerable");
    }

    #[test]
    fn test_fatal_protocol_errors() {
        assert!(ProtocolError::UnsupportedOp("ping".to_string()).is_fatal());
        assert!(ProtocolError::Disconnected.is_fatal());
        assert!(!ProtocolError::PromptUnanswerable {
            prompt: "p".to_string(),
            reason: "r".to_string(),
        }
        .is_fatal());
    }
}
