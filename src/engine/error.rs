use thiserror::Error;
use ulid::Ulid;

/// Errors raised by the pure availability and pricing functions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown plan code: {0}")]
    UnknownPlanCode(String),
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),
    #[error("pricing rule {rule_id} cannot be applied: {reason}")]
    RuleNotApplicable { rule_id: Ulid, reason: String },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl EngineError {
    /// Stable machine-readable kind, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) | EngineError::UnknownPlanCode(_) => "invalid_input",
            EngineError::MissingConfiguration(_) => "missing_configuration",
            EngineError::RuleNotApplicable { .. } => "pricing",
            EngineError::LimitExceeded(_) => "limit_exceeded",
        }
    }
}

pub(crate) fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidInput(msg.into())
}
