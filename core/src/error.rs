use thiserror::Error;

/// Which logical endpoint of a request an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    Source,
    Target,
}

impl std::fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointRole::Source => f.write_str("source"),
            EndpointRole::Target => f.write_str("target"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KPathsError {
    #[error("malformed constraint specification: {0}")]
    ConstraintParse(String),
    #[error("{role} not found: {detail}")]
    EndpointNotFound { role: EndpointRole, detail: String },
    #[error("invalid cost on edge {edge}: {reason}")]
    InvalidCost { edge: String, reason: String },
    #[error("path consumer is gone")]
    ConsumerGone,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, KPathsError>;
