use thiserror::Error;

/// Errors surfaced by the check engine and its collaborators.
///
/// Variants carry owned strings so results can be cloned freely as they fan
/// through concurrent check-groups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RebacError {
    #[error("unknown namespace {0:?}")]
    NamespaceNotFound(String),

    #[error("unknown relation {relation:?} in namespace {namespace:?}")]
    RelationNotFound { namespace: String, relation: String },

    #[error("malformed relation tuple: {0}")]
    MalformedTuple(String),

    #[error("invalid namespace definition: {0}")]
    InvalidNamespace(String),

    #[error("tuple store query failed: {0}")]
    Store(String),

    #[error("check was cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for RebacError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RebacError>;
