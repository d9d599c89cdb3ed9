//! Error types for accountability-hub

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Proof expired: {0}")]
    ProofExpired(String),

    #[error("Duplicate vote: {0}")]
    DuplicateVote(String),

    #[error("Already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Recoverable conditions the caller should render to the user,
    /// as opposed to infrastructure faults.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            HubError::NotFound(_)
                | HubError::InvalidReference(_)
                | HubError::Forbidden(_)
                | HubError::ProofExpired(_)
                | HubError::DuplicateVote(_)
                | HubError::AlreadyResolved(_)
                | HubError::InvalidInput(_)
        )
    }
}

impl From<diesel::r2d2::PoolError> for HubError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        HubError::Pool(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_classification() {
        assert!(HubError::DuplicateVote("p".into()).is_user_facing());
        assert!(HubError::ProofExpired("p".into()).is_user_facing());
        assert!(!HubError::Internal("boom".into()).is_user_facing());
        assert!(!HubError::Database(diesel::result::Error::NotFound).is_user_facing());
    }
}
