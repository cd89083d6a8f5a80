use thiserror::Error;

use dwslack_core::errors::{CredentialError, StoreError};

pub mod credential;
pub mod subscription;

pub use credential::SqlCredentialRepository;
pub use subscription::SqlSubscriptionStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

impl From<RepositoryError> for CredentialError {
    fn from(value: RepositoryError) -> Self {
        CredentialError::Store(value.into())
    }
}
