use thiserror::Error;

use crate::domain::subscription::{ChannelId, SubscriberId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid resource reference: {0}")]
    InvalidResourceRef(String),
}

/// Failure classes for calls to the catalog or chat platform.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote resource not found")]
    NotFound,
    #[error("remote call forbidden")]
    Forbidden,
    #[error("remote credential rejected")]
    Unauthorized,
    #[error("remote service unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected remote response: {0}")]
    Unexpected(String),
}

impl RemoteError {
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            408 | 429 | 500..=599 => Self::Unavailable(detail.into()),
            _ => Self::Unexpected(detail.into()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("subscription store failure: {0}")]
    Backend(String),
    #[error("subscription store decode failure: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("subscriber `{subscriber_id}` has not linked a data.world account")]
    NotLinked { subscriber_id: SubscriberId },
    #[error("no messaging credential is known for channel `{channel_id}`")]
    UnknownChannel { channel_id: ChannelId },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by subscribe/unsubscribe. `AlreadyActive` and `NotFound` are
/// outcomes, not errors, and live on the outcome enums instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("invalid or inaccessible resource: {0}")]
    InvalidResource(String),
    #[error("permission denied by data.world")]
    PermissionDenied,
    #[error("data.world is unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("subscriber `{0}` has no linked data.world account")]
    AccountNotLinked(SubscriberId),
    #[error("subscription storage failure: {0}")]
    Storage(String),
}

impl SubscriptionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidResource(_) => {
                "That doesn't look like a valid or accessible data.world dataset, project, or account."
            }
            Self::PermissionDenied => {
                "data.world refused the request. Make sure your account has access to that resource."
            }
            Self::RemoteUnavailable(_) => {
                "data.world is temporarily unavailable. Please try again later."
            }
            Self::AccountNotLinked(_) => {
                "You need to link your data.world account before managing subscriptions."
            }
            Self::Storage(_) => "Something went wrong saving the subscription. Please retry shortly.",
        }
    }

    /// `Unexpected` only carries requests the catalog answered and refused
    /// (a 4xx outside 401/403/404); clients report transport and decode
    /// failures as `Unavailable`.
    pub fn from_remote(error: RemoteError, subscriber_id: &SubscriberId) -> Self {
        match error {
            RemoteError::NotFound => Self::InvalidResource("not found".to_owned()),
            RemoteError::Unexpected(detail) => Self::InvalidResource(detail),
            RemoteError::Forbidden => Self::PermissionDenied,
            RemoteError::Unauthorized => Self::AccountNotLinked(subscriber_id.clone()),
            RemoteError::Unavailable(detail) => Self::RemoteUnavailable(detail),
        }
    }
}

impl From<StoreError> for SubscriptionError {
    fn from(value: StoreError) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<CredentialError> for SubscriptionError {
    fn from(value: CredentialError) -> Self {
        match value {
            CredentialError::NotLinked { subscriber_id } => Self::AccountNotLinked(subscriber_id),
            CredentialError::UnknownChannel { channel_id } => {
                Self::Storage(format!("unknown channel `{channel_id}`"))
            }
            CredentialError::Store(error) => Self::from(error),
        }
    }
}
