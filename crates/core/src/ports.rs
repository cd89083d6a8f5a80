//! Capability interfaces the subscription core consumes.
//!
//! Every call takes its credential explicitly; implementations must not keep
//! per-user auth state on a shared client.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::domain::resource::{CatalogAgent, CatalogResource, ResourceKey, ResourceKind};
use crate::domain::subscription::{ChannelId, SubscriberId, Subscription, UpsertOutcome};
use crate::errors::{CredentialError, RemoteError, StoreError};

/// A data.world access token belonging to one subscriber.
#[derive(Clone, Debug)]
pub struct CatalogCredential(SecretString);

impl CatalogCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// A Slack bot token for the workspace that owns a channel.
#[derive(Clone, Debug)]
pub struct ChatCredential(SecretString);

impl ChatCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

#[async_trait]
pub trait CatalogResourceClient: Send + Sync {
    /// The dataset endpoint also answers for projects; the returned record
    /// declares its own kind.
    async fn get_dataset(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<CatalogResource, RemoteError>;

    async fn get_project(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<CatalogResource, RemoteError>;

    async fn get_agent(
        &self,
        agent_id: &str,
        credential: &CatalogCredential,
    ) -> Result<CatalogAgent, RemoteError>;
}

#[async_trait]
pub trait CatalogSubscriptionClient: Send + Sync {
    async fn verify_subscription_exists(
        &self,
        resource_key: &ResourceKey,
        kind: ResourceKind,
        credential: &CatalogCredential,
    ) -> Result<bool, RemoteError>;

    async fn subscribe_to_dataset(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError>;

    async fn subscribe_to_project(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError>;

    async fn subscribe_to_account(
        &self,
        account: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError>;

    async fn unsubscribe_from_dataset(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError>;

    async fn unsubscribe_from_project(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError>;

    async fn unsubscribe_from_account(
        &self,
        account: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn credential_for_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<ChatCredential, CredentialError>;

    async fn credential_for_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<CatalogCredential, CredentialError>;
}

/// Durable `(resource, channel) -> subscriber` mapping. Implementations must
/// enforce uniqueness of `(resource_key, channel_id)`.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find_by_resource_and_channel(
        &self,
        resource_key: &ResourceKey,
        channel_id: &ChannelId,
    ) -> Result<Option<Subscription>, StoreError>;

    async fn find_all_by_resource(
        &self,
        resource_key: &ResourceKey,
    ) -> Result<Vec<Subscription>, StoreError>;

    async fn find_all_by_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Vec<Subscription>, StoreError>;

    /// Create-or-reassign in one round trip.
    async fn upsert(
        &self,
        resource_key: &ResourceKey,
        channel_id: &ChannelId,
        subscriber_id: &SubscriberId,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Returns whether a row was removed.
    async fn delete(
        &self,
        resource_key: &ResourceKey,
        channel_id: &ChannelId,
    ) -> Result<bool, StoreError>;

    async fn delete_all_for_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<u64, StoreError>;
}
