//! Subscription reconciliation between the local store and data.world.
//!
//! data.world is authoritative for "does this user hold a subscription";
//! the local store is authoritative for "which channels want notifications".

pub mod lookup;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::resource::{CatalogResource, ResourceKey, ResourceRef};
use crate::domain::subscription::{
    ChannelId, SubscriberId, Subscription, SubscriptionStatus, UpsertOutcome,
};
use crate::errors::{RemoteError, SubscriptionError};
use crate::ports::{
    CatalogResourceClient, CatalogSubscriptionClient, CredentialResolver, SubscriptionStore,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created(CatalogResource),
    AlreadyActive(CatalogResource),
}

impl SubscribeOutcome {
    pub fn resource(&self) -> &CatalogResource {
        match self {
            Self::Created(resource) | Self::AlreadyActive(resource) => resource,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteRevocation {
    Revoked,
    /// Other channels still rely on the subscriber's grant.
    Retained,
    /// The remote delete failed; the local row was removed regardless.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Removed { resource_key: ResourceKey, remote: RemoteRevocation },
    NotFound { resource_key: ResourceKey },
}

pub struct SubscriptionReconciler {
    catalog: Arc<dyn CatalogResourceClient>,
    remote: Arc<dyn CatalogSubscriptionClient>,
    store: Arc<dyn SubscriptionStore>,
    credentials: Arc<dyn CredentialResolver>,
}

impl SubscriptionReconciler {
    pub fn new(
        catalog: Arc<dyn CatalogResourceClient>,
        remote: Arc<dyn CatalogSubscriptionClient>,
        store: Arc<dyn SubscriptionStore>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self { catalog, remote, store, credentials }
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    pub async fn subscribe(
        &self,
        target: &ResourceRef,
        channel_id: &ChannelId,
        subscriber_id: &SubscriberId,
    ) -> Result<SubscribeOutcome, SubscriptionError> {
        let credential = self.credentials.credential_for_subscriber(subscriber_id).await?;

        let resource = lookup::resolve_resource(self.catalog.as_ref(), target, &credential)
            .await
            .map_err(|error| {
                info!(
                    event_name = "subscription.subscribe.lookup_failed",
                    resource_key = %target.key(),
                    channel_id = %channel_id,
                    error = %error,
                    "resource lookup failed; no state touched"
                );
                SubscriptionError::from_remote(error, subscriber_id)
            })?;
        let resource_key = resource.key();

        let remote_existed = self
            .remote
            .verify_subscription_exists(&resource_key, resource.kind, &credential)
            .await
            .map_err(|error| SubscriptionError::from_remote(error, subscriber_id))?;

        if !remote_existed {
            lookup::create_remote(self.remote.as_ref(), &resource, &credential).await.map_err(
                |error| {
                    warn!(
                        event_name = "subscription.subscribe.remote_create_failed",
                        resource_key = %resource_key,
                        channel_id = %channel_id,
                        error = %error,
                        "remote subscription create failed"
                    );
                    SubscriptionError::from_remote(error, subscriber_id)
                },
            )?;
        }

        let local = self.store.find_by_resource_and_channel(&resource_key, channel_id).await?;

        let outcome = match (remote_existed, local) {
            (true, Some(_)) => SubscribeOutcome::AlreadyActive(resource),
            (false, Some(existing)) => {
                if existing.subscriber_id != *subscriber_id {
                    info!(
                        event_name = "subscription.subscribe.reassigned",
                        resource_key = %resource_key,
                        channel_id = %channel_id,
                        previous_subscriber = %existing.subscriber_id,
                        subscriber_id = %subscriber_id,
                        "reassigning channel subscription to current caller"
                    );
                    self.store.upsert(&resource_key, channel_id, subscriber_id).await?;
                }
                SubscribeOutcome::Created(resource)
            }
            (_, None) => match self.store.upsert(&resource_key, channel_id, subscriber_id).await? {
                UpsertOutcome::Inserted(_) => SubscribeOutcome::Created(resource),
                UpsertOutcome::Updated(_) => {
                    debug!(
                        event_name = "subscription.subscribe.lost_race",
                        resource_key = %resource_key,
                        channel_id = %channel_id,
                        "another caller created the row first"
                    );
                    SubscribeOutcome::AlreadyActive(resource)
                }
            },
        };

        info!(
            event_name = "subscription.subscribe.completed",
            resource_key = %resource_key,
            channel_id = %channel_id,
            subscriber_id = %subscriber_id,
            remote_existed,
            already_active = matches!(outcome, SubscribeOutcome::AlreadyActive(_)),
            "subscribe reconciled"
        );
        Ok(outcome)
    }

    pub async fn subscription_status(
        &self,
        resource_key: &ResourceKey,
        channel_id: &ChannelId,
    ) -> Result<SubscriptionStatus, SubscriptionError> {
        let all = self.store.find_all_by_resource(resource_key).await?;
        let local = all.iter().find(|row| &row.channel_id == channel_id).cloned();
        let sole_remote_subscriber = match &local {
            Some(row) => {
                all.iter().filter(|other| other.subscriber_id == row.subscriber_id).count() == 1
            }
            None => false,
        };
        Ok(SubscriptionStatus { local, sole_remote_subscriber })
    }

    pub async fn unsubscribe(
        &self,
        target: &ResourceRef,
        channel_id: &ChannelId,
    ) -> Result<UnsubscribeOutcome, SubscriptionError> {
        let resource_key = target.key();
        let status = self.subscription_status(&resource_key, channel_id).await?;
        let Some(local) = status.local else {
            debug!(
                event_name = "subscription.unsubscribe.not_found",
                resource_key = %resource_key,
                channel_id = %channel_id,
                "no local subscription in channel"
            );
            return Ok(UnsubscribeOutcome::NotFound { resource_key });
        };

        let remote = if status.sole_remote_subscriber {
            self.revoke_remote(target, &local).await
        } else {
            RemoteRevocation::Retained
        };

        if !self.store.delete(&resource_key, channel_id).await? {
            debug!(
                event_name = "subscription.unsubscribe.already_removed",
                resource_key = %resource_key,
                channel_id = %channel_id,
                "row was removed concurrently"
            );
        }

        info!(
            event_name = "subscription.unsubscribe.completed",
            resource_key = %resource_key,
            channel_id = %channel_id,
            remote = ?remote,
            "unsubscribe reconciled"
        );
        Ok(UnsubscribeOutcome::Removed { resource_key, remote })
    }

    pub async fn list(&self, channel_id: &ChannelId) -> Result<Vec<Subscription>, SubscriptionError> {
        Ok(self.store.find_all_by_channel(channel_id).await?)
    }

    /// Drops every channel row owned by a subscriber whose remote access is gone.
    pub async fn forget_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<u64, SubscriptionError> {
        let removed = self.store.delete_all_for_subscriber(subscriber_id).await?;
        info!(
            event_name = "subscription.subscriber.forgotten",
            subscriber_id = %subscriber_id,
            removed,
            "removed subscriptions for revoked subscriber"
        );
        Ok(removed)
    }

    /// Best effort: failures are reported in the outcome, never returned.
    async fn revoke_remote(&self, target: &ResourceRef, local: &Subscription) -> RemoteRevocation {
        let credential = match self.credentials.credential_for_subscriber(&local.subscriber_id).await
        {
            Ok(credential) => credential,
            Err(error) => {
                warn!(
                    event_name = "subscription.unsubscribe.credential_missing",
                    resource_key = %local.resource_key,
                    subscriber_id = %local.subscriber_id,
                    error = %error,
                    "cannot revoke remote subscription without subscriber credential"
                );
                return RemoteRevocation::Failed(error.to_string());
            }
        };

        // The stored key carries the catalog's spelling, which may differ from
        // what the user typed.
        let stored = local.resource_key.to_ref().unwrap_or_else(|_| target.clone());
        let kind = match target.kind() {
            Some(kind) => Some(kind),
            None if stored.is_account() => None,
            None => lookup::resolve_resource(self.catalog.as_ref(), &stored, &credential)
                .await
                .map(|resource| resource.kind)
                .ok(),
        };

        match lookup::delete_remote(self.remote.as_ref(), &stored, kind, &credential).await {
            Ok(()) => RemoteRevocation::Revoked,
            Err(error) => {
                warn!(
                    event_name = "subscription.unsubscribe.remote_delete_failed",
                    resource_key = %local.resource_key,
                    channel_id = %local.channel_id,
                    error = %error,
                    "remote unsubscribe failed; removing local row anyway"
                );
                RemoteRevocation::Failed(describe_remote_failure(&error))
            }
        }
    }
}

fn describe_remote_failure(error: &RemoteError) -> String {
    match error {
        RemoteError::NotFound => "subscription not found on data.world".to_owned(),
        other => other.to_string(),
    }
}
