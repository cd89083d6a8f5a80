//! Fan-out of catalog change events to subscribed channels.
//!
//! Each channel runs its own pipeline (credential, subscription row, resource
//! fetch, format, send). A failing channel is logged and skipped; it never
//! stops delivery to the others and never fails the dispatch as a whole.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use dwslack_core::domain::event::ChangeEvent;
use dwslack_core::domain::subscription::ChannelId;
use dwslack_core::errors::{CredentialError, DomainError, RemoteError, StoreError};
use dwslack_core::ports::{
    CatalogResourceClient, ChatCredential, CredentialResolver, SubscriptionStore,
};
use dwslack_core::subscriptions::lookup::resolve_resource;

use crate::blocks::{MessageTemplate, NotificationFormatter};

#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn send_message(
        &self,
        credential: &ChatCredential,
        channel_id: &ChannelId,
        message: &MessageTemplate,
    ) -> Result<(), RemoteError>;

    async fn send_response(
        &self,
        response_url: &str,
        message: &MessageTemplate,
    ) -> Result<(), RemoteError>;
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("channel is no longer subscribed")]
    NotSubscribed,
    #[error("resource fetch failed: {0}")]
    Fetch(RemoteError),
    #[error("send failed: {0}")]
    Send(RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    InvalidKey(#[from] DomainError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<ChannelId>,
    pub failed: Vec<ChannelId>,
}

pub struct NotificationDispatcher {
    catalog: Arc<dyn CatalogResourceClient>,
    store: Arc<dyn SubscriptionStore>,
    credentials: Arc<dyn CredentialResolver>,
    messaging: Arc<dyn MessagingClient>,
    formatter: Arc<dyn NotificationFormatter>,
    max_concurrent_deliveries: usize,
}

impl NotificationDispatcher {
    pub fn new(
        catalog: Arc<dyn CatalogResourceClient>,
        store: Arc<dyn SubscriptionStore>,
        credentials: Arc<dyn CredentialResolver>,
        messaging: Arc<dyn MessagingClient>,
        formatter: Arc<dyn NotificationFormatter>,
    ) -> Self {
        Self { catalog, store, credentials, messaging, formatter, max_concurrent_deliveries: 8 }
    }

    pub fn with_max_concurrent_deliveries(mut self, limit: usize) -> Self {
        self.max_concurrent_deliveries = limit.max(1);
        self
    }

    /// Every channel subscribed to the event's resource.
    pub async fn channels_for(&self, event: &ChangeEvent) -> Result<Vec<ChannelId>, StoreError> {
        let rows = self.store.find_all_by_resource(&event.resource_key).await?;
        Ok(rows.into_iter().map(|row| row.channel_id).collect())
    }

    pub async fn dispatch(&self, event: &ChangeEvent, channel_ids: &[ChannelId]) -> DispatchReport {
        if channel_ids.is_empty() {
            debug!(
                event_name = "notification.dispatch.no_channels",
                resource_key = %event.resource_key,
                "no subscribed channels; event dropped"
            );
            return DispatchReport::default();
        }

        let results: Vec<(ChannelId, Result<(), DeliveryError>)> =
            stream::iter(channel_ids.iter().cloned())
                .map(|channel_id| async move {
                    let result = self.deliver(event, &channel_id).await;
                    (channel_id, result)
                })
                .buffer_unordered(self.max_concurrent_deliveries)
                .collect()
                .await;

        let mut report = DispatchReport::default();
        for (channel_id, result) in results {
            match result {
                Ok(()) => report.delivered.push(channel_id),
                Err(error) => {
                    warn!(
                        event_name = "notification.delivery.failed",
                        resource_key = %event.resource_key,
                        channel_id = %channel_id,
                        error = %error,
                        "notification not delivered to channel"
                    );
                    report.failed.push(channel_id);
                }
            }
        }

        info!(
            event_name = "notification.dispatch.completed",
            resource_key = %event.resource_key,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "change event fanned out"
        );
        report
    }

    /// Resolves the channels itself, then dispatches. Store failures drop the event.
    pub async fn dispatch_to_subscribers(&self, event: &ChangeEvent) -> DispatchReport {
        match self.channels_for(event).await {
            Ok(channel_ids) => self.dispatch(event, &channel_ids).await,
            Err(error) => {
                warn!(
                    event_name = "notification.dispatch.channel_lookup_failed",
                    resource_key = %event.resource_key,
                    error = %error,
                    "could not resolve subscribed channels"
                );
                DispatchReport::default()
            }
        }
    }

    async fn deliver(&self, event: &ChangeEvent, channel_id: &ChannelId) -> Result<(), DeliveryError> {
        let chat_credential = self.credentials.credential_for_channel(channel_id).await?;

        let subscription = self
            .store
            .find_by_resource_and_channel(&event.resource_key, channel_id)
            .await?
            .ok_or(DeliveryError::NotSubscribed)?;
        let catalog_credential =
            self.credentials.credential_for_subscriber(&subscription.subscriber_id).await?;

        let target = event.resource_key.to_ref()?;
        let resource = resolve_resource(self.catalog.as_ref(), &target, &catalog_credential)
            .await
            .map_err(DeliveryError::Fetch)?;
        let owner_id = resource.owner.as_deref().unwrap_or(&resource.id);
        let owner = self
            .catalog
            .get_agent(owner_id, &catalog_credential)
            .await
            .map_err(DeliveryError::Fetch)?;

        let message = self.formatter.format(event, &resource, &owner);
        self.messaging
            .send_message(&chat_credential, channel_id, &message)
            .await
            .map_err(DeliveryError::Send)?;

        debug!(
            event_name = "notification.delivery.sent",
            resource_key = %event.resource_key,
            channel_id = %channel_id,
            "notification delivered"
        );
        Ok(())
    }
}
