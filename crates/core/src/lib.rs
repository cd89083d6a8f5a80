pub mod config;
pub mod domain;
pub mod errors;
pub mod ports;
pub mod subscriptions;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use domain::event::{ChangeEvent, ChangeKind, EventEntity};
pub use domain::resource::{
    CatalogAgent, CatalogResource, ResourceKey, ResourceKind, ResourceRef,
};
pub use domain::subscription::{
    ChannelId, SubscriberId, Subscription, SubscriptionStatus, UpsertOutcome,
};
pub use errors::{CredentialError, DomainError, RemoteError, StoreError, SubscriptionError};
pub use ports::{
    CatalogCredential, CatalogResourceClient, CatalogSubscriptionClient, ChatCredential,
    CredentialResolver, SubscriptionStore,
};
pub use subscriptions::{
    RemoteRevocation, SubscribeOutcome, SubscriptionReconciler, UnsubscribeOutcome,
};
