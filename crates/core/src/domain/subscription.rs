use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resource::ResourceKey;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One channel's interest in one resource. Unique per `(resource_key, channel_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub resource_key: ResourceKey,
    pub channel_id: ChannelId,
    pub subscriber_id: SubscriberId,
    pub created_at: DateTime<Utc>,
}

/// Result of a create-or-reassign write against the local store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(Subscription),
    Updated(Subscription),
}

impl UpsertOutcome {
    pub fn subscription(&self) -> &Subscription {
        match self {
            Self::Inserted(subscription) | Self::Updated(subscription) => subscription,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub local: Option<Subscription>,
    /// True when the local row's subscriber holds no other row for this resource,
    /// so removing it leaves their remote grant orphaned.
    pub sole_remote_subscriber: bool,
}
