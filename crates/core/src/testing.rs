//! In-memory stand-ins for the port traits, shared by unit tests across crates.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::resource::{CatalogAgent, CatalogResource, ResourceKey, ResourceKind};
use crate::domain::subscription::{ChannelId, SubscriberId, Subscription, UpsertOutcome};
use crate::errors::{CredentialError, RemoteError, StoreError};
use crate::ports::{
    CatalogCredential, CatalogResourceClient, CatalogSubscriptionClient, ChatCredential,
    CredentialResolver, SubscriptionStore,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Catalog fake that records every call and keeps remote grants per token.
pub struct FakeCatalog {
    resources: Mutex<HashMap<String, CatalogResource>>,
    agents: Mutex<HashMap<String, CatalogAgent>>,
    lookup_failures: Mutex<HashMap<String, RemoteError>>,
    credential_lookup_failures: Mutex<HashMap<(String, String), RemoteError>>,
    subscribe_failure: Mutex<Option<RemoteError>>,
    unsubscribe_failure: Mutex<Option<RemoteError>>,
    grants: Mutex<HashSet<(String, String)>>,
    calls: Mutex<Vec<String>>,
    dataset_endpoint_serves_projects: bool,
    case_insensitive: bool,
}

impl Default for FakeCatalog {
    fn default() -> Self {
        Self {
            resources: Mutex::default(),
            agents: Mutex::default(),
            lookup_failures: Mutex::default(),
            credential_lookup_failures: Mutex::default(),
            subscribe_failure: Mutex::default(),
            unsubscribe_failure: Mutex::default(),
            grants: Mutex::default(),
            calls: Mutex::default(),
            dataset_endpoint_serves_projects: true,
            case_insensitive: false,
        }
    }
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the dataset endpoint answer 404 for projects.
    pub fn without_unified_lookup(mut self) -> Self {
        self.dataset_endpoint_serves_projects = false;
        self
    }

    /// Matches owners and ids regardless of case, the way data.world does.
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    pub fn with_dataset(self, owner: &str, id: &str, title: &str) -> Self {
        self.insert_resource(ResourceKind::Dataset, owner, id, title);
        self
    }

    pub fn with_project(self, owner: &str, id: &str, title: &str) -> Self {
        self.insert_resource(ResourceKind::Project, owner, id, title);
        self
    }

    pub fn with_agent(self, id: &str, display_name: &str) -> Self {
        guard(&self.agents).insert(
            id.to_owned(),
            CatalogAgent {
                id: id.to_owned(),
                display_name: display_name.to_owned(),
                avatar_url: None,
            },
        );
        self
    }

    pub fn fail_lookup(&self, key: &str, error: RemoteError) {
        guard(&self.lookup_failures).insert(key.to_owned(), error);
    }

    /// Fails lookups of `key` only for callers presenting `token`.
    pub fn fail_lookup_for(&self, token: &str, key: &str, error: RemoteError) {
        guard(&self.credential_lookup_failures).insert((token.to_owned(), key.to_owned()), error);
    }

    pub fn fail_subscribe(&self, error: RemoteError) {
        *guard(&self.subscribe_failure) = Some(error);
    }

    pub fn fail_unsubscribe(&self, error: RemoteError) {
        *guard(&self.unsubscribe_failure) = Some(error);
    }

    pub fn grant(&self, token: &str, key: &str) {
        guard(&self.grants).insert((token.to_owned(), key.to_owned()));
    }

    /// Drops a remote grant out of band, as when a user revokes it on data.world.
    pub fn revoke(&self, token: &str, key: &str) {
        guard(&self.grants).remove(&(token.to_owned(), key.to_owned()));
    }

    pub fn has_grant(&self, token: &str, key: &str) -> bool {
        guard(&self.grants).contains(&(token.to_owned(), key.to_owned()))
    }

    pub fn calls(&self) -> Vec<String> {
        guard(&self.calls).clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls().into_iter().filter(|call| call.starts_with(prefix)).collect()
    }

    fn insert_resource(&self, kind: ResourceKind, owner: &str, id: &str, title: &str) {
        guard(&self.resources).insert(
            format!("{owner}/{id}"),
            CatalogResource {
                kind,
                owner: Some(owner.to_owned()),
                id: id.to_owned(),
                title: title.to_owned(),
                description: None,
            },
        );
    }

    fn canonical(&self, key: String) -> String {
        if self.case_insensitive {
            key.to_ascii_lowercase()
        } else {
            key
        }
    }

    fn record(&self, call: String) {
        guard(&self.calls).push(call);
    }

    fn lookup_failure(&self, key: &str, credential: &CatalogCredential) -> Option<RemoteError> {
        if let Some(error) = guard(&self.lookup_failures).get(key) {
            return Some(error.clone());
        }
        guard(&self.credential_lookup_failures)
            .get(&(credential.expose().to_owned(), key.to_owned()))
            .cloned()
    }

    fn change_grant(
        &self,
        call: &str,
        key: String,
        credential: &CatalogCredential,
        add: bool,
    ) -> Result<(), RemoteError> {
        let key = self.canonical(key);
        self.record(format!("{call} {key}"));
        let failure =
            if add { guard(&self.subscribe_failure).clone() } else { guard(&self.unsubscribe_failure).clone() };
        if let Some(error) = failure {
            return Err(error);
        }
        let grant = (credential.expose().to_owned(), key);
        if add {
            guard(&self.grants).insert(grant);
        } else {
            guard(&self.grants).remove(&grant);
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogResourceClient for FakeCatalog {
    async fn get_dataset(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<CatalogResource, RemoteError> {
        let key = self.canonical(format!("{owner}/{id}"));
        self.record(format!("get_dataset {key}"));
        if let Some(error) = self.lookup_failure(&key, credential) {
            return Err(error);
        }
        match guard(&self.resources).get(&key) {
            Some(resource) if resource.kind == ResourceKind::Dataset => Ok(resource.clone()),
            Some(resource) if self.dataset_endpoint_serves_projects => Ok(resource.clone()),
            _ => Err(RemoteError::NotFound),
        }
    }

    async fn get_project(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<CatalogResource, RemoteError> {
        let key = self.canonical(format!("{owner}/{id}"));
        self.record(format!("get_project {key}"));
        if let Some(error) = self.lookup_failure(&key, credential) {
            return Err(error);
        }
        match guard(&self.resources).get(&key) {
            Some(resource) if resource.kind == ResourceKind::Project => Ok(resource.clone()),
            _ => Err(RemoteError::NotFound),
        }
    }

    async fn get_agent(
        &self,
        agent_id: &str,
        credential: &CatalogCredential,
    ) -> Result<CatalogAgent, RemoteError> {
        let agent_id = self.canonical(agent_id.to_owned());
        self.record(format!("get_agent {agent_id}"));
        if let Some(error) = self.lookup_failure(&agent_id, credential) {
            return Err(error);
        }
        guard(&self.agents).get(&agent_id).cloned().ok_or(RemoteError::NotFound)
    }
}

#[async_trait]
impl CatalogSubscriptionClient for FakeCatalog {
    async fn verify_subscription_exists(
        &self,
        resource_key: &ResourceKey,
        kind: ResourceKind,
        credential: &CatalogCredential,
    ) -> Result<bool, RemoteError> {
        self.record(format!("verify {kind} {resource_key}"));
        Ok(self.has_grant(credential.expose(), resource_key.as_str()))
    }

    async fn subscribe_to_dataset(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        self.change_grant("subscribe_to_dataset", format!("{owner}/{id}"), credential, true)
    }

    async fn subscribe_to_project(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        self.change_grant("subscribe_to_project", format!("{owner}/{id}"), credential, true)
    }

    async fn subscribe_to_account(
        &self,
        account: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        self.change_grant("subscribe_to_account", account.to_owned(), credential, true)
    }

    async fn unsubscribe_from_dataset(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        let key = self.canonical(format!("{owner}/{id}"));
        if !self.dataset_endpoint_serves_projects
            && guard(&self.resources).get(&key).is_some_and(|r| r.kind == ResourceKind::Project)
        {
            self.record(format!("unsubscribe_from_dataset {key}"));
            return Err(RemoteError::NotFound);
        }
        self.change_grant("unsubscribe_from_dataset", key, credential, false)
    }

    async fn unsubscribe_from_project(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        self.change_grant("unsubscribe_from_project", format!("{owner}/{id}"), credential, false)
    }

    async fn unsubscribe_from_account(
        &self,
        account: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        self.change_grant("unsubscribe_from_account", account.to_owned(), credential, false)
    }
}

/// Resolves `subscriber -> "dw-{subscriber}"` for linked subscribers and
/// `channel -> "xoxb-{channel}"` for known channels.
#[derive(Default)]
pub struct StaticCredentials {
    subscribers: Mutex<HashSet<String>>,
    channels: Mutex<HashSet<String>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriber(self, subscriber_id: &str) -> Self {
        guard(&self.subscribers).insert(subscriber_id.to_owned());
        self
    }

    pub fn with_channel(self, channel_id: &str) -> Self {
        guard(&self.channels).insert(channel_id.to_owned());
        self
    }

    pub fn token_for(subscriber_id: &str) -> String {
        format!("dw-{subscriber_id}")
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn credential_for_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<ChatCredential, CredentialError> {
        if guard(&self.channels).contains(&channel_id.0) {
            Ok(ChatCredential::new(format!("xoxb-{}", channel_id.0)))
        } else {
            Err(CredentialError::UnknownChannel { channel_id: channel_id.clone() })
        }
    }

    async fn credential_for_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<CatalogCredential, CredentialError> {
        if guard(&self.subscribers).contains(&subscriber_id.0) {
            Ok(CatalogCredential::new(Self::token_for(&subscriber_id.0)))
        } else {
            Err(CredentialError::NotLinked { subscriber_id: subscriber_id.clone() })
        }
    }
}

#[derive(Default)]
pub struct MemorySubscriptionStore {
    rows: Mutex<Vec<Subscription>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<Subscription> {
        guard(&self.rows).clone()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn find_by_resource_and_channel(
        &self,
        resource_key: &ResourceKey,
        channel_id: &ChannelId,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(guard(&self.rows)
            .iter()
            .find(|row| &row.resource_key == resource_key && &row.channel_id == channel_id)
            .cloned())
    }

    async fn find_all_by_resource(
        &self,
        resource_key: &ResourceKey,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(guard(&self.rows).iter().filter(|row| &row.resource_key == resource_key).cloned().collect())
    }

    async fn find_all_by_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Vec<Subscription>, StoreError> {
        let mut rows: Vec<_> =
            guard(&self.rows).iter().filter(|row| &row.channel_id == channel_id).cloned().collect();
        rows.sort_by(|left, right| left.resource_key.cmp(&right.resource_key));
        Ok(rows)
    }

    async fn upsert(
        &self,
        resource_key: &ResourceKey,
        channel_id: &ChannelId,
        subscriber_id: &SubscriberId,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut rows = guard(&self.rows);
        if let Some(row) = rows
            .iter_mut()
            .find(|row| &row.resource_key == resource_key && &row.channel_id == channel_id)
        {
            row.subscriber_id = subscriber_id.clone();
            return Ok(UpsertOutcome::Updated(row.clone()));
        }

        let row = Subscription {
            resource_key: resource_key.clone(),
            channel_id: channel_id.clone(),
            subscriber_id: subscriber_id.clone(),
            created_at: Utc::now(),
        };
        rows.push(row.clone());
        Ok(UpsertOutcome::Inserted(row))
    }

    async fn delete(
        &self,
        resource_key: &ResourceKey,
        channel_id: &ChannelId,
    ) -> Result<bool, StoreError> {
        let mut rows = guard(&self.rows);
        let before = rows.len();
        rows.retain(|row| !(&row.resource_key == resource_key && &row.channel_id == channel_id));
        Ok(rows.len() != before)
    }

    async fn delete_all_for_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<u64, StoreError> {
        let mut rows = guard(&self.rows);
        let before = rows.len();
        rows.retain(|row| &row.subscriber_id != subscriber_id);
        Ok((before - rows.len()) as u64)
    }
}
