use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Dataset,
    Project,
    Account,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Project => "project",
            Self::Account => "account",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to a catalog resource as typed by a user or shared as a link.
///
/// Two-segment references (`owner/id`) start out with an unresolved kind: the
/// catalog decides whether they name a dataset or a project. Single-segment
/// references always name an account and never carry an owner.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    owner: Option<String>,
    id: String,
    kind: Option<ResourceKind>,
}

impl ResourceRef {
    pub fn account(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = validate_segment("id", id.into())?;
        Ok(Self { owner: None, id, kind: Some(ResourceKind::Account) })
    }

    pub fn owned(owner: impl Into<String>, id: impl Into<String>) -> Result<Self, DomainError> {
        let owner = validate_segment("owner", owner.into())?;
        let id = validate_segment("id", id.into())?;
        Ok(Self { owner: Some(owner), id, kind: None })
    }

    /// Pins the kind of an owned reference. Account refs keep their kind.
    pub fn with_kind(mut self, kind: ResourceKind) -> Result<Self, DomainError> {
        match (&self.owner, kind) {
            (None, ResourceKind::Account) => Ok(self),
            (None, other) => Err(DomainError::InvalidResourceRef(format!(
                "`{}` has no owner and cannot be a {other}",
                self.id
            ))),
            (Some(_), ResourceKind::Account) => Err(DomainError::InvalidResourceRef(format!(
                "`{}` has an owner and cannot be an account",
                self.key()
            ))),
            (Some(_), other) => {
                self.kind = Some(other);
                Ok(self)
            }
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> Option<ResourceKind> {
        self.kind
    }

    pub fn is_account(&self) -> bool {
        self.owner.is_none()
    }

    pub fn key(&self) -> ResourceKey {
        match &self.owner {
            Some(owner) => ResourceKey::new(format!("{owner}/{}", self.id)),
            None => ResourceKey::new(self.id.as_str()),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// `owner/id` for datasets and projects, bare `id` for accounts.
///
/// data.world owners and ids are case-insensitive, so keys are stored in
/// lowercase no matter how they were typed or which endpoint reported them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_ref(&self) -> Result<ResourceRef, DomainError> {
        match self.0.split_once('/') {
            Some((owner, id)) => ResourceRef::owned(owner, id),
            None => ResourceRef::account(self.0.as_str()),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<ResourceKey> for String {
    fn from(value: ResourceKey) -> Self {
        value.0
    }
}

impl From<&ResourceRef> for ResourceKey {
    fn from(value: &ResourceRef) -> Self {
        value.key()
    }
}

/// A resource as the catalog reports it, with its kind already resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogResource {
    pub kind: ResourceKind,
    pub owner: Option<String>,
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

impl CatalogResource {
    pub fn key(&self) -> ResourceKey {
        match &self.owner {
            Some(owner) => ResourceKey::new(format!("{owner}/{}", self.id)),
            None => ResourceKey::new(self.id.as_str()),
        }
    }

    pub fn to_ref(&self) -> Result<ResourceRef, DomainError> {
        match &self.owner {
            Some(owner) => ResourceRef::owned(owner.as_str(), self.id.as_str())?.with_kind(self.kind),
            None => ResourceRef::account(self.id.as_str()),
        }
    }
}

impl From<CatalogAgent> for CatalogResource {
    fn from(agent: CatalogAgent) -> Self {
        Self {
            kind: ResourceKind::Account,
            owner: None,
            id: agent.id,
            title: agent.display_name,
            description: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogAgent {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

fn validate_segment(field: &str, value: String) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidResourceRef(format!("{field} must not be empty")));
    }
    if trimmed.contains(|ch: char| ch.is_whitespace() || ch == '/') {
        return Err(DomainError::InvalidResourceRef(format!(
            "{field} `{trimmed}` must be a single path segment"
        )));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::{CatalogAgent, CatalogResource, ResourceKey, ResourceKind, ResourceRef};

    #[test]
    fn owned_ref_key_joins_owner_and_id() {
        let reference = ResourceRef::owned("acme", "widgets").expect("valid ref");
        assert_eq!(reference.key().as_str(), "acme/widgets");
        assert_eq!(reference.kind(), None);
        assert!(!reference.is_account());
    }

    #[test]
    fn account_ref_key_is_bare_id() {
        let reference = ResourceRef::account("acme").expect("valid ref");
        assert_eq!(reference.key().as_str(), "acme");
        assert_eq!(reference.kind(), Some(ResourceKind::Account));
        assert!(reference.is_account());
    }

    #[test]
    fn empty_or_nested_segments_are_rejected() {
        assert!(ResourceRef::account("").is_err());
        assert!(ResourceRef::owned("acme", "  ").is_err());
        assert!(ResourceRef::owned("acme", "a/b").is_err());
        assert!(ResourceRef::owned("ac me", "widgets").is_err());
    }

    #[test]
    fn with_kind_refuses_account_kind_on_owned_refs() {
        let reference = ResourceRef::owned("acme", "widgets").expect("valid ref");
        assert!(reference.clone().with_kind(ResourceKind::Account).is_err());

        let project = reference.with_kind(ResourceKind::Project).expect("project kind");
        assert_eq!(project.kind(), Some(ResourceKind::Project));

        let account = ResourceRef::account("acme").expect("valid ref");
        assert!(account.with_kind(ResourceKind::Dataset).is_err());
    }

    #[test]
    fn keys_are_lowercased_however_they_arrive() {
        let typed = ResourceRef::owned("Acme", "Widgets").expect("valid ref");
        let reported = CatalogResource {
            kind: ResourceKind::Dataset,
            owner: Some("acme".to_owned()),
            id: "widgets".to_owned(),
            title: "Widgets".to_owned(),
            description: None,
        };
        let decoded: ResourceKey = serde_json::from_str("\"ACME/Widgets\"").expect("key");

        assert_eq!(typed.key(), reported.key());
        assert_eq!(decoded.as_str(), "acme/widgets");
        assert_eq!(serde_json::to_string(&decoded).expect("json"), "\"acme/widgets\"");
        assert_eq!(typed.owner(), Some("Acme"));
    }

    #[test]
    fn key_parses_back_into_reference() {
        let owned = ResourceKey::new("acme/widgets").to_ref().expect("owned");
        assert_eq!(owned.owner(), Some("acme"));
        assert_eq!(owned.id(), "widgets");

        let account = ResourceKey::new("acme").to_ref().expect("account");
        assert!(account.is_account());
    }

    #[test]
    fn agent_converts_into_account_resource() {
        let resource = CatalogResource::from(CatalogAgent {
            id: "acme".to_owned(),
            display_name: "Acme Corp".to_owned(),
            avatar_url: None,
        });
        assert_eq!(resource.kind, ResourceKind::Account);
        assert_eq!(resource.key().as_str(), "acme");
        assert_eq!(resource.title, "Acme Corp");
    }
}
