use serde::{Deserialize, Serialize};

use super::resource::ResourceKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventEntity {
    Dataset,
    Project,
    Insight,
    File,
    Account,
    #[default]
    #[serde(other)]
    Unknown,
}

impl EventEntity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Project => "project",
            Self::Insight => "insight",
            Self::File => "file",
            Self::Account => "account",
            Self::Unknown => "resource",
        }
    }
}

/// An inbound change notification from the catalog. Delivered at least once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub resource_key: ResourceKey,
    pub actor_id: String,
    #[serde(alias = "action")]
    pub event_kind: ChangeKind,
    #[serde(default)]
    pub entity: EventEntity,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn headline(&self) -> String {
        let entity = self.entity.label();
        match self.event_kind {
            ChangeKind::Created => format!("new {entity}"),
            ChangeKind::Updated => format!("{entity} updated"),
            ChangeKind::Deleted => format!("{entity} deleted"),
            ChangeKind::Unknown => format!("{entity} changed"),
        }
    }
}
