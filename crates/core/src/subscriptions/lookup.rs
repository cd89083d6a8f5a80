use crate::domain::resource::{CatalogResource, ResourceKind, ResourceRef};
use crate::errors::RemoteError;
use crate::ports::{CatalogCredential, CatalogResourceClient, CatalogSubscriptionClient};

/// Fetches a resource and resolves its kind.
///
/// The dataset endpoint answers for projects too and reports the real kind, so
/// unresolved two-segment refs go there first. The project endpoint is only
/// tried when the dataset lookup says "not found"; authorization failures are
/// returned as-is.
pub async fn resolve_resource(
    client: &dyn CatalogResourceClient,
    target: &ResourceRef,
    credential: &CatalogCredential,
) -> Result<CatalogResource, RemoteError> {
    let Some(owner) = target.owner() else {
        let agent = client.get_agent(target.id(), credential).await?;
        return Ok(CatalogResource::from(agent));
    };

    match target.kind() {
        Some(ResourceKind::Project) => client.get_project(owner, target.id(), credential).await,
        Some(ResourceKind::Dataset) => client.get_dataset(owner, target.id(), credential).await,
        Some(ResourceKind::Account) | None => {
            match client.get_dataset(owner, target.id(), credential).await {
                Err(RemoteError::NotFound) => {
                    client.get_project(owner, target.id(), credential).await
                }
                other => other,
            }
        }
    }
}

pub(crate) async fn create_remote(
    client: &dyn CatalogSubscriptionClient,
    resource: &CatalogResource,
    credential: &CatalogCredential,
) -> Result<(), RemoteError> {
    match (resource.kind, resource.owner.as_deref()) {
        (ResourceKind::Dataset, Some(owner)) => {
            client.subscribe_to_dataset(owner, &resource.id, credential).await
        }
        (ResourceKind::Project, Some(owner)) => {
            client.subscribe_to_project(owner, &resource.id, credential).await
        }
        (ResourceKind::Account, _) | (_, None) => {
            client.subscribe_to_account(&resource.id, credential).await
        }
    }
}

/// Removes the remote grant for `target`. When `kind` is unknown the dataset
/// endpoint is tried first, then the project endpoint on a not-found answer.
pub(crate) async fn delete_remote(
    client: &dyn CatalogSubscriptionClient,
    target: &ResourceRef,
    kind: Option<ResourceKind>,
    credential: &CatalogCredential,
) -> Result<(), RemoteError> {
    let Some(owner) = target.owner() else {
        return client.unsubscribe_from_account(target.id(), credential).await;
    };

    match kind {
        Some(ResourceKind::Project) => {
            client.unsubscribe_from_project(owner, target.id(), credential).await
        }
        Some(ResourceKind::Dataset) => {
            client.unsubscribe_from_dataset(owner, target.id(), credential).await
        }
        Some(ResourceKind::Account) | None => {
            match client.unsubscribe_from_dataset(owner, target.id(), credential).await {
                Err(RemoteError::NotFound) => {
                    client.unsubscribe_from_project(owner, target.id(), credential).await
                }
                other => other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::resolve_resource;
    use crate::domain::resource::{ResourceKind, ResourceRef};
    use crate::errors::RemoteError;
    use crate::ports::CatalogCredential;
    use crate::testing::FakeCatalog;

    fn credential() -> CatalogCredential {
        CatalogCredential::new("dw-U1")
    }

    #[tokio::test]
    async fn dataset_endpoint_declares_project_kind() {
        let catalog = FakeCatalog::new().with_project("acme", "roadmap", "Roadmap");
        let target = ResourceRef::owned("acme", "roadmap").expect("ref");

        let resource = resolve_resource(&catalog, &target, &credential()).await.expect("resolve");

        assert_eq!(resource.kind, ResourceKind::Project);
        assert!(catalog.calls_starting_with("get_project").is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_project_lookup_on_not_found() {
        let catalog =
            FakeCatalog::new().without_unified_lookup().with_project("acme", "roadmap", "Roadmap");
        let target = ResourceRef::owned("acme", "roadmap").expect("ref");

        let resource = resolve_resource(&catalog, &target, &credential()).await.expect("resolve");

        assert_eq!(resource.kind, ResourceKind::Project);
        assert_eq!(catalog.calls(), vec!["get_dataset acme/roadmap", "get_project acme/roadmap"]);
    }

    #[tokio::test]
    async fn never_falls_back_on_authorization_errors() {
        let catalog = FakeCatalog::new().with_project("acme", "roadmap", "Roadmap");
        catalog.fail_lookup("acme/roadmap", RemoteError::Forbidden);
        let target = ResourceRef::owned("acme", "roadmap").expect("ref");

        let error = resolve_resource(&catalog, &target, &credential()).await.expect_err("forbidden");

        assert_eq!(error, RemoteError::Forbidden);
        assert_eq!(catalog.calls(), vec!["get_dataset acme/roadmap"]);
    }

    #[tokio::test]
    async fn account_refs_resolve_through_agent_lookup() {
        let catalog = FakeCatalog::new().with_agent("acme", "Acme Corp");
        let target = ResourceRef::account("acme").expect("ref");

        let resource = resolve_resource(&catalog, &target, &credential()).await.expect("resolve");

        assert_eq!(resource.kind, ResourceKind::Account);
        assert_eq!(catalog.calls(), vec!["get_agent acme"]);
    }
}
