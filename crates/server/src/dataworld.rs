//! data.world REST client.
//!
//! Stateless with respect to users: every call carries the caller's token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use dwslack_core::domain::resource::{CatalogAgent, CatalogResource, ResourceKey, ResourceKind};
use dwslack_core::errors::RemoteError;
use dwslack_core::ports::{CatalogCredential, CatalogResourceClient, CatalogSubscriptionClient};

#[derive(Clone, Debug)]
pub struct DataWorldClient {
    http: Client,
    api_base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceBody {
    owner: String,
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_project: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentBody {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl ResourceBody {
    fn into_resource(self, kind: ResourceKind) -> CatalogResource {
        CatalogResource {
            kind,
            title: self.title.filter(|title| !title.is_empty()).unwrap_or_else(|| self.id.clone()),
            owner: Some(self.owner),
            id: self.id,
            description: self.description,
        }
    }
}

impl DataWorldClient {
    pub fn new(api_base_url: &str, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
        Ok(Self { http, api_base_url: api_base_url.trim_end_matches('/').to_owned() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base_url)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        credential: &CatalogCredential,
    ) -> Result<reqwest::Response, RemoteError> {
        debug!(event_name = "dataworld.request", method = %method, path, "calling data.world");
        self.http
            .request(method, self.url(path))
            .bearer_auth(credential.expose())
            .send()
            .await
            .map_err(transport_error)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        credential: &CatalogCredential,
    ) -> Result<T, RemoteError> {
        let response = ensure_success(self.send(Method::GET, path, credential).await?).await?;
        response.json().await.map_err(transport_error)
    }

    async fn change_webhook(
        &self,
        method: Method,
        path: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        ensure_success(self.send(method, path, credential).await?).await.map(|_| ())
    }
}

fn webhook_path(kind: ResourceKind, key: &str) -> String {
    let collection = match kind {
        ResourceKind::Dataset => "datasets",
        ResourceKind::Project => "projects",
        ResourceKind::Account => "users",
    };
    format!("user/webhooks/{collection}/{key}")
}

/// A request that never produced a usable answer is retryable, whatever broke.
fn transport_error(error: reqwest::Error) -> RemoteError {
    RemoteError::Unavailable(error.to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status.as_u16(), format!("{status}: {detail}")))
}

#[async_trait]
impl CatalogResourceClient for DataWorldClient {
    async fn get_dataset(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<CatalogResource, RemoteError> {
        let body: ResourceBody = self.get_json(&format!("datasets/{owner}/{id}"), credential).await?;
        let kind = if body.is_project { ResourceKind::Project } else { ResourceKind::Dataset };
        Ok(body.into_resource(kind))
    }

    async fn get_project(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<CatalogResource, RemoteError> {
        let body: ResourceBody = self.get_json(&format!("projects/{owner}/{id}"), credential).await?;
        Ok(body.into_resource(ResourceKind::Project))
    }

    async fn get_agent(
        &self,
        agent_id: &str,
        credential: &CatalogCredential,
    ) -> Result<CatalogAgent, RemoteError> {
        let body: AgentBody = self.get_json(&format!("users/{agent_id}"), credential).await?;
        Ok(CatalogAgent {
            display_name: body
                .display_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| body.id.clone()),
            id: body.id,
            avatar_url: body.avatar_url,
        })
    }
}

#[async_trait]
impl CatalogSubscriptionClient for DataWorldClient {
    async fn verify_subscription_exists(
        &self,
        resource_key: &ResourceKey,
        kind: ResourceKind,
        credential: &CatalogCredential,
    ) -> Result<bool, RemoteError> {
        let response =
            self.send(Method::GET, &webhook_path(kind, resource_key.as_str()), credential).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response).await.map(|_| true)
    }

    async fn subscribe_to_dataset(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        let path = webhook_path(ResourceKind::Dataset, &format!("{owner}/{id}"));
        self.change_webhook(Method::PUT, &path, credential).await
    }

    async fn subscribe_to_project(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        let path = webhook_path(ResourceKind::Project, &format!("{owner}/{id}"));
        self.change_webhook(Method::PUT, &path, credential).await
    }

    async fn subscribe_to_account(
        &self,
        account: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        let path = webhook_path(ResourceKind::Account, account);
        self.change_webhook(Method::PUT, &path, credential).await
    }

    async fn unsubscribe_from_dataset(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        let path = webhook_path(ResourceKind::Dataset, &format!("{owner}/{id}"));
        self.change_webhook(Method::DELETE, &path, credential).await
    }

    async fn unsubscribe_from_project(
        &self,
        owner: &str,
        id: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        let path = webhook_path(ResourceKind::Project, &format!("{owner}/{id}"));
        self.change_webhook(Method::DELETE, &path, credential).await
    }

    async fn unsubscribe_from_account(
        &self,
        account: &str,
        credential: &CatalogCredential,
    ) -> Result<(), RemoteError> {
        let path = webhook_path(ResourceKind::Account, account);
        self.change_webhook(Method::DELETE, &path, credential).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use dwslack_core::domain::resource::{ResourceKey, ResourceKind};
    use dwslack_core::domain::subscription::SubscriberId;
    use dwslack_core::errors::{RemoteError, SubscriptionError};
    use dwslack_core::ports::{CatalogCredential, CatalogResourceClient, CatalogSubscriptionClient};

    use super::DataWorldClient;

    type Seen = Arc<Mutex<Vec<String>>>;

    async fn dataset(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Path((owner, id)): Path<(String, String)>,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        let auth = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        seen.lock().expect("lock").push(auth);
        match (owner.as_str(), id.as_str()) {
            ("acme", "widgets") => Ok(Json(json!({
                "owner": "acme", "id": "widgets", "title": "Widget Inventory", "isProject": false
            }))),
            ("acme", "roadmap") => Ok(Json(json!({
                "owner": "acme", "id": "roadmap", "title": "Roadmap", "isProject": true
            }))),
            ("acme", "secret") => Err(StatusCode::FORBIDDEN),
            ("acme", "truncated") => Ok(Json(json!({ "title": "no owner or id" }))),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn dataset_webhook(Path((_owner, id)): Path<(String, String)>) -> StatusCode {
        if id == "widgets" {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        }
    }

    async fn stub() -> (DataWorldClient, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route("/v0/datasets/{owner}/{id}", get(dataset))
            .route(
                "/v0/user/webhooks/datasets/{owner}/{id}",
                get(dataset_webhook).put(|| async { StatusCode::OK }),
            )
            .route(
                "/v0/user/webhooks/users/{account}",
                axum::routing::delete(|| async { StatusCode::SERVICE_UNAVAILABLE }),
            )
            .with_state(seen.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = DataWorldClient::new(&format!("http://{address}/v0/"), 5).expect("client");
        (client, seen)
    }

    #[tokio::test]
    async fn dataset_endpoint_reports_declared_kind_with_caller_token() {
        let (client, seen) = stub().await;

        let widgets = client
            .get_dataset("acme", "widgets", &CatalogCredential::new("dw-U1"))
            .await
            .expect("dataset");
        let roadmap = client
            .get_dataset("acme", "roadmap", &CatalogCredential::new("dw-U2"))
            .await
            .expect("project via dataset endpoint");

        assert_eq!(widgets.kind, ResourceKind::Dataset);
        assert_eq!(widgets.title, "Widget Inventory");
        assert_eq!(roadmap.kind, ResourceKind::Project);
        assert_eq!(*seen.lock().expect("lock"), vec!["Bearer dw-U1", "Bearer dw-U2"]);
    }

    #[tokio::test]
    async fn http_status_classifies_into_remote_errors() {
        let (client, _) = stub().await;
        let credential = CatalogCredential::new("dw-U1");

        assert_eq!(
            client.get_dataset("acme", "missing", &credential).await,
            Err(RemoteError::NotFound)
        );
        assert_eq!(
            client.get_dataset("acme", "secret", &credential).await,
            Err(RemoteError::Forbidden)
        );
        assert!(matches!(
            client.unsubscribe_from_account("acme", &credential).await,
            Err(RemoteError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn undecodable_body_reads_as_unavailable_to_users() {
        let (client, _) = stub().await;
        let subscriber = SubscriberId("U1".to_owned());

        let error = client
            .get_dataset("acme", "truncated", &CatalogCredential::new("dw-U1"))
            .await
            .expect_err("body lacks owner and id");

        assert!(matches!(error, RemoteError::Unavailable(_)));
        assert!(matches!(
            SubscriptionError::from_remote(error, &subscriber),
            SubscriptionError::RemoteUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn verify_treats_missing_webhook_as_absent() {
        let (client, _) = stub().await;
        let credential = CatalogCredential::new("dw-U1");

        let present = client
            .verify_subscription_exists(
                &ResourceKey::new("acme/widgets"),
                ResourceKind::Dataset,
                &credential,
            )
            .await;
        let absent = client
            .verify_subscription_exists(
                &ResourceKey::new("acme/gadgets"),
                ResourceKind::Dataset,
                &credential,
            )
            .await;

        assert_eq!(present, Ok(true));
        assert_eq!(absent, Ok(false));
        assert_eq!(client.subscribe_to_dataset("acme", "gadgets", &credential).await, Ok(()));
    }

    #[tokio::test]
    async fn unreachable_host_is_unavailable() {
        let client = DataWorldClient::new("http://127.0.0.1:9/v0", 1).expect("client");

        let result = client.get_agent("acme", &CatalogCredential::new("dw-U1")).await;

        assert!(matches!(result, Err(RemoteError::Unavailable(_))));
    }
}
