use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use dwslack_core::domain::subscription::ChannelId;
use dwslack_core::errors::RemoteError;
use dwslack_core::ports::ChatCredential;
use dwslack_slack::blocks::{MessageTemplate, ResponsePayload};
use dwslack_slack::notifications::MessagingClient;

/// Slack Web API client. The bot token is chosen per call by the caller.
#[derive(Clone, Debug)]
pub struct SlackWebClient {
    http: Client,
    api_base_url: String,
}

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    #[serde(flatten)]
    message: &'a MessageTemplate,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackWebClient {
    pub fn new(api_base_url: &str, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(timeout_secs)).build()?;
        Ok(Self { http, api_base_url: api_base_url.trim_end_matches('/').to_owned() })
    }
}

/// Maps a Web API `error` code onto the shared remote failure classes.
fn classify_api_error(code: &str) -> RemoteError {
    match code {
        "invalid_auth" | "not_authed" | "token_revoked" | "token_expired" | "account_inactive" => {
            RemoteError::Unauthorized
        }
        "channel_not_found" => RemoteError::NotFound,
        "not_in_channel" | "is_archived" | "restricted_action" | "missing_scope" => {
            RemoteError::Forbidden
        }
        "ratelimited" | "service_unavailable" | "fatal_error" | "internal_error" => {
            RemoteError::Unavailable(code.to_owned())
        }
        other => RemoteError::Unexpected(other.to_owned()),
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() || error.is_connect() {
        RemoteError::Unavailable(error.to_string())
    } else {
        RemoteError::Unexpected(error.to_string())
    }
}

#[async_trait]
impl MessagingClient for SlackWebClient {
    async fn send_message(
        &self,
        credential: &ChatCredential,
        channel_id: &ChannelId,
        message: &MessageTemplate,
    ) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base_url))
            .bearer_auth(credential.expose())
            .json(&PostMessage { channel: &channel_id.0, message })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), status.to_string()));
        }

        let reply: ApiReply =
            response.json().await.map_err(|error| RemoteError::Unexpected(error.to_string()))?;
        if reply.ok {
            Ok(())
        } else {
            Err(classify_api_error(reply.error.as_deref().unwrap_or("unknown_error")))
        }
    }

    async fn send_response(
        &self,
        response_url: &str,
        message: &MessageTemplate,
    ) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(response_url)
            .json(&ResponsePayload::ephemeral(message))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::from_status(status.as_u16(), status.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use dwslack_core::domain::subscription::ChannelId;
    use dwslack_core::errors::RemoteError;
    use dwslack_core::ports::ChatCredential;
    use dwslack_slack::blocks::usage_message;
    use dwslack_slack::notifications::MessagingClient;

    use super::{classify_api_error, SlackWebClient};

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    async fn post_message(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let auth = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let channel = body["channel"].as_str().unwrap_or_default().to_owned();
        seen.lock().expect("lock").push((auth, body));
        if channel == "C-gone" {
            Json(json!({ "ok": false, "error": "channel_not_found" }))
        } else {
            Json(json!({ "ok": true }))
        }
    }

    async fn response_url(State(seen): State<Seen>, Json(body): Json<Value>) -> Json<Value> {
        seen.lock().expect("lock").push(("response_url".to_owned(), body));
        Json(json!({ "ok": true }))
    }

    async fn stub() -> (SlackWebClient, Seen, String) {
        let seen = Seen::default();
        let app = Router::new()
            .route("/api/chat.postMessage", post(post_message))
            .route("/respond", post(response_url))
            .with_state(seen.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = SlackWebClient::new(&format!("http://{address}/api"), 5).expect("client");
        (client, seen, format!("http://{address}/respond"))
    }

    #[tokio::test]
    async fn post_message_sends_blocks_with_per_call_token() {
        let (client, seen, _) = stub().await;
        let message = usage_message("Try again.");

        client
            .send_message(&ChatCredential::new("xoxb-T1"), &ChannelId("C1".to_owned()), &message)
            .await
            .expect("delivered");

        let seen = seen.lock().expect("lock");
        assert_eq!(seen[0].0, "Bearer xoxb-T1");
        assert_eq!(seen[0].1["channel"], "C1");
        assert_eq!(seen[0].1["text"], "Try again.");
        assert!(seen[0].1["blocks"].as_array().is_some_and(|blocks| !blocks.is_empty()));
    }

    #[tokio::test]
    async fn api_level_errors_are_classified() {
        let (client, _, _) = stub().await;

        let result = client
            .send_message(
                &ChatCredential::new("xoxb-T1"),
                &ChannelId("C-gone".to_owned()),
                &usage_message("x"),
            )
            .await;

        assert_eq!(result, Err(RemoteError::NotFound));
        assert_eq!(classify_api_error("token_revoked"), RemoteError::Unauthorized);
        assert_eq!(classify_api_error("not_in_channel"), RemoteError::Forbidden);
        assert!(matches!(classify_api_error("ratelimited"), RemoteError::Unavailable(_)));
    }

    #[tokio::test]
    async fn response_url_gets_ephemeral_payload() {
        let (client, seen, respond_url) = stub().await;

        client.send_response(&respond_url, &usage_message("Done.")).await.expect("responded");

        let seen = seen.lock().expect("lock");
        assert_eq!(seen[0].1["response_type"], "ephemeral");
        assert_eq!(seen[0].1["text"], "Done.");
    }
}
