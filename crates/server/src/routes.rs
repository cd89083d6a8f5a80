//! Inbound HTTP: Slack commands, actions and events plus data.world webhooks.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::{Form, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use dwslack_core::domain::event::ChangeEvent;
use dwslack_core::domain::subscription::SubscriberId;
use dwslack_core::errors::{StoreError, SubscriptionError};
use dwslack_core::subscriptions::SubscriptionReconciler;
use dwslack_db::SqlCredentialRepository;
use dwslack_slack::blocks::ResponsePayload;
use dwslack_slack::commands::{CommandContext, CommandRouter, SlashCommandPayload};
use dwslack_slack::events::{
    EventContext, EventResponse, EventsApiRequest, InteractionPayload, SlackEventHandler,
    SubscriberRevocation,
};
use dwslack_slack::notifications::{MessagingClient, NotificationDispatcher};
use dwslack_slack::signature::{SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};

const MAX_SLACK_BODY_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub verifier: SignatureVerifier,
    pub commands: Arc<CommandRouter<Arc<SubscriptionReconciler>>>,
    pub events: Arc<SlackEventHandler<SubscriberRevoker>>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub credentials: Arc<SqlCredentialRepository>,
    pub messaging: Arc<dyn MessagingClient>,
    pub deliveries: Deliveries,
}

/// Background fan-outs still running. Finished tasks are reaped on each spawn.
#[derive(Clone, Default)]
pub struct Deliveries(Arc<Mutex<JoinSet<()>>>);

impl Deliveries {
    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let mut tasks = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Waits for running fan-outs. Returns false if `grace` ran out first.
    pub async fn drain(&self, grace: Duration) -> bool {
        let mut tasks = std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner));
        tokio::time::timeout(grace, async move { while tasks.join_next().await.is_some() {} })
            .await
            .is_ok()
    }
}

/// Revocation drops the subscriber's channel rows, then their stored token.
pub struct SubscriberRevoker {
    reconciler: Arc<SubscriptionReconciler>,
    credentials: Arc<SqlCredentialRepository>,
}

impl SubscriberRevoker {
    pub fn new(
        reconciler: Arc<SubscriptionReconciler>,
        credentials: Arc<SqlCredentialRepository>,
    ) -> Self {
        Self { reconciler, credentials }
    }
}

#[async_trait]
impl SubscriberRevocation for SubscriberRevoker {
    async fn revoke_subscriber(&self, subscriber_id: &SubscriberId) -> Result<u64, SubscriptionError> {
        let removed = self.reconciler.forget_subscriber(subscriber_id).await?;
        self.credentials
            .forget_subscriber(subscriber_id)
            .await
            .map_err(|error| SubscriptionError::from(StoreError::from(error)))?;
        Ok(removed)
    }
}

pub fn router(state: AppState) -> Router {
    let slack = Router::new()
        .route("/slack/commands", post(slash_command))
        .route("/slack/actions", post(block_action))
        .route("/slack/events", post(slack_event))
        .route_layer(middleware::from_fn_with_state(state.clone(), verify_slack_signature));

    Router::new()
        .merge(slack)
        .route("/webhooks/dataworld", post(dataworld_webhook))
        .with_state(state)
}

fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

async fn verify_slack_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let header = |name: &str| {
        parts.headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or_default().to_owned()
    };
    let timestamp = header(TIMESTAMP_HEADER);
    let signature = header(SIGNATURE_HEADER);

    let bytes = match to_bytes(body, MAX_SLACK_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    if let Err(error) = state.verifier.verify(&timestamp, &signature, &bytes) {
        warn!(
            event_name = "slack.request.rejected",
            path = %parts.uri.path(),
            error = %error,
            "slack signature verification failed"
        );
        return StatusCode::UNAUTHORIZED.into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

async fn slash_command(
    State(state): State<AppState>,
    Form(payload): Form<SlashCommandPayload>,
) -> Response {
    let ctx = CommandContext::from_payload(&payload, correlation_id());
    info!(
        event_name = "slack.command.received",
        correlation_id = %ctx.correlation_id,
        channel_id = %ctx.channel_id,
        command = %payload.command,
        "slash command received"
    );

    if let Err(error) = state.credentials.record_channel(&ctx.channel_id, &payload.team_id).await {
        warn!(
            event_name = "slack.command.channel_record_failed",
            correlation_id = %ctx.correlation_id,
            channel_id = %ctx.channel_id,
            error = %error,
            "could not record channel workspace"
        );
    }

    let message = state.commands.handle(&payload, &ctx).await;
    Json(ResponsePayload::ephemeral(&message)).into_response()
}

#[derive(Debug, Deserialize)]
struct ActionForm {
    payload: String,
}

async fn block_action(State(state): State<AppState>, Form(form): Form<ActionForm>) -> StatusCode {
    let ctx = EventContext { correlation_id: correlation_id() };
    let payload: InteractionPayload = match serde_json::from_str(&form.payload) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(
                event_name = "slack.action.malformed",
                correlation_id = %ctx.correlation_id,
                error = %error,
                "interaction payload did not parse"
            );
            return StatusCode::BAD_REQUEST;
        }
    };

    let Some(message) = state.commands.handle_action(&payload, &ctx).await else {
        return StatusCode::OK;
    };
    match payload.response_url.as_deref() {
        Some(url) => {
            if let Err(error) = state.messaging.send_response(url, &message).await {
                warn!(
                    event_name = "slack.action.response_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "could not post action response"
                );
            }
        }
        None => warn!(
            event_name = "slack.action.no_response_url",
            correlation_id = %ctx.correlation_id,
            "action response dropped"
        ),
    }
    StatusCode::OK
}

async fn slack_event(
    State(state): State<AppState>,
    Json(request): Json<EventsApiRequest>,
) -> Response {
    let ctx = EventContext { correlation_id: correlation_id() };
    match state.events.handle(request, &ctx).await {
        EventResponse::Challenge(challenge) => Json(json!({ "challenge": challenge })).into_response(),
        EventResponse::Acknowledged => StatusCode::OK.into_response(),
    }
}

/// Accepts the event and fans it out in the background. Delivery is at least
/// once; duplicates are not suppressed.
async fn dataworld_webhook(
    State(state): State<AppState>,
    Json(event): Json<ChangeEvent>,
) -> StatusCode {
    let correlation_id = correlation_id();
    info!(
        event_name = "webhook.dataworld.received",
        correlation_id = %correlation_id,
        resource_key = %event.resource_key,
        "change event accepted"
    );

    let dispatcher = state.dispatcher.clone();
    state.deliveries.spawn(async move {
        let report = dispatcher.dispatch_to_subscribers(&event).await;
        info!(
            event_name = "webhook.dataworld.dispatched",
            correlation_id = %correlation_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "change event dispatched"
        );
    });

    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
    use axum::Router;
    use tower::ServiceExt;

    use dwslack_core::domain::resource::ResourceKey;
    use dwslack_core::domain::subscription::{ChannelId, SubscriberId};
    use dwslack_core::errors::RemoteError;
    use dwslack_core::ports::{ChatCredential, SubscriptionStore};
    use dwslack_core::subscriptions::SubscriptionReconciler;
    use dwslack_core::testing::FakeCatalog;
    use dwslack_db::{connect, migrations, SqlCredentialRepository, SqlSubscriptionStore};
    use dwslack_slack::blocks::{BlockKitFormatter, MessageTemplate};
    use dwslack_slack::commands::{CommandParser, CommandRouter};
    use dwslack_slack::events::SlackEventHandler;
    use dwslack_slack::notifications::{MessagingClient, NotificationDispatcher};
    use dwslack_slack::signature::SignatureVerifier;

    use super::{router, AppState, Deliveries, SubscriberRevoker};

    const SECRET: &str = "test-signing-secret";

    #[derive(Default)]
    struct RecordingMessenger {
        messages: Mutex<Vec<(String, String)>>,
        responses: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessagingClient for RecordingMessenger {
        async fn send_message(
            &self,
            _credential: &ChatCredential,
            channel_id: &ChannelId,
            message: &MessageTemplate,
        ) -> Result<(), RemoteError> {
            self.messages
                .lock()
                .expect("lock")
                .push((channel_id.0.clone(), message.fallback_text.clone()));
            Ok(())
        }

        async fn send_response(
            &self,
            response_url: &str,
            message: &MessageTemplate,
        ) -> Result<(), RemoteError> {
            self.responses
                .lock()
                .expect("lock")
                .push((response_url.to_owned(), message.fallback_text.clone()));
            Ok(())
        }
    }

    struct Harness {
        app: Router,
        catalog: Arc<FakeCatalog>,
        store: Arc<SqlSubscriptionStore>,
        credentials: Arc<SqlCredentialRepository>,
        messenger: Arc<RecordingMessenger>,
        deliveries: Deliveries,
    }

    async fn harness() -> Harness {
        let pool = connect("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let catalog = Arc::new(
            FakeCatalog::new()
                .case_insensitive()
                .with_dataset("acme", "widgets", "Widget Inventory")
                .with_agent("acme", "Acme Corp"),
        );
        let store = Arc::new(SqlSubscriptionStore::new(pool.clone()));
        let credentials = Arc::new(SqlCredentialRepository::new(pool.clone()));
        credentials.save_team("T1", "xoxb-T1").await.expect("team");
        credentials
            .link_subscriber(&SubscriberId("U1".to_owned()), "T1", "dw-U1")
            .await
            .expect("link");
        let messenger = Arc::new(RecordingMessenger::default());

        let reconciler = Arc::new(SubscriptionReconciler::new(
            catalog.clone(),
            catalog.clone(),
            store.clone(),
            credentials.clone(),
        ));
        let dispatcher = NotificationDispatcher::new(
            catalog.clone(),
            store.clone(),
            credentials.clone(),
            messenger.clone(),
            Arc::new(BlockKitFormatter::new("https://data.world")),
        );

        let state = AppState {
            verifier: SignatureVerifier::new(SECRET.to_owned().into()),
            commands: Arc::new(CommandRouter::new(reconciler.clone(), CommandParser::default())),
            events: Arc::new(SlackEventHandler::new(SubscriberRevoker::new(
                reconciler,
                credentials.clone(),
            ))),
            dispatcher: Arc::new(dispatcher),
            credentials: credentials.clone(),
            messaging: messenger.clone(),
            deliveries: Deliveries::default(),
        };
        let deliveries = state.deliveries.clone();

        Harness { app: router(state), catalog, store, credentials, messenger, deliveries }
    }

    fn signed(path: &str, content_type: &str, body: String) -> Request<Body> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_secs()
            .to_string();
        let signature = SignatureVerifier::new(SECRET.to_owned().into())
            .sign(&timestamp, body.as_bytes())
            .expect("sign");

        Request::builder()
            .method("POST")
            .uri(path)
            .header(CONTENT_TYPE, content_type)
            .header("x-slack-request-timestamp", timestamp)
            .header("x-slack-signature", signature)
            .body(Body::from(body))
            .expect("request")
    }

    fn command(text: &str) -> Request<Body> {
        let body = serde_urlencoded::to_string(vec![
            ("command", "/data.world"),
            ("text", text),
            ("channel_id", "C1"),
            ("user_id", "U1"),
            ("team_id", "T1"),
        ])
        .expect("form body");
        signed("/slack/commands", "application/x-www-form-urlencoded", body)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn subscribe_command_persists_and_replies_ephemerally() {
        let harness = harness().await;

        let response =
            harness.app.clone().oneshot(command("subscribe acme/widgets")).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["response_type"], "ephemeral");
        assert!(body["text"].as_str().is_some_and(|text| text.contains("now get updates")));

        let rows = harness
            .store
            .find_all_by_resource(&ResourceKey::new("acme/widgets"))
            .await
            .expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_id.0, "C1");
        assert!(harness.catalog.has_grant("dw-U1", "acme/widgets"));
    }

    #[tokio::test]
    async fn shared_link_with_label_subscribes_through_the_form() {
        let harness = harness().await;

        let response = harness
            .app
            .clone()
            .oneshot(command("subscribe <https://data.world/Acme/Widgets|Widgets & more>"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let rows = harness
            .store
            .find_all_by_resource(&ResourceKey::new("acme/widgets"))
            .await
            .expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_id.0, "C1");
    }

    #[tokio::test]
    async fn unsigned_requests_are_rejected_without_side_effects() {
        let harness = harness().await;
        let request = Request::builder()
            .method("POST")
            .uri("/slack/commands")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("x-slack-request-timestamp", "1531420618")
            .header("x-slack-signature", "v0=deadbeef")
            .body(Body::from("command=%2Fdata.world&text=subscribe+acme%2Fwidgets&channel_id=C1&user_id=U1&team_id=T1"))
            .expect("request");

        let response = harness.app.clone().oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(harness.store.count().await.expect("count"), 0);
        assert!(harness.catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let harness = harness().await;

        let response = harness
            .app
            .clone()
            .oneshot(signed(
                "/slack/events",
                "application/json",
                r#"{"type":"url_verification","challenge":"3eZbrw1aB"}"#.to_owned(),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["challenge"], "3eZbrw1aB");
    }

    #[tokio::test]
    async fn tokens_revoked_forgets_rows_and_stored_token() {
        let harness = harness().await;
        harness.app.clone().oneshot(command("subscribe acme/widgets")).await.expect("subscribe");

        let response = harness
            .app
            .clone()
            .oneshot(signed(
                "/slack/events",
                "application/json",
                r#"{"type":"event_callback","team_id":"T1","event":{"type":"tokens_revoked","tokens":{"oauth":["U1"]}}}"#.to_owned(),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(harness.store.count().await.expect("count"), 0);
        assert!(!harness
            .credentials
            .forget_subscriber(&SubscriberId("U1".to_owned()))
            .await
            .expect("forget"));
    }

    #[tokio::test]
    async fn unsubscribe_button_answers_through_response_url() {
        let harness = harness().await;
        harness.app.clone().oneshot(command("subscribe acme/widgets")).await.expect("subscribe");
        let payload = serde_json::json!({
            "type": "block_actions",
            "user": { "id": "U1" },
            "channel": { "id": "C1" },
            "team": { "id": "T1" },
            "response_url": "https://hooks.slack.com/actions/T1/1/xyz",
            "actions": [{ "action_id": "subscription.unsubscribe.v1", "value": "acme/widgets" }]
        });
        let body =
            serde_urlencoded::to_string(vec![("payload", payload.to_string())]).expect("form body");

        let response = harness
            .app
            .clone()
            .oneshot(signed("/slack/actions", "application/x-www-form-urlencoded", body))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(harness.store.count().await.expect("count"), 0);
        let responses = harness.messenger.responses.lock().expect("lock").clone();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0, "https://hooks.slack.com/actions/T1/1/xyz");
    }

    #[tokio::test]
    async fn webhook_is_accepted_and_fanned_out() {
        let harness = harness().await;
        harness.app.clone().oneshot(command("subscribe acme/widgets")).await.expect("subscribe");

        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/dataworld")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"resourceKey":"acme/widgets","actorId":"jane","eventKind":"updated","entity":"dataset"}"#,
            ))
            .expect("request");

        let response = harness.app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        assert!(harness.deliveries.drain(Duration::from_secs(5)).await);
        let delivered = harness.messenger.messages.lock().expect("lock").clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "C1");
        assert!(delivered[0].1.contains("dataset updated"));
    }
}
