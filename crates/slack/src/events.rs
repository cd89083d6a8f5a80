//! Inbound Slack interactions and Events API callbacks.
//!
//! Both surfaces are closed enums; identifiers this crate does not know about
//! land in an explicit `Unknown`/`Unsupported` arm and get a visible answer.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use dwslack_core::domain::subscription::{ChannelId, SubscriberId};
use dwslack_core::errors::SubscriptionError;

use crate::blocks::{self, MessageTemplate, HELP_ACTION_ID, SUBSCRIBE_ACTION_ID, UNSUBSCRIBE_ACTION_ID};
use crate::commands::{CommandContext, CommandRouter, DwCommand, SubscriptionCommandService};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Unsubscribe,
    Subscribe,
    Help,
    Unknown(String),
}

impl ActionKind {
    pub fn from_action_id(action_id: &str) -> Self {
        match action_id {
            UNSUBSCRIBE_ACTION_ID => Self::Unsubscribe,
            SUBSCRIBE_ACTION_ID => Self::Subscribe,
            HELP_ACTION_ID => Self::Help,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ActionElement {
    pub action_id: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// JSON carried in the `payload` form field of an interactivity request.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InteractionPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: IdRef,
    #[serde(default)]
    pub channel: Option<IdRef>,
    #[serde(default)]
    pub team: Option<IdRef>,
    #[serde(default)]
    pub response_url: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionElement>,
}

impl<S> CommandRouter<S>
where
    S: SubscriptionCommandService,
{
    /// Handles the first action of a block-action payload. `None` means there
    /// was nothing to answer (not a block action, or no channel to act in).
    pub async fn handle_action(
        &self,
        payload: &InteractionPayload,
        ctx: &EventContext,
    ) -> Option<MessageTemplate> {
        if payload.kind != "block_actions" {
            info!(
                event_name = "slack.action.ignored",
                correlation_id = %ctx.correlation_id,
                interaction_type = %payload.kind,
                "interaction type not handled"
            );
            return None;
        }
        let action = payload.actions.first()?;
        let channel = payload.channel.as_ref()?;
        let command_ctx = CommandContext {
            channel_id: ChannelId(channel.id.clone()),
            subscriber_id: SubscriberId(payload.user.id.clone()),
            correlation_id: ctx.correlation_id.clone(),
        };

        let command = match ActionKind::from_action_id(&action.action_id) {
            kind @ (ActionKind::Unsubscribe | ActionKind::Subscribe) => {
                let value = action.value.as_deref().unwrap_or_default();
                match self.parser().parse_resource(value) {
                    Ok(target) if kind == ActionKind::Unsubscribe => DwCommand::Unsubscribe(target),
                    Ok(target) => DwCommand::Subscribe(target),
                    Err(error) => {
                        warn!(
                            event_name = "slack.action.invalid_value",
                            correlation_id = %ctx.correlation_id,
                            action_id = %action.action_id,
                            error = %error,
                            "action value is not a resource"
                        );
                        return Some(blocks::usage_message("That button no longer works."));
                    }
                }
            }
            ActionKind::Help => DwCommand::Help,
            ActionKind::Unknown(action_id) => {
                warn!(
                    event_name = "slack.action.unknown",
                    correlation_id = %ctx.correlation_id,
                    action_id = %action_id,
                    "unknown action id"
                );
                return Some(blocks::usage_message(&format!(
                    "I don't know how to handle `{action_id}`."
                )));
            }
        };

        Some(self.route(command, &command_ctx).await)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventsApiRequest {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        team_id: Option<String>,
        event: CallbackEvent,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackEvent {
    TokensRevoked { tokens: RevokedTokens },
    #[serde(other)]
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RevokedTokens {
    #[serde(default)]
    pub oauth: Vec<String>,
    #[serde(default)]
    pub bot: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventResponse {
    Challenge(String),
    Acknowledged,
}

/// Drops everything known about a subscriber: channel rows and stored tokens.
#[async_trait]
pub trait SubscriberRevocation: Send + Sync {
    async fn revoke_subscriber(&self, subscriber_id: &SubscriberId) -> Result<u64, SubscriptionError>;
}

pub struct SlackEventHandler<R> {
    revocation: R,
}

impl<R> SlackEventHandler<R>
where
    R: SubscriberRevocation,
{
    pub fn new(revocation: R) -> Self {
        Self { revocation }
    }

    pub async fn handle(&self, request: EventsApiRequest, ctx: &EventContext) -> EventResponse {
        match request {
            EventsApiRequest::UrlVerification { challenge } => EventResponse::Challenge(challenge),
            EventsApiRequest::EventCallback { team_id, event } => {
                self.handle_callback(team_id.as_deref(), event, ctx).await;
                EventResponse::Acknowledged
            }
            EventsApiRequest::Unsupported => EventResponse::Acknowledged,
        }
    }

    async fn handle_callback(&self, team_id: Option<&str>, event: CallbackEvent, ctx: &EventContext) {
        match event {
            CallbackEvent::TokensRevoked { tokens } => {
                for user_id in tokens.oauth.iter().chain(tokens.bot.iter()) {
                    let subscriber_id = SubscriberId(user_id.clone());
                    match self.revocation.revoke_subscriber(&subscriber_id).await {
                        Ok(removed) => info!(
                            event_name = "slack.event.tokens_revoked",
                            correlation_id = %ctx.correlation_id,
                            team_id = team_id.unwrap_or_default(),
                            subscriber_id = %subscriber_id,
                            removed,
                            "subscriber revoked"
                        ),
                        Err(error) => warn!(
                            event_name = "slack.event.tokens_revoked_failed",
                            correlation_id = %ctx.correlation_id,
                            subscriber_id = %subscriber_id,
                            error = %error,
                            "subscriber revocation failed"
                        ),
                    }
                }
            }
            CallbackEvent::Unsupported => {
                info!(
                    event_name = "slack.event.unsupported",
                    correlation_id = %ctx.correlation_id,
                    "event type not handled"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use dwslack_core::domain::subscription::SubscriberId;
    use dwslack_core::errors::SubscriptionError;
    use dwslack_core::subscriptions::SubscriptionReconciler;
    use dwslack_core::testing::{FakeCatalog, MemorySubscriptionStore, StaticCredentials};

    use super::{
        ActionKind, EventContext, EventResponse, EventsApiRequest, InteractionPayload,
        SlackEventHandler, SubscriberRevocation,
    };
    use crate::blocks::UNSUBSCRIBE_ACTION_ID;
    use crate::commands::{CommandContext, CommandParser, CommandRouter, DwCommand};

    fn ctx() -> EventContext {
        EventContext { correlation_id: "req-9".to_owned() }
    }

    fn interaction(action_id: &str, value: &str) -> InteractionPayload {
        serde_json::from_value(serde_json::json!({
            "type": "block_actions",
            "user": { "id": "U1" },
            "channel": { "id": "C1" },
            "team": { "id": "T1" },
            "response_url": "https://hooks.slack.com/actions/T1/1/abc",
            "actions": [{ "action_id": action_id, "value": value, "type": "button" }]
        }))
        .expect("interaction payload")
    }

    #[test]
    fn action_ids_map_to_a_closed_set() {
        assert_eq!(ActionKind::from_action_id("subscription.unsubscribe.v1"), ActionKind::Unsubscribe);
        assert_eq!(ActionKind::from_action_id("subscription.subscribe.v1"), ActionKind::Subscribe);
        assert_eq!(ActionKind::from_action_id("subscription.help.v1"), ActionKind::Help);
        assert_eq!(
            ActionKind::from_action_id("dataset.star.v1"),
            ActionKind::Unknown("dataset.star.v1".to_owned())
        );
    }

    #[tokio::test]
    async fn unsubscribe_button_removes_channel_subscription() {
        let catalog = Arc::new(FakeCatalog::new().with_dataset("acme", "widgets", "Widgets"));
        let store = Arc::new(MemorySubscriptionStore::new());
        let router = CommandRouter::new(
            SubscriptionReconciler::new(
                catalog.clone(),
                catalog.clone(),
                store.clone(),
                Arc::new(StaticCredentials::new().with_subscriber("U1")),
            ),
            CommandParser::default(),
        );
        let command_ctx = CommandContext {
            channel_id: dwslack_core::domain::subscription::ChannelId("C1".to_owned()),
            subscriber_id: SubscriberId("U1".to_owned()),
            correlation_id: "req-8".to_owned(),
        };
        let target = CommandParser::default().parse_resource("acme/widgets").expect("ref");
        router.route(DwCommand::Subscribe(target), &command_ctx).await;
        assert_eq!(store.rows().len(), 1);

        let message = router
            .handle_action(&interaction(UNSUBSCRIBE_ACTION_ID, "acme/widgets"), &ctx())
            .await
            .expect("response");

        assert!(store.rows().is_empty());
        assert!(message.fallback_text.contains("no longer get updates"));
    }

    #[tokio::test]
    async fn unknown_action_answers_with_help() {
        let router = CommandRouter::new(
            SubscriptionReconciler::new(
                Arc::new(FakeCatalog::new()),
                Arc::new(FakeCatalog::new()),
                Arc::new(MemorySubscriptionStore::new()),
                Arc::new(StaticCredentials::new()),
            ),
            CommandParser::default(),
        );

        let message = router
            .handle_action(&interaction("legacy.action.v0", "x"), &ctx())
            .await
            .expect("unknown actions still get an answer");

        assert!(message.fallback_text.contains("legacy.action.v0"));
        assert!(message.blocks.len() > 1, "help text follows the problem statement");
    }

    #[derive(Default)]
    struct RecordingRevocation {
        revoked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SubscriberRevocation for RecordingRevocation {
        async fn revoke_subscriber(
            &self,
            subscriber_id: &SubscriberId,
        ) -> Result<u64, SubscriptionError> {
            self.revoked.lock().expect("lock").push(subscriber_id.0.clone());
            Ok(1)
        }
    }

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let handler = SlackEventHandler::new(RecordingRevocation::default());
        let request: EventsApiRequest =
            serde_json::from_str(r#"{"type":"url_verification","challenge":"abc123","token":"t"}"#)
                .expect("request");

        assert_eq!(handler.handle(request, &ctx()).await, EventResponse::Challenge("abc123".to_owned()));
    }

    #[tokio::test]
    async fn tokens_revoked_forgets_each_user() {
        let handler = SlackEventHandler::new(RecordingRevocation::default());
        let request: EventsApiRequest = serde_json::from_str(
            r#"{"type":"event_callback","team_id":"T1","event":{"type":"tokens_revoked","tokens":{"oauth":["U1","U2"],"bot":[]}}}"#,
        )
        .expect("request");

        let response = handler.handle(request, &ctx()).await;

        assert_eq!(response, EventResponse::Acknowledged);
        assert_eq!(&*handler.revocation.revoked.lock().expect("lock"), &["U1", "U2"]);
    }

    #[tokio::test]
    async fn unsupported_events_are_acknowledged() {
        let handler = SlackEventHandler::new(RecordingRevocation::default());
        let request: EventsApiRequest = serde_json::from_str(
            r#"{"type":"event_callback","team_id":"T1","event":{"type":"app_mention","text":"hi"}}"#,
        )
        .expect("request");

        assert_eq!(handler.handle(request, &ctx()).await, EventResponse::Acknowledged);
        assert!(handler.revocation.revoked.lock().expect("lock").is_empty());
    }
}
