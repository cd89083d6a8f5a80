use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use dwslack_core::domain::resource::ResourceRef;
use dwslack_core::domain::subscription::{ChannelId, SubscriberId, Subscription};
use dwslack_core::errors::SubscriptionError;
use dwslack_core::subscriptions::{SubscribeOutcome, SubscriptionReconciler, UnsubscribeOutcome};

use crate::blocks::{self, MessageTemplate};

/// Form body Slack posts for a slash command.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SlashCommandPayload {
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    pub team_id: String,
    #[serde(default)]
    pub response_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DwCommand {
    Subscribe(ResourceRef),
    Unsubscribe(ResourceRef),
    List,
    Help,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no dataset, project, or account was given")]
    Empty,
    #[error("`{0}` is not a command I know")]
    UnknownVerb(String),
    #[error("`{verb}` needs a dataset, project, or account")]
    MissingTarget { verb: &'static str },
    #[error("`{0}` is not a data.world dataset, project, or account")]
    InvalidTarget(String),
}

/// Path segments that may follow `owner/id` in a shared link.
const LINK_SUBPATHS: &[&str] = &["insights", "workspace", "discuss", "file", "files"];

/// Turns command text and shared links into typed references.
#[derive(Clone, Debug)]
pub struct CommandParser {
    link_hosts: Vec<String>,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new("https://data.world")
    }
}

impl CommandParser {
    pub fn new(web_base_url: &str) -> Self {
        let host = strip_scheme(web_base_url.trim())
            .unwrap_or(web_base_url)
            .split('/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let bare = host.strip_prefix("www.").unwrap_or(&host).to_owned();
        Self { link_hosts: vec![format!("www.{bare}"), bare] }
    }

    pub fn parse_command(&self, text: &str) -> Result<DwCommand, ParseError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(DwCommand::Help);
        }

        let (verb, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (trimmed, ""),
        };

        match verb.to_ascii_lowercase().as_str() {
            "subscribe" => {
                let target = first_target(rest)
                    .ok_or(ParseError::MissingTarget { verb: "subscribe" })?;
                Ok(DwCommand::Subscribe(self.parse_resource(target)?))
            }
            "unsubscribe" => {
                let target = first_target(rest)
                    .ok_or(ParseError::MissingTarget { verb: "unsubscribe" })?;
                Ok(DwCommand::Unsubscribe(self.parse_resource(target)?))
            }
            "list" => Ok(DwCommand::List),
            "help" => Ok(DwCommand::Help),
            other => Err(ParseError::UnknownVerb(other.to_owned())),
        }
    }

    /// Parses `owner/id`, `account`, or a shared link (optionally wrapped in
    /// Slack's `<url|label>` decoration) into a reference.
    pub fn parse_resource(&self, raw: &str) -> Result<ResourceRef, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Empty);
        }

        let undecorated = strip_decoration(trimmed);
        let path = self.strip_link_prefix(undecorated).ok_or_else(|| invalid(raw))?;
        let path = path.split(['?', '#']).next().unwrap_or_default().trim_matches('/');
        if path.is_empty() {
            return Err(ParseError::Empty);
        }

        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(invalid(raw));
        }

        let parsed = match segments.as_slice() {
            [account] => ResourceRef::account(*account),
            [owner, id] => ResourceRef::owned(*owner, *id),
            [owner, id, subpath, ..] if LINK_SUBPATHS.contains(subpath) => {
                ResourceRef::owned(*owner, *id)
            }
            _ => return Err(invalid(raw)),
        };

        parsed.map_err(|_| invalid(raw))
    }

    fn strip_link_prefix<'a>(&self, value: &'a str) -> Option<&'a str> {
        let Some(without_scheme) = strip_scheme(value) else {
            return Some(value);
        };

        let (host, path) = without_scheme.split_once('/').unwrap_or((without_scheme, ""));
        let host = host.to_ascii_lowercase();
        self.link_hosts.iter().any(|known| *known == host).then_some(path)
    }
}

fn strip_scheme(value: &str) -> Option<&str> {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    if lower.starts_with("https://") {
        value.get(8..)
    } else if lower.starts_with("http://") {
        value.get(7..)
    } else {
        None
    }
}

fn strip_decoration(value: &str) -> &str {
    let inner = value.strip_prefix('<').unwrap_or(value);
    let inner = inner.strip_suffix('>').unwrap_or(inner);
    inner.split('|').next().unwrap_or(inner).trim()
}

/// The first argument; a `<...>` link keeps its label even when it has spaces.
fn first_target(rest: &str) -> Option<&str> {
    if rest.is_empty() {
        return None;
    }
    if rest.starts_with('<') {
        if let Some(end) = rest.find('>') {
            return Some(&rest[..=end]);
        }
    }
    rest.split_whitespace().next()
}

fn invalid(raw: &str) -> ParseError {
    ParseError::InvalidTarget(raw.trim().to_owned())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandContext {
    pub channel_id: ChannelId,
    pub subscriber_id: SubscriberId,
    pub correlation_id: String,
}

impl CommandContext {
    pub fn from_payload(payload: &SlashCommandPayload, correlation_id: impl Into<String>) -> Self {
        Self {
            channel_id: ChannelId(payload.channel_id.clone()),
            subscriber_id: SubscriberId(payload.user_id.clone()),
            correlation_id: correlation_id.into(),
        }
    }
}

#[async_trait]
pub trait SubscriptionCommandService: Send + Sync {
    async fn subscribe(
        &self,
        target: &ResourceRef,
        channel_id: &ChannelId,
        subscriber_id: &SubscriberId,
    ) -> Result<SubscribeOutcome, SubscriptionError>;

    async fn unsubscribe(
        &self,
        target: &ResourceRef,
        channel_id: &ChannelId,
    ) -> Result<UnsubscribeOutcome, SubscriptionError>;

    async fn list(&self, channel_id: &ChannelId) -> Result<Vec<Subscription>, SubscriptionError>;
}

#[async_trait]
impl SubscriptionCommandService for SubscriptionReconciler {
    async fn subscribe(
        &self,
        target: &ResourceRef,
        channel_id: &ChannelId,
        subscriber_id: &SubscriberId,
    ) -> Result<SubscribeOutcome, SubscriptionError> {
        SubscriptionReconciler::subscribe(self, target, channel_id, subscriber_id).await
    }

    async fn unsubscribe(
        &self,
        target: &ResourceRef,
        channel_id: &ChannelId,
    ) -> Result<UnsubscribeOutcome, SubscriptionError> {
        SubscriptionReconciler::unsubscribe(self, target, channel_id).await
    }

    async fn list(&self, channel_id: &ChannelId) -> Result<Vec<Subscription>, SubscriptionError> {
        SubscriptionReconciler::list(self, channel_id).await
    }
}

#[async_trait]
impl<S> SubscriptionCommandService for Arc<S>
where
    S: SubscriptionCommandService + ?Sized,
{
    async fn subscribe(
        &self,
        target: &ResourceRef,
        channel_id: &ChannelId,
        subscriber_id: &SubscriberId,
    ) -> Result<SubscribeOutcome, SubscriptionError> {
        (**self).subscribe(target, channel_id, subscriber_id).await
    }

    async fn unsubscribe(
        &self,
        target: &ResourceRef,
        channel_id: &ChannelId,
    ) -> Result<UnsubscribeOutcome, SubscriptionError> {
        (**self).unsubscribe(target, channel_id).await
    }

    async fn list(&self, channel_id: &ChannelId) -> Result<Vec<Subscription>, SubscriptionError> {
        (**self).list(channel_id).await
    }
}

pub struct CommandRouter<S> {
    service: S,
    parser: CommandParser,
}

impl<S> CommandRouter<S>
where
    S: SubscriptionCommandService,
{
    pub fn new(service: S, parser: CommandParser) -> Self {
        Self { service, parser }
    }

    pub fn parser(&self) -> &CommandParser {
        &self.parser
    }

    /// Parses and runs a slash command. Every outcome, including failures,
    /// becomes a message for the invoking user.
    pub async fn handle(&self, payload: &SlashCommandPayload, ctx: &CommandContext) -> MessageTemplate {
        match self.parser.parse_command(&payload.text) {
            Ok(command) => self.route(command, ctx).await,
            Err(parse_error) => {
                info!(
                    event_name = "slack.command.unparsed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %ctx.channel_id,
                    error = %parse_error,
                    "command text not understood"
                );
                blocks::usage_message(&capitalize(&parse_error.to_string()))
            }
        }
    }

    pub async fn route(&self, command: DwCommand, ctx: &CommandContext) -> MessageTemplate {
        let result = match command {
            DwCommand::Subscribe(target) => self
                .service
                .subscribe(&target, &ctx.channel_id, &ctx.subscriber_id)
                .await
                .map(|outcome| blocks::subscribed_message(&outcome)),
            DwCommand::Unsubscribe(target) => self
                .service
                .unsubscribe(&target, &ctx.channel_id)
                .await
                .map(|outcome| blocks::unsubscribed_message(&outcome)),
            DwCommand::List => self
                .service
                .list(&ctx.channel_id)
                .await
                .map(|rows| blocks::subscription_list_message(&rows)),
            DwCommand::Help => Ok(blocks::help_message()),
        };

        result.unwrap_or_else(|failure| {
            if matches!(failure, SubscriptionError::Storage(_)) {
                error!(
                    event_name = "slack.command.failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %ctx.channel_id,
                    error = %failure,
                    "subscription command failed"
                );
            }
            blocks::error_message(failure.user_message(), &ctx.correlation_id)
        })
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
