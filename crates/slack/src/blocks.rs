use serde::Serialize;

use dwslack_core::domain::event::{ChangeEvent, ChangeKind};
use dwslack_core::domain::resource::{CatalogAgent, CatalogResource, ResourceKey};
use dwslack_core::domain::subscription::Subscription;
use dwslack_core::subscriptions::{RemoteRevocation, SubscribeOutcome, UnsubscribeOutcome};

pub const UNSUBSCRIBE_ACTION_ID: &str = "subscription.unsubscribe.v1";
pub const SUBSCRIBE_ACTION_ID: &str = "subscription.subscribe.v1";
pub const HELP_ACTION_ID: &str = "subscription.help.v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "button")]
pub struct ButtonElement {
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            text: TextObject::plain(label),
            style: None,
            value: None,
        }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Actions { block_id: String, elements: Vec<ButtonElement> },
    Context { block_id: String, elements: Vec<TextObject> },
}

/// A chat message: fallback text for notifications plus Block Kit blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    #[serde(rename = "text")]
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

/// Body posted to a slash command or action `response_url`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResponsePayload<'a> {
    pub response_type: ResponseType,
    #[serde(flatten)]
    pub message: &'a MessageTemplate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Ephemeral,
    InChannel,
}

impl<'a> ResponsePayload<'a> {
    pub fn ephemeral(message: &'a MessageTemplate) -> Self {
        Self { response_type: ResponseType::Ephemeral, message }
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Actions { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(" "))
    }
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }

    fn build(self) -> Vec<ButtonElement> {
        self.elements
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

fn unsubscribe_button(resource_key: &ResourceKey) -> ButtonElement {
    ButtonElement::new(UNSUBSCRIBE_ACTION_ID, "Unsubscribe")
        .style(ButtonStyle::Danger)
        .value(resource_key.as_str())
}

pub fn help_message() -> MessageTemplate {
    MessageBuilder::new("data.world command help")
        .section("subscription.help.summary.v1", |section| {
            section.mrkdwn(
                "*Available commands*\n• `/data.world subscribe owner/dataset`\n• `/data.world subscribe owner`\n• `/data.world unsubscribe owner/dataset`\n• `/data.world list`\n• `/data.world help`",
            );
        })
        .context("subscription.help.context.v1", |context| {
            context.plain("Shared data.world links work anywhere a resource is expected.");
        })
        .build()
}

/// Help text prefixed with why the input was not understood.
pub fn usage_message(problem: &str) -> MessageTemplate {
    let help = help_message();
    let mut blocks = vec![Block::Section {
        block_id: "subscription.usage.problem.v1".to_owned(),
        text: TextObject::mrkdwn(format!(":thinking_face: {problem}")),
    }];
    blocks.extend(help.blocks);
    MessageTemplate { fallback_text: problem.to_owned(), blocks }
}

pub fn subscribed_message(outcome: &SubscribeOutcome) -> MessageTemplate {
    let resource = outcome.resource();
    let key = resource.key();
    let summary = match outcome {
        SubscribeOutcome::Created(_) => {
            format!("All set! This channel will now get updates for {} `{key}`.", resource.kind)
        }
        SubscribeOutcome::AlreadyActive(_) => {
            format!("This channel is already subscribed to {} `{key}`.", resource.kind)
        }
    };

    MessageBuilder::new(summary.clone())
        .section("subscription.subscribe.summary.v1", |section| {
            section.mrkdwn(format!(":white_check_mark: {summary}\n*{}*", resource.title));
        })
        .actions("subscription.subscribe.actions.v1", |actions| {
            actions.button(unsubscribe_button(&key));
        })
        .build()
}

pub fn unsubscribed_message(outcome: &UnsubscribeOutcome) -> MessageTemplate {
    match outcome {
        UnsubscribeOutcome::NotFound { resource_key } => {
            let summary = format!("This channel is not subscribed to `{resource_key}`.");
            MessageBuilder::new(summary.clone())
                .section("subscription.unsubscribe.not_found.v1", |section| {
                    section.mrkdwn(summary);
                })
                .build()
        }
        UnsubscribeOutcome::Removed { resource_key, remote } => {
            let summary = format!("This channel will no longer get updates for `{resource_key}`.");
            let builder = MessageBuilder::new(summary.clone())
                .section("subscription.unsubscribe.summary.v1", |section| {
                    section.mrkdwn(format!(":wave: {summary}"));
                })
                .actions("subscription.unsubscribe.actions.v1", |actions| {
                    actions.button(
                        ButtonElement::new(SUBSCRIBE_ACTION_ID, "Resubscribe")
                            .value(resource_key.as_str()),
                    );
                });

            match remote {
                RemoteRevocation::Failed(reason) => builder
                    .context("subscription.unsubscribe.warning.v1", |context| {
                        context.mrkdwn(format!(
                            ":warning: Your data.world subscription may still be active ({reason})."
                        ));
                    })
                    .build(),
                RemoteRevocation::Revoked | RemoteRevocation::Retained => builder.build(),
            }
        }
    }
}

pub fn subscription_list_message(subscriptions: &[Subscription]) -> MessageTemplate {
    if subscriptions.is_empty() {
        return MessageBuilder::new("No subscriptions in this channel")
            .section("subscription.list.empty.v1", |section| {
                section.plain("This channel has no data.world subscriptions yet.");
            })
            .build();
    }

    let lines = subscriptions
        .iter()
        .map(|subscription| format!("• `{}`", subscription.resource_key))
        .collect::<Vec<_>>()
        .join("\n");

    MessageBuilder::new(format!("{} subscriptions in this channel", subscriptions.len()))
        .section("subscription.list.items.v1", |section| {
            section.mrkdwn(format!("*Active subscriptions*\n{lines}"));
        })
        .build()
}

pub fn error_message(summary: &str, correlation_id: &str) -> MessageTemplate {
    MessageBuilder::new(summary.to_owned())
        .section("subscription.error.summary.v1", |section| {
            section.mrkdwn(format!(":warning: {summary}"));
        })
        .context("subscription.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

/// Renders a fetched resource plus the change that touched it.
pub trait NotificationFormatter: Send + Sync {
    fn format(
        &self,
        event: &ChangeEvent,
        resource: &CatalogResource,
        owner: &CatalogAgent,
    ) -> MessageTemplate;
}

pub struct BlockKitFormatter {
    web_base_url: String,
}

impl BlockKitFormatter {
    pub fn new(web_base_url: impl Into<String>) -> Self {
        Self { web_base_url: web_base_url.into().trim_end_matches('/').to_owned() }
    }

    fn resource_url(&self, resource: &CatalogResource) -> String {
        format!("{}/{}", self.web_base_url, resource.key())
    }
}

impl NotificationFormatter for BlockKitFormatter {
    fn format(
        &self,
        event: &ChangeEvent,
        resource: &CatalogResource,
        owner: &CatalogAgent,
    ) -> MessageTemplate {
        let headline = event.headline();
        let key = resource.key();
        let verb = match event.event_kind {
            ChangeKind::Deleted => ":wastebasket:",
            ChangeKind::Created => ":sparkles:",
            ChangeKind::Updated | ChangeKind::Unknown => ":pencil2:",
        };

        let mut builder = MessageBuilder::new(format!("{headline}: {} ({key})", resource.title))
            .section("notification.summary.v1", |section| {
                section.mrkdwn(format!(
                    "{verb} *{headline}* in <{}|{}>",
                    self.resource_url(resource),
                    resource.title
                ));
            });

        if let Some(description) = resource.description.as_deref().filter(|d| !d.is_empty()) {
            builder = builder.section("notification.description.v1", |section| {
                section.plain(description);
            });
        }

        builder
            .context("notification.context.v1", |context| {
                context
                    .mrkdwn(format!("{} `{key}` · owned by {}", resource.kind, owner.display_name))
                    .plain(format!("Changed by {}", event.actor_id));
            })
            .actions("notification.actions.v1", |actions| {
                actions.button(unsubscribe_button(&key));
            })
            .build()
    }
}
