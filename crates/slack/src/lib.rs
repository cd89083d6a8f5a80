//! Slack integration - slash commands, interactivity and notifications
//!
//! This crate provides the Slack side of dwslack:
//! - **Slash Commands** (`commands`) - `/data.world subscribe|unsubscribe|list|help`
//! - **Events** (`events`) - button actions and Events API callbacks
//! - **Block Kit** (`blocks`) - replies and change notifications
//! - **Notifications** (`notifications`) - fan-out of catalog changes to channels
//! - **Signatures** (`signature`) - `X-Slack-Signature` verification
//!
//! # Architecture
//!
//! ```text
//! Slack request → SignatureVerifier → CommandRouter → SubscriptionReconciler
//!                                          ↓
//!                                  Block Kit reply
//!
//! Catalog change → NotificationDispatcher → MessagingClient (per channel)
//! ```
//!
//! # Key Types
//!
//! - `CommandParser` - Command grammar and resource link parsing
//! - `CommandRouter` - Routes commands and actions to the subscription service
//! - `NotificationDispatcher` - Bounded, isolated per-channel delivery
//! - `MessageBuilder` - Constructs Slack messages

pub mod blocks;
pub mod commands;
pub mod events;
pub mod notifications;
pub mod signature;
