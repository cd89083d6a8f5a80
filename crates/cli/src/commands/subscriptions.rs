use dwslack_core::domain::resource::ResourceKey;
use dwslack_core::domain::subscription::ChannelId;
use dwslack_core::ports::SubscriptionStore;
use dwslack_db::SqlSubscriptionStore;
use serde_json::json;

use crate::commands::{with_database, CommandResult, EXIT_INPUT, EXIT_STORAGE};

const COMMAND: &str = "subscriptions";

pub fn list(resource: Option<&str>, channel: Option<&str>) -> CommandResult {
    let (scope, value) = match (resource, channel) {
        (Some(resource), None) => ("resource", resource.trim().to_string()),
        (None, Some(channel)) => ("channel", channel.trim().to_string()),
        _ => {
            return CommandResult::failure(
                COMMAND,
                "invalid_input",
                "pass exactly one of --resource or --channel",
                EXIT_INPUT,
            );
        }
    };
    if value.is_empty() {
        return CommandResult::failure(
            COMMAND,
            "invalid_input",
            format!("--{scope} must not be empty"),
            EXIT_INPUT,
        );
    }

    let rows = with_database(COMMAND, |pool| async move {
        let store = SqlSubscriptionStore::new(pool);
        let rows = if scope == "resource" {
            store.find_all_by_resource(&ResourceKey::new(value.as_str())).await
        } else {
            store.find_all_by_channel(&ChannelId(value.clone())).await
        };
        rows.map_err(|error| ("storage", error.to_string(), EXIT_STORAGE))
    });

    match rows {
        Ok(rows) => {
            let entries: Vec<_> = rows
                .iter()
                .map(|row| {
                    json!({
                        "resource_key": row.resource_key.as_str(),
                        "channel_id": row.channel_id.0,
                        "subscriber_id": row.subscriber_id.0,
                        "created_at": row.created_at.to_rfc3339(),
                    })
                })
                .collect();
            CommandResult::success_with_data(
                COMMAND,
                format!("{} subscription(s)", entries.len()),
                Some(json!(entries)),
            )
        }
        Err(failure) => failure,
    }
}
