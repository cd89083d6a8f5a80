use std::env;

use dwslack_core::domain::subscription::SubscriberId;
use dwslack_core::ports::SubscriptionStore;
use dwslack_db::{SqlCredentialRepository, SqlSubscriptionStore};
use serde_json::json;

use crate::commands::{with_database, CommandResult, EXIT_INPUT, EXIT_STORAGE};

pub const LINK_TOKEN_ENV: &str = "DWSLACK_LINK_TOKEN";
pub const TEAM_BOT_TOKEN_ENV: &str = "DWSLACK_TEAM_BOT_TOKEN";

/// Tokens come from the environment so they never land in shell history.
fn token_from_env(command: &str, key: &str) -> Result<String, CommandResult> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(CommandResult::failure(
            command,
            "missing_token",
            format!("set {key} to the token to store"),
            EXIT_INPUT,
        )),
    }
}

fn require_id(command: &str, name: &str, value: &str) -> Result<String, CommandResult> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return Err(CommandResult::failure(
            command,
            "invalid_input",
            format!("{name} must be a single non-empty identifier"),
            EXIT_INPUT,
        ));
    }
    Ok(trimmed.to_string())
}

pub fn link_team(team_id: &str) -> CommandResult {
    const COMMAND: &str = "link-team";
    let prepared = require_id(COMMAND, "team_id", team_id)
        .and_then(|team_id| Ok((team_id, token_from_env(COMMAND, TEAM_BOT_TOKEN_ENV)?)));
    let (team_id, token) = match prepared {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    if !token.starts_with("xoxb-") {
        return CommandResult::failure(
            COMMAND,
            "invalid_input",
            format!("{TEAM_BOT_TOKEN_ENV} must be a bot token (xoxb-...)"),
            EXIT_INPUT,
        );
    }

    let result = with_database(COMMAND, |pool| async move {
        SqlCredentialRepository::new(pool)
            .save_team(&team_id, &token)
            .await
            .map_err(|error| ("storage", error.to_string(), EXIT_STORAGE))?;
        Ok(team_id)
    });

    match result {
        Ok(team_id) => CommandResult::success(COMMAND, format!("stored bot token for team {team_id}")),
        Err(failure) => failure,
    }
}

pub fn link_subscriber(subscriber_id: &str, team_id: &str) -> CommandResult {
    const COMMAND: &str = "link-subscriber";
    let prepared = require_id(COMMAND, "subscriber_id", subscriber_id).and_then(|subscriber_id| {
        let team_id = require_id(COMMAND, "team_id", team_id)?;
        let token = token_from_env(COMMAND, LINK_TOKEN_ENV)?;
        Ok((subscriber_id, team_id, token))
    });
    let (subscriber_id, team_id, token) = match prepared {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = with_database(COMMAND, |pool| async move {
        let subscriber_id = SubscriberId(subscriber_id);
        SqlCredentialRepository::new(pool)
            .link_subscriber(&subscriber_id, &team_id, &token)
            .await
            .map_err(|error| ("storage", error.to_string(), EXIT_STORAGE))?;
        Ok(subscriber_id)
    });

    match result {
        Ok(subscriber_id) => CommandResult::success(
            COMMAND,
            format!("linked data.world account for subscriber {subscriber_id}"),
        ),
        Err(failure) => failure,
    }
}

pub fn revoke_subscriber(subscriber_id: &str) -> CommandResult {
    const COMMAND: &str = "revoke-subscriber";
    let subscriber_id = match require_id(COMMAND, "subscriber_id", subscriber_id) {
        Ok(subscriber_id) => SubscriberId(subscriber_id),
        Err(failure) => return failure,
    };

    let result = with_database(COMMAND, |pool| async move {
        let removed = SqlSubscriptionStore::new(pool.clone())
            .delete_all_for_subscriber(&subscriber_id)
            .await
            .map_err(|error| ("storage", error.to_string(), EXIT_STORAGE))?;
        let token_removed = SqlCredentialRepository::new(pool)
            .forget_subscriber(&subscriber_id)
            .await
            .map_err(|error| ("storage", error.to_string(), EXIT_STORAGE))?;
        Ok((subscriber_id, removed, token_removed))
    });

    match result {
        Ok((subscriber_id, removed, token_removed)) => CommandResult::success_with_data(
            COMMAND,
            format!("revoked subscriber {subscriber_id}"),
            Some(json!({ "subscriptions_removed": removed, "token_removed": token_removed })),
        ),
        Err(failure) => failure,
    }
}
