pub mod commands;

use clap::{ArgGroup, Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "dwslack",
    about = "dwslack operator CLI",
    long_about = "Operate the data.world Slack bridge: migrations, config inspection, readiness checks, and subscription maintenance.",
    after_help = "Examples:\n  dwslack doctor --json\n  dwslack subscriptions --channel C024BE91L\n  DWSLACK_LINK_TOKEN=... dwslack link-subscriber U024BE7LH T024BE7LD"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Slack credentials, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List stored subscriptions for one resource or one channel")]
    #[command(group(ArgGroup::new("scope").required(true).args(["resource", "channel"])))]
    Subscriptions {
        #[arg(long, help = "Resource key, e.g. acme/widgets")]
        resource: Option<String>,
        #[arg(long, help = "Slack channel id")]
        channel: Option<String>,
    },
    #[command(about = "Store a workspace bot token read from DWSLACK_TEAM_BOT_TOKEN")]
    LinkTeam { team_id: String },
    #[command(about = "Store a subscriber's data.world token read from DWSLACK_LINK_TOKEN")]
    LinkSubscriber { subscriber_id: String, team_id: String },
    #[command(about = "Remove a subscriber's subscriptions and stored data.world token")]
    RevokeSubscriber { subscriber_id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Subscriptions { resource, channel } => {
            commands::subscriptions::list(resource.as_deref(), channel.as_deref())
        }
        Command::LinkTeam { team_id } => commands::credentials::link_team(&team_id),
        Command::LinkSubscriber { subscriber_id, team_id } => {
            commands::credentials::link_subscriber(&subscriber_id, &team_id)
        }
        Command::RevokeSubscriber { subscriber_id } => {
            commands::credentials::revoke_subscriber(&subscriber_id)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
