//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use doorlink_core::HistoryKind;
use doorlink_protocol::{UserCategory, UserCommand};

/// doorlink - talk to a smart door lock over its WebSocket link
#[derive(Debug, Parser)]
#[command(name = "doorlink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "DOORLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Device WebSocket URL (overrides the config file)
    #[arg(long, env = "DOORLINK_URL")]
    pub url: Option<String>,

    /// Auth token (overrides the config file)
    #[arg(long, env = "DOORLINK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Seconds to wait for a reply
    #[arg(long, default_value = "5")]
    pub timeout: u64,

    /// Print compact JSON instead of pretty JSON
    #[arg(long)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream device events until interrupted, reconnecting on loss
    Watch {
        /// Only print these events (e.g. `log`, `password_query_result`); can be repeated
        #[arg(long = "event", short = 'e', action = clap::ArgAction::Append)]
        events: Vec<String>,
    },

    /// Query a target and print the normalized result
    Query {
        /// Target name (`password`, `events`, `unlock_logs`, `visitor_intents`, ...)
        target: String,

        /// Maximum number of records
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Print the current unlock password
    Password,

    /// Manage fingerprint, NFC and password users
    User {
        /// finger, nfc or password
        category: UserCategory,

        /// add, del, clear, query or set
        command: UserCommand,

        #[arg(long, default_value = "0")]
        user_id: u32,

        /// Payload; `password set` sends an empty one when omitted
        #[arg(long)]
        payload: Option<String>,
    },

    /// Play raw audio through the lock speaker
    Speak {
        /// Mono 32-bit little-endian float samples
        file: PathBuf,
    },

    /// Show or prune locally stored pushes
    History {
        /// visitor_intent or package_alert
        kind: HistoryKind,

        /// Maximum number of records to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Delete the record with this id instead of listing
        #[arg(long)]
        delete: Option<u64>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_user_command() {
        let cli = Cli::try_parse_from([
            "doorlink", "user", "password", "set", "--payload", "4321",
        ])
        .unwrap();
        let Command::User {
            category,
            command,
            user_id,
            payload,
        } = cli.command
        else {
            panic!("expected user command");
        };
        assert_eq!(category, UserCategory::Password);
        assert_eq!(command, UserCommand::Set);
        assert_eq!(user_id, 0);
        assert_eq!(payload.as_deref(), Some("4321"));
    }

    #[test]
    fn parses_watch_filters() {
        let cli = Cli::try_parse_from([
            "doorlink", "--url", "ws://10.0.0.2/ws", "watch", "-e", "log", "-e", "audio",
        ])
        .unwrap();
        assert_eq!(cli.url.as_deref(), Some("ws://10.0.0.2/ws"));
        let Command::Watch { events } = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(events, vec!["log", "audio"]);
    }

    #[test]
    fn parses_speak_file() {
        let cli = Cli::try_parse_from(["doorlink", "speak", "chime.f32"]).unwrap();
        let Command::Speak { file } = cli.command else {
            panic!("expected speak");
        };
        assert_eq!(file, PathBuf::from("chime.f32"));
        assert!(Cli::try_parse_from(["doorlink", "speak"]).is_err());
    }

    #[test]
    fn rejects_unknown_history_kind() {
        assert!(Cli::try_parse_from(["doorlink", "history", "doorbells"]).is_err());
        assert!(Cli::try_parse_from(["doorlink", "history", "package", "--delete", "3"]).is_ok());
    }
}
