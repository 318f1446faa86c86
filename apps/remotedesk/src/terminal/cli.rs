use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::peer::NegotiationRole;
use crate::signaling::RealtimeCredentials;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "remotedesk",
    about = "Negotiate a remote desktop peer connection over a realtime relay",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "REMOTEDESK_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "REMOTEDESK_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Authorize this device and print an app token
    Login,
    /// Join a relay topic and negotiate a peer connection
    Connect(ConnectArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleArg {
    Offerer,
    Answerer,
}

impl From<RoleArg> for NegotiationRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Offerer => NegotiationRole::Offerer,
            RoleArg::Answerer => NegotiationRole::Answerer,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    #[arg(long, value_enum, default_value_t = RoleArg::Offerer)]
    pub role: RoleArg,

    #[arg(
        long,
        env = "REMOTEDESK_RELAY_ENDPOINT",
        value_name = "URL",
        help = "Realtime relay base URL (https:// or wss://)"
    )]
    pub endpoint: String,

    #[arg(
        long = "api-key",
        env = "REMOTEDESK_RELAY_API_KEY",
        hide_env_values = true,
        value_name = "KEY"
    )]
    pub api_key: String,

    #[arg(long, env = "REMOTEDESK_RELAY_TOPIC", value_name = "TOPIC")]
    pub topic: String,

    #[arg(
        long = "signed-token",
        env = "REMOTEDESK_RELAY_TOKEN",
        hide_env_values = true,
        value_name = "TOKEN"
    )]
    pub signed_token: Option<String>,

    #[arg(
        long = "expires-at",
        env = "REMOTEDESK_RELAY_EXPIRES_AT",
        value_name = "RFC3339",
        value_parser = parse_rfc3339
    )]
    pub expires_at: Option<OffsetDateTime>,

    #[arg(
        long = "app-token",
        env = "REMOTEDESK_APP_TOKEN",
        hide_env_values = true,
        value_name = "TOKEN",
        help = "App token from `remotedesk login`, sent as a bearer header"
    )]
    pub app_token: Option<String>,

    #[arg(
        long = "ice-server",
        value_name = "URL",
        help = "ICE server URL; repeat for several. Defaults to REMOTEDESK_ICE_SERVERS"
    )]
    pub ice_servers: Vec<String>,

    #[arg(long = "connect-timeout", value_name = "SECS", default_value_t = 60)]
    pub connect_timeout: u64,

    #[arg(long = "no-video", help = "Do not request a video track from the remote peer")]
    pub no_video: bool,
}

impl ConnectArgs {
    pub fn credentials(&self) -> RealtimeCredentials {
        let mut credentials =
            RealtimeCredentials::new(&self.endpoint, &self.api_key, &self.topic);
        if let Some(token) = self.signed_token.as_ref().filter(|token| !token.is_empty()) {
            credentials = credentials.with_signed_token(token);
        }
        if let Some(expires_at) = self.expires_at {
            credentials = credentials.with_expiry(expires_at);
        }
        credentials
    }
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(value.trim(), &Rfc3339).map_err(|err| format!("expected RFC 3339 timestamp: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_args_build_credentials() {
        let cli = Cli::try_parse_from([
            "remotedesk",
            "connect",
            "--role",
            "answerer",
            "--endpoint",
            "https://relay.example.com",
            "--api-key",
            "anon",
            "--topic",
            "realtime:desk-1",
            "--signed-token",
            "jwt",
            "--expires-at",
            "2030-01-01T00:00:00Z",
            "--ice-server",
            "stun:a.example.com",
            "--ice-server",
            "turn:b.example.com",
        ])
        .unwrap();

        let Command::Connect(args) = cli.command else {
            panic!("expected connect");
        };
        assert_eq!(NegotiationRole::from(args.role), NegotiationRole::Answerer);
        assert_eq!(args.ice_servers.len(), 2);
        assert_eq!(args.connect_timeout, 60);

        let credentials = args.credentials();
        assert_eq!(credentials.topic, "realtime:desk-1");
        assert_eq!(credentials.signed_token.as_deref(), Some("jwt"));
        assert_eq!(
            credentials.expires_at.map(OffsetDateTime::unix_timestamp),
            Some(1_893_456_000)
        );
    }

    #[test]
    fn rejects_malformed_expiry() {
        let result = Cli::try_parse_from([
            "remotedesk",
            "connect",
            "--endpoint",
            "https://relay.example.com",
            "--api-key",
            "anon",
            "--topic",
            "t",
            "--expires-at",
            "tomorrow",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn logging_flags_are_global() {
        let cli = Cli::try_parse_from(["remotedesk", "login", "--log-level", "debug"]).unwrap();
        assert!(matches!(cli.command, Command::Login));
        assert_eq!(cli.logging.to_config().level, LogLevel::Debug);
    }
}
