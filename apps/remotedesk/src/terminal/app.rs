use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::auth::{AuthConfig, DeviceAuthClient};
use crate::config::{Config, build_ice_servers};
use crate::peer::{AgentFactory, NegotiationError, NegotiationRole, PeerConnectionState};
use crate::protocol::InputEvent;
use crate::session::{SessionError, SessionEvent, SessionHandle, SessionOrchestrator};
use crate::signaling::ChannelClient;
use crate::terminal::cli::{self, Command, ConnectArgs};
use crate::terminal::error::CliError;
use crate::transport::WebSocketTransport;

pub async fn run(cli: cli::Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Login => login().await,
        Command::Connect(args) => connect(args).await,
    }
}

async fn login() -> Result<(), CliError> {
    let config = Config::from_env();
    let client = DeviceAuthClient::new(AuthConfig::new(&config.api_base)?)?;
    let start = client.start_device_flow().await?;

    println!("Enter the following code on the verification page:");
    println!("  Code: {}", start.user_code);
    println!("  URL:  {}", start.verification_uri);
    println!();
    println!("Waiting for approval...");

    let approval = client.wait_for_approval(&start).await?;
    println!("Device approved.");
    println!("Pass this token with --app-token or REMOTEDESK_APP_TOKEN:");
    println!("{}", approval.app_token);
    Ok(())
}

fn ice_servers_for(args: &ConnectArgs) -> Vec<crate::peer::IceServerConfig> {
    if args.ice_servers.is_empty() {
        return Config::from_env().ice_servers;
    }
    let non_empty = |name: &str| env::var(name).ok().filter(|value| !value.trim().is_empty());
    build_ice_servers(
        args.ice_servers.clone(),
        non_empty("REMOTEDESK_ICE_USERNAME"),
        non_empty("REMOTEDESK_ICE_CREDENTIAL"),
    )
}

#[cfg(feature = "webrtc-rs")]
fn agent_factory() -> Result<Arc<dyn AgentFactory>, CliError> {
    Ok(Arc::new(crate::peer::rtc::RtcAgentFactory::new()))
}

#[cfg(not(feature = "webrtc-rs"))]
fn agent_factory() -> Result<Arc<dyn AgentFactory>, CliError> {
    Err(CliError::InvalidArgument(
        "this build has no negotiation agent; enable the `webrtc-rs` feature".into(),
    ))
}

async fn connect(args: ConnectArgs) -> Result<(), CliError> {
    let role = NegotiationRole::from(args.role);
    let credentials = args.credentials();
    // Fail on unusable credentials before spawning anything.
    credentials
        .websocket_url()
        .map_err(|err| CliError::InvalidArgument(err.to_string()))?;

    let (transport, transport_events) = WebSocketTransport::new();
    let channel = ChannelClient::new(transport, transport_events);
    let mut handle = SessionOrchestrator::new(channel, agent_factory()?)
        .with_receive_video(!args.no_video)
        .spawn();
    handle.start(role, credentials, ice_servers_for(&args), args.app_token.clone())?;
    info!(target: "remotedesk::session", %role, topic = %args.topic, "session started");

    let outcome = drive(&mut handle, args.connect_timeout).await;
    if handle.end().is_err() {
        warn!(target: "remotedesk::session", "session task already stopped");
    }
    handle.shutdown().await;
    outcome
}

async fn drive(handle: &mut SessionHandle, connect_timeout: u64) -> Result<(), CliError> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut channel_open = false;
    let mut channel_was_open = false;
    let mut connected = false;

    let deadline = sleep(Duration::from_secs(connect_timeout));
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!("Interrupted, ending session.");
                return Ok(());
            }
            _ = &mut deadline, if !connected => {
                return Err(CliError::ConnectTimeout(connect_timeout));
            }
            line = stdin.next_line(), if stdin_open && channel_open => match line {
                Ok(Some(line)) => forward_input(handle, &line)?,
                Ok(None) => {
                    info!(target: "remotedesk::session", "stdin closed");
                    stdin_open = false;
                }
                Err(err) => {
                    warn!(target: "remotedesk::session", error = %err, "stdin read failed");
                    stdin_open = false;
                }
            },
            event = handle.next_event() => {
                let Some(event) = event else {
                    return Ok(());
                };
                match event {
                    SessionEvent::RelayConnected => eprintln!("Relay connected."),
                    SessionEvent::Joined => eprintln!("Joined relay topic, negotiating..."),
                    SessionEvent::StateChanged(state) => {
                        eprintln!("Peer connection {state}.");
                        match state {
                            PeerConnectionState::Connected => connected = true,
                            PeerConnectionState::Failed => {
                                return Err(SessionError::from(NegotiationError::ConnectionFailed).into());
                            }
                            PeerConnectionState::Closed => return Ok(()),
                            _ => {}
                        }
                    }
                    SessionEvent::GatheringComplete => {
                        info!(target: "remotedesk::session", "local candidate gathering complete");
                    }
                    SessionEvent::DataChannelOpen => {
                        eprintln!("Input channel open; reading events from stdin.");
                        channel_open = true;
                        channel_was_open = true;
                    }
                    SessionEvent::DataChannelClosed => {
                        eprintln!("Input channel closed.");
                        channel_open = false;
                    }
                    SessionEvent::Message(data) => {
                        println!("{}", String::from_utf8_lossy(&data));
                    }
                    SessionEvent::TrackAdded(track) => {
                        info!(
                            target: "remotedesk::session",
                            id = %track.id,
                            kind = %track.kind,
                            stream = %track.stream_id,
                            "remote track added"
                        );
                    }
                    SessionEvent::Error(err) => {
                        warn!(target: "remotedesk::session", kind = ?err.kind(), error = %err, "session error");
                    }
                    SessionEvent::RelayDisconnected => {
                        eprintln!("Relay disconnected.");
                        return Ok(());
                    }
                    SessionEvent::Ended => return Ok(()),
                }
            }
        }

        if !stdin_open && channel_was_open && !channel_open {
            return Ok(());
        }
    }
}

fn forward_input(handle: &SessionHandle, line: &str) -> Result<(), CliError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    match InputEvent::from_json(line) {
        Ok(event) => handle.send_input(&event)?,
        Err(err) => eprintln!("Skipping invalid input event: {err}"),
    }
    Ok(())
}
