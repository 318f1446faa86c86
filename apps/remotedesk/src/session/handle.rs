use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{SessionError, SessionEvent, SessionOrchestrator};
use crate::peer::{IceServerConfig, NegotiationRole};
use crate::protocol::InputEvent;
use crate::signaling::RealtimeCredentials;
use crate::transport::RelayTransport;

enum SessionCommand {
    Start {
        role: NegotiationRole,
        credentials: RealtimeCredentials,
        ice_servers: Vec<IceServerConfig>,
        app_token: Option<String>,
    },
    Input(Bytes),
    End,
}

/// Command and event surface of an orchestrator running on its own task.
///
/// Dropping the handle ends the session and stops the task.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl<T: RelayTransport + 'static> SessionOrchestrator<T> {
    pub fn spawn(self) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(commands_rx, events_tx));
        SessionHandle {
            commands: commands_tx,
            events: events_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        loop {
            let mut stopping = false;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.end_session().await;
                        stopping = true;
                    }
                },
                input = self.next_input() => self.handle_input(input).await,
            }
            while let Some(event) = self.take_event() {
                let _ = events.send(event);
            }
            if stopping {
                tracing::debug!(target: "remotedesk::session", "session task stopping");
                break;
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start {
                role,
                credentials,
                ice_servers,
                app_token,
            } => {
                if let Err(err) =
                    self.start_session(role, credentials, ice_servers, app_token.as_deref())
                {
                    self.report(err);
                }
            }
            SessionCommand::Input(data) => {
                if !self.send_bytes(data).await {
                    tracing::trace!(target: "remotedesk::session", "input event dropped");
                }
            }
            SessionCommand::End => self.end_session().await,
        }
    }
}

impl SessionHandle {
    pub fn start(
        &self,
        role: NegotiationRole,
        credentials: RealtimeCredentials,
        ice_servers: Vec<IceServerConfig>,
        app_token: Option<String>,
    ) -> Result<(), SessionError> {
        self.command(SessionCommand::Start {
            role,
            credentials,
            ice_servers,
            app_token,
        })
    }

    pub fn send_input(&self, event: &InputEvent) -> Result<(), SessionError> {
        let data = event.to_bytes().map_err(|err| SessionError::InvalidSignal {
            kind: "input".into(),
            reason: err.to_string(),
        })?;
        self.send_bytes(data)
    }

    /// Queues raw bytes for the input channel. Delivery is best effort.
    pub fn send_bytes(&self, data: Bytes) -> Result<(), SessionError> {
        self.command(SessionCommand::Input(data))
    }

    pub fn end(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::End)
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Ends the session and waits for the task to finish.
    pub async fn shutdown(self) {
        let SessionHandle {
            commands,
            events,
            task,
        } = self;
        drop(commands);
        drop(events);
        if let Err(err) = task.await {
            tracing::warn!(target: "remotedesk::session", error = %err, "session task failed");
        }
    }

    fn command(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::peer::mock::ScriptedAgentFactory;
    use crate::signaling::ChannelClient;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn handle_drives_session_to_end() {
        let (transport, transport_events, remote) = MockTransport::new();
        let (factory, probe) = ScriptedAgentFactory::new();
        let mut handle =
            SessionOrchestrator::new(ChannelClient::new(transport, transport_events), Arc::new(factory))
                .spawn();

        let credentials = RealtimeCredentials::new("http://127.0.0.1:4000", "anon-key", "remote:abc123");
        handle
            .start(NegotiationRole::Offerer, credentials, Vec::new(), None)
            .unwrap();
        remote.open();
        assert_eq!(handle.next_event().await, Some(SessionEvent::RelayConnected));

        remote.push_json(&json!({
            "event": "phx_reply",
            "topic": "remote:abc123",
            "payload": {"status": "ok"},
            "ref": "1",
        }));
        assert_eq!(handle.next_event().await, Some(SessionEvent::Joined));
        assert_eq!(probe.agents_created(), 1);

        handle.end().unwrap();
        loop {
            match handle.next_event().await {
                Some(SessionEvent::Ended) => break,
                Some(_) => continue,
                None => panic!("session task stopped before ending"),
            }
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn start_errors_arrive_as_events() {
        let (transport, transport_events, remote) = MockTransport::new();
        let (factory, _probe) = ScriptedAgentFactory::new();
        let mut handle =
            SessionOrchestrator::new(ChannelClient::new(transport, transport_events), Arc::new(factory))
                .spawn();

        let credentials = RealtimeCredentials::new("not a url", "anon-key", "remote:abc123");
        handle
            .start(NegotiationRole::Answerer, credentials, Vec::new(), None)
            .unwrap();
        assert!(matches!(
            handle.next_event().await,
            Some(SessionEvent::Error(SessionError::Channel(_)))
        ));
        assert!(remote.requests().is_empty());
        handle.shutdown().await;
    }
}
