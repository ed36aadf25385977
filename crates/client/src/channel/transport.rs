//! Seam between the connection manager and the actual push transport.
//!
//! Framing, TLS and retries live on the other side of this trait. The
//! transport reports back through [`TransportEvent`]s which the owner feeds
//! into [`ConnectionManager::handle`](super::ConnectionManager::handle).

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

pub trait Transport {
    /// Start opening the channel; completion arrives as [`TransportEvent::Opened`].
    fn open(&mut self, credential: &str);
    fn close(&mut self);
    fn subscribe(&mut self, destination: &str);
    fn unsubscribe(&mut self, destination: &str);
    fn publish(&mut self, destination: &str, body: &Value);
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Closed,
    Failed(String),
    Message { destination: String, body: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Open { credential: String },
    Close,
    Subscribe(String),
    Unsubscribe(String),
    Publish { destination: String, body: Value },
}

/// Forwards every transport call as a [`TransportCommand`] on an unbounded
/// channel, for a wire implementation running elsewhere.
pub struct ChannelTransport {
    commands: mpsc::UnboundedSender<TransportCommand>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { commands: tx }, rx)
    }

    fn forward(&self, command: TransportCommand) {
        if self.commands.send(command).is_err() {
            warn!("Transport command receiver dropped");
        }
    }
}

impl Transport for ChannelTransport {
    fn open(&mut self, credential: &str) {
        self.forward(TransportCommand::Open {
            credential: credential.to_string(),
        });
    }

    fn close(&mut self) {
        self.forward(TransportCommand::Close);
    }

    fn subscribe(&mut self, destination: &str) {
        self.forward(TransportCommand::Subscribe(destination.to_string()));
    }

    fn unsubscribe(&mut self, destination: &str) {
        self.forward(TransportCommand::Unsubscribe(destination.to_string()));
    }

    fn publish(&mut self, destination: &str, body: &Value) {
        self.forward(TransportCommand::Publish {
            destination: destination.to_string(),
            body: body.clone(),
        });
    }
}
