//! Push-channel lifecycle and topic dispatch.
//!
//! Subscriptions are declarative: callers register intent per topic and the
//! manager binds it whenever the channel is connected, replaying every
//! binding after a reconnect. Inbound messages are decoded and returned as
//! [`Delivery`] values addressed to the registered subscribers, in arrival
//! order. Nothing is buffered while the channel is down.

pub mod messages;
pub mod transport;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::session::SharedSession;

pub use messages::{
    normalize_move, ErrorEvent, GameEvent, InvitationEvent, InvitationKind, MovePayload,
    Outbound, PresenceUpdate, PushMessage, Topic,
};
pub use transport::{ChannelTransport, Transport, TransportCommand, TransportEvent};

pub type SharedConnection = Rc<RefCell<ConnectionManager>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Identity of one consumer of push messages (a game view, the lobby, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub subscriber: SubscriberId,
    pub topic: Topic,
    pub message: PushMessage,
}

pub struct ConnectionManager {
    transport: Box<dyn Transport>,
    session: SharedSession,
    state: ConnectionState,
    /// Subscription intent; survives disconnects.
    requested: BTreeMap<Topic, BTreeSet<SubscriberId>>,
    /// Topics currently bound on the live channel.
    bound: BTreeSet<Topic>,
    online: Vec<String>,
    next_subscriber: u64,
}

impl ConnectionManager {
    pub fn new(transport: Box<dyn Transport>, session: SharedSession) -> Self {
        Self {
            transport,
            session,
            state: ConnectionState::Disconnected,
            requested: BTreeMap::new(),
            bound: BTreeSet::new(),
            online: Vec::new(),
            next_subscriber: 1,
        }
    }

    pub fn shared(self) -> SharedConnection {
        Rc::new(RefCell::new(self))
    }

    /// Allocate a subscriber identity.
    pub fn register(&mut self) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Users currently in the lobby. Only meaningful while connected.
    pub fn online_users(&self) -> &[String] {
        &self.online
    }

    /// Topics bound on the live channel right now.
    pub fn active_subscriptions(&self) -> Vec<Topic> {
        self.bound.iter().cloned().collect()
    }

    /// Topics some subscriber has asked for, bound or not.
    pub fn requested_topics(&self) -> Vec<Topic> {
        self.requested.keys().cloned().collect()
    }

    /// Start connecting. No-op when already connecting/connected or when the
    /// session holds no credential. Returns whether an open was issued.
    pub fn connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        let credential = match self.session.borrow().credential() {
            Some(c) => c.to_string(),
            None => {
                debug!("No credential; not connecting push channel");
                return false;
            }
        };
        info!("Connecting push channel");
        self.state = ConnectionState::Connecting;
        self.transport.open(&credential);
        true
    }

    /// Close the channel on request (logout, auth failure).
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            info!("Disconnecting push channel");
            self.transport.close();
        }
        self.enter_disconnected();
    }

    pub fn subscribe(&mut self, topic: Topic, subscriber: SubscriberId) {
        let inserted = self
            .requested
            .entry(topic.clone())
            .or_default()
            .insert(subscriber);
        if inserted {
            debug!(%topic, ?subscriber, "Subscription requested");
        }
        if self.is_connected() && !self.bound.contains(&topic) {
            self.bind(topic);
        }
    }

    pub fn unsubscribe(&mut self, topic: &Topic, subscriber: SubscriberId) {
        let Some(subscribers) = self.requested.get_mut(topic) else {
            return;
        };
        subscribers.remove(&subscriber);
        if !subscribers.is_empty() {
            return;
        }
        self.requested.remove(topic);
        debug!(%topic, "Last subscriber left");
        if !Topic::SESSION.contains(topic) && self.bound.remove(topic) {
            self.transport.unsubscribe(&topic.destination());
        }
    }

    pub fn unsubscribe_all(&mut self, subscriber: SubscriberId) {
        let topics: Vec<Topic> = self
            .requested
            .iter()
            .filter(|(_, subs)| subs.contains(&subscriber))
            .map(|(topic, _)| topic.clone())
            .collect();
        for topic in topics {
            self.unsubscribe(&topic, subscriber);
        }
    }

    /// Publish while connected; otherwise the message is dropped.
    pub fn send(&mut self, outbound: &Outbound) -> bool {
        let destination = outbound.destination();
        if !self.is_connected() {
            debug!(%destination, "Push channel not connected; dropping outbound message");
            return false;
        }
        self.transport.publish(&destination, &outbound.body());
        true
    }

    pub fn handle(&mut self, event: TransportEvent) -> Vec<Delivery> {
        match event {
            TransportEvent::Opened => {
                self.on_opened();
                Vec::new()
            }
            TransportEvent::Closed => {
                if self.state != ConnectionState::Disconnected {
                    info!("Push channel closed");
                }
                self.enter_disconnected();
                Vec::new()
            }
            TransportEvent::Failed(reason) => {
                warn!(%reason, "Push channel failed");
                self.enter_disconnected();
                Vec::new()
            }
            TransportEvent::Message { destination, body } => self.dispatch(&destination, &body),
        }
    }

    fn on_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            warn!(state = ?self.state, "Ignoring open event outside of connecting state");
            return;
        }
        self.state = ConnectionState::Connected;
        self.bound.clear();

        let mut topics: BTreeSet<Topic> = Topic::SESSION.iter().cloned().collect();
        topics.extend(self.requested.keys().cloned());
        info!(topics = topics.len(), "Push channel connected; binding subscriptions");
        for topic in topics {
            self.bind(topic);
        }
        self.send(&Outbound::JoinLobby);
    }

    fn bind(&mut self, topic: Topic) {
        self.transport.subscribe(&topic.destination());
        self.bound.insert(topic);
    }

    fn enter_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.bound.clear();
        self.online.clear();
    }

    fn dispatch(&mut self, destination: &str, body: &serde_json::Value) -> Vec<Delivery> {
        if !self.is_connected() {
            debug!(%destination, "Dropping message received while not connected");
            return Vec::new();
        }
        let Some(topic) = Topic::from_destination(destination) else {
            debug!(%destination, "Dropping message for unknown destination");
            return Vec::new();
        };
        if !self.bound.contains(&topic) {
            debug!(%topic, "Dropping message for unbound topic");
            return Vec::new();
        }
        let message = match PushMessage::decode(&topic, body) {
            Ok(m) => m,
            Err(e) => {
                warn!(%topic, error = %e, "Failed to decode push message");
                return Vec::new();
            }
        };

        if let PushMessage::Presence(update) = &message {
            self.online = update.usernames.clone();
        }

        self.requested
            .get(&topic)
            .into_iter()
            .flatten()
            .map(|subscriber| Delivery {
                subscriber: *subscriber,
                topic: topic.clone(),
                message: message.clone(),
            })
            .collect()
    }
}
