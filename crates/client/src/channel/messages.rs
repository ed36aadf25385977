//! Push-channel topics and message contracts.

use std::fmt;

use chess_core::Move;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Subscription topic on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Broadcast presence list.
    LobbyUsers,
    /// Presence list sent directly to this user after joining.
    LobbyUsersReply,
    Invitations,
    Errors,
    Game(i64),
}

impl Topic {
    /// Topics bound for the whole connection, independent of any view.
    pub const SESSION: [Topic; 4] = [
        Topic::LobbyUsers,
        Topic::LobbyUsersReply,
        Topic::Invitations,
        Topic::Errors,
    ];

    pub fn destination(&self) -> String {
        match self {
            Topic::LobbyUsers => "/topic/lobby/users".to_string(),
            Topic::LobbyUsersReply => "/user/queue/lobby/users".to_string(),
            Topic::Invitations => "/user/queue/invitations".to_string(),
            Topic::Errors => "/user/queue/errors".to_string(),
            Topic::Game(id) => format!("/topic/game/{id}"),
        }
    }

    pub fn from_destination(destination: &str) -> Option<Topic> {
        match destination {
            "/topic/lobby/users" => Some(Topic::LobbyUsers),
            "/user/queue/lobby/users" => Some(Topic::LobbyUsersReply),
            "/user/queue/invitations" => Some(Topic::Invitations),
            "/user/queue/errors" => Some(Topic::Errors),
            other => other
                .strip_prefix("/topic/game/")
                .and_then(|id| id.parse().ok())
                .map(Topic::Game),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination())
    }
}

// ---- Inbound ----

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PresenceUpdate {
    #[serde(default)]
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationKind {
    Invitation,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationEvent {
    #[serde(rename = "type")]
    pub kind: InvitationKind,
    #[serde(default)]
    pub from_username: Option<String>,
    #[serde(default)]
    pub game_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub message: String,
    #[serde(default)]
    pub game_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameEvent {
    Move {
        #[serde(rename = "move", default)]
        payload: Option<Value>,
    },
    GameOver {
        #[serde(rename = "winnerUsername", default)]
        winner_username: Option<String>,
    },
}

/// Decoded inbound message, typed by the topic it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Presence(PresenceUpdate),
    Invitation(InvitationEvent),
    Error(ErrorEvent),
    Game { game_id: i64, event: GameEvent },
}

impl PushMessage {
    pub fn decode(topic: &Topic, body: &Value) -> Result<Self, serde_json::Error> {
        Ok(match topic {
            Topic::LobbyUsers | Topic::LobbyUsersReply => {
                PushMessage::Presence(PresenceUpdate::deserialize(body)?)
            }
            Topic::Invitations => PushMessage::Invitation(InvitationEvent::deserialize(body)?),
            Topic::Errors => PushMessage::Error(ErrorEvent::deserialize(body)?),
            Topic::Game(game_id) => PushMessage::Game {
                game_id: *game_id,
                event: GameEvent::deserialize(body)?,
            },
        })
    }
}

/// Lenient conversion of a MOVE payload. Missing sequence numbers become 0,
/// a missing piece becomes `P`; payloads without both squares are dropped.
pub fn normalize_move(payload: &Value) -> Option<Move> {
    let sequence = match payload.get("moveNumber") {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    let from = text_field(payload, "fromSquare")?;
    let to = text_field(payload, "toSquare")?;
    let piece = text_field(payload, "piece");
    let promotion = text_field(payload, "promotion");

    match Move::new(sequence, &from, &to, piece.as_deref(), promotion.as_deref()) {
        Ok(mv) => Some(mv),
        Err(e) => {
            debug!(error = %e, "Dropping malformed move payload");
            None
        }
    }
}

fn text_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

// ---- Outbound ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    /// Number of moves preceding this one; the server stores it as `move_number + 1`.
    pub move_number: u32,
    pub from_square: String,
    pub to_square: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piece: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

impl MovePayload {
    pub fn for_move(mv: &Move) -> Self {
        Self {
            move_number: mv.sequence.saturating_sub(1),
            from_square: mv.from.to_string(),
            to_square: mv.to.to_string(),
            piece: Some(mv.piece.to_string()),
            promotion: mv.promotion.map(|p| p.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    JoinLobby,
    Invite { to_username: String },
    Accept { from_username: String },
    Decline { from_username: String },
    Move { game_id: i64, payload: MovePayload },
}

impl Outbound {
    pub fn destination(&self) -> String {
        match self {
            Outbound::JoinLobby => "/app/lobby/join".to_string(),
            Outbound::Invite { .. } => "/app/lobby/invite".to_string(),
            Outbound::Accept { .. } => "/app/lobby/accept".to_string(),
            Outbound::Decline { .. } => "/app/lobby/decline".to_string(),
            Outbound::Move { game_id, .. } => format!("/app/game/{game_id}/move"),
        }
    }

    pub fn body(&self) -> Value {
        match self {
            Outbound::JoinLobby => json!({}),
            Outbound::Invite { to_username } => json!({ "toUsername": to_username }),
            Outbound::Accept { from_username } | Outbound::Decline { from_username } => {
                json!({ "fromUsername": from_username })
            }
            Outbound::Move { payload, .. } => json!(payload),
        }
    }
}
