//! Push-channel lifecycle: connect, reconnect and dispatch.

mod common;

use std::collections::BTreeSet;

use chess_client::channel::{
    ConnectionManager, ConnectionState, Outbound, Topic, TransportCommand, TransportEvent,
};
use chess_client::Session;
use common::{connection, session, RecordingTransport};
use serde_json::json;

fn connected(username: &str) -> (chess_client::SharedConnection, RecordingTransport) {
    let session = session(username);
    let (conn, transport) = connection(&session);
    assert!(conn.borrow_mut().connect());
    conn.borrow_mut().handle(TransportEvent::Opened);
    (conn, transport)
}

#[test]
fn test_reconnect_restores_same_subscriptions_without_duplicates() {
    let (conn, transport) = connected("alice");
    let game_view = conn.borrow_mut().register();
    let other_view = conn.borrow_mut().register();
    conn.borrow_mut().subscribe(Topic::Game(5), game_view);
    conn.borrow_mut().subscribe(Topic::Game(5), other_view);
    conn.borrow_mut().subscribe(Topic::Errors, game_view);

    let before: BTreeSet<Topic> = conn.borrow().active_subscriptions().into_iter().collect();
    transport.clear();

    conn.borrow_mut().handle(TransportEvent::Closed);
    assert_eq!(conn.borrow().state(), ConnectionState::Disconnected);
    assert!(conn.borrow().active_subscriptions().is_empty());

    assert!(conn.borrow_mut().connect());
    conn.borrow_mut().handle(TransportEvent::Opened);
    let after: BTreeSet<Topic> = conn.borrow().active_subscriptions().into_iter().collect();
    assert_eq!(before, after);

    let subscribed = transport.subscribed();
    let unique: BTreeSet<&String> = subscribed.iter().collect();
    assert_eq!(subscribed.len(), unique.len(), "duplicate binding: {subscribed:?}");
    assert_eq!(subscribed.len(), after.len());
}

#[test]
fn test_subscription_intent_survives_while_disconnected() {
    let session = session("alice");
    let (conn, transport) = connection(&session);
    let view = conn.borrow_mut().register();
    conn.borrow_mut().subscribe(Topic::Game(9), view);
    assert!(transport.subscribed().is_empty());

    conn.borrow_mut().connect();
    conn.borrow_mut().handle(TransportEvent::Opened);
    assert!(transport.subscribed().contains(&"/topic/game/9".to_string()));
}

#[test]
fn test_no_credential_never_connects() {
    let anonymous = Session::new().shared();
    let (conn, transport) = connection(&anonymous);
    assert!(!conn.borrow_mut().connect());
    assert!(transport.commands().is_empty());
    assert_eq!(conn.borrow().state(), ConnectionState::Disconnected);
}

#[test]
fn test_cleared_session_refuses_reconnect() {
    let session = session("alice");
    let (conn, _transport) = connection(&session);
    conn.borrow_mut().connect();
    conn.borrow_mut().handle(TransportEvent::Opened);

    session.borrow_mut().clear().unwrap();
    conn.borrow_mut().disconnect();
    assert!(!conn.borrow_mut().connect());
}

#[test]
fn test_join_lobby_published_on_connect() {
    let (_conn, transport) = connected("alice");
    let published = transport.published();
    assert_eq!(published, vec![("/app/lobby/join".to_string(), json!({}))]);
    assert!(matches!(
        transport.commands()[0],
        TransportCommand::Open { ref credential } if credential == "test-token"
    ));
}

#[test]
fn test_send_is_dropped_unless_connected() {
    let session = session("alice");
    let (conn, transport) = connection(&session);
    let invite = Outbound::Invite {
        to_username: "bob".into(),
    };
    assert!(!conn.borrow_mut().send(&invite));
    conn.borrow_mut().connect();
    assert!(!conn.borrow_mut().send(&invite));
    assert!(transport.published().is_empty());

    conn.borrow_mut().handle(TransportEvent::Opened);
    assert!(conn.borrow_mut().send(&invite));

    conn.borrow_mut().handle(TransportEvent::Failed("socket reset".into()));
    assert!(!conn.borrow_mut().send(&invite));
    // Join on connect plus the one invite sent while connected.
    assert_eq!(transport.published().len(), 2);
}

#[test]
fn test_messages_before_connected_are_not_delivered() {
    let session = session("alice");
    let (conn, _transport) = connection(&session);
    let view = conn.borrow_mut().register();
    conn.borrow_mut().subscribe(Topic::Game(3), view);
    conn.borrow_mut().connect();

    let early = conn.borrow_mut().handle(TransportEvent::Message {
        destination: "/topic/game/3".into(),
        body: json!({"type": "GAME_OVER", "winnerUsername": "bob"}),
    });
    assert!(early.is_empty());

    conn.borrow_mut().handle(TransportEvent::Opened);
    let late = conn.borrow_mut().handle(TransportEvent::Message {
        destination: "/topic/game/3".into(),
        body: json!({"type": "GAME_OVER", "winnerUsername": "bob"}),
    });
    assert_eq!(late.len(), 1);
}

#[test]
fn test_dispatch_preserves_arrival_order() {
    let (conn, _transport) = connected("alice");
    let view = conn.borrow_mut().register();
    conn.borrow_mut().subscribe(Topic::Game(3), view);

    let mut seen = Vec::new();
    for n in [2, 1, 3] {
        let out = conn.borrow_mut().handle(TransportEvent::Message {
            destination: "/topic/game/3".into(),
            body: json!({"type": "MOVE", "move": {"moveNumber": n, "fromSquare": "a2", "toSquare": "a3"}}),
        });
        seen.extend(out);
    }
    let numbers: Vec<u64> = seen
        .iter()
        .map(|d| match &d.message {
            chess_client::channel::PushMessage::Game {
                event: chess_client::channel::GameEvent::Move { payload: Some(p) },
                ..
            } => p["moveNumber"].as_u64().unwrap(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(numbers, vec![2, 1, 3]);
}

#[test]
fn test_presence_only_while_connected() {
    let (conn, _transport) = connected("alice");
    conn.borrow_mut().handle(TransportEvent::Message {
        destination: "/user/queue/lobby/users".into(),
        body: json!({"usernames": ["alice", "bob"]}),
    });
    assert_eq!(conn.borrow().online_users().len(), 2);

    conn.borrow_mut().disconnect();
    assert!(conn.borrow().online_users().is_empty());
}

#[test]
fn test_undecodable_message_is_dropped() {
    let (conn, _transport) = connected("alice");
    let view = conn.borrow_mut().register();
    conn.borrow_mut().subscribe(Topic::Game(3), view);
    let out = conn.borrow_mut().handle(TransportEvent::Message {
        destination: "/topic/game/3".into(),
        body: json!({"type": "CHAT", "text": "hi"}),
    });
    assert!(out.is_empty());
    assert_eq!(conn.borrow().state(), ConnectionState::Connected);
}

#[test]
fn test_manager_built_directly() {
    let transport = RecordingTransport::default();
    let mut mgr = ConnectionManager::new(Box::new(transport.clone()), session("carol"));
    assert!(mgr.connect());
    assert_eq!(mgr.state(), ConnectionState::Connecting);
    mgr.disconnect();
    assert_eq!(transport.commands().last(), Some(&TransportCommand::Close));
}
