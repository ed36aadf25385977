//! Lobby: presence, invitations and the player's game lists.

use chess_core::GameDto;
use tracing::{debug, info, warn};

use crate::channel::{
    ConnectionState, Delivery, InvitationKind, Outbound, PushMessage, SharedConnection,
    SubscriberId, Topic,
};
use crate::clients::PendingInvitation;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::observers::{ObserverId, Observers};
use crate::scheduler::{Scheduler, Timer, TimerId};
use crate::session::SharedSession;
use crate::sync::{Ticket, TicketIssuer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEffect {
    FetchActiveGames { ticket: Ticket },
    FetchHistory { ticket: Ticket },
    FetchPendingInvitation { ticket: Ticket },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LobbyView {
    pub connection: Option<ConnectionState>,
    pub online: Vec<String>,
    /// Who invited us, if an invitation is waiting for an answer.
    pub pending_invitation: Option<String>,
    /// Who we invited, until they accept or decline.
    pub inviting: Option<String>,
    pub active_games: Vec<GameDto>,
    pub history: Vec<GameDto>,
    /// Last server error not tied to a game.
    pub error: Option<String>,
}

pub struct LobbyCoordinator {
    conn: SharedConnection,
    session: SharedSession,
    subscriber: SubscriberId,
    tickets: TicketIssuer,
    invitation_poll_interval: std::time::Duration,
    timers: Vec<TimerId>,
    effects: Vec<LobbyEffect>,
    navigation: Option<i64>,
    active: bool,
    torn_down: bool,
    view: LobbyView,
    observers: Observers<LobbyView>,
}

impl LobbyCoordinator {
    pub fn new(conn: SharedConnection, session: SharedSession, config: &ClientConfig) -> Self {
        let subscriber = conn.borrow_mut().register();
        Self {
            conn,
            session,
            subscriber,
            tickets: Ticket::issuer(),
            invitation_poll_interval: config.invitation_poll_interval,
            timers: Vec::new(),
            effects: Vec::new(),
            navigation: None,
            active: false,
            torn_down: false,
            view: LobbyView::default(),
            observers: Observers::default(),
        }
    }

    pub fn subscriber(&self) -> SubscriberId {
        self.subscriber
    }

    pub fn view(&self) -> &LobbyView {
        &self.view
    }

    pub fn observe(&mut self, callback: impl FnMut(&LobbyView) + 'static) -> ObserverId {
        self.observers.register(callback)
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.observers.deregister(id)
    }

    pub fn take_effects(&mut self) -> Vec<LobbyEffect> {
        std::mem::take(&mut self.effects)
    }

    /// Game the user should be taken to, set when an invitation was accepted
    /// or a listed game was opened.
    pub fn take_navigation(&mut self) -> Option<i64> {
        self.navigation.take()
    }

    pub fn activate(&mut self, scheduler: &mut dyn Scheduler) {
        if self.active || self.torn_down {
            return;
        }
        self.active = true;
        {
            let mut conn = self.conn.borrow_mut();
            conn.connect();
            for topic in Topic::SESSION {
                conn.subscribe(topic, self.subscriber);
            }
        }
        self.queue(|ticket| LobbyEffect::FetchPendingInvitation { ticket });
        self.refresh_lists();
        self.timers.push(
            scheduler.schedule_repeating(self.invitation_poll_interval, Timer::PollInvitation),
        );
        self.refresh();
    }

    pub fn teardown(&mut self, scheduler: &mut dyn Scheduler) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        for id in self.timers.drain(..) {
            scheduler.cancel(id);
        }
        self.conn.borrow_mut().unsubscribe_all(self.subscriber);
        self.effects.clear();
    }

    /// Re-fetch the active and finished game lists.
    pub fn refresh_lists(&mut self) {
        self.queue(|ticket| LobbyEffect::FetchActiveGames { ticket });
        self.queue(|ticket| LobbyEffect::FetchHistory { ticket });
    }

    fn queue(&mut self, effect: impl FnOnce(Ticket) -> LobbyEffect) {
        if self.torn_down {
            return;
        }
        let ticket = self.tickets.issue();
        self.effects.push(effect(ticket));
    }

    fn accepts(&self, ticket: Ticket) -> bool {
        !self.torn_down && self.tickets.owns(ticket)
    }

    pub fn on_timer(&mut self, timer: Timer) {
        if timer == Timer::PollInvitation && !self.torn_down {
            self.queue(|ticket| LobbyEffect::FetchPendingInvitation { ticket });
        }
    }

    pub fn on_connection_changed(&mut self) {
        if !self.torn_down {
            self.refresh();
        }
    }

    pub fn on_active_games(&mut self, ticket: Ticket, result: Result<Vec<GameDto>>) {
        if !self.accepts(ticket) {
            return;
        }
        self.view.active_games = result.unwrap_or_else(|e| {
            debug!(error = %e, "Active games fetch failed; showing none");
            Vec::new()
        });
        self.refresh();
    }

    pub fn on_history(&mut self, ticket: Ticket, result: Result<Vec<GameDto>>) {
        if !self.accepts(ticket) {
            return;
        }
        self.view.history = result.unwrap_or_else(|e| {
            debug!(error = %e, "History fetch failed; showing none");
            Vec::new()
        });
        self.refresh();
    }

    /// Poll fallback for invitations the push channel may have missed.
    pub fn on_pending_invitation(&mut self, ticket: Ticket, result: Result<PendingInvitation>) {
        if !self.accepts(ticket) {
            return;
        }
        match result {
            Ok(pending) => {
                if let Some(from) = pending.from_user() {
                    if self.view.pending_invitation.as_deref() != Some(from) {
                        info!(from, "Pending invitation found by poll");
                    }
                    self.view.pending_invitation = Some(from.to_string());
                }
            }
            Err(e) => debug!(error = %e, "Invitation poll failed; ignoring"),
        }
        self.refresh();
    }

    pub fn on_delivery(&mut self, delivery: &Delivery) {
        if self.torn_down || delivery.subscriber != self.subscriber {
            return;
        }
        match &delivery.message {
            PushMessage::Presence(_) => {}
            PushMessage::Invitation(inv) => match inv.kind {
                InvitationKind::Invitation => {
                    info!(from = ?inv.from_username, "Invitation received");
                    self.view.pending_invitation = inv.from_username.clone();
                }
                InvitationKind::Accepted => match inv.game_id {
                    Some(game_id) => {
                        info!(game_id, "Invitation accepted; opening game");
                        self.view.pending_invitation = None;
                        self.view.inviting = None;
                        self.navigation = Some(game_id);
                    }
                    None => warn!("Accepted invitation without a game id"),
                },
                InvitationKind::Declined => {
                    info!(from = ?inv.from_username, "Invitation declined");
                    self.view.inviting = None;
                }
            },
            PushMessage::Error(err) if err.game_id.is_none() => {
                self.view.error = Some(err.message.clone());
            }
            _ => return,
        }
        self.refresh();
    }

    /// Invite `username` to a game. Returns false when the invite could not
    /// be sent (ourselves, or channel down).
    pub fn invite(&mut self, username: &str) -> bool {
        if !self.is_other_user(username) {
            return false;
        }
        self.view.inviting = Some(username.to_string());
        let sent = self.conn.borrow_mut().send(&Outbound::Invite {
            to_username: username.to_string(),
        });
        self.refresh();
        sent
    }

    pub fn accept(&mut self) -> bool {
        let Some(from) = self.view.pending_invitation.clone() else {
            return false;
        };
        self.conn
            .borrow_mut()
            .send(&Outbound::Accept { from_username: from })
    }

    pub fn decline(&mut self) -> bool {
        let Some(from) = self.view.pending_invitation.take() else {
            return false;
        };
        let sent = self
            .conn
            .borrow_mut()
            .send(&Outbound::Decline { from_username: from });
        self.refresh();
        sent
    }

    pub fn open_game(&mut self, game_id: i64) {
        self.navigation = Some(game_id);
    }

    /// True for any non-empty name that is not the signed-in user (compared
    /// case-insensitively). Everyone is "other" when nobody is signed in.
    pub fn is_other_user(&self, username: &str) -> bool {
        if username.is_empty() {
            return false;
        }
        match self.session.borrow().username() {
            Some(me) => !username.eq_ignore_ascii_case(me),
            None => true,
        }
    }

    fn refresh(&mut self) {
        let mut view = self.view.clone();
        {
            let conn = self.conn.borrow();
            view.connection = Some(conn.state());
            view.online = conn.online_users().to_vec();
        }
        if view != self.view {
            self.view = view;
            self.observers.notify(&self.view);
        }
    }
}
