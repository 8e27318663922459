//! Events raised by sessions.
//!
//! Sessions never call into the application directly. Every handler pushes
//! [`Event`]s onto a queue owned by the manager, which hands them to the
//! application's [`EventHandler`] at the end of each reactor iteration.
//! Failures (connect, login, denial) are reported the same way.

use crate::connection::Manager;
use crate::session::SessionKey;
use crate::storage::{Message, User};
use std::sync::Arc;

/// An event and the session it came from.
#[derive(Debug, Clone)]
pub struct Event {
    pub session: SessionKey,
    pub kind: EventKind,
}

impl Event {
    pub fn new(session: SessionKey, kind: EventKind) -> Self {
        Self { session, kind }
    }

    /// Room name, for room events.
    pub fn room(&self) -> Option<&str> {
        match &self.session {
            SessionKey::Room(name) => Some(name),
            SessionKey::Pm => None,
        }
    }
}

/// Every event the core can raise.
#[derive(Debug, Clone)]
pub enum EventKind {
    // Room lifecycle
    Connect,
    Reconnect,
    ConnectFail,
    Disconnect,
    LoginFail,

    // Messages
    Message { user: User, message: Arc<Message> },
    HistoryMessage { user: User, message: Arc<Message> },
    MessageDelete { user: User, message: Arc<Message> },
    ClearAll,

    // Roster
    Join(User),
    Leave(User),
    UserCountChange(usize),

    // Moderation
    ModAdd(User),
    ModRemove(User),
    ModChange,
    Ban { src: User, target: User },
    Unban { src: User, target: User },
    BanlistUpdate,
    UnbanlistUpdate,
    FloodWarning,
    FloodBan,
    FloodBanRepeat,

    // Transport
    Raw(String),
    Ping,

    // Private messages
    PmConnect,
    PmDisconnect,
    PmMessage { user: User, body: String },
    PmContactStatus { user: User, idle: String, status: String },
    PmContactAdd(User),
    PmContactRemove(User),
    PmBlock(User),
    PmUnblock(User),
    PmPing,
}

impl EventKind {
    /// Stable name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Reconnect => "reconnect",
            EventKind::ConnectFail => "connect_fail",
            EventKind::Disconnect => "disconnect",
            EventKind::LoginFail => "login_fail",
            EventKind::Message { .. } => "message",
            EventKind::HistoryMessage { .. } => "history_message",
            EventKind::MessageDelete { .. } => "message_delete",
            EventKind::ClearAll => "clear_all",
            EventKind::Join(_) => "join",
            EventKind::Leave(_) => "leave",
            EventKind::UserCountChange(_) => "user_count_change",
            EventKind::ModAdd(_) => "mod_add",
            EventKind::ModRemove(_) => "mod_remove",
            EventKind::ModChange => "mod_change",
            EventKind::Ban { .. } => "ban",
            EventKind::Unban { .. } => "unban",
            EventKind::BanlistUpdate => "banlist_update",
            EventKind::UnbanlistUpdate => "unbanlist_update",
            EventKind::FloodWarning => "flood_warning",
            EventKind::FloodBan => "flood_ban",
            EventKind::FloodBanRepeat => "flood_ban_repeat",
            EventKind::Raw(_) => "raw",
            EventKind::Ping => "ping",
            EventKind::PmConnect => "pm_connect",
            EventKind::PmDisconnect => "pm_disconnect",
            EventKind::PmMessage { .. } => "pm_message",
            EventKind::PmContactStatus { .. } => "pm_contact_status",
            EventKind::PmContactAdd(_) => "pm_contact_add",
            EventKind::PmContactRemove(_) => "pm_contact_remove",
            EventKind::PmBlock(_) => "pm_block",
            EventKind::PmUnblock(_) => "pm_unblock",
            EventKind::PmPing => "pm_ping",
        }
    }
}

/// Application callbacks.
///
/// The handler gets the manager back so it can react: send a reply, join
/// another room, schedule a timer.
pub trait EventHandler {
    fn on_event(&mut self, manager: &mut Manager, event: &Event);
}

impl<F> EventHandler for F
where
    F: FnMut(&mut Manager, &Event),
{
    fn on_event(&mut self, manager: &mut Manager, event: &Event) {
        self(manager, event)
    }
}
