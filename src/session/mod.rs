//! Protocol Sessions
//!
//! A session is one logical protocol connection: a room, or the private
//! message channel. Sessions are pure state machines. They never touch a
//! socket; the manager feeds them received bytes and drains their outbound
//! queue.
//!
//! ## Lifecycle
//!
//! ```text
//!                 open()            transport up          server ack
//! Disconnected ──────────> Connecting ─────────> AuthPending ─────────> Ready
//!      ▲                       ▲                      │                   │
//!      │                       │ reopen               │ denial            │
//!      │                       │                      ▼                   │
//!      │                 Reconnecting <───────────────┼───────────────────┤ reconnect()
//!      │                                              │                   │
//!      └──────────────────────────────────────────────┴───────────────────┘
//!                                   close()
//! ```
//!
//! ## Dispatch
//!
//! Each decoded frame is raised as a `Raw` event, split into command and
//! arguments, and routed through an explicit `match` on the command name.
//! Unknown commands are ignored. A handler that cannot parse its arguments
//! returns a [`DispatchError`]; the session logs it and drops that update
//! without affecting later frames.

pub mod outbound;
pub mod pm;
pub mod room;

pub use outbound::Outbound;
pub use pm::PmSession;
pub use room::{BanRecord, RoomSession};

use crate::connection::Job;
use crate::events::{Event, EventKind};
use crate::protocol::{Frame, FrameCodec};
use crate::scheduler::{Scheduler, TaskId};
use crate::storage::UserRegistry;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, trace};

/// Identifies a live session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Room(String),
    Pm,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Room(name) => write!(f, "room:{}", name),
            SessionKey::Pm => f.write_str("pm"),
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Auth frame queued, transport not yet established
    Connecting,
    /// Transport up, waiting for the server's acknowledgement
    AuthPending,
    Ready,
    /// Tearing down before reopening
    Reconnecting,
}

/// Errors raised by a handler that cannot use its arguments.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("missing argument {index}")]
    MissingArgument { index: usize },

    #[error("invalid number: {0:?}")]
    InvalidNumber(String),
}

/// What a session may touch while dispatching, lent by the manager.
pub struct SessionContext<'a> {
    pub users: &'a mut UserRegistry,
    pub scheduler: &'a mut Scheduler<Job>,
}

/// Behaviour shared by room and PM sessions.
pub trait Session {
    fn key(&self) -> SessionKey;

    fn state(&self) -> SessionState;

    fn codec_mut(&mut self) -> &mut FrameCodec;

    fn outbound(&self) -> &Outbound;

    fn outbound_mut(&mut self) -> &mut Outbound;

    /// Queue of events raised and not yet collected.
    fn events_mut(&mut self) -> &mut Vec<Event>;

    /// Routes one frame to its handler.
    fn dispatch(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError>;

    /// Keep-alive, fired by the scheduler.
    fn ping(&mut self, ctx: &mut SessionContext<'_>);

    /// The transport came up: `Connecting -> AuthPending`.
    fn transport_ready(&mut self);

    /// Tears the session down without raising an event.
    fn close(&mut self, ctx: &mut SessionContext<'_>);

    fn is_closed(&self) -> bool {
        self.state() == SessionState::Disconnected
    }

    fn emit(&mut self, kind: EventKind) {
        let event = Event::new(self.key(), kind);
        self.events_mut().push(event);
    }

    fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(self.events_mut())
    }

    /// Feeds received bytes and dispatches every completed frame in order.
    fn feed(&mut self, data: &[u8], ctx: &mut SessionContext<'_>) {
        let frames = self.codec_mut().feed(data);
        for frame in frames {
            if self.is_closed() {
                trace!(session = %self.key(), "Dropping frames after close");
                break;
            }
            match frame {
                Ok(text) => self.process(&text, ctx),
                Err(e) => debug!(session = %self.key(), error = %e, "Undecodable frame skipped"),
            }
        }
    }

    /// Raises `Raw` and dispatches a single decoded frame.
    fn process(&mut self, text: &str, ctx: &mut SessionContext<'_>) {
        self.emit(EventKind::Raw(text.to_string()));

        let frame = Frame::parse(text);
        trace!(session = %self.key(), command = %frame.command, args = frame.args.len(), "Dispatching frame");
        if let Err(e) = self.dispatch(&frame, ctx) {
            debug!(
                session = %self.key(),
                command = %frame.command,
                error = %e,
                "Malformed frame skipped"
            );
        }
    }
}

/// Returns argument `index` or a [`DispatchError`].
pub(crate) fn arg(frame: &Frame, index: usize) -> Result<&str, DispatchError> {
    frame.arg(index).ok_or(DispatchError::MissingArgument { index })
}

/// Parses a numeric field.
pub(crate) fn number<T: FromStr>(text: &str) -> Result<T, DispatchError> {
    text.trim()
        .parse()
        .map_err(|_| DispatchError::InvalidNumber(text.to_string()))
}

/// A fresh 16-digit connection identifier.
pub(crate) fn generate_uid() -> String {
    rand::thread_rng()
        .gen_range(10u64.pow(15)..10u64.pow(16))
        .to_string()
}

/// Seconds since the epoch, as the server reports times.
pub(crate) fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Cancels a keep-alive task if one is registered.
pub(crate) fn cancel_ping(task: &mut Option<TaskId>, scheduler: &mut Scheduler<Job>) {
    if let Some(id) = task.take() {
        scheduler.cancel(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uid() {
        let uid = generate_uid();
        assert_eq!(uid.len(), 16);
        assert!(uid.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_arg_helpers() {
        let frame = Frame::parse("n:1f");
        assert_eq!(arg(&frame, 0), Ok("1f"));
        assert_eq!(arg(&frame, 1), Err(DispatchError::MissingArgument { index: 1 }));
        assert_eq!(number::<f64>("12.5"), Ok(12.5));
        assert!(matches!(number::<u32>("x"), Err(DispatchError::InvalidNumber(_))));
    }

    #[test]
    fn test_session_key_display() {
        assert_eq!(SessionKey::Room("lobby".into()).to_string(), "room:lobby");
        assert_eq!(SessionKey::Pm.to_string(), "pm");
    }
}
