//! # roomwire - An Event-Driven Multi-Room Chat Client Engine
//!
//! roomwire is the client side of a text-based, NUL-framed chat protocol.
//! It keeps many long-lived TCP sessions open at once (one per joined room
//! plus one private-message session) and drives all of them from a single
//! cooperative loop that also runs timers and keep-alives.
//!
//! ## Features
//!
//! - **Many Sessions, One Loop**: Every room and the PM channel share one
//!   reactor; nothing a handler touches is ever accessed concurrently
//! - **Sans-IO Sessions**: Room and PM state machines never see a socket,
//!   so they are tested by feeding bytes
//! - **Two-Phase Message Identity**: Provisional messages are reconciled
//!   with their stable ids as the server confirms them
//! - **Bounded History**: Per-room history with bulk eviction
//! - **Shard Selection**: Rooms are mapped to their server deterministically
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                Manager                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TcpStream   │───>│ FrameCodec  │───>│  Session    │──> Event queue   │
//! │  │ (per room)  │<─┐ │ (NUL split) │    │  dispatch   │        │         │
//! │  └─────────────┘  │ └─────────────┘    └──────┬──────┘        ▼         │
//! │                   │                           │          EventHandler   │
//! │                   │  ┌─────────────┐          ▼                         │
//! │                   └──│  Outbound   │   ┌──────────────────────────────┐ │
//! │                      │ (write lock)│   │ UserRegistry   MessageStore  │ │
//! │                      └─────────────┘   └──────────────────────────────┘ │
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │ Scheduler<Job>: keep-alive pings, application timers              │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use roomwire::auth::NoAuth;
//! use roomwire::config::{ManagerConfig, Profile};
//! use roomwire::connection::Manager;
//! use roomwire::events::{Event, EventKind};
//!
//! #[tokio::main]
//! async fn main() {
//!     let profile = Profile::new(Some("mybot".into()), Some("secret".into()));
//!     let mut manager = Manager::new(ManagerConfig::default(), profile, Box::new(NoAuth));
//!     manager.join_room("lobby");
//!
//!     let mut handler = |manager: &mut Manager, event: &Event| match &event.kind {
//!         EventKind::Message { user, message } => {
//!             println!("[{}] {}: {}", message.room, user, message.body);
//!         }
//!         EventKind::Disconnect => manager.stop(),
//!         _ => {}
//!     };
//!     manager.run(&mut handler).await;
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: NUL framing, frame parsing and message markup
//! - [`shard`]: Room name to server mapping
//! - [`storage`]: User registry and per-room message store
//! - [`scheduler`]: Cooperative timers
//! - [`session`]: Room and PM protocol state machines
//! - [`connection`]: The manager that multiplexes sockets and sessions
//! - [`events`]: Everything the engine reports to the application
//! - [`config`]: Manager configuration and the local profile
//! - [`auth`]: The token provider used by the PM session
//!
//! ## Design Highlights
//!
//! ### Write Lock
//!
//! While a session authenticates, anything the application sends is held
//! aside and released in order right after the server's acknowledgement,
//! so it always reaches the wire behind the authentication frame.
//!
//! ### Explicit Registry
//!
//! The user registry belongs to the manager and is lent `&mut` to the one
//! session being dispatched. There is no global state.

pub mod auth;
pub mod config;
pub mod connection;
pub mod events;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod shard;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{BigMessagePolicy, ManagerConfig, Profile, UserlistMode};
pub use connection::{ConnectionError, ConnectionStats, Manager};
pub use events::{Event, EventHandler, EventKind};
pub use protocol::{Frame, FrameCodec, FrameError};
pub use scheduler::{Scheduler, TaskId};
pub use session::{PmSession, RoomSession, SessionKey, SessionState};
pub use storage::{Message, MessageStore, User, UserRegistry};

/// Version of roomwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
