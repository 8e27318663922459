//! Connection Multiplexing
//!
//! This module drives every open session from a single task. Sessions are
//! sans-IO state machines; the [`Manager`] owns their sockets and moves
//! bytes between the two.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Manager                             │
//! │                                                             │
//! │  rooms (join order)          pm             links           │
//! │  ┌──────────┐ ┌──────────┐  ┌─────────┐   ┌──────────────┐  │
//! │  │RoomSession│ │RoomSession│ │PmSession│   │SessionKey -> │  │
//! │  └────┬─────┘ └────┬─────┘  └────┬────┘   │  TcpStream   │  │
//! │       │            │             │        └──────────────┘  │
//! │       └────────────┴──────┬──────┘                          │
//! │                           │ &mut                            │
//! │               ┌───────────┴───────────┐                     │
//! │               │ UserRegistry          │                     │
//! │               │ Scheduler<Job>        │                     │
//! │               └───────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use roomwire::auth::NoAuth;
//! use roomwire::config::{ManagerConfig, Profile};
//! use roomwire::connection::Manager;
//! use roomwire::events::{Event, EventKind};
//!
//! # async fn demo() {
//! let mut manager = Manager::new(ManagerConfig::default(), Profile::default(), Box::new(NoAuth));
//! manager.join_room("lobby");
//!
//! let mut handler = |manager: &mut Manager, event: &Event| {
//!     if let EventKind::Message { message, .. } = &event.kind {
//!         if message.body == "!ping" {
//!             if let Some(room) = manager.room_mut(&message.room) {
//!                 room.message("pong", false);
//!             }
//!         }
//!     }
//! };
//! manager.run(&mut handler).await;
//! # }
//! ```

pub mod manager;

pub use manager::{ConnectionError, ConnectionStats, Job, Manager};
