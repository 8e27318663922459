//! Identity and Message Storage
//!
//! This module holds the state that outlives single frames: who the users
//! are, and which messages a room can address.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      UserRegistry                           │
//! │        (one per Manager, lent to each dispatch)             │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲                  ▲                   ▲
//!        │ User handles     │                   │
//! ┌──────┴──────┐    ┌──────┴──────┐     ┌──────┴──────┐
//! │ MessageStore│    │ MessageStore│     │ MessageStore│
//! │  room "a"   │    │  room "b"   │     │  room "c"   │
//! └─────────────┘    └─────────────┘     └─────────────┘
//! ```
//!
//! ## Features
//!
//! - **Interning**: exactly one record per canonical user name
//! - **Presence**: per-room session id sets with first/last detection
//! - **Two-phase ids**: provisional messages reconciled to stable ids
//! - **Bounded history**: bulk eviction that detaches evicted messages

pub mod messages;
pub mod users;

// Re-export commonly used types
pub use messages::{Message, MessageStore};
pub use users::{DisplayAttributes, User, UserRecord, UserRegistry};
