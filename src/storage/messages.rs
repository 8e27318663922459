//! Per-Room Message Store
//!
//! Messages reach a room in two phases:
//!
//! ```text
//!   b:<...>:<token>:...      u:<token>:<id>
//!  ─────────────────────>  ───────────────────>
//!   provisional (pending)    attached (table + history)
//! ```
//!
//! A provisional message is only known by a transient token assigned by the
//! server for this connection. The follow-up `u` frame supplies its stable
//! id, at which point the message becomes addressable and enters history.
//! Backlog (`i`) messages arrive with their stable id already set.
//!
//! History is bounded. When it overflows, the oldest excess entries are
//! evicted together and detached from the id table. Messages are handed out
//! as `Arc<Message>`, so event payloads stay valid after eviction.

use crate::storage::users::{DisplayAttributes, User};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

/// A chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Stable id, set once the message is attached
    id: Option<String>,
    /// Owning room
    pub room: String,
    pub user: User,
    /// Server timestamp (seconds since the epoch)
    pub time: f64,
    /// Body with markup stripped
    pub body: String,
    /// Body as received
    pub raw: String,
    /// Author's session id
    pub puid: String,
    /// Author's unique id, used by moderation commands
    pub unid: String,
    pub ip: Option<String>,
    /// Display attributes carried by this message
    pub display: DisplayAttributes,
}

impl Message {
    /// Creates an unattached message with default display attributes.
    pub fn new(room: impl Into<String>, user: User) -> Self {
        Self {
            id: None,
            room: room.into(),
            user,
            time: 0.0,
            body: String::new(),
            raw: String::new(),
            puid: String::new(),
            unid: String::new(),
            ip: None,
            display: DisplayAttributes::default(),
        }
    }

    /// Stable id, if attached.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Two-phase identity table plus bounded history for one room.
#[derive(Debug)]
pub struct MessageStore {
    /// Addressable messages by stable id
    messages: HashMap<String, Arc<Message>>,
    /// Attached messages, oldest first
    history: VecDeque<Arc<Message>>,
    /// Provisional messages by transient token
    pending: HashMap<String, Message>,
    /// History bound
    max_history: usize,
}

impl MessageStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            messages: HashMap::new(),
            history: VecDeque::new(),
            pending: HashMap::new(),
            max_history,
        }
    }

    // ========================================================================
    // Provisional Messages
    // ========================================================================

    /// Queues a message whose stable id is not known yet.
    pub fn queue_provisional(&mut self, token: impl Into<String>, message: Message) {
        self.pending.insert(token.into(), message);
    }

    pub fn is_pending(&self, token: &str) -> bool {
        self.pending.contains_key(token)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Assigns `id` to the provisional message queued under `token`, attaches
    /// it and appends it to history.
    ///
    /// Returns `None` when no such token is pending.
    pub fn reconcile(&mut self, token: &str, id: &str) -> Option<Arc<Message>> {
        let message = self.pending.remove(token)?;
        let message = self.attach(message, id);
        self.push_history(Arc::clone(&message));
        Some(message)
    }

    /// Drops every provisional message (the tokens die with the connection).
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    // ========================================================================
    // Addressable Messages
    // ========================================================================

    /// Registers `message` under `id`, replacing any previous holder.
    pub fn attach(&mut self, mut message: Message, id: &str) -> Arc<Message> {
        message.id = Some(id.to_string());
        let message = Arc::new(message);
        self.messages.insert(id.to_string(), Arc::clone(&message));
        message
    }

    /// Registers `message` under `id` unless that id is already known.
    ///
    /// Returns the registered message and whether it was newly created.
    pub fn attach_or_get(&mut self, message: Message, id: &str) -> (Arc<Message>, bool) {
        match self.messages.get(id) {
            Some(existing) => (Arc::clone(existing), false),
            None => (self.attach(message, id), true),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Message>> {
        self.messages.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.contains_key(id)
    }

    /// Removes `id` from the table without touching history.
    pub fn detach(&mut self, id: &str) -> Option<Arc<Message>> {
        self.messages.remove(id)
    }

    /// Removes `id` from both the table and history.
    ///
    /// Returns the message and whether it was in history.
    pub fn delete(&mut self, id: &str) -> Option<(Arc<Message>, bool)> {
        let message = self.messages.remove(id)?;
        let before = self.history.len();
        self.history.retain(|m| !Arc::ptr_eq(m, &message));
        let in_history = self.history.len() != before;
        Some((message, in_history))
    }

    /// Every addressable message (unordered).
    pub fn messages(&self) -> impl Iterator<Item = &Arc<Message>> {
        self.messages.values()
    }

    /// Number of addressable messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Appends to history, evicting the oldest excess entries in one batch.
    ///
    /// Returns how many messages were evicted.
    pub fn push_history(&mut self, message: Arc<Message>) -> usize {
        self.history.push_back(message);

        if self.history.len() <= self.max_history {
            return 0;
        }

        let excess = self.history.len() - self.max_history;
        let evicted: Vec<_> = self.history.drain(..excess).collect();
        for message in &evicted {
            if let Some(id) = message.id() {
                if self
                    .messages
                    .get(id)
                    .is_some_and(|held| Arc::ptr_eq(held, message))
                {
                    self.messages.remove(id);
                }
            }
        }
        trace!(evicted = evicted.len(), kept = self.history.len(), "Evicted history");
        evicted.len()
    }

    /// History, oldest first.
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &Arc<Message>> + ExactSizeIterator {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn in_history(&self, message: &Arc<Message>) -> bool {
        self.history.iter().any(|m| Arc::ptr_eq(m, message))
    }

    /// Most recent message, optionally restricted to one author.
    pub fn last_message(&self, user: Option<&User>) -> Option<&Arc<Message>> {
        match user {
            Some(user) => self.history.iter().rev().find(|m| &m.user == user),
            None => self.history.back(),
        }
    }

    /// Authors of the last `memory` history entries, oldest first.
    pub fn recent_authors(&self, memory: usize) -> Vec<User> {
        let skip = self.history.len().saturating_sub(memory);
        self.history.iter().skip(skip).map(|m| m.user.clone()).collect()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }
}
