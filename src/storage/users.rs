//! Process-Wide User Registry
//!
//! Every participant ever seen is interned here under its canonical
//! (lowercase) name. Sessions never own user state; they hold cheap
//! [`User`] handles and go through the registry to read or change the
//! record behind them.
//!
//! ## Presence
//!
//! A user is "present" in a room while it holds at least one session id
//! there. One person can hold several ids in the same room (several tabs)
//! and ids in several rooms at once.
//!
//! ```text
//! UserRegistry
//!   "bob" ──> UserRecord { font..., sessions: { "room-a": {"1111", "2222"},
//!                                               "room-b": {"3333"} } }
//! ```
//!
//! Records are never removed. Identity is cheap and bounded by the number
//! of distinct names seen.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Handle to an interned user: the canonical name.
///
/// Two handles are equal exactly when they name the same user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct User(Arc<str>);

impl User {
    /// Canonical (lowercase) name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// True for anonymous (`!anon1234`) and temporary (`#name`) users.
    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with('!') || self.0.starts_with('#')
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for User {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Last-observed display attributes of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayAttributes {
    pub name_color: String,
    pub font_color: String,
    pub font_face: String,
    pub font_size: u32,
}

impl Default for DisplayAttributes {
    fn default() -> Self {
        Self {
            name_color: "000".to_string(),
            font_color: "000".to_string(),
            font_face: "0".to_string(),
            font_size: 12,
        }
    }
}

/// Everything the registry knows about one user.
#[derive(Debug, Clone, Default)]
pub struct UserRecord {
    pub display: DisplayAttributes,
    /// Room name -> session ids currently held there
    sessions: HashMap<String, HashSet<String>>,
}

impl UserRecord {
    /// Session ids held in `room`.
    pub fn session_ids(&self, room: &str) -> Option<&HashSet<String>> {
        self.sessions.get(room)
    }

    /// Every session id across every room.
    pub fn all_session_ids(&self) -> HashSet<String> {
        self.sessions.values().flatten().cloned().collect()
    }

    /// Rooms the user is present in.
    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }
}

/// The interning table.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: HashMap<User, UserRecord>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `name`, creating the record on first sight.
    ///
    /// # Example
    ///
    /// ```
    /// use roomwire::storage::UserRegistry;
    ///
    /// let mut users = UserRegistry::new();
    /// let a = users.intern("Bob");
    /// let b = users.intern("bob");
    /// assert_eq!(a, b);
    /// assert_eq!(a.name(), "bob");
    /// assert_eq!(users.len(), 1);
    /// ```
    pub fn intern(&mut self, name: &str) -> User {
        let canonical = name.to_lowercase();
        if let Some((handle, _)) = self.users.get_key_value(canonical.as_str()) {
            return handle.clone();
        }

        let handle = User(Arc::from(canonical));
        trace!(user = %handle, "Interned new user");
        self.users.insert(handle.clone(), UserRecord::default());
        handle
    }

    /// Looks up a user without creating it.
    pub fn lookup(&self, name: &str) -> Option<User> {
        self.users
            .get_key_value(name.to_lowercase().as_str())
            .map(|(handle, _)| handle.clone())
    }

    pub fn get(&self, user: &User) -> Option<&UserRecord> {
        self.users.get(user)
    }

    /// Mutable access to a record; interns the handle's name if it was
    /// created by another registry.
    pub fn record_mut(&mut self, user: &User) -> &mut UserRecord {
        self.users.entry(user.clone()).or_default()
    }

    /// Display attributes, or the defaults for an unknown user.
    pub fn display(&self, user: &User) -> DisplayAttributes {
        self.get(user).map(|r| r.display.clone()).unwrap_or_default()
    }

    /// Adds a session id in `room`.
    ///
    /// Returns `true` when this is the user's first id in that room.
    pub fn add_session_id(&mut self, user: &User, room: &str, sid: &str) -> bool {
        let record = self.record_mut(user);
        let ids = record.sessions.entry(room.to_string()).or_default();
        let first = ids.is_empty();
        ids.insert(sid.to_string());
        first
    }

    /// Removes a session id from `room`.
    ///
    /// Returns `true` when that was the user's last id in the room, in which
    /// case the room key is dropped entirely.
    pub fn remove_session_id(&mut self, user: &User, room: &str, sid: &str) -> bool {
        let record = self.record_mut(user);
        let Some(ids) = record.sessions.get_mut(room) else {
            return false;
        };
        if !ids.remove(sid) {
            return false;
        }
        if ids.is_empty() {
            record.sessions.remove(room);
            return true;
        }
        false
    }

    /// Forgets every session id the user holds in `room`.
    pub fn clear_session_ids(&mut self, user: &User, room: &str) {
        if let Some(record) = self.users.get_mut(user) {
            record.sessions.remove(room);
        }
    }

    pub fn has_session_id(&self, user: &User, room: &str, sid: &str) -> bool {
        self.get(user)
            .and_then(|r| r.sessions.get(room))
            .is_some_and(|ids| ids.contains(sid))
    }

    /// True while the user holds any id in `room`.
    pub fn is_present(&self, user: &User, room: &str) -> bool {
        self.get(user).is_some_and(|r| r.sessions.contains_key(room))
    }

    /// Number of users ever interned.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
