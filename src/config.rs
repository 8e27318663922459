//! Manager configuration and the local profile.

use crate::shard::Endpoint;
use std::time::Duration;

/// Which users a room's userlist reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserlistMode {
    /// Authors of the most recent history entries
    Recent,
    /// Everyone currently in the roster
    All,
}

/// What to do with an outgoing message longer than the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BigMessagePolicy {
    /// Send it as several consecutive messages
    Multiple,
    /// Send only the first `max_message_length` characters
    Cut,
}

/// Configuration shared by every session of a manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Private-message server
    pub pm_endpoint: Endpoint,

    /// Port used for room shards
    pub room_port: u16,

    /// Connect every room here instead of its shard
    pub server_override: Option<Endpoint>,

    /// Longest the reactor waits for socket readiness (default: 200ms)
    pub timer_resolution: Duration,

    /// Keep-alive period once a session is ready (default: 20s)
    pub ping_interval: Duration,

    pub userlist_mode: UserlistMode,

    /// Report each user once in userlists
    pub userlist_unique: bool,

    /// History entries scanned by `UserlistMode::Recent`
    pub userlist_memory: usize,

    /// Fire join/leave only on a user's first/last session id
    pub userlist_event_unique: bool,

    pub big_message: BigMessagePolicy,

    /// Longest outgoing message body, in characters
    pub max_message_length: usize,

    /// History bound per room
    pub max_history_length: usize,

    /// Replace invalid UTF-8 instead of dropping the frame
    pub tolerant_decoding: bool,

    /// Upper bound of a single socket read
    pub read_chunk_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pm_endpoint: Endpoint::new("c1.chatango.com", 5222),
            room_port: crate::shard::ROOM_PORT,
            server_override: None,
            timer_resolution: Duration::from_millis(200),
            ping_interval: Duration::from_secs(20),
            userlist_mode: UserlistMode::Recent,
            userlist_unique: true,
            userlist_memory: 500,
            userlist_event_unique: false,
            big_message: BigMessagePolicy::Multiple,
            max_message_length: 2000,
            max_history_length: 15_000_000,
            tolerant_decoding: true,
            read_chunk_size: 1024,
        }
    }
}

impl ManagerConfig {
    /// Endpoint a room should connect to.
    pub fn room_endpoint(&self, room: &str) -> Endpoint {
        match &self.server_override {
            Some(endpoint) => endpoint.clone(),
            None => crate::shard::endpoint(room, self.room_port),
        }
    }
}

/// Smallest font size the server accepts.
pub const MIN_FONT_SIZE: u32 = 9;

/// Largest font size the server accepts.
pub const MAX_FONT_SIZE: u32 = 22;

/// The local account and how its messages look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Account name (`None` = anonymous)
    pub name: Option<String>,
    /// Account password (`None` with a name = temporary name)
    pub password: Option<String>,
    pub name_color: String,
    pub font_color: String,
    pub font_face: String,
    font_size: u32,
    /// Show the profile background when premium
    pub background: bool,
    /// Enable media recording when premium
    pub recording: bool,
}

impl Profile {
    pub fn new(name: Option<String>, password: Option<String>) -> Self {
        Self {
            name,
            password,
            ..Self::default()
        }
    }

    pub fn font_size(&self) -> u32 {
        self.font_size
    }

    /// Sets the font size, clamped to what the server accepts.
    pub fn set_font_size(&mut self, size: u32) {
        self.font_size = size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
    }

    /// Name and password, when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.name, &self.password) {
            (Some(name), Some(password)) => Some((name, password)),
            _ => None,
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: None,
            password: None,
            name_color: "808080".to_string(),
            font_color: "808080".to_string(),
            font_face: "Arial".to_string(),
            font_size: 10,
            background: true,
            recording: false,
        }
    }
}
