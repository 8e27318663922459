//! Room Shard Selection
//!
//! Every room lives on one of the `s<N>.chatango.com` servers. The server
//! side picks the shard with a fixed weighted hash of the room name, so the
//! client must reproduce it exactly to reach the right process.
//!
//! ## Algorithm
//!
//! 1. Rooms in the special table map straight to their shard
//! 2. Otherwise `_` and `-` become `q`
//! 3. `fnv` = base-36 value of the first five characters
//! 4. `lnv` = base-36 value of up to three characters from offset 6
//!    (at least 1000)
//! 5. `frac = (fnv mod lnv) / lnv`
//! 6. Walk the weight table accumulating `weight / total`; the first shard
//!    whose cumulative weight reaches `frac` wins

/// Rooms pinned to a fixed shard.
const SPECIALS: &[(&str, u32)] = &[
    ("mitvcanal", 56),
    ("magicc666", 22),
    ("livenfree", 18),
    ("eplsiite", 56),
    ("soccerjumbo2", 21),
    ("bguk", 22),
    ("animachat20", 34),
    ("pokemonepisodeorg", 55),
    ("sport24lt", 56),
    ("mywowpinoy", 5),
    ("phnoytalk", 21),
    ("flowhot-chat-online", 12),
    ("watchanimeonn", 26),
    ("cricvid-hitcric-", 51),
    ("fullsportshd2", 18),
    ("chia-anime", 12),
    ("narutochatt", 52),
    ("ttvsports", 56),
    ("futboldirectochat", 22),
    ("portalsports", 18),
    ("stream2watch3", 56),
    ("proudlypinoychat", 51),
    ("ver-anime", 34),
    ("iluvpinas", 53),
    ("vipstand", 21),
    ("eafangames", 56),
    ("worldfootballusch2", 18),
    ("soccerjumbo", 21),
    ("myfoxdfw", 22),
    ("animelinkz", 20),
    ("rgsmotrisport", 51),
    ("bateriafina-8", 8),
    ("as-chatroom", 10),
    ("dbzepisodeorg", 12),
    ("tvanimefreak", 54),
    ("watch-dragonball", 19),
    ("narutowire", 10),
    ("leeplarp", 27),
];

/// `(shard, weight)` pairs, in the order they are walked.
const WEIGHTS: &[(u32, u32)] = &[
    (5, 75),
    (6, 75),
    (7, 75),
    (8, 75),
    (16, 75),
    (17, 75),
    (18, 75),
    (9, 95),
    (11, 95),
    (12, 95),
    (13, 95),
    (14, 95),
    (15, 95),
    (19, 110),
    (23, 110),
    (24, 110),
    (25, 110),
    (26, 110),
    (28, 104),
    (29, 104),
    (30, 104),
    (31, 104),
    (32, 104),
    (33, 104),
    (35, 101),
    (36, 101),
    (37, 101),
    (38, 101),
    (39, 101),
    (40, 101),
    (41, 101),
    (42, 101),
    (43, 101),
    (44, 101),
    (45, 101),
    (46, 101),
    (47, 101),
    (48, 101),
    (49, 101),
    (50, 101),
    (52, 110),
    (53, 110),
    (55, 110),
    (57, 110),
    (58, 110),
    (59, 110),
    (60, 110),
    (61, 110),
    (62, 110),
    (63, 110),
    (64, 110),
    (65, 110),
    (66, 110),
    (68, 95),
    (71, 116),
    (72, 116),
    (73, 116),
    (74, 116),
    (75, 116),
    (76, 116),
    (77, 116),
    (78, 116),
    (79, 116),
    (80, 116),
    (81, 116),
    (82, 116),
    (83, 116),
    (84, 116),
];

/// Default port for room connections.
pub const ROOM_PORT: u16 = 443;

/// Smallest modulus used for the hash.
const MIN_LNV: f64 = 1000.0;

/// A host/port pair to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Returns the shard number serving `room`.
///
/// Names containing characters outside base 36 land on shard 0.
pub fn shard_number(room: &str) -> u32 {
    if let Some(&(_, shard)) = SPECIALS.iter().find(|(name, _)| *name == room) {
        return shard;
    }

    let normalized: Vec<char> = room
        .chars()
        .map(|c| if c == '_' || c == '-' { 'q' } else { c })
        .collect();

    let head: String = normalized.iter().take(5).collect();
    let Ok(fnv) = u64::from_str_radix(&head, 36) else {
        return 0;
    };

    let len = normalized.len() as isize;
    let end = (6 + 3.min(len - 5)).clamp(0, len) as usize;
    let tail: String = normalized.get(6..end).unwrap_or(&[]).iter().collect();

    let lnv = if tail.is_empty() {
        MIN_LNV
    } else {
        match u64::from_str_radix(&tail, 36) {
            Ok(v) => (v as f64).max(MIN_LNV),
            Err(_) => return 0,
        }
    };

    let frac = (fnv as f64 % lnv) / lnv;
    let total: u32 = WEIGHTS.iter().map(|(_, w)| w).sum();

    let mut cumulative = 0.0;
    for &(shard, weight) in WEIGHTS {
        cumulative += weight as f64 / total as f64;
        if frac <= cumulative {
            return shard;
        }
    }
    0
}

/// Host name of the shard serving `room`.
pub fn server_host(room: &str) -> String {
    format!("s{}.chatango.com", shard_number(room))
}

/// Endpoint for `room` on the given port.
pub fn endpoint(room: &str, port: u16) -> Endpoint {
    Endpoint::new(server_host(room), port)
}
