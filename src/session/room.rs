//! Room Sessions
//!
//! One [`RoomSession`] per joined room. It speaks the room dialect of the
//! wire protocol and keeps the room's view of the world: owner, moderators,
//! roster, message history and ban tables.
//!
//! ## Handshake
//!
//! ```text
//! client                                   server
//!   │ bauth:<room>[:<uid>:<name>:<pw>]        │
//!   │────────────────────────────────────────>│   write lock engaged
//!   │                         ok:<owner>:...  │
//!   │<────────────────────────────────────────│   identity, mods
//!   │                       i:... (backlog)   │
//!   │<────────────────────────────────────────│
//!   │                                 inited  │
//!   │<────────────────────────────────────────│   bootstrap queued,
//!   │ g_participants, getpremium, ...         │   lock released
//!   │────────────────────────────────────────>│
//! ```
//!
//! ## Messages
//!
//! `b` frames create provisional messages keyed by a per-connection token;
//! the matching `u` frame assigns the stable id and raises `Message`. `i`
//! frames carry backlog with ids already assigned; they are collected until
//! `inited` and replayed oldest-first as `HistoryMessage` on the first ready.

use super::{
    arg, cancel_ping, generate_uid, number, unix_now, DispatchError, Outbound, Session,
    SessionContext, SessionKey, SessionState,
};
use crate::config::{BigMessagePolicy, ManagerConfig, Profile, UserlistMode};
use crate::connection::Job;
use crate::events::{Event, EventKind};
use crate::protocol::markup::{escape_html, title_case};
use crate::protocol::{anon_id, clean_message, parse_font, Frame, FrameCodec};
use crate::scheduler::TaskId;
use crate::shard::Endpoint;
use crate::storage::{DisplayAttributes, Message, MessageStore, User, UserRegistry};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// One entry of a ban or unban table.
#[derive(Debug, Clone, PartialEq)]
pub struct BanRecord {
    pub unid: String,
    pub ip: String,
    pub target: User,
    /// When the ban was placed (seconds since the epoch)
    pub time: f64,
    /// Moderator who placed it
    pub src: User,
}

pub struct RoomSession {
    name: String,
    endpoint: Endpoint,
    config: Arc<ManagerConfig>,
    profile: Profile,
    state: SessionState,
    /// Connection id sent with authenticated logins
    uid: String,

    codec: FrameCodec,
    outbound: Outbound,
    events: Vec<Event>,

    owner: Option<User>,
    mods: BTreeSet<User>,
    /// One entry per session id held in the room
    roster: Vec<User>,
    user_count: usize,

    store: MessageStore,
    /// Backlog collected since the last `ok`, newest first; `bool` = newly created
    backlog: Vec<(Arc<Message>, bool)>,

    banlist: HashMap<User, BanRecord>,
    unbanlist: HashMap<User, BanRecord>,

    silent: bool,
    premium: bool,
    /// Pseudo-identity assigned on anonymous login
    anon_name: Option<String>,
    /// Name color seed assigned on anonymous login
    anon_color: Option<String>,
    current_name: Option<String>,
    /// Times this room reached ready
    connect_count: u32,
    ping_task: Option<TaskId>,
}

impl RoomSession {
    pub fn new(name: &str, config: Arc<ManagerConfig>, profile: Profile) -> Self {
        let name = name.to_lowercase();
        Self {
            endpoint: config.room_endpoint(&name),
            codec: FrameCodec::new(config.tolerant_decoding),
            store: MessageStore::new(config.max_history_length),
            name,
            config,
            profile,
            state: SessionState::Disconnected,
            uid: generate_uid(),
            outbound: Outbound::new(),
            events: Vec::new(),
            owner: None,
            mods: BTreeSet::new(),
            roster: Vec::new(),
            user_count: 0,
            backlog: Vec::new(),
            banlist: HashMap::new(),
            unbanlist: HashMap::new(),
            silent: false,
            premium: false,
            anon_name: None,
            anon_color: None,
            current_name: None,
            connect_count: 0,
            ping_task: None,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Queues the auth frame behind a fresh write lock.
    pub fn open(&mut self) {
        self.codec.clear();
        self.outbound.reset();
        self.store.clear_pending();
        self.backlog.clear();

        match self.profile.credentials() {
            Some((name, password)) => {
                self.current_name = Some(name.to_string());
                self.outbound
                    .send(&["bauth", &self.name, &self.uid, name, password]);
            }
            None => self.outbound.send(&["bauth", &self.name]),
        }
        self.outbound.set_write_lock(true);
        self.state = SessionState::Connecting;
        debug!(room = %self.name, endpoint = %self.endpoint, "Opening room");
    }

    /// Tears down and reopens with a new connection id.
    pub fn reconnect(&mut self, ctx: &mut SessionContext<'_>) {
        self.state = SessionState::Reconnecting;
        cancel_ping(&mut self.ping_task, ctx.scheduler);
        self.clear_roster(ctx.users);
        self.uid = generate_uid();
        self.open();
    }

    fn clear_roster(&mut self, users: &mut UserRegistry) {
        let distinct: HashSet<User> = self.roster.drain(..).collect();
        for user in &distinct {
            users.clear_session_ids(user, &self.name);
        }
    }

    pub(crate) fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;
    }

    // ========================================================================
    // Received Commands
    // ========================================================================

    fn rcmd_ok(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        let owner = arg(frame, 0)?;
        let uid = arg(frame, 1)?;
        let status = arg(frame, 2)?;

        match status {
            "N" if self.profile.name.is_none() && self.profile.password.is_none() => {
                let stamp = arg(frame, 4)?;
                let stamp = stamp.rsplit_once('.').map_or(stamp, |(head, _)| head);
                let seed = last_chars(stamp, 4);
                let aid: String = uid.chars().take(8).collect();

                let pid = format!("!anon{}", anon_id(Some(&seed), &aid));
                self.anon_name = Some(pid.clone());
                self.current_name = Some(pid);
                self.anon_color = Some(seed);
            }
            "N" if self.profile.password.is_none() => {
                if let Some(name) = self.profile.name.clone() {
                    self.outbound.send(&["blogin", &name]);
                    self.current_name = Some(name);
                }
            }
            "M" => {}
            _ => {
                warn!(room = %self.name, status, "Room login refused");
                self.emit(EventKind::LoginFail);
                self.close(ctx);
                self.emit(EventKind::Disconnect);
                return Ok(());
            }
        }

        self.owner = Some(ctx.users.intern(owner));
        self.uid = uid.to_string();
        self.mods = frame
            .arg(6)
            .unwrap_or("")
            .split(';')
            .filter_map(|entry| entry.split(',').next())
            .filter(|name| !name.is_empty())
            .map(|name| ctx.users.intern(name))
            .collect();
        self.backlog.clear();
        Ok(())
    }

    fn rcmd_denied(&mut self, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        warn!(room = %self.name, "Room denied the connection");
        self.close(ctx);
        self.emit(EventKind::LoginFail);
        Ok(())
    }

    fn rcmd_inited(&mut self, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        self.outbound.send(&["g_participants", "start"]);
        self.outbound.send(&["getpremium", "1"]);
        self.outbound.send(&["getratelimit"]);
        self.request_unbanlist();
        self.request_banlist();

        let backlog = std::mem::take(&mut self.backlog);
        if self.connect_count == 0 {
            self.emit(EventKind::Connect);
            for (message, _) in backlog.into_iter().rev() {
                self.emit(EventKind::HistoryMessage {
                    user: message.user.clone(),
                    message: Arc::clone(&message),
                });
                self.store.push_history(message);
            }
        } else {
            self.emit(EventKind::Reconnect);
            for (message, created) in backlog {
                if created && !self.store.in_history(&message) {
                    if let Some(id) = message.id() {
                        self.store.detach(id);
                    }
                }
            }
        }
        self.connect_count += 1;

        self.outbound.set_write_lock(false);
        self.state = SessionState::Ready;
        cancel_ping(&mut self.ping_task, ctx.scheduler);
        self.ping_task = Some(
            ctx.scheduler
                .set_interval(self.config.ping_interval, Job::Ping(self.key())),
        );
        info!(room = %self.name, connects = self.connect_count, "Room ready");
        Ok(())
    }

    fn rcmd_premium(&mut self, frame: &Frame) -> Result<(), DispatchError> {
        let expiry: f64 = number(arg(frame, 1)?)?;
        self.premium = expiry > unix_now();
        if self.premium {
            if self.profile.background {
                self.set_bg_mode(1);
            }
            if self.profile.recording {
                self.set_recording_mode(1);
            }
        }
        Ok(())
    }

    fn rcmd_mods(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        let mods: BTreeSet<User> = frame
            .args
            .iter()
            .filter_map(|entry| entry.split(',').next())
            .filter(|name| !name.is_empty())
            .map(|name| ctx.users.intern(name))
            .collect();

        let added: Vec<User> = mods.difference(&self.mods).cloned().collect();
        let removed: Vec<User> = self.mods.difference(&mods).cloned().collect();
        self.mods = mods;

        for user in added {
            self.emit(EventKind::ModAdd(user));
        }
        for user in removed {
            self.emit(EventKind::ModRemove(user));
        }
        self.emit(EventKind::ModChange);
        Ok(())
    }

    /// Builds a message from the shared `b`/`i` field layout.
    fn parse_message(&self, frame: &Frame, users: &mut UserRegistry) -> Result<Message, DispatchError> {
        let time: f64 = number(arg(frame, 0)?)?;
        let name = arg(frame, 1)?;
        let temp_name = arg(frame, 2)?;
        let puid = arg(frame, 3)?;
        let unid = arg(frame, 4)?;
        let ip = arg(frame, 6)?;
        let raw = frame.rest(9);
        let cleaned = clean_message(&raw);

        let (name, name_color) = if name.is_empty() {
            let mut name = format!("#{}", temp_name);
            if name == "#" {
                name = format!("!anon{}", anon_id(cleaned.name_tag.as_deref(), puid));
            }
            (name, None)
        } else {
            (name.to_string(), cleaned.name_tag.clone())
        };

        let mut display = DisplayAttributes::default();
        if let Some(color) = name_color {
            display.name_color = color;
        }
        if let Some(font) = cleaned.font_tag.as_deref().and_then(parse_font) {
            if let Some(color) = font.color {
                display.font_color = color;
            }
            display.font_face = font.face;
            display.font_size = font.size;
        }

        let mut message = Message::new(&self.name, users.intern(&name));
        message.time = time;
        message.body = cleaned.body;
        message.raw = raw;
        message.puid = puid.to_string();
        message.unid = unid.to_string();
        message.ip = (!ip.is_empty()).then(|| ip.to_string());
        message.display = display;
        Ok(message)
    }

    fn rcmd_b(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        let token = arg(frame, 5)?.to_string();
        let message = self.parse_message(frame, ctx.users)?;
        self.store.queue_provisional(token, message);
        Ok(())
    }

    fn rcmd_u(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        let token = arg(frame, 0)?;
        let id = arg(frame, 1)?;

        let Some(message) = self.store.reconcile(token, id) else {
            return Ok(());
        };
        if !self.is_local(&message.user) {
            ctx.users.record_mut(&message.user).display = message.display.clone();
        }
        self.emit(EventKind::Message {
            user: message.user.clone(),
            message,
        });
        Ok(())
    }

    fn rcmd_i(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        // Backlog only exists between `ok` and `inited`
        if self.state == SessionState::Ready {
            trace!(room = %self.name, "Ignoring history entry after init");
            return Ok(());
        }
        let id = arg(frame, 5)?.to_string();
        let message = self.parse_message(frame, ctx.users)?;
        let (message, created) = self.store.attach_or_get(message, &id);

        if !self.is_local(&message.user) {
            ctx.users.record_mut(&message.user).display = message.display.clone();
        }
        self.backlog.push((message, created));
        Ok(())
    }

    fn rcmd_g_participants(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        self.clear_roster(ctx.users);

        let payload = frame.args.join(":");
        for entry in payload.split(';') {
            let fields: Vec<&str> = entry.split(':').collect();
            if fields.len() < 4 {
                continue;
            }
            let name = fields[3].to_lowercase();
            if name == "none" {
                continue;
            }
            let user = ctx.users.intern(&name);
            ctx.users.add_session_id(&user, &self.name, fields[0]);
            self.roster.push(user);
        }
        debug!(room = %self.name, entries = self.roster.len(), "Roster snapshot");
        Ok(())
    }

    fn rcmd_participant(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        let joined = arg(frame, 0)? != "0";
        let sid = arg(frame, 1)?;
        let name = arg(frame, 3)?.to_lowercase();
        if name == "none" {
            return Ok(());
        }

        let user = ctx.users.intern(&name);
        let unique = self.config.userlist_event_unique;

        if joined {
            if ctx.users.has_session_id(&user, &self.name, sid) {
                return Ok(());
            }
            let first = ctx.users.add_session_id(&user, &self.name, sid);
            self.roster.push(user.clone());
            if first || !unique {
                self.emit(EventKind::Join(user));
            }
        } else {
            if !ctx.users.has_session_id(&user, &self.name, sid) {
                return Ok(());
            }
            let last = ctx.users.remove_session_id(&user, &self.name, sid);
            if let Some(pos) = self.roster.iter().position(|u| u == &user) {
                self.roster.remove(pos);
            }
            if last || !unique {
                self.emit(EventKind::Leave(user));
            }
        }
        Ok(())
    }

    fn rcmd_delete(&mut self, frame: &Frame) -> Result<(), DispatchError> {
        self.delete_message(arg(frame, 0)?);
        Ok(())
    }

    fn rcmd_deleteall(&mut self, frame: &Frame) -> Result<(), DispatchError> {
        for id in &frame.args {
            self.delete_message(id);
        }
        Ok(())
    }

    fn delete_message(&mut self, id: &str) {
        if let Some((message, true)) = self.store.delete(id) {
            self.emit(EventKind::MessageDelete {
                user: message.user.clone(),
                message,
            });
        }
    }

    fn rcmd_n(&mut self, frame: &Frame) -> Result<(), DispatchError> {
        let text = arg(frame, 0)?;
        let count = usize::from_str_radix(text.trim(), 16)
            .map_err(|_| DispatchError::InvalidNumber(text.to_string()))?;
        self.user_count = count;
        self.emit(EventKind::UserCountChange(count));
        Ok(())
    }

    /// Parses a full ban-table response: `;`-separated 5-field sections.
    fn parse_ban_table(frame: &Frame, users: &mut UserRegistry) -> HashMap<User, BanRecord> {
        let payload = frame.args.join(":");
        let mut table = HashMap::new();
        for section in payload.split(';') {
            let params: Vec<&str> = section.split(':').collect();
            if params.len() != 5 || params[2].is_empty() {
                continue;
            }
            let Ok(time) = number::<f64>(params[3]) else {
                continue;
            };
            let target = users.intern(params[2]);
            table.insert(
                target.clone(),
                BanRecord {
                    unid: params[0].to_string(),
                    ip: params[1].to_string(),
                    target,
                    time,
                    src: users.intern(params[4]),
                },
            );
        }
        table
    }

    /// Parses a single `blocked`/`unblocked` notification.
    fn parse_ban_event(frame: &Frame, users: &mut UserRegistry) -> Result<Option<BanRecord>, DispatchError> {
        let target = arg(frame, 2)?;
        if target.is_empty() {
            return Ok(None);
        }
        Ok(Some(BanRecord {
            unid: arg(frame, 0)?.to_string(),
            ip: arg(frame, 1)?.to_string(),
            time: number(arg(frame, 4)?)?,
            src: users.intern(arg(frame, 3)?),
            target: users.intern(target),
        }))
    }

    fn rcmd_blocked(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        let Some(record) = Self::parse_ban_event(frame, ctx.users)? else {
            return Ok(());
        };
        let (src, target) = (record.src.clone(), record.target.clone());
        self.unbanlist.remove(&target);
        self.banlist.insert(target.clone(), record);
        self.emit(EventKind::Ban { src, target });
        self.request_banlist();
        Ok(())
    }

    fn rcmd_unblocked(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        let Some(record) = Self::parse_ban_event(frame, ctx.users)? else {
            return Ok(());
        };
        let (src, target) = (record.src.clone(), record.target.clone());
        self.banlist.remove(&target);
        self.unbanlist.insert(target.clone(), record);
        self.emit(EventKind::Unban { src, target });
        self.request_unbanlist();
        Ok(())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Logs in under `name`, optionally with a password.
    pub fn login(&mut self, name: &str, password: Option<&str>) {
        let name = title_case(name);
        match password {
            Some(password) => self.outbound.send(&["blogin", &name, password]),
            None => self.outbound.send(&["blogin", &name]),
        }
        self.current_name = Some(name);
    }

    pub fn logout(&mut self) {
        self.outbound.send(&["blogout"]);
        self.current_name = self.anon_name.clone();
    }

    /// Posts a message, split or cut according to the configured limit.
    ///
    /// With `html` false, `<` and `>` are escaped first.
    pub fn message(&mut self, text: &str, html: bool) {
        let text = if html {
            text.to_string()
        } else {
            escape_html(text)
        };

        let max = self.config.max_message_length.max(1);
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= max {
            self.send_segment(&text);
            return;
        }

        match self.config.big_message {
            BigMessagePolicy::Cut => {
                let head: String = chars[..max].iter().collect();
                self.send_segment(&head);
            }
            BigMessagePolicy::Multiple => {
                for chunk in chars.chunks(max) {
                    let segment: String = chunk.iter().collect();
                    self.send_segment(&segment);
                }
            }
        }
    }

    fn send_segment(&mut self, segment: &str) {
        if self.silent {
            return;
        }
        let mut body = format!("<n{}/>{}", self.name_color(), segment);
        if self
            .current_name
            .as_deref()
            .is_some_and(|name| !name.starts_with("!anon"))
        {
            body = format!(
                "<f x{:02}{}=\"{}\">{}",
                self.profile.font_size(),
                self.profile.font_color,
                self.profile.font_face,
                body
            );
        }
        self.outbound.send(&["bmsg", "p1jr", &body]);
    }

    fn name_color(&self) -> &str {
        self.anon_color.as_deref().unwrap_or(&self.profile.name_color)
    }

    pub fn set_bg_mode(&mut self, mode: u8) {
        self.outbound.send(&["msgbg", &mode.to_string()]);
    }

    pub fn set_recording_mode(&mut self, mode: u8) {
        self.outbound.send(&["msgmedia", &mode.to_string()]);
    }

    /// Promotes `user`. Owner only.
    pub fn add_mod(&mut self, user: &User) -> bool {
        if self.own_level() != 2 {
            return false;
        }
        self.outbound.send(&["addmod", user.name()]);
        true
    }

    /// Demotes `user`. Owner only.
    pub fn remove_mod(&mut self, user: &User) -> bool {
        if self.own_level() != 2 {
            return false;
        }
        self.outbound.send(&["removemod", user.name()]);
        true
    }

    /// Flags the last message of `user`.
    pub fn flag(&mut self, user: &User) -> bool {
        let Some(id) = self.last_message_id(user) else {
            return false;
        };
        self.outbound.send(&["g_flag", &id]);
        true
    }

    /// Deletes the last message of `user`. Needs moderator rights.
    pub fn delete(&mut self, user: &User) -> bool {
        if self.own_level() == 0 {
            return false;
        }
        let Some(id) = self.last_message_id(user) else {
            return false;
        };
        self.outbound.send(&["delmsg", &id]);
        true
    }

    /// Deletes every message of `user`. Needs moderator rights.
    pub fn clear_user(&mut self, user: &User) -> bool {
        if self.own_level() == 0 {
            return false;
        }
        let Some((unid, ip)) = self.moderation_target(user) else {
            return false;
        };
        let name = moderation_name(user);
        self.outbound.send(&["delallmsg", &unid, &ip, name]);
        true
    }

    /// Clears the whole room.
    ///
    /// The owner has a dedicated command; moderators clear each author in
    /// turn.
    pub fn clear_all(&mut self) -> bool {
        match self.own_level() {
            0 => false,
            2 => {
                self.outbound.send(&["clearall"]);
                true
            }
            _ => {
                let authors: BTreeSet<User> =
                    self.store.messages().map(|m| m.user.clone()).collect();
                for user in &authors {
                    self.clear_user(user);
                }
                true
            }
        }
    }

    /// Bans the author of `user`'s last message and clears their messages.
    pub fn ban(&mut self, user: &User) -> bool {
        let Some((unid, ip)) = self.moderation_target(user) else {
            return false;
        };
        let name = moderation_name(user);
        self.outbound.send(&["block", &unid, &ip, name]);
        self.outbound.send(&["delallmsg", &unid, &ip, name]);
        true
    }

    /// Lifts the ban on `user`, if one is known.
    pub fn unban(&mut self, user: &User) -> bool {
        let Some(record) = self.banlist.get(user) else {
            return false;
        };
        let (unid, ip, target) = (
            record.unid.clone(),
            record.ip.clone(),
            record.target.name().to_string(),
        );
        self.outbound.send(&["removeblock", &unid, &ip, &target]);
        true
    }

    pub fn request_banlist(&mut self) {
        self.outbound.send(&["blocklist", "block", "", "next", "500"]);
    }

    pub fn request_unbanlist(&mut self) {
        self.outbound.send(&["blocklist", "unblock", "", "next", "500"]);
    }

    fn last_message_id(&self, user: &User) -> Option<String> {
        self.store
            .last_message(Some(user))
            .and_then(|m| m.id())
            .map(str::to_string)
    }

    /// `(unid, ip)` of `user`'s last message.
    fn moderation_target(&self, user: &User) -> Option<(String, String)> {
        let message = self.store.last_message(Some(user))?;
        if message.unid.is_empty() {
            return None;
        }
        Some((message.unid.clone(), message.ip.clone().unwrap_or_default()))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn owner(&self) -> Option<&User> {
        self.owner.as_ref()
    }

    pub fn mods(&self) -> &BTreeSet<User> {
        &self.mods
    }

    pub fn mod_names(&self) -> Vec<&str> {
        self.mods.iter().map(User::name).collect()
    }

    /// Server-reported participant count.
    pub fn user_count(&self) -> usize {
        self.user_count
    }

    /// Userlist using the manager's configured mode.
    pub fn userlist(&self) -> Vec<User> {
        self.userlist_with(
            self.config.userlist_mode,
            self.config.userlist_unique,
            self.config.userlist_memory,
        )
    }

    pub fn userlist_with(&self, mode: UserlistMode, unique: bool, memory: usize) -> Vec<User> {
        let users = match mode {
            UserlistMode::Recent => self.store.recent_authors(memory),
            UserlistMode::All => self.roster.clone(),
        };
        if !unique {
            return users;
        }
        let mut seen = HashSet::new();
        users.into_iter().filter(|u| seen.insert(u.clone())).collect()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.userlist().iter().map(|u| u.name().to_string()).collect()
    }

    /// Roster entries, one per session id.
    pub fn roster(&self) -> &[User] {
        &self.roster
    }

    /// 2 for the owner, 1 for moderators, 0 otherwise.
    pub fn level(&self, user: &User) -> u8 {
        self.level_of(user.name())
    }

    fn level_of(&self, name: &str) -> u8 {
        if self.owner.as_ref().is_some_and(|o| o.name() == name) {
            2
        } else if self.mods.iter().any(|m| m.name() == name) {
            1
        } else {
            0
        }
    }

    fn own_level(&self) -> u8 {
        match &self.current_name {
            Some(name) => self.level_of(&name.to_lowercase()),
            None => 0,
        }
    }

    fn is_local(&self, user: &User) -> bool {
        [self.current_name.as_deref(), self.profile.name.as_deref()]
            .into_iter()
            .flatten()
            .any(|name| name.eq_ignore_ascii_case(user.name()))
    }

    /// Most recent message, optionally by one author.
    pub fn last_message(&self, user: Option<&User>) -> Option<&Arc<Message>> {
        self.store.last_message(user)
    }

    /// Finds a user whose name contains `fragment`.
    ///
    /// Returns `None` when no user or more than one user matches.
    pub fn find_user(&self, fragment: &str) -> Option<User> {
        let fragment = fragment.to_lowercase();
        let mut matches = self
            .userlist_with(self.config.userlist_mode, true, self.config.userlist_memory)
            .into_iter()
            .filter(|u| u.name().contains(&fragment));
        match (matches.next(), matches.next()) {
            (Some(user), None) => Some(user),
            _ => None,
        }
    }

    pub fn banlist(&self) -> Vec<&User> {
        self.banlist.keys().collect()
    }

    pub fn unbanlist(&self) -> Vec<&User> {
        self.unbanlist.keys().collect()
    }

    pub fn ban_record(&self, user: &User) -> Option<&BanRecord> {
        self.banlist.get(user)
    }

    pub fn unban_record(&self, user: &User) -> Option<&BanRecord> {
        self.unbanlist.get(user)
    }

    /// Name this session speaks as.
    pub fn bot_name(&self) -> Option<String> {
        match (&self.profile.name, &self.profile.password) {
            (Some(name), Some(_)) => Some(name.clone()),
            (Some(name), None) => Some(format!("#{}", name)),
            _ => self.anon_name.clone(),
        }
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current_name.as_deref()
    }

    pub fn silent(&self) -> bool {
        self.silent
    }

    /// While silent, outgoing messages are dropped.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn premium(&self) -> bool {
        self.premium
    }

    pub fn connect_count(&self) -> u32 {
        self.connect_count
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn message_by_id(&self, id: &str) -> Option<&Arc<Message>> {
        self.store.get(id)
    }
}

impl Session for RoomSession {
    fn key(&self) -> SessionKey {
        SessionKey::Room(self.name.clone())
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn codec_mut(&mut self) -> &mut FrameCodec {
        &mut self.codec
    }

    fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    fn outbound_mut(&mut self) -> &mut Outbound {
        &mut self.outbound
    }

    fn events_mut(&mut self) -> &mut Vec<Event> {
        &mut self.events
    }

    fn dispatch(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        match frame.command.as_str() {
            "ok" => self.rcmd_ok(frame, ctx),
            "denied" => self.rcmd_denied(ctx),
            "inited" => self.rcmd_inited(ctx),
            "premium" => self.rcmd_premium(frame),
            "mods" => self.rcmd_mods(frame, ctx),
            "b" => self.rcmd_b(frame, ctx),
            "u" => self.rcmd_u(frame, ctx),
            "i" => self.rcmd_i(frame, ctx),
            "g_participants" => self.rcmd_g_participants(frame, ctx),
            "participant" => self.rcmd_participant(frame, ctx),
            "show_fw" => {
                self.emit(EventKind::FloodWarning);
                Ok(())
            }
            "show_tb" => {
                self.emit(EventKind::FloodBan);
                Ok(())
            }
            "tb" => {
                self.emit(EventKind::FloodBanRepeat);
                Ok(())
            }
            "delete" => self.rcmd_delete(frame),
            "deleteall" => self.rcmd_deleteall(frame),
            "n" => self.rcmd_n(frame),
            "blocklist" => {
                self.banlist = Self::parse_ban_table(frame, ctx.users);
                self.emit(EventKind::BanlistUpdate);
                Ok(())
            }
            "unblocklist" => {
                self.unbanlist = Self::parse_ban_table(frame, ctx.users);
                self.emit(EventKind::UnbanlistUpdate);
                Ok(())
            }
            "blocked" => self.rcmd_blocked(frame, ctx),
            "unblocked" => self.rcmd_unblocked(frame, ctx),
            "clearall" => {
                self.emit(EventKind::ClearAll);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn ping(&mut self, _ctx: &mut SessionContext<'_>) {
        self.outbound.send(&[""]);
        self.emit(EventKind::Ping);
    }

    fn transport_ready(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::AuthPending;
        }
    }

    fn close(&mut self, ctx: &mut SessionContext<'_>) {
        cancel_ping(&mut self.ping_task, ctx.scheduler);
        self.clear_roster(ctx.users);
        self.store.clear_pending();
        self.outbound.reset();
        self.state = SessionState::Disconnected;
        debug!(room = %self.name, "Room closed");
    }
}

/// Name sent with moderation commands; empty for anonymous users.
fn moderation_name(user: &User) -> &str {
    if user.is_anonymous() {
        ""
    } else {
        user.name()
    }
}

fn last_chars(text: &str, n: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;

    struct Harness {
        users: UserRegistry,
        scheduler: Scheduler<Job>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                users: UserRegistry::new(),
                scheduler: Scheduler::new(),
            }
        }

        fn feed(&mut self, room: &mut RoomSession, frames: &[&str]) -> Vec<EventKind> {
            let mut ctx = SessionContext {
                users: &mut self.users,
                scheduler: &mut self.scheduler,
            };
            for frame in frames {
                room.feed(format!("{}\r\n\x00", frame).as_bytes(), &mut ctx);
            }
            room.drain_events()
                .into_iter()
                .map(|e| e.kind)
                .filter(|k| !matches!(k, EventKind::Raw(_)))
                .collect()
        }
    }

    fn config() -> Arc<ManagerConfig> {
        Arc::new(ManagerConfig::default())
    }

    fn named_room() -> RoomSession {
        let profile = Profile::new(Some("botname".into()), Some("secret".into()));
        let mut room = RoomSession::new("Lobby", config(), profile);
        room.open();
        room.transport_ready();
        room
    }

    fn sent(room: &mut RoomSession) -> String {
        String::from_utf8_lossy(&room.outbound.take()).into_owned()
    }

    const OK_MOD: &str = "ok:owner:1234567890123456:M:x:1500000000.1234:x:botname;helper,27";

    fn ready_room(h: &mut Harness) -> RoomSession {
        let mut room = named_room();
        h.feed(&mut room, &[OK_MOD, "inited"]);
        room.outbound.take();
        room
    }

    fn post(h: &mut Harness, room: &mut RoomSession, token: &str, id: &str, name: &str, body: &str) {
        let b = format!("b:1500000000.5:{}::12345678:unid{}:{}:1.2.3.4:::{}", name, name, token, body);
        let u = format!("u:{}:{}", token, id);
        h.feed(room, &[b.as_str(), u.as_str()]);
    }

    #[test]
    fn test_open_queues_auth_behind_lock() {
        let mut room = named_room();
        assert_eq!(room.state(), SessionState::AuthPending);
        assert!(room.outbound.is_locked());

        let auth = format!("bauth:lobby:{}:botname:secret\x00", room.uid());
        assert_eq!(room.outbound.pending(), auth.as_bytes());

        room.message("early", true);
        assert_eq!(room.outbound.pending(), auth.as_bytes());
    }

    #[test]
    fn test_inited_releases_lock_after_bootstrap() {
        let mut h = Harness::new();
        let mut room = named_room();
        room.outbound.take();
        room.message("queued", true);

        let events = h.feed(&mut room, &[OK_MOD, "inited"]);
        assert!(matches!(events[0], EventKind::Connect));
        assert_eq!(room.state(), SessionState::Ready);
        assert!(h.scheduler.len() == 1);

        let wire = sent(&mut room);
        let queued = wire.find("bmsg:p1jr:").unwrap();
        let bootstrap = wire.find("g_participants:start").unwrap();
        let banlist = wire.find("blocklist:block::next:500").unwrap();
        assert!(queued < bootstrap);
        assert!(bootstrap < banlist);
        assert!(wire.contains("getratelimit\r\n\x00"));
    }

    #[test]
    fn test_ok_sets_owner_and_mods() {
        let mut h = Harness::new();
        let room = ready_room(&mut h);
        assert_eq!(room.owner().unwrap().name(), "owner");
        assert_eq!(room.mod_names(), vec!["botname", "helper"]);
        assert_eq!(room.level(&h.users.intern("helper")), 1);
        assert_eq!(room.level(&h.users.intern("owner")), 2);
        assert_eq!(room.level(&h.users.intern("stranger")), 0);
    }

    #[test]
    fn test_anonymous_login_derives_identity() {
        let mut h = Harness::new();
        let mut room = RoomSession::new("lobby", config(), Profile::default());
        room.open();
        assert_eq!(room.outbound.pending(), b"bauth:lobby\x00");

        h.feed(&mut room, &["ok:owner:1234567890123456:N:x:1501234.99:x:"]);
        // seed "1234", ssid digits "5678"
        assert_eq!(room.bot_name().as_deref(), Some("!anon6802"));
        assert_eq!(room.current_name(), Some("!anon6802"));
        assert_eq!(room.name_color(), "1234");
    }

    #[test]
    fn test_temporary_name_sends_blogin() {
        let mut h = Harness::new();
        let mut room = RoomSession::new("lobby", config(), Profile::new(Some("Temp".into()), None));
        room.open();
        room.transport_ready();
        room.outbound.take();

        h.feed(&mut room, &["ok:owner:1234567890123456:N:x:1500000000.1:x:"]);
        room.outbound.set_write_lock(false);
        assert_eq!(sent(&mut room), "blogin:Temp\r\n\x00");
        assert_eq!(room.bot_name().as_deref(), Some("#Temp"));
    }

    #[test]
    fn test_refused_login() {
        let mut h = Harness::new();
        let mut room = named_room();
        let events = h.feed(&mut room, &["ok:owner:1234567890123456:C:x:1.1:x:", "inited"]);
        assert!(matches!(events[0], EventKind::LoginFail));
        assert!(matches!(events[1], EventKind::Disconnect));
        assert_eq!(events.len(), 2);
        assert_eq!(room.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_denied() {
        let mut h = Harness::new();
        let mut room = named_room();
        let events = h.feed(&mut room, &["denied"]);
        assert!(matches!(events[..], [EventKind::LoginFail]));
        assert!(room.is_closed());
    }

    #[test]
    fn test_message_reconcile() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);

        let b = "b:1500000000.5:alice::12345678:unidA:tok1:1.2.3.4:::<n00F/><f x11F00=\"Arial\">hi &amp; bye";
        let events = h.feed(&mut room, &[b]);
        assert!(events.is_empty());
        assert!(room.store().is_pending("tok1"));

        let events = h.feed(&mut room, &["u:tok1:m1"]);
        let EventKind::Message { user, message } = &events[0] else {
            panic!("expected message, got {:?}", events);
        };
        assert_eq!(user.name(), "alice");
        assert_eq!(message.id(), Some("m1"));
        assert_eq!(message.body, "hi & bye");
        assert_eq!(message.ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(room.message_by_id("m1").unwrap().body, "hi & bye");

        let display = h.users.display(user);
        assert_eq!(display.name_color, "00F");
        assert_eq!(display.font_size, 11);
        assert_eq!(display.font_face, "Arial");
    }

    #[test]
    fn test_unknown_token_is_ignored() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        assert!(h.feed(&mut room, &["u:nope:m1"]).is_empty());
        assert!(room.message_by_id("m1").is_none());
    }

    #[test]
    fn test_anonymous_author_names() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);

        h.feed(&mut room, &[
            "b:1.0:::12345678:u1:t1::::<n1234/>hello",
            "u:t1:m1",
            "b:1.0::guest:12345678:u2:t2::::hey",
            "u:t2:m2",
        ]);
        assert_eq!(room.message_by_id("m1").unwrap().user.name(), "!anon6802");
        assert_eq!(room.message_by_id("m2").unwrap().user.name(), "#guest");
    }

    #[test]
    fn test_malformed_frame_does_not_stop_later_frames() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        let events = h.feed(&mut room, &["n:zz", "b:notatime:x", "n:1f"]);
        assert!(matches!(events[..], [EventKind::UserCountChange(31)]));
        assert_eq!(room.user_count(), 31);
    }

    #[test]
    fn test_backlog_replayed_oldest_first() {
        let mut h = Harness::new();
        let mut room = named_room();
        let events = h.feed(&mut room, &[
            OK_MOD,
            "i:3.0:carol::1:u3:m3::::third",
            "i:2.0:bob::1:u2:m2::::second",
            "i:1.0:alice::1:u1:m1::::first",
            "inited",
        ]);

        let bodies: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                EventKind::HistoryMessage { message, .. } => Some(message.body.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(bodies, vec!["first", "second", "third"]);
        assert_eq!(room.store().history_len(), 3);
        assert_eq!(room.last_message(None).unwrap().body, "third");
    }

    #[test]
    fn test_reconnect_drops_new_backlog() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);

        let mut ctx = SessionContext {
            users: &mut h.users,
            scheduler: &mut h.scheduler,
        };
        room.reconnect(&mut ctx);
        assert!(h.scheduler.is_empty());
        room.transport_ready();

        let events = h.feed(&mut room, &[OK_MOD, "i:1.0:alice::1:u1:m9::::old", "inited"]);
        assert!(events.iter().any(|e| matches!(e, EventKind::Reconnect)));
        assert!(!events.iter().any(|e| matches!(e, EventKind::HistoryMessage { .. })));
        assert!(room.message_by_id("m9").is_none());
        assert_eq!(room.connect_count(), 2);
    }

    #[test]
    fn test_participants_and_uniqueness() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);

        h.feed(&mut room, &["g_participants:s1:0:0:Alice:x;s2:0:0:None:x;s3:0:0:bob:x"]);
        assert_eq!(room.userlist_with(UserlistMode::All, true, 0).len(), 2);

        let alice = h.users.intern("alice");
        let events = h.feed(&mut room, &["participant:1:s4:0:alice:x"]);
        assert!(matches!(&events[..], [EventKind::Join(u)] if u == &alice));

        let mut cfg = ManagerConfig::default();
        cfg.userlist_event_unique = true;
        room.config = Arc::new(cfg);

        assert!(h.feed(&mut room, &["participant:1:s5:0:alice:x"]).is_empty());
        assert!(h.feed(&mut room, &["participant:0:s5:0:alice:x"]).is_empty());
        assert!(h.feed(&mut room, &["participant:0:s4:0:alice:x"]).is_empty());
        let events = h.feed(&mut room, &["participant:0:s1:0:alice:x"]);
        assert!(matches!(&events[..], [EventKind::Leave(u)] if u == &alice));
        assert!(!h.users.is_present(&alice, "lobby"));

        // Unknown session ids are ignored
        assert!(h.feed(&mut room, &["participant:0:zzz:0:bob:x"]).is_empty());
        assert_eq!(room.roster().len(), 1);
    }

    #[test]
    fn test_unique_join_fires_once_per_user() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        let mut cfg = ManagerConfig::default();
        cfg.userlist_event_unique = true;
        room.config = Arc::new(cfg);

        let carol = h.users.intern("carol");
        let events = h.feed(&mut room, &["participant:1:s1:0:carol:x"]);
        assert!(matches!(&events[..], [EventKind::Join(u)] if u == &carol));
        assert!(h.feed(&mut room, &["participant:1:s2:0:carol:x"]).is_empty());

        assert!(h.feed(&mut room, &["participant:0:s1:0:carol:x"]).is_empty());
        let events = h.feed(&mut room, &["participant:0:s2:0:carol:x"]);
        assert!(matches!(&events[..], [EventKind::Leave(u)] if u == &carol));
    }

    #[test]
    fn test_non_unique_events_per_session_id() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        let dave = h.users.intern("dave");

        let events = h.feed(&mut room, &["participant:1:s1:0:dave:x", "participant:1:s2:0:dave:x"]);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, EventKind::Join(u) if u == &dave)));

        let events = h.feed(&mut room, &["participant:0:s1:0:dave:x"]);
        assert!(matches!(&events[..], [EventKind::Leave(u)] if u == &dave));
        assert!(h.users.is_present(&dave, "lobby"));

        let events = h.feed(&mut room, &["participant:0:s2:0:dave:x"]);
        assert!(matches!(&events[..], [EventKind::Leave(u)] if u == &dave));
        assert!(!h.users.is_present(&dave, "lobby"));
    }

    #[test]
    fn test_history_entry_after_init_is_ignored() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);

        let events = h.feed(&mut room, &["i:1.0:alice::1:u1:late::::too late"]);
        assert!(events.is_empty());
        assert!(room.message_by_id("late").is_none());
        assert_eq!(room.store().history().len(), 0);
    }

    #[test]
    fn test_snapshot_replaces_roster() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        h.feed(&mut room, &["g_participants:s1:0:0:alice:x"]);
        h.feed(&mut room, &["g_participants:s2:0:0:bob:x"]);

        let alice = h.users.intern("alice");
        assert!(!h.users.is_present(&alice, "lobby"));
        assert_eq!(room.roster().len(), 1);
    }

    #[test]
    fn test_mods_diff() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        let events = h.feed(&mut room, &["mods:botname,1:newbie,5"]);
        let names: Vec<String> = events
            .iter()
            .map(|e| match e {
                EventKind::ModAdd(u) => format!("+{}", u),
                EventKind::ModRemove(u) => format!("-{}", u),
                other => other.name().to_string(),
            })
            .collect();
        assert_eq!(names, vec!["+newbie", "-helper", "mod_change"]);
    }

    #[test]
    fn test_delete_only_raises_for_history() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        post(&mut h, &mut room, "t1", "m1", "alice", "hello");

        let events = h.feed(&mut room, &["delete:m1", "delete:missing"]);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], EventKind::MessageDelete { message, .. } if message.body == "hello"));
        assert!(room.message_by_id("m1").is_none());
    }

    #[test]
    fn test_ban_tables() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);

        let events = h.feed(&mut room, &[
            "blocklist:u1:1.1.1.1:spammer:1500000000.0:owner;u2:2.2.2.2::1.0:owner;bad",
        ]);
        assert!(matches!(events[..], [EventKind::BanlistUpdate]));
        assert_eq!(room.banlist().len(), 1);

        let target = h.users.intern("troll");
        room.outbound.take();
        let events = h.feed(&mut room, &["blocked:u3:3.3.3.3:troll:helper:1500000001.0"]);
        assert!(matches!(&events[..], [EventKind::Ban { src, target: t }] if src.name() == "helper" && t == &target));
        assert_eq!(room.ban_record(&target).unwrap().unid, "u3");
        assert_eq!(sent(&mut room), "blocklist:block::next:500\r\n\x00");

        let events = h.feed(&mut room, &["unblocked:u3:3.3.3.3:troll:helper:1500000002.0"]);
        assert!(matches!(&events[..], [EventKind::Unban { .. }]));
        assert!(room.ban_record(&target).is_none());
        assert_eq!(room.unban_record(&target).unwrap().src.name(), "helper");
        assert_eq!(sent(&mut room), "blocklist:unblock::next:500\r\n\x00");

        assert!(h.feed(&mut room, &["blocked:u4:4.4.4.4::helper:1.0"]).is_empty());
    }

    #[test]
    fn test_outgoing_message_format() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        room.message("a <b>", false);
        assert_eq!(
            sent(&mut room),
            "bmsg:p1jr:<f x10808080=\"Arial\"><n808080/>a &lt;b&gt;\r\n\x00"
        );

        room.set_silent(true);
        room.message("quiet", true);
        assert!(room.outbound.is_empty());
    }

    #[test]
    fn test_big_message_policies() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        let mut cfg = ManagerConfig::default();
        cfg.max_message_length = 4;
        room.config = Arc::new(cfg.clone());

        room.message("abcdefghij", true);
        assert_eq!(sent(&mut room).matches("bmsg:p1jr:").count(), 3);

        cfg.big_message = BigMessagePolicy::Cut;
        room.config = Arc::new(cfg);
        room.message("abcdefghij", true);
        let wire = sent(&mut room);
        assert_eq!(wire.matches("bmsg:p1jr:").count(), 1);
        assert!(wire.ends_with("/>abcd\r\n\x00"));
    }

    #[test]
    fn test_moderation_requires_rights() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        post(&mut h, &mut room, "t1", "m1", "alice", "hello");
        let alice = h.users.intern("alice");

        assert!(room.delete(&alice));
        assert_eq!(sent(&mut room), "delmsg:m1\r\n\x00");

        assert!(room.clear_user(&alice));
        assert_eq!(sent(&mut room), "delallmsg:unidalice:1.2.3.4:alice\r\n\x00");

        // Moderator, not owner
        assert!(!room.add_mod(&alice));
        assert!(room.clear_all());
        assert!(sent(&mut room).starts_with("delallmsg:"));

        assert!(room.ban(&alice));
        assert_eq!(
            sent(&mut room),
            "block:unidalice:1.2.3.4:alice\r\n\x00delallmsg:unidalice:1.2.3.4:alice\r\n\x00"
        );

        let stranger = h.users.intern("nobody");
        assert!(!room.delete(&stranger));
        assert!(!room.unban(&stranger));
    }

    #[test]
    fn test_find_user() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        post(&mut h, &mut room, "t1", "m1", "alice", "a");
        post(&mut h, &mut room, "t2", "m2", "alicia", "b");
        post(&mut h, &mut room, "t3", "m3", "bob", "c");

        assert_eq!(room.find_user("BO").map(|u| u.name().to_string()).as_deref(), Some("bob"));
        assert!(room.find_user("ali").is_none());
        assert!(room.find_user("zed").is_none());
        assert_eq!(room.usernames(), vec!["alice", "alicia", "bob"]);
    }

    #[test]
    fn test_close_cancels_ping_and_clears_presence() {
        let mut h = Harness::new();
        let mut room = ready_room(&mut h);
        h.feed(&mut room, &["g_participants:s1:0:0:alice:x"]);
        assert_eq!(h.scheduler.len(), 1);

        let mut ctx = SessionContext {
            users: &mut h.users,
            scheduler: &mut h.scheduler,
        };
        room.close(&mut ctx);
        assert!(h.scheduler.is_empty());
        let alice = h.users.intern("alice");
        assert!(!h.users.is_present(&alice, "lobby"));
        assert!(room.is_closed());
    }
}
