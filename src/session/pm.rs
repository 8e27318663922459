//! Private Message Session
//!
//! The PM channel authenticates with a token from the
//! [`AuthProvider`](crate::auth::AuthProvider) instead of a password:
//!
//! ```text
//! tlogin:<token>:2  ──>      (write lock engaged)
//!                   <──  OK  (lock released; wl, getblock, getpremium, idle)
//!                   <──  DENIED  -> LoginFail, closed
//! ```
//!
//! Contacts and the block list are kept as sets of interned users.

use super::{
    arg, cancel_ping, number, unix_now, DispatchError, Outbound, Session, SessionContext,
    SessionKey, SessionState,
};
use crate::config::{ManagerConfig, Profile};
use crate::connection::Job;
use crate::events::{Event, EventKind};
use crate::protocol::{strip_html, Frame, FrameCodec};
use crate::scheduler::TaskId;
use crate::storage::User;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PmSession {
    config: Arc<ManagerConfig>,
    profile: Profile,
    state: SessionState,
    codec: FrameCodec,
    outbound: Outbound,
    events: Vec<Event>,

    contacts: BTreeSet<User>,
    blocklist: BTreeSet<User>,
    unblocklist: BTreeSet<User>,
    premium: bool,
    /// A message went out since the last ping; set at start so the
    /// first ping reports idle
    active: bool,
    ping_task: Option<TaskId>,
}

impl PmSession {
    pub fn new(config: Arc<ManagerConfig>, profile: Profile) -> Self {
        Self {
            codec: FrameCodec::new(config.tolerant_decoding),
            config,
            profile,
            state: SessionState::Disconnected,
            outbound: Outbound::new(),
            events: Vec::new(),
            contacts: BTreeSet::new(),
            blocklist: BTreeSet::new(),
            unblocklist: BTreeSet::new(),
            premium: false,
            active: true,
            ping_task: None,
        }
    }

    /// Queues the token login behind a fresh write lock.
    pub fn open(&mut self, token: &str) {
        self.codec.clear();
        self.outbound.reset();
        self.outbound.send(&["tlogin", token, "2"]);
        self.outbound.set_write_lock(true);
        self.state = SessionState::Connecting;
        debug!(endpoint = %self.config.pm_endpoint, "Opening PM session");
    }

    pub(crate) fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;
    }

    // ========================================================================
    // Received Commands
    // ========================================================================

    fn rcmd_ok(&mut self, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        self.outbound.set_write_lock(false);
        self.outbound.send(&["wl"]);
        self.outbound.send(&["getblock"]);
        self.outbound.send(&["getpremium", "1"]);
        self.set_idle();

        self.state = SessionState::Ready;
        cancel_ping(&mut self.ping_task, ctx.scheduler);
        self.ping_task = Some(
            ctx.scheduler
                .set_interval(self.config.ping_interval, Job::Ping(SessionKey::Pm)),
        );
        info!("PM session ready");
        self.emit(EventKind::PmConnect);
        Ok(())
    }

    fn rcmd_denied(&mut self, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        warn!("PM login denied");
        self.close(ctx);
        self.emit(EventKind::LoginFail);
        Ok(())
    }

    fn user_set(frame: &Frame, ctx: &mut SessionContext<'_>) -> BTreeSet<User> {
        frame
            .args
            .iter()
            .filter(|name| !name.is_empty())
            .map(|name| ctx.users.intern(name))
            .collect()
    }

    fn rcmd_msg(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        let user = ctx.users.intern(arg(frame, 0)?);
        let body = strip_html(&frame.rest(5));
        self.emit(EventKind::PmMessage { user, body });
        Ok(())
    }

    fn rcmd_connect(&mut self, frame: &Frame, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        let user = ctx.users.intern(arg(frame, 0)?);
        let idle = arg(frame, 1)?.to_string();
        let status = arg(frame, 2)?.to_string();
        self.emit(EventKind::PmContactStatus { user, idle, status });
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

    fn rcmd_kickingoff(&mut self, ctx: &mut SessionContext<'_>) -> Result<(), DispatchError> {
        warn!("PM session kicked off");
        self.close(ctx);
        self.emit(EventKind::PmDisconnect);
        Ok(())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Sends a private message to `user`.
    pub fn message(&mut self, user: &User, text: &str) {
        self.set_active();
        self.active = true;

        let text = text
            .replace("<b>", "<B>")
            .replace("</b>", "</B>")
            .replace("<u>", "<U>")
            .replace("</u>", "</U>")
            .replace("<i>", "<I>")
            .replace("</i>", "</I>");
        let body = format!(
            "<n{}/><m v=\"1\"><g xs0=\"1\"><g x{}s{}=\"0\">{}</g></g></m>",
            self.profile.name_color,
            self.profile.font_size(),
            self.profile.font_color,
            text
        );
        self.outbound.send(&["msg", user.name(), &body]);
    }

    pub fn add_contact(&mut self, user: &User) {
        if self.contacts.insert(user.clone()) {
            self.outbound.send(&["wladd", user.name()]);
            self.emit(EventKind::PmContactAdd(user.clone()));
        }
    }

    pub fn remove_contact(&mut self, user: &User) {
        if self.contacts.remove(user) {
            self.outbound.send(&["wldelete", user.name()]);
            self.emit(EventKind::PmContactRemove(user.clone()));
        }
    }

    pub fn block(&mut self, user: &User) {
        if self.blocklist.insert(user.clone()) {
            self.outbound.send(&["block", user.name(), user.name(), "S"]);
            self.emit(EventKind::PmBlock(user.clone()));
        }
    }

    pub fn unblock(&mut self, user: &User) {
        if self.blocklist.remove(user) {
            self.outbound.send(&["unblock", user.name()]);
            self.emit(EventKind::PmUnblock(user.clone()));
        }
    }

    /// Asks the server for `user`'s online status.
    pub fn check_status(&mut self, user: &User) {
        self.outbound.send(&["connect", user.name()]);
    }

    pub fn set_bg_mode(&mut self, mode: u8) {
        self.outbound.send(&["msgbg", &mode.to_string()]);
    }

    pub fn set_recording_mode(&mut self, mode: u8) {
        self.outbound.send(&["msgmedia", &mode.to_string()]);
    }

    pub fn set_idle(&mut self) {
        self.outbound.send(&["idle", "0"]);
    }

    pub fn set_active(&mut self) {
        self.outbound.send(&["idle", "1"]);
    }

    /// Sends a raw idle value.
    pub fn go_idle(&mut self, value: &str) {
        self.outbound.send(&["idle", value]);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn contacts(&self) -> &BTreeSet<User> {
        &self.contacts
    }

    pub fn blocklist(&self) -> &BTreeSet<User> {
        &self.blocklist
    }

    pub fn unblocklist(&self) -> &BTreeSet<User> {
        &self.unblocklist
    }

    pub fn premium(&self) -> bool {
        self.premium
    }
}

impl Session for PmSession {
    fn key(&self) -> SessionKey {
        SessionKey::Pm
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
            "OK" => self.rcmd_ok(ctx),
            "DENIED" => self.rcmd_denied(ctx),
            "block_list" => {
                self.blocklist = Self::user_set(frame, ctx);
                Ok(())
            }
            "unblock_list" => {
                self.unblocklist = Self::user_set(frame, ctx);
                Ok(())
            }
            "msg" => self.rcmd_msg(frame, ctx),
            "connect" => self.rcmd_connect(frame, ctx),
            "premium" => self.rcmd_premium(frame),
            "kickingoff" => self.rcmd_kickingoff(ctx),
            _ => Ok(()),
        }
    }

    fn ping(&mut self, _ctx: &mut SessionContext<'_>) {
        self.outbound.send(&[""]);
        self.emit(EventKind::PmPing);
        if self.active {
            self.set_idle();
            self.active = false;
        }
    }

    fn transport_ready(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::AuthPending;
        }
    }

    fn close(&mut self, ctx: &mut SessionContext<'_>) {
        cancel_ping(&mut self.ping_task, ctx.scheduler);
        self.outbound.reset();
        self.state = SessionState::Disconnected;
        debug!("PM session closed");
    }
}
