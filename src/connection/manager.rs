//! Connection Manager
//!
//! The [`Manager`] owns every live session, their sockets, the user
//! registry and the scheduler, and drives them all from one cooperative
//! loop. Nothing here runs concurrently with a session's dispatch: tokio is
//! only used for non-blocking sockets, connect tasks and the bounded wait.
//!
//! ## One Iteration
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ wait (≤ timer_resolution) for:                               │
//! │   - any socket readable (or writable if it has output)       │
//! │   - a connect attempt finishing                              │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ apply finished connects  (link attached / ConnectFail)       │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ for each session, rooms in join order then PM:               │
//! │   try_read  ─> codec ─> dispatch ─> events                   │
//! │   try_write <─ outbound queue                                │
//! │   drop the session if it closed                              │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ run due scheduler tasks (pings, application callbacks)       │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//!                     events handed to the caller
//! ```
//!
//! ## Transport Errors
//!
//! `WouldBlock` simply means "try next iteration". A zero-length read means
//! the peer closed the connection and takes the disconnect path. Any other
//! read or write error is logged and swallowed for that iteration; the
//! session stays up.

use crate::auth::AuthProvider;
use crate::config::{ManagerConfig, Profile};
use crate::events::{Event, EventHandler, EventKind};
use crate::scheduler::{Scheduler, TaskId};
use crate::session::{
    PmSession, RoomSession, Session, SessionContext, SessionKey, SessionState,
};
use crate::shard::Endpoint;
use crate::storage::{User, UserRegistry};
use futures_util::future::select_all;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Longest a connect attempt may take
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Counters for everything that crosses a socket
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Connect attempts started
    pub connects_attempted: AtomicU64,
    /// Connect attempts that failed
    pub connects_failed: AtomicU64,
    /// Sockets currently attached to a session
    pub active_links: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn connect_started(&self) {
        self.connects_attempted.fetch_add(1, Ordering::Relaxed);
    }

    fn connect_failed(&self) {
        self.connects_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn link_opened(&self) {
        self.active_links.fetch_add(1, Ordering::Relaxed);
    }

    fn link_closed(&self) {
        self.active_links.fetch_sub(1, Ordering::Relaxed);
    }

    fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that can occur while establishing a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The TCP connect itself failed
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    /// The connect did not finish in time
    #[error("timed out connecting to {0}")]
    Timeout(Endpoint),
}

/// Work the scheduler can run.
pub enum Job {
    /// Keep-alive for a session
    Ping(SessionKey),
    /// Application callback with full access to the manager
    Callback(Box<dyn FnMut(&mut Manager) + Send>),
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Ping(key) => f.debug_tuple("Ping").field(key).finish(),
            Job::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// A finished connect attempt.
struct ConnectOutcome {
    key: SessionKey,
    /// Attempt number; stale attempts are discarded
    generation: u64,
    result: Result<TcpStream, ConnectionError>,
}

/// Owns all sessions and drives them from a single loop.
pub struct Manager {
    config: Arc<ManagerConfig>,
    profile: Profile,
    auth: Box<dyn AuthProvider>,

    /// Rooms in join order
    rooms: IndexMap<String, RoomSession>,
    pm: Option<PmSession>,
    links: HashMap<SessionKey, TcpStream>,
    /// Current connect attempt per session
    generations: HashMap<SessionKey, u64>,
    next_generation: u64,

    users: UserRegistry,
    scheduler: Scheduler<Job>,
    /// Events not yet handed out
    events: Vec<Event>,
    stats: Arc<ConnectionStats>,

    connect_tx: mpsc::UnboundedSender<ConnectOutcome>,
    connect_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
    running: bool,
}

impl Manager {
    /// Creates a manager with no sessions.
    ///
    /// Joining rooms spawns connect tasks, so those calls must happen
    /// inside a tokio runtime.
    pub fn new(config: ManagerConfig, profile: Profile, auth: Box<dyn AuthProvider>) -> Self {
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        Self {
            config: Arc::new(config),
            profile,
            auth,
            rooms: IndexMap::new(),
            pm: None,
            links: HashMap::new(),
            generations: HashMap::new(),
            next_generation: 0,
            users: UserRegistry::new(),
            scheduler: Scheduler::new(),
            events: Vec::new(),
            stats: Arc::new(ConnectionStats::new()),
            connect_tx,
            connect_rx,
            running: true,
        }
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Joins a room. Returns `false` if it is already joined.
    pub fn join_room(&mut self, name: &str) -> bool {
        let name = name.to_lowercase();
        if self.rooms.contains_key(&name) {
            return false;
        }

        let mut room = RoomSession::new(&name, Arc::clone(&self.config), self.profile.clone());
        room.open();
        let endpoint = room.endpoint().clone();
        self.rooms.insert(name.clone(), room);
        self.spawn_connect(SessionKey::Room(name), endpoint);
        true
    }

    /// Leaves a room, raising `Disconnect`. Returns `false` if not joined.
    pub fn leave_room(&mut self, name: &str) -> bool {
        let key = SessionKey::Room(name.to_lowercase());
        if !self.has_session(&key) {
            return false;
        }
        self.disconnect(&key);
        true
    }

    /// Drops the room's socket and reconnects it with a fresh connection id.
    ///
    /// No `Disconnect` event is raised; `Reconnect` follows once the room
    /// is ready again.
    pub fn reconnect_room(&mut self, name: &str) -> bool {
        let name = name.to_lowercase();
        let Some(room) = self.rooms.get_mut(&name) else {
            return false;
        };

        let key = SessionKey::Room(name);
        if self.links.remove(&key).is_some() {
            self.stats.link_closed();
        }
        let mut ctx = SessionContext {
            users: &mut self.users,
            scheduler: &mut self.scheduler,
        };
        room.reconnect(&mut ctx);
        let endpoint = room.endpoint().clone();
        info!(session = %key, "Reconnecting");
        self.spawn_connect(key, endpoint);
        true
    }

    /// Opens the private-message session.
    ///
    /// Needs a name and password; a provider that returns no token raises
    /// `LoginFail` and no connection is attempted.
    pub fn connect_pm(&mut self) -> bool {
        if self.pm.is_some() {
            return false;
        }

        let token = self
            .profile
            .credentials()
            .and_then(|(name, password)| self.auth.token(name, password));
        let Some(token) = token else {
            warn!("No PM token, skipping PM session");
            self.events.push(Event::new(SessionKey::Pm, EventKind::LoginFail));
            return false;
        };

        let mut pm = PmSession::new(Arc::clone(&self.config), self.profile.clone());
        pm.open(&token);
        self.pm = Some(pm);
        self.spawn_connect(SessionKey::Pm, self.config.pm_endpoint.clone());
        true
    }

    /// Closes the private-message session, raising `PmDisconnect`.
    pub fn disconnect_pm(&mut self) -> bool {
        if self.pm.is_none() {
            return false;
        }
        self.disconnect(&SessionKey::Pm);
        true
    }

    pub fn room(&self, name: &str) -> Option<&RoomSession> {
        self.rooms.get(&name.to_lowercase())
    }

    pub fn room_mut(&mut self, name: &str) -> Option<&mut RoomSession> {
        self.rooms.get_mut(&name.to_lowercase())
    }

    /// Joined rooms in join order.
    pub fn rooms(&self) -> impl Iterator<Item = &RoomSession> {
        self.rooms.values()
    }

    pub fn room_names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn pm(&self) -> Option<&PmSession> {
        self.pm.as_ref()
    }

    pub fn pm_mut(&mut self) -> Option<&mut PmSession> {
        self.pm.as_mut()
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    /// Handle for `name`, interned on first use.
    pub fn user(&mut self, name: &str) -> User {
        self.users.intern(name)
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn has_session(&self, key: &SessionKey) -> bool {
        match key {
            SessionKey::Room(name) => self.rooms.contains_key(name),
            SessionKey::Pm => self.pm.is_some(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Disconnects everything and makes [`Manager::run`] return.
    pub fn stop(&mut self) {
        for key in self.session_keys() {
            self.disconnect(&key);
        }
        self.running = false;
        info!("Manager stopped");
    }

    /// Reconnects every joined room in place.
    ///
    /// Rooms keep their history and raise `Reconnect` once ready again; no
    /// `Disconnect` is raised. The PM session is left alone.
    pub fn restart(&mut self) {
        for room in self.room_names() {
            self.reconnect_room(&room);
        }
        info!(rooms = self.rooms.len(), "Manager restarted");
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Runs `callback` once after `delay`.
    pub fn set_timeout<F>(&mut self, delay: Duration, callback: F) -> TaskId
    where
        F: FnMut(&mut Manager) + Send + 'static,
    {
        self.scheduler.set_timeout(delay, Job::Callback(Box::new(callback)))
    }

    /// Runs `callback` every `period`.
    pub fn set_interval<F>(&mut self, period: Duration, callback: F) -> TaskId
    where
        F: FnMut(&mut Manager) + Send + 'static,
    {
        self.scheduler.set_interval(period, Job::Callback(Box::new(callback)))
    }

    /// Cancels a task; safe from inside the task's own callback.
    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        self.scheduler.cancel(id)
    }

    /// Number of registered tasks, keep-alives included.
    pub fn task_count(&self) -> usize {
        self.scheduler.len()
    }

    // ========================================================================
    // Profile
    // ========================================================================

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    fn update_profile(&mut self, change: impl FnOnce(&mut Profile)) {
        change(&mut self.profile);
        for room in self.rooms.values_mut() {
            room.set_profile(self.profile.clone());
        }
        if let Some(pm) = &mut self.pm {
            pm.set_profile(self.profile.clone());
        }
    }

    pub fn set_name_color(&mut self, color: &str) {
        self.update_profile(|p| p.name_color = color.to_string());
    }

    pub fn set_font_color(&mut self, color: &str) {
        self.update_profile(|p| p.font_color = color.to_string());
    }

    pub fn set_font_face(&mut self, face: &str) {
        self.update_profile(|p| p.font_face = face.to_string());
    }

    /// Sets the font size, clamped to what the server accepts.
    pub fn set_font_size(&mut self, size: u32) {
        self.update_profile(|p| p.set_font_size(size));
    }

    pub fn enable_bg(&mut self) {
        self.set_background(true);
    }

    pub fn disable_bg(&mut self) {
        self.set_background(false);
    }

    fn set_background(&mut self, on: bool) {
        self.update_profile(|p| p.background = on);
        let mode = u8::from(on);
        for room in self.rooms.values_mut() {
            room.set_bg_mode(mode);
        }
        if let Some(pm) = &mut self.pm {
            pm.set_bg_mode(mode);
        }
    }

    pub fn enable_recording(&mut self) {
        self.set_recording(true);
    }

    pub fn disable_recording(&mut self) {
        self.set_recording(false);
    }

    fn set_recording(&mut self, on: bool) {
        self.update_profile(|p| p.recording = on);
        let mode = u8::from(on);
        for room in self.rooms.values_mut() {
            room.set_recording_mode(mode);
        }
        if let Some(pm) = &mut self.pm {
            pm.set_recording_mode(mode);
        }
    }

    // ========================================================================
    // Reactor
    // ========================================================================

    /// Runs until [`Manager::stop`] is called, handing every event to
    /// `handler`.
    pub async fn run<H: EventHandler>(&mut self, handler: &mut H) {
        self.running = true;
        info!(rooms = self.rooms.len(), "Manager running");
        while self.running {
            let events = self.poll_once().await;
            for event in &events {
                handler.on_event(self, event);
            }
        }

        // Raised by a stop() issued from the handler itself
        let leftover = std::mem::take(&mut self.events);
        for event in &leftover {
            handler.on_event(self, event);
        }
    }

    /// Runs one reactor iteration and returns the events it produced.
    pub async fn poll_once(&mut self) -> Vec<Event> {
        if let Some(outcome) = self.wait().await {
            self.apply_connect(outcome);
        }
        while let Ok(outcome) = self.connect_rx.try_recv() {
            self.apply_connect(outcome);
        }

        let mut buf = vec![0u8; self.config.read_chunk_size.max(1)];
        for key in self.session_keys() {
            self.service(&key, &mut buf);
            self.collect_events(&key);
            if self.is_closed(&key) {
                self.remove_session(&key);
            }
        }

        self.run_due_tasks();
        std::mem::take(&mut self.events)
    }

    /// Waits for socket readiness, a finished connect, or the timer
    /// resolution, whichever comes first.
    async fn wait(&mut self) -> Option<ConnectOutcome> {
        let resolution = self.config.timer_resolution;

        let mut waits: Vec<Pin<Box<dyn Future<Output = ()> + Send + '_>>> = Vec::new();
        for (key, stream) in &self.links {
            let mut interest = Interest::READABLE;
            if has_output(&self.rooms, &self.pm, key) {
                interest = interest | Interest::WRITABLE;
            }
            waits.push(Box::pin(async move {
                let _ = stream.ready(interest).await;
            }));
        }
        let readiness = async move {
            if waits.is_empty() {
                std::future::pending::<()>().await;
            } else {
                select_all(waits).await;
            }
        };

        tokio::select! {
            outcome = self.connect_rx.recv() => outcome,
            _ = readiness => None,
            _ = tokio::time::sleep(resolution) => None,
        }
    }

    fn spawn_connect(&mut self, key: SessionKey, endpoint: Endpoint) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.generations.insert(key.clone(), generation);
        self.stats.connect_started();
        info!(session = %key, endpoint = %endpoint, "Connecting");

        let tx = self.connect_tx.clone();
        tokio::spawn(async move {
            let result = connect(endpoint).await;
            let _ = tx.send(ConnectOutcome {
                key,
                generation,
                result,
            });
        });
    }

    fn apply_connect(&mut self, outcome: ConnectOutcome) {
        let ConnectOutcome {
            key,
            generation,
            result,
        } = outcome;

        if self.generations.get(&key) != Some(&generation) || !self.has_session(&key) {
            trace!(session = %key, generation, "Discarding stale connect");
            return;
        }

        match result {
            Ok(stream) => {
                info!(session = %key, "Connected");
                self.with_session(&key, |session, _| session.transport_ready());
                self.links.insert(key, stream);
                self.stats.link_opened();
            }
            Err(e) => {
                warn!(session = %key, error = %e, "Connect failed");
                self.stats.connect_failed();
                self.with_session(&key, |session, ctx| {
                    session.close(ctx);
                    session.emit(EventKind::ConnectFail);
                });
                self.collect_events(&key);
                self.remove_session(&key);
            }
        }
    }

    /// One bounded read and one write drain for a session.
    fn service(&mut self, key: &SessionKey, buf: &mut [u8]) {
        let Some(stream) = self.links.get(key) else {
            return;
        };

        let read = stream.try_read(buf);
        match read {
            Ok(0) => {
                info!(session = %key, "Connection closed by server");
                self.disconnect(key);
                return;
            }
            Ok(n) => {
                self.stats.bytes_read(n);
                trace!(session = %key, bytes = n, "Read data");
                let data = &buf[..n];
                self.with_session(key, |session, ctx| session.feed(data, ctx));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => debug!(session = %key, error = %e, "Read failed"),
        }

        let (Some(stream), Some(session)) = (
            self.links.get(key),
            lookup(&mut self.rooms, &mut self.pm, key),
        ) else {
            return;
        };
        let outbound = session.outbound_mut();
        if outbound.is_empty() {
            return;
        }
        match stream.try_write(outbound.pending()) {
            Ok(n) => {
                outbound.advance(n);
                self.stats.bytes_written(n);
                trace!(session = %key, bytes = n, "Wrote data");
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => debug!(session = %key, error = %e, "Write failed"),
        }
    }

    fn run_due_tasks(&mut self) {
        for id in self.scheduler.due(Instant::now()) {
            let Some(mut job) = self.scheduler.begin(id) else {
                continue;
            };
            match &mut job {
                Job::Ping(key) => {
                    let key = key.clone();
                    self.with_session(&key, |session, ctx| session.ping(ctx));
                    self.collect_events(&key);
                }
                Job::Callback(callback) => callback(self),
            }
            self.scheduler.finish(id, job, Instant::now());
        }
    }

    /// Closes a session and raises its disconnect event.
    fn disconnect(&mut self, key: &SessionKey) {
        let kind = match key {
            SessionKey::Room(_) => EventKind::Disconnect,
            SessionKey::Pm => EventKind::PmDisconnect,
        };
        self.with_session(key, |session, ctx| {
            if !session.is_closed() {
                session.close(ctx);
            }
            session.emit(kind);
        });
        self.collect_events(key);
        self.remove_session(key);
        info!(session = %key, "Disconnected");
    }

    fn remove_session(&mut self, key: &SessionKey) {
        if self.links.remove(key).is_some() {
            self.stats.link_closed();
        }
        self.generations.remove(key);
        match key {
            SessionKey::Room(name) => {
                self.rooms.shift_remove(name);
            }
            SessionKey::Pm => self.pm = None,
        }
    }

    fn is_closed(&self, key: &SessionKey) -> bool {
        let state = match key {
            SessionKey::Room(name) => self.rooms.get(name).map(|r| r.state()),
            SessionKey::Pm => self.pm.as_ref().map(|p| p.state()),
        };
        state == Some(SessionState::Disconnected)
    }

    fn collect_events(&mut self, key: &SessionKey) {
        if let Some(session) = lookup(&mut self.rooms, &mut self.pm, key) {
            self.events.extend(session.drain_events());
        }
    }

    fn session_keys(&self) -> Vec<SessionKey> {
        self.rooms
            .keys()
            .map(|name| SessionKey::Room(name.clone()))
            .chain(self.pm.is_some().then_some(SessionKey::Pm))
            .collect()
    }

    /// Runs `f` with the session and the context it may touch.
    fn with_session<R>(
        &mut self,
        key: &SessionKey,
        f: impl FnOnce(&mut dyn Session, &mut SessionContext<'_>) -> R,
    ) -> Option<R> {
        let session = lookup(&mut self.rooms, &mut self.pm, key)?;
        let mut ctx = SessionContext {
            users: &mut self.users,
            scheduler: &mut self.scheduler,
        };
        Some(f(session, &mut ctx))
    }
}

fn lookup<'a>(
    rooms: &'a mut IndexMap<String, RoomSession>,
    pm: &'a mut Option<PmSession>,
    key: &SessionKey,
) -> Option<&'a mut dyn Session> {
    match key {
        SessionKey::Room(name) => rooms.get_mut(name).map(|r| r as &mut dyn Session),
        SessionKey::Pm => pm.as_mut().map(|p| p as &mut dyn Session),
    }
}

fn has_output(rooms: &IndexMap<String, RoomSession>, pm: &Option<PmSession>, key: &SessionKey) -> bool {
    match key {
        SessionKey::Room(name) => rooms.get(name).is_some_and(|r| !r.outbound().is_empty()),
        SessionKey::Pm => pm.as_ref().is_some_and(|p| !p.outbound().is_empty()),
    }
}

async fn connect(endpoint: Endpoint) -> Result<TcpStream, ConnectionError> {
    let attempt = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
    match tokio::time::timeout(CONNECT_TIMEOUT, attempt).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(endpoint = %endpoint, error = %e, "Could not disable Nagle");
            }
            Ok(stream)
        }
        Ok(Err(source)) => Err(ConnectionError::Connect { endpoint, source }),
        Err(_) => Err(ConnectionError::Timeout(endpoint)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NoAuth, StaticToken};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    fn test_config(endpoint: Endpoint) -> ManagerConfig {
        ManagerConfig {
            server_override: Some(endpoint.clone()),
            pm_endpoint: endpoint,
            timer_resolution: Duration::from_millis(10),
            ..ManagerConfig::default()
        }
    }

    /// Accepts one connection, waits for the auth frame, answers with
    /// `reply`, then forwards everything else it reads.
    async fn fake_server(reply: &'static [u8]) -> (Endpoint, mpsc::UnboundedReceiver<Vec<u8>>) {
        let listener = assert_ok!(TcpListener::bind("127.0.0.1:0").await);
        let addr = assert_ok!(listener.local_addr());
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];

            let n = socket.read(&mut buf).await.unwrap();
            let _ = tx.send(buf[..n].to_vec());
            if reply.is_empty() {
                return;
            }
            socket.write_all(reply).await.unwrap();

            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let _ = tx.send(buf[..n].to_vec());
                    }
                }
            }
        });

        (Endpoint::new("127.0.0.1", addr.port()), rx)
    }

    async fn poll_until(manager: &mut Manager, done: impl Fn(&Event) -> bool) -> Vec<Event> {
        let mut seen = Vec::new();
        for _ in 0..300 {
            let events = manager.poll_once().await;
            let finished = events.iter().any(&done);
            seen.extend(events);
            if finished {
                break;
            }
        }
        seen
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> String {
        let mut wire = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            wire.extend(chunk);
        }
        String::from_utf8_lossy(&wire).into_owned()
    }

    #[tokio::test]
    async fn test_room_handshake_over_tcp() {
        let (endpoint, mut rx) =
            fake_server(b"ok:owner:1234567890123456:M:x:1.1:x:\r\n\x00inited\r\n\x00").await;
        let mut manager = Manager::new(test_config(endpoint), Profile::default(), Box::new(NoAuth));

        assert!(manager.join_room("Lobby"));
        assert!(!manager.join_room("lobby"));
        manager.room_mut("lobby").unwrap().message("hello", true);

        let events = poll_until(&mut manager, |e| matches!(e.kind, EventKind::Connect)).await;
        assert!(events.iter().any(|e| e.room() == Some("lobby") && matches!(e.kind, EventKind::Connect)));
        assert!(events.iter().any(|e| matches!(&e.kind, EventKind::Raw(text) if text == "inited")));

        for _ in 0..10 {
            manager.poll_once().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let wire = drain(&mut rx);
        assert!(wire.starts_with("bauth:lobby\x00"));
        let message = wire.find("bmsg:p1jr:").unwrap();
        let bootstrap = wire.find("g_participants:start").unwrap();
        assert!(message < bootstrap);
        assert!(manager.stats().bytes_written.load(Ordering::Relaxed) > 0);
        assert_eq!(manager.task_count(), 1);
    }

    #[tokio::test]
    async fn test_peer_close_disconnects() {
        let (endpoint, _rx) = fake_server(b"").await;
        let mut manager = Manager::new(test_config(endpoint), Profile::default(), Box::new(NoAuth));
        manager.join_room("lobby");

        let events = poll_until(&mut manager, |e| matches!(e.kind, EventKind::Disconnect)).await;
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::Disconnect)));
        assert!(manager.room("lobby").is_none());
        assert_eq!(manager.stats().active_links.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = assert_ok!(TcpListener::bind("127.0.0.1:0").await);
        let port = assert_ok!(listener.local_addr()).port();
        drop(listener);

        let config = test_config(Endpoint::new("127.0.0.1", port));
        let mut manager = Manager::new(config, Profile::default(), Box::new(NoAuth));
        manager.join_room("lobby");

        let events = poll_until(&mut manager, |e| matches!(e.kind, EventKind::ConnectFail)).await;
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::ConnectFail)));
        assert!(manager.room_names().is_empty());
        assert_eq!(manager.stats().connects_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_leave_room() {
        let (endpoint, _rx) = fake_server(b"").await;
        let mut manager = Manager::new(test_config(endpoint), Profile::default(), Box::new(NoAuth));
        manager.join_room("a");
        manager.join_room("b");
        assert_eq!(manager.room_names(), vec!["a", "b"]);

        assert!(manager.leave_room("A"));
        assert!(!manager.leave_room("a"));
        let events = manager.poll_once().await;
        assert!(events.iter().any(|e| e.room() == Some("a") && matches!(e.kind, EventKind::Disconnect)));
        assert_eq!(manager.room_names(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_pm_without_token() {
        let profile = Profile::new(Some("bot".into()), Some("pw".into()));
        let mut manager = Manager::new(ManagerConfig::default(), profile, Box::new(NoAuth));

        assert!(!manager.connect_pm());
        let events = manager.poll_once().await;
        assert!(matches!(
            &events[..],
            [Event { session: SessionKey::Pm, kind: EventKind::LoginFail }]
        ));
        assert!(manager.pm().is_none());
    }

    #[tokio::test]
    async fn test_pm_login_over_tcp() {
        let (endpoint, mut rx) = fake_server(b"OK\r\n\x00").await;
        let profile = Profile::new(Some("bot".into()), Some("pw".into()));
        let mut manager = Manager::new(test_config(endpoint), profile, Box::new(StaticToken("tok".into())));

        assert!(manager.connect_pm());
        let events = poll_until(&mut manager, |e| matches!(e.kind, EventKind::PmConnect)).await;
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::PmConnect)));

        for _ in 0..10 {
            manager.poll_once().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let wire = drain(&mut rx);
        assert!(wire.starts_with("tlogin:tok:2\x00"));
        assert!(wire.contains("wl\r\n\x00getblock\r\n\x00"));
    }

    #[tokio::test]
    async fn test_interval_cancels_itself() {
        let mut manager = Manager::new(
            ManagerConfig {
                timer_resolution: Duration::from_millis(5),
                ..ManagerConfig::default()
            },
            Profile::default(),
            Box::new(NoAuth),
        );

        let count = Arc::new(AtomicU64::new(0));
        let own_id: Arc<Mutex<Option<TaskId>>> = Arc::new(Mutex::new(None));

        let counter = Arc::clone(&count);
        let slot = Arc::clone(&own_id);
        let id = manager.set_interval(Duration::from_millis(1), move |m| {
            if counter.fetch_add(1, Ordering::Relaxed) + 1 == 3 {
                if let Some(id) = *slot.lock().unwrap() {
                    m.cancel_task(id);
                }
            }
        });
        *own_id.lock().unwrap() = Some(id);

        let fired = Arc::new(AtomicU64::new(0));
        let once = Arc::clone(&fired);
        manager.set_timeout(Duration::from_millis(1), move |_| {
            once.fetch_add(1, Ordering::Relaxed);
        });

        for _ in 0..40 {
            manager.poll_once().await;
        }
        assert_eq!(count.load(Ordering::Relaxed), 3);
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert_eq!(manager.task_count(), 0);
    }

    #[tokio::test]
    async fn test_profile_changes_reach_sessions() {
        let (endpoint, _rx) = fake_server(b"").await;
        let mut manager = Manager::new(test_config(endpoint), Profile::default(), Box::new(NoAuth));
        manager.join_room("lobby");

        manager.set_font_size(40);
        manager.set_name_color("F00");
        assert_eq!(manager.profile().font_size(), 22);
        assert_eq!(manager.profile().name_color, "F00");

        manager.disable_bg();
        assert!(!manager.profile().background);
        let held = manager.room("lobby").unwrap().outbound().held().to_vec();
        assert!(String::from_utf8_lossy(&held).contains("msgbg:0"));
    }

    /// Accepts any number of connections and answers each auth frame
    /// with `reply`.
    async fn repeat_server(reply: &'static [u8]) -> Endpoint {
        let listener = assert_ok!(TcpListener::bind("127.0.0.1:0").await);
        let addr = assert_ok!(listener.local_addr());

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    if matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {
                        let _ = socket.write_all(reply).await;
                    }
                    while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
                });
            }
        });

        Endpoint::new("127.0.0.1", addr.port())
    }

    const READY_WITH_BACKLOG: &[u8] =
        b"ok:owner:1234567890123456:M:x:1.1:x:\r\n\x00i:1.0:alice::1:u1:m1::::hi\r\n\x00inited\r\n\x00";

    #[tokio::test]
    async fn test_stop_from_handler_delivers_disconnect() {
        let endpoint = repeat_server(READY_WITH_BACKLOG).await;
        let mut manager = Manager::new(test_config(endpoint), Profile::default(), Box::new(NoAuth));
        manager.join_room("lobby");

        let mut seen = Vec::new();
        {
            let mut handler = |m: &mut Manager, event: &Event| {
                seen.push(event.kind.name());
                if matches!(event.kind, EventKind::Connect) {
                    m.stop();
                }
            };
            let run = tokio::time::timeout(Duration::from_secs(5), manager.run(&mut handler)).await;
            assert_ok!(run);
        }

        assert!(seen.contains(&"connect"));
        assert_eq!(seen.last(), Some(&"disconnect"));
        assert!(manager.room_names().is_empty());
    }

    #[tokio::test]
    async fn test_restart_reconnects_rooms_in_place() {
        let endpoint = repeat_server(READY_WITH_BACKLOG).await;
        let mut manager = Manager::new(test_config(endpoint), Profile::default(), Box::new(NoAuth));
        manager.join_room("lobby");

        let events = poll_until(&mut manager, |e| matches!(e.kind, EventKind::Connect)).await;
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::HistoryMessage { .. })));
        assert_eq!(manager.room("lobby").unwrap().store().history().len(), 1);

        manager.restart();
        let events = poll_until(&mut manager, |e| matches!(e.kind, EventKind::Reconnect)).await;
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::Reconnect)));
        assert!(!events.iter().any(|e| matches!(
            e.kind,
            EventKind::Disconnect | EventKind::Connect | EventKind::HistoryMessage { .. }
        )));

        let room = manager.room("lobby").unwrap();
        assert_eq!(room.connect_count(), 2);
        assert_eq!(room.store().history().len(), 1);
        assert!(room.message_by_id("m1").is_some());
        assert_eq!(manager.stats().connects_attempted.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_stop() {
        let (endpoint, _rx) = fake_server(b"").await;
        let mut manager = Manager::new(test_config(endpoint), Profile::default(), Box::new(NoAuth));
        manager.join_room("lobby");

        let mut handler = |m: &mut Manager, event: &Event| {
            if matches!(event.kind, EventKind::Disconnect) {
                m.stop();
            }
        };
        manager.set_timeout(Duration::from_millis(1), |m| m.stop());
        tokio::time::timeout(Duration::from_secs(5), manager.run(&mut handler))
            .await
            .unwrap();
        assert!(!manager.is_running());
        assert!(manager.room_names().is_empty());
    }
}
