//! roomwire - An Event-Driven Multi-Room Chat Client
//!
//! This is the entry point for the roomwire command-line client.
//! It joins the requested rooms, optionally opens the PM channel, and logs
//! every event until Ctrl+C.

use roomwire::auth::{AuthProvider, NoAuth, StaticToken};
use roomwire::config::{ManagerConfig, Profile};
use roomwire::connection::Manager;
use roomwire::events::{Event, EventHandler, EventKind};
use roomwire::shard::Endpoint;
use std::sync::atomic::Ordering;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Client configuration
#[derive(Default)]
struct Config {
    /// Rooms to join at startup
    rooms: Vec<String>,
    /// Account name (anonymous when absent)
    name: Option<String>,
    /// Account password
    password: Option<String>,
    /// Pre-issued PM login token
    token: Option<String>,
    /// Skip the private-message session
    no_pm: bool,
    /// Connect every room here instead of its shard
    server: Option<Endpoint>,
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--room" | "-r" => {
                    let value = required(&args, i, "--room");
                    config.rooms.extend(
                        value
                            .split(';')
                            .map(str::trim)
                            .filter(|r| !r.is_empty())
                            .map(str::to_lowercase),
                    );
                    i += 2;
                }
                "--name" | "-n" => {
                    config.name = Some(required(&args, i, "--name"));
                    i += 2;
                }
                "--password" | "-p" => {
                    config.password = Some(required(&args, i, "--password"));
                    i += 2;
                }
                "--token" => {
                    config.token = Some(required(&args, i, "--token"));
                    i += 2;
                }
                "--server" => {
                    let value = required(&args, i, "--server");
                    config.server = Some(parse_endpoint(&value).unwrap_or_else(|| {
                        eprintln!("Error: --server expects HOST:PORT");
                        std::process::exit(1);
                    }));
                    i += 2;
                }
                "--no-pm" => {
                    config.no_pm = true;
                    i += 1;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("roomwire version {}", roomwire::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }
}

/// Value following the flag at `i`, or exit
fn required(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn parse_endpoint(value: &str) -> Option<Endpoint> {
    let (host, port) = value.rsplit_once(':')?;
    let port = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some(Endpoint::new(host, port))
}

fn print_help() {
    println!(
        r#"
roomwire - An Event-Driven Multi-Room Chat Client

USAGE:
    roomwire [OPTIONS]

OPTIONS:
    -r, --room <ROOMS>        Room to join; repeat or separate with ';'
    -n, --name <NAME>         Account name (anonymous if omitted)
    -p, --password <PASS>     Account password (temporary name if omitted)
        --token <TOKEN>       Pre-issued PM token (used with --name/--password)
        --no-pm               Do not open the PM channel
        --server <HOST:PORT>  Connect every room to this server
    -v, --version             Print version information
    -h, --help                Print this help message

EXAMPLES:
    roomwire --room lobby                           # Join anonymously
    roomwire -r "lobby;music" -n mybot -p secret    # Log in to two rooms
    RUST_LOG=debug roomwire -r lobby                # Show raw frames too
"#
    );
}

/// Logs every event the engine reports
struct LogHandler;

impl EventHandler for LogHandler {
    fn on_event(&mut self, manager: &mut Manager, event: &Event) {
        let session = &event.session;
        match &event.kind {
            EventKind::Connect => info!(%session, "connected"),
            EventKind::Reconnect => info!(%session, "reconnected"),
            EventKind::ConnectFail => warn!(%session, "connect failed"),
            EventKind::LoginFail => warn!(%session, "login failed"),
            EventKind::Disconnect | EventKind::PmDisconnect => info!(%session, "disconnected"),
            EventKind::Message { user, message } => {
                info!(%session, "{}: {}", user, message.body);
            }
            EventKind::PmMessage { user, body } => info!("PM from {}: {}", user, body),
            EventKind::Join(user) => info!(%session, "{} joined", user),
            EventKind::Leave(user) => info!(%session, "{} left", user),
            EventKind::Raw(_) | EventKind::Ping | EventKind::PmPing => {}
            other => debug!(%session, event = other.name(), "event"),
        }

        let terminal = matches!(
            event.kind,
            EventKind::ConnectFail
                | EventKind::LoginFail
                | EventKind::Disconnect
                | EventKind::PmDisconnect
        );
        if terminal && manager.room_names().is_empty() && manager.pm().is_none() {
            info!("No sessions left, stopping");
            manager.stop();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if config.rooms.is_empty() && config.no_pm {
        anyhow::bail!("nothing to do: give at least one --room or drop --no-pm");
    }

    let mut manager_config = ManagerConfig::default();
    manager_config.server_override = config.server.clone();

    let auth: Box<dyn AuthProvider> = match config.token.clone() {
        Some(token) => Box::new(StaticToken(token)),
        None => Box::new(NoAuth),
    };

    let profile = Profile::new(config.name.clone(), config.password.clone());
    let mut manager = Manager::new(manager_config, profile, auth);

    info!("roomwire v{} starting", roomwire::VERSION);
    for room in &config.rooms {
        manager.join_room(room);
    }
    if !config.no_pm {
        manager.connect_pm();
    }

    let mut handler = LogHandler;

    // Set up graceful shutdown
    tokio::select! {
        _ = manager.run(&mut handler) => {}
        result = signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, disconnecting...");
        }
    }
    manager.stop();

    let stats = manager.stats();
    info!(
        bytes_read = stats.bytes_read.load(Ordering::Relaxed),
        bytes_written = stats.bytes_written.load(Ordering::Relaxed),
        "Client shutdown complete"
    );
    Ok(())
}
