mod config;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use config::PeerConfig;
use tether::{MessageOptions, Session, SessionEvent, SessionState};

const CHAT_MESSAGE: &str = "chat";

#[derive(Parser)]
#[command(name = "tether-peer")]
#[command(about = "Host or join a tether session and exchange chat lines")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    #[arg(short, long, help = "TOML settings file")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<IpAddr>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long, help = "Name announced to other peers")]
    name: Option<String>,

    #[arg(long, help = "Simulated loss fraction (0-1)")]
    loss: Option<f32>,

    #[arg(long, help = "Minimum simulated latency in ms")]
    min_latency: Option<u32>,

    #[arg(long, help = "Maximum simulated latency in ms")]
    max_latency: Option<u32>,

    #[arg(long, help = "Per-connection send frequency in Hz")]
    send_hz: Option<f32>,

    #[arg(long, help = "Heartbeat frequency in Hz")]
    heartbeat_hz: Option<f32>,

    #[arg(long, help = "Cap on every connection's send frequency in Hz")]
    max_send_hz: Option<f32>,

    #[arg(long, help = "Seed for the loss and latency simulation")]
    seed: Option<u64>,

    #[arg(long, help = "Stop after this many seconds")]
    duration: Option<f32>,
}

#[derive(Subcommand)]
enum Mode {
    /// Start a session and accept joins
    Host,
    /// Join the session hosted at ADDR
    Join { addr: SocketAddr },
}

impl Args {
    fn apply(&self, config: &mut PeerConfig) {
        let session = &mut config.session;
        if let Some(bind) = self.bind {
            session.bind_ip = bind;
        }
        if let Some(port) = self.port {
            session.port = port;
        }
        if let Some(name) = &self.name {
            session.network_id.clone_from(name);
        }
        if let Some(hz) = self.send_hz {
            session.send_hz = hz;
        }
        if let Some(hz) = self.heartbeat_hz {
            session.heartbeat_hz = hz;
        }
        if let Some(hz) = self.max_send_hz {
            session.simulation.max_send_hz = hz;
        }
        if let Some(loss) = self.loss {
            session.simulation.loss_fraction = loss;
        }
        if let Some(min) = self.min_latency {
            session.simulation.min_latency_ms = min;
        }
        if let Some(max) = self.max_latency {
            session.simulation.max_latency_ms = max;
        }
        if self.seed.is_some() {
            session.simulation.seed = self.seed;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PeerConfig::load(path)?,
        None => PeerConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let mut session = Session::new(config.session.clone())?;
    session.register_message_type(CHAT_MESSAGE, MessageOptions::REQUIRES_CONNECTION, None)?;

    match args.mode {
        Mode::Host => session.host()?,
        Mode::Join { addr } => session.join(addr)?,
    }

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f32(secs));
    run(&mut session, &config, deadline)?;

    session.disconnect();
    log::info!("Peer shutting down");
    Ok(())
}

fn run(session: &mut Session, config: &PeerConfig, deadline: Option<Instant>) -> Result<()> {
    let tick = Duration::from_millis(config.peer.tick_ms);
    let chat_interval = (config.peer.chat_interval_secs > 0.0)
        .then(|| Duration::from_secs_f32(config.peer.chat_interval_secs));
    let stats_interval = Duration::from_secs_f32(config.peer.stats_interval_secs);

    let mut last_chat = Instant::now();
    let mut last_stats = Instant::now();
    let mut lines_sent = 0u64;

    loop {
        session.update();

        for event in session.drain_events() {
            log_event(&event);
        }
        if session.state() == SessionState::Disconnected {
            if let Some(error) = session.take_error() {
                return Err(error).context("session ended");
            }
            log::info!("Session closed");
            return Ok(());
        }

        while let Some((index, mut message)) = session.receive_any() {
            match message.read_string() {
                Ok(line) => log::info!("[{}] {}", index, line),
                Err(e) => log::warn!("Unreadable {} from {}: {}", message.name(), index, e),
            }
        }

        let now = Instant::now();
        let chat_due = chat_interval.is_some_and(|i| now.duration_since(last_chat) >= i);
        if chat_due && session.state() == SessionState::Ready {
            lines_sent += 1;
            let mut chat = session.message(CHAT_MESSAGE);
            chat.write_string(&format!(
                "{} says hello #{}",
                session.config().network_id,
                lines_sent
            ))?;
            let peers = session.broadcast(chat)?;
            log::debug!("Chat line {} sent to {} peer(s)", lines_sent, peers);
            last_chat = now;
        }

        if now.duration_since(last_stats) >= stats_interval {
            log_stats(session);
            last_stats = now;
        }

        if deadline.is_some_and(|deadline| now >= deadline) {
            return Ok(());
        }
        thread::sleep(tick);
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged { from, to } => {
            log::debug!("State {:?} -> {:?}", from, to);
        }
        SessionEvent::ConnectionJoined {
            index,
            address,
            network_id,
        } => {
            log::info!("{} joined from {} as {}", network_id, address, index);
        }
        SessionEvent::ConnectionLeft {
            index,
            address,
            reason,
        } => {
            log::info!("Connection {} ({}) left: {:?}", index, address, reason);
        }
        SessionEvent::JoinFailed(reason) => {
            log::error!("Join failed: {}", reason);
        }
        SessionEvent::Pong { from, payload } => {
            log::info!("Pong from {} ({} bytes)", from, payload.len());
        }
    }
}

fn log_stats(session: &Session) {
    for info in session.connection_infos() {
        if info.is_local {
            continue;
        }
        log::info!(
            "conn {} {} {:?}: rtt {:.1} ms, loss {:.1}%, sent {} pkts / {} B, recv {} pkts / {} B, dropped {}",
            info.index,
            info.network_id,
            info.state,
            info.rtt_seconds * 1000.0,
            info.loss_fraction * 100.0,
            info.stats.packets_sent,
            info.stats.bytes_sent,
            info.stats.packets_received,
            info.stats.bytes_received,
            info.stats.messages_dropped
        );
    }
    if session.malformed_packets() > 0 {
        log::warn!("{} malformed packet(s) discarded", session.malformed_packets());
    }
}
