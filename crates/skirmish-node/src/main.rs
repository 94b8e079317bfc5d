//! Headless lockstep node.
//!
//! Joins a match with the peers listed in `config.ron` (or `--peer` flags),
//! drives a [`ScriptedWorld`] at the configured tick rate and issues a few
//! scripted orders, until every opponent is gone or Ctrl-C is pressed.
//!
//! ```text
//! skirmish-node --faction 1 --port 41001 --peer 2@127.0.0.1:41002
//! skirmish-node --faction 2 --port 41002 --peer 1@127.0.0.1:41001
//! ```

mod world;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skirmish_config::{CliArgs, Config, ConfigError, default_config_dir};
use skirmish_lockstep::{MatchConfig, MatchSession, SchedulerError, Simulation, TickOutcome};
use skirmish_net::{Command, FactionId, LinkConfig, TilePos, UdpConfig, UdpTransport};

use crate::world::ScriptedWorld;

/// Ticks between scripted orders.
const ORDER_INTERVAL_TICKS: u64 = 45;

/// Errors that end the node.
#[derive(Debug, thiserror::Error)]
enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Match(#[from] SchedulerError),
}

fn udp_config(config: &Config) -> UdpConfig {
    let net = &config.network;
    UdpConfig {
        recv_buffer_size: net.recv_buffer_size,
        link: LinkConfig {
            resend_interval: Duration::from_millis(net.resend_interval_ms),
            heartbeat_interval: Duration::from_millis(net.heartbeat_interval_ms),
            timeout: Duration::from_millis(net.peer_timeout_ms),
            ..LinkConfig::default()
        },
        ..UdpConfig::default()
    }
}

/// Pick a random own unit and send it somewhere nearby.
fn scripted_order(world: &ScriptedWorld, faction: FactionId, rng: &mut StdRng) -> Option<Command> {
    let units = world.units_of(faction);
    if units.is_empty() {
        return None;
    }
    let unit = units[rng.random_range(0..units.len())];
    let from = world.position(unit)?;
    Some(Command::Move {
        faction,
        unit,
        dest: TilePos::new(
            from.x + rng.random_range(-6..=6),
            from.y + rng.random_range(-6..=6),
        ),
    })
}

async fn run(config: Config) -> Result<(), NodeError> {
    let match_config = MatchConfig::from_config(&config)?;
    let local = match_config.local_faction;
    let peers: Vec<SocketAddr> = match_config.peers.iter().map(|&(_, addr)| addr).collect();

    let mut transport = UdpTransport::bind(config.network.bind_socket_addr()?, udp_config(&config)).await?;
    for &peer in &peers {
        transport.connect(peer);
    }

    let factions = std::iter::once(local).chain(match_config.peers.iter().map(|&(f, _)| f));
    let mut world = ScriptedWorld::new(factions);
    let mut session = MatchSession::new(transport, match_config)?;
    let mut rng = StdRng::seed_from_u64(u64::from(local.0));

    let tick_rate = config.lockstep.tick_rate.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(1) / tick_rate);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut ticks: u64 = 0;

    tracing::info!("Node {local} running at {tick_rate} Hz with {} peers", peers.len());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => {
                tracing::info!("Ctrl-C received, leaving match");
                session.leave();
                // Give the transport a moment to flush the leave notice.
                tokio::time::sleep(Duration::from_millis(200)).await;
                break;
            }
        }

        ticks += 1;
        if ticks % ORDER_INTERVAL_TICKS == 0
            && !world.is_paused()
            && let Some(command) = scripted_order(&world, local, &mut rng)
        {
            session.issue(command)?;
        }

        if let TickOutcome::Committed(frame) = session.update(&mut world) {
            if frame % 100 == 0 {
                let stats = session.stats();
                tracing::info!(
                    "Frame {frame}: target {} ticks, {} stalls, {} peers live",
                    session.scheduler().target_ticks(),
                    stats.stalls,
                    session.live_peers().len()
                );
            }
            if !peers.is_empty() && session.live_peers().is_empty() {
                tracing::info!("No opponents left at frame {frame}, match over");
                break;
            }
        }
    }

    let stats = session.stats();
    tracing::info!(
        "Match ended at frame {}: {} frames committed, {} desyncs, {:?}",
        session.frame(),
        stats.committed_frames,
        stats.desyncs,
        session.channel_stats()
    );
    tracing::info!(
        "Factions standing: {:?}, world checksum {:#010x}",
        world.alive().collect::<Vec<_>>(),
        world.state_checksum()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config
        .debug
        .log_dir
        .clone()
        .unwrap_or_else(|| config_dir.join("logs"));
    skirmish_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
