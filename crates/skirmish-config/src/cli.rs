//! Command-line argument parsing for Skirmish nodes.

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, PeerConfig};

/// Skirmish node command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "skirmish-node", about = "Headless lockstep match node")]
pub struct CliArgs {
    /// Local UDP port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Faction played by this node.
    #[arg(long)]
    pub faction: Option<u8>,

    /// Remote peer as `faction@host:port`. Repeatable; replaces configured peers.
    #[arg(long = "peer", value_parser = parse_peer)]
    pub peers: Vec<PeerConfig>,

    /// Force-forfeit peers after this many stalled ticks.
    #[arg(long)]
    pub stall_forfeit_ticks: Option<u32>,

    /// Enable or disable checksum verification.
    #[arg(long)]
    pub verify_checksums: Option<bool>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn parse_peer(value: &str) -> Result<PeerConfig, String> {
    let (faction, address) = value
        .split_once('@')
        .ok_or_else(|| format!("expected faction@host:port, got '{value}'"))?;
    let faction = faction
        .parse()
        .map_err(|e| format!("bad faction '{faction}': {e}"))?;
    Ok(PeerConfig {
        faction,
        address: address.to_string(),
    })
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(faction) = args.faction {
            self.network.local_faction = faction;
        }
        if !args.peers.is_empty() {
            self.network.peers = args.peers.clone();
        }
        if let Some(ticks) = args.stall_forfeit_ticks {
            self.lockstep.stall_forfeit_ticks = Some(ticks);
        }
        if let Some(verify) = args.verify_checksums {
            self.lockstep.verify_checksums = verify;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_args() -> CliArgs {
        CliArgs {
            port: None,
            faction: None,
            peers: Vec::new(),
            stall_forfeit_ticks: None,
            verify_checksums: None,
            log_level: None,
            config: None,
        }
    }

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            port: Some(5001),
            faction: Some(2),
            ..empty_args()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.port, 5001);
        assert_eq!(config.network.local_faction, 2);
        assert_eq!(config.lockstep.default_ticks_per_frame, 6);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&empty_args());
        assert_eq!(config, original);
    }

    #[test]
    fn test_peer_flag_parses() {
        let args = CliArgs::parse_from([
            "skirmish-node",
            "--peer",
            "2@127.0.0.1:5002",
            "--peer",
            "3@127.0.0.1:5003",
        ]);
        assert_eq!(args.peers.len(), 2);
        assert_eq!(args.peers[1].faction, 3);
        assert_eq!(args.peers[1].address, "127.0.0.1:5003");
    }

    #[test]
    fn test_malformed_peer_flag_rejected() {
        let result = CliArgs::try_parse_from(["skirmish-node", "--peer", "127.0.0.1:5002"]);
        assert!(result.is_err());
    }
}
