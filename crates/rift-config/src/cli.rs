//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Rift command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "rift", about = "Rift multiplayer session")]
pub struct CliArgs {
    /// Server address to connect to.
    #[arg(long)]
    pub server: Option<String>,

    /// Stream listener / connection port.
    #[arg(long)]
    pub tcp_port: Option<u16>,

    /// Datagram socket port (0 = ephemeral).
    #[arg(long)]
    pub udp_port: Option<u16>,

    /// Maximum players when hosting.
    #[arg(long)]
    pub max_players: Option<u32>,

    /// Player name sent to the server.
    #[arg(long)]
    pub name: Option<String>,

    /// Attempt automatic port forwarding when hosting.
    #[arg(long)]
    pub upnp: Option<bool>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides the default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Applies CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(server) = &args.server {
            self.network.server_address = server.clone();
        }
        if let Some(tcp_port) = args.tcp_port {
            self.network.tcp_port = tcp_port;
        }
        if let Some(udp_port) = args.udp_port {
            self.network.udp_port = udp_port;
        }
        if let Some(max_players) = args.max_players {
            self.network.max_players = max_players;
        }
        if let Some(name) = &args.name {
            self.network.player_name = name.clone();
        }
        if let Some(upnp) = args.upnp {
            self.network.use_upnp = upnp;
        }
        if let Some(log_level) = &args.log_level {
            self.debug.log_level = log_level.clone();
        }
    }
}
