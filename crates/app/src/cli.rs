//! Command line definition

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(about = "Leaderless quorum coordination for multiplayer rooms")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to huddle.toml in the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a hub serving the room store and presence channels
    Hub {
        /// Address to listen on
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// SQLite database file
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Create a room
    Create {
        room: String,

        /// Players required before the room starts
        #[arg(long)]
        players: u32,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        subtitle: Option<String>,

        #[arg(long)]
        rules: Option<String>,

        #[command(flatten)]
        hub: HubArgs,
    },

    /// Put a room back into waiting
    Reset {
        room: String,

        #[command(flatten)]
        hub: HubArgs,
    },

    /// Print a room record
    Show {
        room: String,

        #[command(flatten)]
        hub: HubArgs,
    },

    /// List all rooms
    List {
        #[command(flatten)]
        hub: HubArgs,
    },

    /// Join a room and follow its phases until Ctrl-C
    Join {
        room: String,

        /// Client identity (random if omitted)
        #[arg(long)]
        id: Option<String>,

        #[command(flatten)]
        hub: HubArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct HubArgs {
    /// Hub address (defaults to `[hub] bind` from the config)
    #[arg(long)]
    pub hub: Option<SocketAddr>,
}

impl HubArgs {
    pub fn resolve(&self, config_bind: SocketAddr) -> SocketAddr {
        self.hub.unwrap_or(config_bind)
    }
}
