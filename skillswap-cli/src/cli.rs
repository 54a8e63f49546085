use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "skillswap")]
#[command(about = "Collaborative session notes: relay server and terminal client")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the topic relay
    Relay {
        /// Address to listen on (overrides SKILLSWAP_BIND_ADDR)
        #[arg(long, short = 'b', value_name = "ADDR")]
        bind: Option<String>,

        /// Connections allowed per document
        #[arg(long, value_name = "N")]
        max_peers: Option<usize>,
    },

    /// Open a session's notes and edit them from stdin
    Join {
        /// Learning session id
        #[arg(long, short = 's')]
        session: String,

        /// Relay URL (overrides SKILLSWAP_RELAY_URL)
        #[arg(long, value_name = "URL")]
        relay_url: Option<String>,

        /// Document REST API base URL; in-memory store when omitted
        #[arg(long, value_name = "URL")]
        store_url: Option<String>,

        /// Bearer token for the REST API and identity claims
        #[arg(long, env = "SKILLSWAP_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Display name; skips token-based identity
        #[arg(long, short = 'n')]
        name: Option<String>,

        /// User id to pair with --name
        #[arg(long, requires = "name")]
        user_id: Option<String>,
    },
}
