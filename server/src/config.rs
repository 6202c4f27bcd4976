//! Server configuration
//!
//! Command-line flags, each with an environment variable fallback, collected
//! into a [`ServerConfig`].

use crate::directory::GameDefaults;
use crate::game::GameLoopSettings;
use clap::Parser;
use shared::MAX_PLAYERS_PER_GAME;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, env = "LOBBY_HOST", default_value = "127.0.0.1")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, env = "LOBBY_PORT", default_value = "8080")]
    pub port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, env = "LOBBY_TICK_RATE", default_value = "30")]
    pub tick_rate: u32,
    /// Player slots for games created without an explicit size
    #[clap(short = 'm', long, env = "LOBBY_MAX_PLAYERS", default_value = "4")]
    pub max_players: u8,
    /// Match length in seconds, 0 for no limit
    #[clap(short = 'd', long, env = "LOBBY_MATCH_SECS", default_value = "300")]
    pub match_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tick_rate: u32,
    pub default_max_players: u8,
    pub match_duration: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tick_rate: 30,
            default_max_players: 4,
            match_duration: Duration::from_secs(300),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn game_defaults(&self) -> GameDefaults {
        GameDefaults {
            max_players: self.default_max_players,
        }
    }

    pub fn loop_settings(&self) -> GameLoopSettings {
        GameLoopSettings {
            tick_rate: self.tick_rate,
            match_duration: self.match_duration,
        }
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            tick_rate: args.tick_rate.max(1),
            default_max_players: args.max_players.clamp(1, MAX_PLAYERS_PER_GAME),
            match_duration: Duration::from_secs(args.match_secs),
        }
    }
}
