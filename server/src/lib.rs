//! # Game Lobby Server Library
//!
//! This library provides the lobby and session layer of the multiplayer game
//! server. It accepts TCP connections, lets each client browse the running
//! games and register a player, then keeps the client and its game connected
//! for the rest of the session.
//!
//! ## Core Responsibilities
//!
//! ### Lobby
//! A freshly connected client receives the list of running games. It can ask
//! for the list again or register a player, either into a named game (joined
//! or created on demand) or into whichever game still has room.
//!
//! ### Session Workers
//! Every connection is served by two threads:
//! - a sender that runs the lobby and then streams game snapshots
//! - a receiver that forwards the client's commands to its game
//!
//! Either side going away tears the pair down, and the player leaves the game.
//!
//! ### Game Registries
//! Each game keeps its own roster and command queue. Rosters refer to player
//! queues weakly, so a vanished connection never keeps its queue alive and is
//! silently dropped from broadcasts.
//!
//! ### Simulation
//! Every game is ticked by its own task on the tokio runtime. The task only
//! uses non-blocking queue operations, so a slow client can never stall a
//! tick.
//!
//! ## Lock Discipline
//! The directory lock and a registry lock are never held at the same time, and
//! no lock is held across socket I/O or a blocking queue pop.

pub mod acceptor;
pub mod config;
pub mod directory;
pub mod game;
pub mod protocol;
pub mod queue;
pub mod receiver;
pub mod registry;
pub mod sender;
