//! Process-wide directory of running games
//!
//! The directory answers lobby queries, places registering players into a
//! game (creating one when needed) and evicts games that have ended. Ended
//! games are pruned lazily, every time the lobby asks for the game list.
//!
//! The directory lock and a registry lock are never held together: registry
//! handles are copied out under the directory lock and used after it has been
//! released.

use crate::queue::{CommandQueue, SnapshotQueue};
use crate::registry::{GameRegistry, RegistryError};
use log::{debug, info};
use shared::{GameList, PlayerId, PlayerInfo, PlayerInfoError, MAX_PLAYERS_PER_GAME};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("invalid player info: {0}")]
    InvalidPlayer(#[from] PlayerInfoError),
    #[error("game {0} is full or has ended")]
    GameFull(String),
}

/// Settings applied to games the directory creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameDefaults {
    pub max_players: u8,
}

impl Default for GameDefaults {
    fn default() -> Self {
        Self { max_players: 4 }
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub player_id: PlayerId,
    pub commands: Arc<CommandQueue>,
    pub game: Arc<GameRegistry>,
}

type Launcher = Box<dyn Fn(Arc<GameRegistry>) + Send + Sync>;

struct Games {
    by_name: BTreeMap<String, Arc<GameRegistry>>,
    next_auto_name: u64,
}

pub struct GamesDirectory {
    defaults: GameDefaults,
    games: Mutex<Games>,
    launcher: Option<Launcher>,
}

impl fmt::Debug for GamesDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GamesDirectory")
            .field("defaults", &self.defaults)
            .field("games", &self.lock().by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GamesDirectory {
    pub fn new(defaults: GameDefaults) -> Self {
        Self {
            defaults,
            games: Mutex::new(Games {
                by_name: BTreeMap::new(),
                next_auto_name: 1,
            }),
            launcher: None,
        }
    }

    /// Like [`new`](Self::new), with `launcher` called once for every game
    /// this directory creates, right after its first player was admitted.
    pub fn with_launcher<F>(defaults: GameDefaults, launcher: F) -> Self
    where
        F: Fn(Arc<GameRegistry>) + Send + Sync + 'static,
    {
        Self {
            launcher: Some(Box::new(launcher)),
            ..Self::new(defaults)
        }
    }

    fn lock(&self) -> MutexGuard<'_, Games> {
        self.games
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot_games(&self) -> Vec<Arc<GameRegistry>> {
        self.lock().by_name.values().cloned().collect()
    }

    /// Lists the games that are still running, after pruning ended ones.
    pub fn list_games(&self) -> GameList {
        self.remove_ended_games();
        self.snapshot_games()
            .into_iter()
            .filter(|game| !game.is_over())
            .map(|game| (game.name().to_string(), game.summary()))
            .collect()
    }

    /// Places the player in a game and returns its id and the game's
    /// command queue.
    pub fn register_player(
        &self,
        info: &PlayerInfo,
        queue: &Arc<SnapshotQueue>,
    ) -> Result<Registration, DirectoryError> {
        info.validate()?;

        if info.game_name.is_empty() {
            self.join_any(info, queue)
        } else {
            self.join_named(info, queue)
        }
    }

    fn join_named(
        &self,
        info: &PlayerInfo,
        queue: &Arc<SnapshotQueue>,
    ) -> Result<Registration, DirectoryError> {
        loop {
            let existing = self.get_game(&info.game_name);
            match existing {
                Some(game) => {
                    return match game.add_player(info, queue) {
                        Ok(player_id) => Ok(registration(player_id, game)),
                        Err(RegistryError::InvalidPlayer(e)) => Err(e.into()),
                        Err(RegistryError::Full) | Err(RegistryError::GameOver) => {
                            Err(DirectoryError::GameFull(info.game_name.clone()))
                        }
                    };
                }
                None => {
                    let max_players = self.slots_for(info);
                    if let Some(registration) =
                        self.create_game(info.game_name.clone(), max_players, info, queue)?
                    {
                        return Ok(registration);
                    }
                    // Somebody published a game with this name first; join that one.
                }
            }
        }
    }

    fn join_any(
        &self,
        info: &PlayerInfo,
        queue: &Arc<SnapshotQueue>,
    ) -> Result<Registration, DirectoryError> {
        for game in self.snapshot_games() {
            if game.is_full() {
                continue;
            }
            match game.add_player(info, queue) {
                Ok(player_id) => return Ok(registration(player_id, game)),
                Err(RegistryError::InvalidPlayer(e)) => return Err(e.into()),
                Err(e) => debug!("Skipping game {}: {}", game.name(), e),
            }
        }

        loop {
            let name = self.next_auto_name();
            let max_players = self.slots_for(info);
            if let Some(registration) = self.create_game(name, max_players, info, queue)? {
                return Ok(registration);
            }
        }
    }

    fn next_auto_name(&self) -> String {
        let mut games = self.lock();
        loop {
            let name = format!("game-{}", games.next_auto_name);
            games.next_auto_name += 1;
            if !games.by_name.contains_key(&name) {
                return name;
            }
        }
    }

    fn slots_for(&self, info: &PlayerInfo) -> u8 {
        match info.max_players {
            0 => self.defaults.max_players,
            requested => requested.min(MAX_PLAYERS_PER_GAME),
        }
    }

    /// Creates a game with its first player already admitted and publishes
    /// it. Returns `None` if the name was taken in the meantime.
    fn create_game(
        &self,
        name: String,
        max_players: u8,
        info: &PlayerInfo,
        queue: &Arc<SnapshotQueue>,
    ) -> Result<Option<Registration>, DirectoryError> {
        let game = Arc::new(GameRegistry::new(name.clone(), max_players.max(1)));
        let player_id = match game.add_player(info, queue) {
            Ok(player_id) => player_id,
            Err(RegistryError::InvalidPlayer(e)) => return Err(e.into()),
            Err(_) => return Err(DirectoryError::GameFull(name)),
        };

        {
            let mut games = self.lock();
            if games.by_name.contains_key(&name) {
                return Ok(None);
            }
            games.by_name.insert(name.clone(), Arc::clone(&game));
        }
        info!("Created game {} with {} slots", name, game.max_players());

        if let Some(launcher) = &self.launcher {
            launcher(Arc::clone(&game));
        }
        Ok(Some(registration(player_id, game)))
    }

    /// Evicts every game that has ended or has no players left, returning
    /// the names of the evicted games.
    pub fn remove_ended_games(&self) -> Vec<String> {
        let ended: Vec<Arc<GameRegistry>> = self
            .snapshot_games()
            .into_iter()
            .filter(|game| game.retire_if_ended())
            .collect();
        if ended.is_empty() {
            return Vec::new();
        }

        let mut games = self.lock();
        let mut removed = Vec::with_capacity(ended.len());
        for game in ended {
            let same_game = games
                .by_name
                .get(game.name())
                .is_some_and(|current| Arc::ptr_eq(current, &game));
            if same_game {
                games.by_name.remove(game.name());
                info!("Removed ended game {}", game.name());
                removed.push(game.name().to_string());
            }
        }
        removed
    }

    pub fn get_game(&self, name: &str) -> Option<Arc<GameRegistry>> {
        self.lock().by_name.get(name).cloned()
    }

    pub fn game_count(&self) -> usize {
        self.lock().by_name.len()
    }
}

fn registration(player_id: PlayerId, game: Arc<GameRegistry>) -> Registration {
    Registration {
        player_id,
        commands: game.commands(),
        game,
    }
}
