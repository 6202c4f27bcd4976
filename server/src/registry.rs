//! Roster and snapshot fan-out for a single running game
//!
//! A [`GameRegistry`] knows which connections take part in one game and is
//! the only place snapshots are distributed from. It holds a weak handle to
//! every player's outbound queue: the queue belongs to the player's sender
//! worker, and a queue that has been dropped is simply forgotten at the next
//! broadcast.
//!
//! All roster state sits behind one mutex that is held for the duration of a
//! single method call, so admission, removal and broadcast never interleave.

use crate::queue::{CommandQueue, SnapshotQueue};
use log::{debug, info};
use shared::{GameSummary, PlayerId, PlayerInfo, PlayerInfoError, Snapshot, FIRST_PLAYER_ID};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("game is full")]
    Full,
    #[error("game has ended")]
    GameOver,
    #[error("invalid player info: {0}")]
    InvalidPlayer(#[from] PlayerInfoError),
}

#[derive(Debug)]
struct RosterEntry {
    id: PlayerId,
    info: PlayerInfo,
    queue: Weak<SnapshotQueue>,
}

#[derive(Debug)]
struct Roster {
    entries: Vec<RosterEntry>,
    /// Id handed to the next admitted player. Never reused within a game.
    /// Wider than `PlayerId` so the last id can still be handed out.
    next_id: u16,
    ended: bool,
}

impl Roster {
    fn prune_dead(&mut self) {
        self.entries.retain(|entry| entry.queue.strong_count() > 0);
    }

    fn broadcast(&mut self, snapshot: &Snapshot) -> usize {
        let mut delivered = 0;
        self.entries.retain(|entry| match entry.queue.upgrade() {
            Some(queue) => {
                if queue.push(snapshot.clone()).is_ok() {
                    delivered += 1;
                }
                true
            }
            None => {
                debug!("Dropping player {} with a released queue", entry.id);
                false
            }
        });
        delivered
    }
}

/// One game instance's players and their outbound queues.
#[derive(Debug)]
pub struct GameRegistry {
    name: String,
    max_players: u8,
    commands: Arc<CommandQueue>,
    roster: Mutex<Roster>,
}

impl GameRegistry {
    pub fn new(name: impl Into<String>, max_players: u8) -> Self {
        Self {
            name: name.into(),
            max_players,
            commands: Arc::new(CommandQueue::new()),
            roster: Mutex::new(Roster {
                entries: Vec::new(),
                next_id: u16::from(FIRST_PLAYER_ID),
                ended: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Roster> {
        self.roster
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_players(&self) -> u8 {
        self.max_players
    }

    /// The inbound command queue shared by every player of this game.
    pub fn commands(&self) -> Arc<CommandQueue> {
        Arc::clone(&self.commands)
    }

    /// Admits a player whose snapshots will be pushed to `queue`.
    pub fn add_player(
        &self,
        info: &PlayerInfo,
        queue: &Arc<SnapshotQueue>,
    ) -> Result<PlayerId, RegistryError> {
        info.validate()?;

        let mut roster = self.lock();
        if roster.ended {
            return Err(RegistryError::GameOver);
        }
        roster.prune_dead();
        if roster.entries.len() >= self.max_players as usize {
            return Err(RegistryError::Full);
        }
        // A game that has cycled through every id takes no one else.
        let id = PlayerId::try_from(roster.next_id).map_err(|_| RegistryError::Full)?;
        roster.next_id += 1;

        roster.entries.push(RosterEntry {
            id,
            info: info.clone(),
            queue: Arc::downgrade(queue),
        });
        info!(
            "Player {} ({}, {}) joined game {}",
            id,
            info.name,
            info.character.as_str(),
            self.name
        );
        Ok(id)
    }

    /// Forgets the player attached to `queue`. Unknown queues are ignored.
    pub fn remove_player(&self, queue: &Arc<SnapshotQueue>) -> Option<PlayerId> {
        let target = Arc::downgrade(queue);
        let mut roster = self.lock();
        let index = roster
            .entries
            .iter()
            .position(|entry| entry.queue.ptr_eq(&target))?;

        let entry = roster.entries.remove(index);
        info!("Player {} left game {}", entry.id, self.name);
        Some(entry.id)
    }

    /// Pushes `snapshot` to every registered queue and returns how many
    /// accepted it. Entries whose queue has been dropped are removed.
    pub fn broadcast(&self, snapshot: &Snapshot) -> usize {
        self.lock().broadcast(snapshot)
    }

    /// Ends the game and delivers `last` to every player, under one lock:
    /// a player admitted before the call receives `last`, any later
    /// admission fails with `GameOver`.
    pub fn finish(&self, last: &Snapshot) -> usize {
        let mut roster = self.lock();
        if !roster.ended {
            roster.ended = true;
            info!("Game {} ended", self.name);
        }
        roster.broadcast(last)
    }

    /// Marks the game as finished. Further admissions fail with `GameOver`.
    pub fn end_game(&self) {
        let mut roster = self.lock();
        if !roster.ended {
            roster.ended = true;
            info!("Game {} ended", self.name);
        }
    }

    /// Ends the game if it is over or has no live players left, and reports
    /// whether it is now ended. Checked and applied under one lock so a
    /// concurrent `add_player` either lands first or fails with `GameOver`.
    pub fn retire_if_ended(&self) -> bool {
        let mut roster = self.lock();
        roster.prune_dead();
        if roster.entries.is_empty() {
            roster.ended = true;
        }
        roster.ended
    }

    pub fn is_over(&self) -> bool {
        self.lock().ended
    }

    pub fn player_count(&self) -> usize {
        let mut roster = self.lock();
        roster.prune_dead();
        roster.entries.len()
    }

    pub fn is_full(&self) -> bool {
        self.player_count() >= self.max_players as usize
    }

    pub fn summary(&self) -> GameSummary {
        GameSummary {
            players: self.player_count().min(u8::MAX as usize) as u8,
            max_players: self.max_players,
        }
    }

    /// Copy of the current players in join order.
    pub fn roster(&self) -> Vec<(PlayerId, PlayerInfo)> {
        let mut roster = self.lock();
        roster.prune_dead();
        roster
            .entries
            .iter()
            .map(|entry| (entry.id, entry.info.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PlayableCharacter;

    fn jazz() -> PlayerInfo {
        PlayerInfo::new("jazz", PlayableCharacter::Jazz)
    }

    fn snapshot(tick: u32) -> Snapshot {
        Snapshot {
            tick,
            ..Snapshot::default()
        }
    }

    #[test]
    fn test_ids_start_at_first_player_id() {
        let registry = GameRegistry::new("g", 4);
        let q1 = Arc::new(SnapshotQueue::new());
        let q2 = Arc::new(SnapshotQueue::new());

        assert_eq!(registry.add_player(&jazz(), &q1), Ok(FIRST_PLAYER_ID));
        assert_eq!(registry.add_player(&jazz(), &q2), Ok(FIRST_PLAYER_ID + 1));
        assert_eq!(registry.player_count(), 2);
    }

    #[test]
    fn test_ids_are_not_reused_after_leave() {
        let registry = GameRegistry::new("g", 4);
        let q1 = Arc::new(SnapshotQueue::new());
        let q2 = Arc::new(SnapshotQueue::new());

        let first = registry.add_player(&jazz(), &q1).unwrap();
        registry.remove_player(&q1);
        let second = registry.add_player(&jazz(), &q2).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_broadcast_reaches_added_player() {
        let registry = GameRegistry::new("g", 4);
        let queue = Arc::new(SnapshotQueue::new());
        registry.add_player(&jazz(), &queue).unwrap();

        assert_eq!(registry.broadcast(&snapshot(7)), 1);
        assert_eq!(queue.try_pop(), Some(snapshot(7)));
    }

    #[test]
    fn test_removed_player_misses_broadcast() {
        let registry = GameRegistry::new("g", 4);
        let queue = Arc::new(SnapshotQueue::new());
        let id = registry.add_player(&jazz(), &queue).unwrap();

        assert_eq!(registry.remove_player(&queue), Some(id));
        assert_eq!(registry.broadcast(&snapshot(1)), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_unknown_queue_is_noop() {
        let registry = GameRegistry::new("g", 4);
        let member = Arc::new(SnapshotQueue::new());
        let stranger = Arc::new(SnapshotQueue::new());
        registry.add_player(&jazz(), &member).unwrap();

        assert_eq!(registry.remove_player(&stranger), None);
        assert_eq!(registry.remove_player(&stranger), None);
        assert_eq!(registry.player_count(), 1);
    }

    #[test]
    fn test_full_registry_reports_capacity() {
        let registry = GameRegistry::new("g", 1);
        let q1 = Arc::new(SnapshotQueue::new());
        let q2 = Arc::new(SnapshotQueue::new());

        registry.add_player(&jazz(), &q1).unwrap();
        assert!(registry.is_full());
        assert_eq!(registry.add_player(&jazz(), &q2), Err(RegistryError::Full));
        assert_eq!(registry.player_count(), 1);
    }

    #[test]
    fn test_invalid_player_never_enters_roster() {
        let registry = GameRegistry::new("g", 4);
        let queue = Arc::new(SnapshotQueue::new());

        let nameless = PlayerInfo::new("", PlayableCharacter::Lori);
        let no_character = PlayerInfo::new("lori", PlayableCharacter::NoneSelected);

        assert_eq!(
            registry.add_player(&nameless, &queue),
            Err(RegistryError::InvalidPlayer(PlayerInfoError::EmptyName))
        );
        assert_eq!(
            registry.add_player(&no_character, &queue),
            Err(RegistryError::InvalidPlayer(PlayerInfoError::NoCharacter))
        );
        assert!(registry.roster().is_empty());
    }

    #[test]
    fn test_dropped_queue_is_pruned_on_broadcast() {
        let registry = GameRegistry::new("g", 4);
        let kept = Arc::new(SnapshotQueue::new());
        let dropped = Arc::new(SnapshotQueue::new());
        registry.add_player(&jazz(), &kept).unwrap();
        registry.add_player(&jazz(), &dropped).unwrap();

        drop(dropped);
        assert_eq!(registry.broadcast(&snapshot(3)), 1);
        assert_eq!(registry.roster().len(), 1);
    }

    #[test]
    fn test_closed_queue_is_tolerated() {
        let registry = GameRegistry::new("g", 4);
        let queue = Arc::new(SnapshotQueue::new());
        registry.add_player(&jazz(), &queue).unwrap();

        queue.close();
        assert_eq!(registry.broadcast(&snapshot(3)), 0);
        assert_eq!(registry.player_count(), 1);
    }

    #[test]
    fn test_ended_game_rejects_players() {
        let registry = GameRegistry::new("g", 4);
        let queue = Arc::new(SnapshotQueue::new());

        registry.end_game();
        registry.end_game();
        assert!(registry.is_over());
        assert_eq!(
            registry.add_player(&jazz(), &queue),
            Err(RegistryError::GameOver)
        );
    }

    #[test]
    fn test_retire_when_everyone_left() {
        let registry = GameRegistry::new("g", 4);
        let queue = Arc::new(SnapshotQueue::new());
        registry.add_player(&jazz(), &queue).unwrap();

        assert!(!registry.retire_if_ended());
        registry.remove_player(&queue);
        assert!(registry.retire_if_ended());
        assert_eq!(
            registry.add_player(&jazz(), &queue),
            Err(RegistryError::GameOver)
        );
    }

    #[test]
    fn test_finish_delivers_last_snapshot_and_closes_admission() {
        let registry = GameRegistry::new("g", 4);
        let member = Arc::new(SnapshotQueue::new());
        let late = Arc::new(SnapshotQueue::new());
        registry.add_player(&jazz(), &member).unwrap();

        let last = Snapshot {
            tick: 9,
            game_over: true,
            players: Vec::new(),
        };
        assert_eq!(registry.finish(&last), 1);
        assert!(registry.is_over());
        assert_eq!(member.try_pop(), Some(last));
        assert_eq!(
            registry.add_player(&jazz(), &late),
            Err(RegistryError::GameOver)
        );
    }

    #[test]
    fn test_every_id_up_to_the_last_is_usable() {
        let registry = GameRegistry::new("g", 1);
        let queue = Arc::new(SnapshotQueue::new());

        for expected in FIRST_PLAYER_ID..=PlayerId::MAX {
            assert_eq!(registry.add_player(&jazz(), &queue), Ok(expected));
            registry.remove_player(&queue);
        }
        assert_eq!(registry.add_player(&jazz(), &queue), Err(RegistryError::Full));
    }

    #[test]
    fn test_summary_and_roster_copy() {
        let registry = GameRegistry::new("castle", 3);
        let queue = Arc::new(SnapshotQueue::new());
        let spaz = PlayerInfo::new("spaz", PlayableCharacter::Spaz);
        registry.add_player(&spaz, &queue).unwrap();

        assert_eq!(
            registry.summary(),
            GameSummary {
                players: 1,
                max_players: 3
            }
        );
        assert_eq!(registry.roster(), vec![(FIRST_PLAYER_ID, spaz)]);
        assert_eq!(registry.name(), "castle");
    }
}
