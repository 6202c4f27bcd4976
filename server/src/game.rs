//! Authoritative simulation for one game
//!
//! [`run_game_loop`] drives a single game at a fixed tick: it mirrors the
//! registry's roster into the world, applies queued client commands, steps
//! physics and broadcasts the resulting snapshot to every player.

use crate::registry::GameRegistry;
use log::{debug, info, warn};
use rand::Rng;
use shared::{
    Command, CommandCodeDto, PlayerId, PlayerInfo, PlayerState, Rect, Snapshot, FLOOR_Y, GRAVITY,
    JUMP_VELOCITY, MAX_HEALTH, PLAYER_SIZE, PLAYER_SPEED, SHOT_DAMAGE, SHOT_RANGE, WORLD_WIDTH,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

/// Ticks a player must wait between special moves.
pub const SPECIAL_COOLDOWN_TICKS: u32 = 30;

// Cap the maximum delta time to 50ms
const MAX_DELTA_TIME: f32 = 1.0 / 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameLoopSettings {
    pub tick_rate: u32,
    /// Zero means the match only ends when everyone leaves.
    pub match_duration: Duration,
}

impl GameLoopSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}

impl Default for GameLoopSettings {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            match_duration: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GameState {
    pub tick: u32,
    pub players: BTreeMap<PlayerId, PlayerState>,
    special_cooldowns: HashMap<PlayerId, u32>,
}

fn spawn_x() -> f32 {
    rand::thread_rng().gen_range(0.0..WORLD_WIDTH - PLAYER_SIZE)
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_player(&mut self, id: PlayerId, info: &PlayerInfo) {
        let player = PlayerState::new(
            id,
            info.name.clone(),
            info.character,
            spawn_x(),
            FLOOR_Y - PLAYER_SIZE,
        );
        info!("Spawned player {} at ({}, {})", id, player.x, player.y);
        self.players.insert(id, player);
    }

    pub fn remove_player(&mut self, id: PlayerId) {
        if self.players.remove(&id).is_some() {
            self.special_cooldowns.remove(&id);
            info!("Despawned player {}", id);
        }
    }

    /// Spawns newcomers and despawns players no longer in `roster`.
    pub fn sync_roster(&mut self, roster: &[(PlayerId, PlayerInfo)]) {
        let departed: Vec<PlayerId> = self
            .players
            .keys()
            .filter(|id| !roster.iter().any(|(rid, _)| rid == *id))
            .copied()
            .collect();
        for id in departed {
            self.remove_player(id);
        }

        for (id, info) in roster {
            if !self.players.contains_key(id) {
                self.add_player(*id, info);
            }
        }
    }

    pub fn apply_command(&mut self, dto: &CommandCodeDto) {
        let Some(player) = self.players.get_mut(&dto.player_id) else {
            debug!("Command from unknown player {}", dto.player_id);
            return;
        };

        match dto.command {
            Command::Idle => player.vel_x = 0.0,
            Command::MoveLeft => {
                player.vel_x = -PLAYER_SPEED;
                player.facing_left = true;
            }
            Command::MoveRight => {
                player.vel_x = PLAYER_SPEED;
                player.facing_left = false;
            }
            Command::Jump => {
                if player.on_ground {
                    player.vel_y = JUMP_VELOCITY;
                    player.on_ground = false;
                }
            }
            Command::Shoot => self.attack(dto.player_id, SHOT_RANGE, SHOT_DAMAGE),
            Command::Special => {
                let cooldown = self.special_cooldowns.get(&dto.player_id).copied();
                if cooldown.unwrap_or(0) > 0 {
                    return;
                }
                if let Some((damage, reach)) = player.character.special_move() {
                    self.special_cooldowns
                        .insert(dto.player_id, SPECIAL_COOLDOWN_TICKS);
                    self.attack(dto.player_id, reach, damage);
                }
            }
        }
    }

    /// Hits the closest player in front of `attacker` within `range`.
    fn attack(&mut self, attacker: PlayerId, range: f32, damage: u8) {
        let Some(source) = self.players.get(&attacker) else {
            return;
        };
        let hitbox = if source.facing_left {
            Rect::new(source.x - range, source.y, range, PLAYER_SIZE)
        } else {
            Rect::new(source.x + PLAYER_SIZE, source.y, range, PLAYER_SIZE)
        };
        let origin = source.center().0;

        let target = self
            .players
            .values()
            .filter(|p| p.id != attacker && p.bounds().intersects(&hitbox))
            .min_by(|a, b| {
                let da = (a.center().0 - origin).abs();
                let db = (b.center().0 - origin).abs();
                da.total_cmp(&db)
            })
            .map(|p| p.id);

        let Some(target) = target else {
            return;
        };
        let mut killed = false;
        if let Some(victim) = self.players.get_mut(&target) {
            victim.health = victim.health.saturating_sub(damage);
            if victim.health == 0 {
                killed = true;
                victim.health = MAX_HEALTH;
                victim.x = spawn_x();
                victim.y = FLOOR_Y - PLAYER_SIZE;
                victim.vel_x = 0.0;
                victim.vel_y = 0.0;
                victim.on_ground = true;
            }
        }
        if killed {
            if let Some(shooter) = self.players.get_mut(&attacker) {
                shooter.score += 1;
                info!("Player {} took down player {}", attacker, target);
            }
        }
    }

    pub fn update_physics(&mut self, dt: f32) {
        for player in self.players.values_mut() {
            if !player.on_ground {
                player.vel_y += GRAVITY * dt;
            }

            player.x += player.vel_x * dt;
            player.y += player.vel_y * dt;

            player.x = player.x.clamp(0.0, WORLD_WIDTH - PLAYER_SIZE);

            if player.y + PLAYER_SIZE >= FLOOR_Y {
                player.y = FLOOR_Y - PLAYER_SIZE;
                player.vel_y = 0.0;
                player.on_ground = true;
            }

            if player.y <= 0.0 {
                player.y = 0.0;
                player.vel_y = 0.0;
            }
        }
    }

    /// Advances the world by one tick of `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        self.tick = self.tick.wrapping_add(1);
        for cooldown in self.special_cooldowns.values_mut() {
            *cooldown = cooldown.saturating_sub(1);
        }
        self.update_physics(dt);
    }

    pub fn snapshot(&self, game_over: bool) -> Snapshot {
        Snapshot {
            tick: self.tick,
            game_over,
            players: self.players.values().cloned().collect(),
        }
    }
}

/// Runs one game until its match time is up, every player has left, or the
/// registry was ended elsewhere. The registry is ended together with the
/// final `game_over` broadcast, then the command queue is closed.
pub async fn run_game_loop(registry: Arc<GameRegistry>, settings: GameLoopSettings) {
    let commands = registry.commands();
    let mut state = GameState::new();

    let mut interval_timer = interval(settings.tick_interval());
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let mut last_update = started;

    info!(
        "Game {} running at {}Hz",
        registry.name(),
        settings.tick_rate
    );

    loop {
        interval_timer.tick().await;

        // Ended elsewhere, or everyone left; either way no one can join now
        if registry.retire_if_ended() {
            info!("Game {} was closed or has no players left", registry.name());
            break;
        }
        state.sync_roster(&registry.roster());

        let current_time = Instant::now();
        let mut delta_time = (current_time - last_update).as_secs_f32();
        last_update = current_time;
        if delta_time > MAX_DELTA_TIME {
            warn!(
                "Large delta time detected ({:.3}s), capping to {:.3}s",
                delta_time, MAX_DELTA_TIME
            );
            delta_time = MAX_DELTA_TIME;
        }

        while let Some(command) = commands.try_pop() {
            state.apply_command(&command);
        }
        state.advance(delta_time);
        registry.broadcast(&state.snapshot(false));

        if !settings.match_duration.is_zero() && started.elapsed() >= settings.match_duration {
            info!("Game {} reached its time limit", registry.name());
            break;
        }
    }

    registry.finish(&state.snapshot(true));
    commands.close();
}
