//! Wire types and framing shared by the game server and its clients.
//!
//! Every message travels as a frame: a 4-byte big-endian payload length
//! followed by a bincode-encoded [`Packet`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use thiserror::Error;

pub const GRAVITY: f32 = 980.0;
pub const PLAYER_SPEED: f32 = 300.0;
pub const JUMP_VELOCITY: f32 = -400.0;
pub const FLOOR_Y: f32 = 550.0;
pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const PLAYER_SIZE: f32 = 32.0;
pub const MAX_HEALTH: u8 = 100;
pub const SHOT_RANGE: f32 = 300.0;
pub const SHOT_DAMAGE: u8 = 10;

/// Lobby option asking the server to send the game list again.
pub const RESEND_GAME_INFO: u8 = 1;
/// Lobby option announcing that a [`PlayerInfo`] follows.
pub const REGISTER_PLAYER: u8 = 2;

/// Upper bound on a single frame's payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
pub const MAX_NAME_LEN: usize = 32;
pub const MAX_PLAYERS_PER_GAME: u8 = 8;
pub const FIRST_PLAYER_ID: PlayerId = 1;

pub type PlayerId = u8;

/// Game name to slot summary, ordered by name.
pub type GameList = BTreeMap<String, GameSummary>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyOption {
    ResendGameInfo,
    RegisterPlayer,
}

impl TryFrom<u8> for LobbyOption {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            RESEND_GAME_INFO => Ok(LobbyOption::ResendGameInfo),
            REGISTER_PLAYER => Ok(LobbyOption::RegisterPlayer),
            other => Err(other),
        }
    }
}

impl From<LobbyOption> for u8 {
    fn from(option: LobbyOption) -> Self {
        match option {
            LobbyOption::ResendGameInfo => RESEND_GAME_INFO,
            LobbyOption::RegisterPlayer => REGISTER_PLAYER,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlayableCharacter {
    #[default]
    NoneSelected,
    Jazz,
    Spaz,
    Lori,
}

impl PlayableCharacter {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayableCharacter::NoneSelected => "none",
            PlayableCharacter::Jazz => "jazz",
            PlayableCharacter::Spaz => "spaz",
            PlayableCharacter::Lori => "lori",
        }
    }

    /// Damage and reach of the character's special move
    /// (uppercut, side kick and short kick respectively).
    pub fn special_move(&self) -> Option<(u8, f32)> {
        match self {
            PlayableCharacter::NoneSelected => None,
            PlayableCharacter::Jazz => Some((35, 48.0)),
            PlayableCharacter::Spaz => Some((30, 64.0)),
            PlayableCharacter::Lori => Some((25, 80.0)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlayerInfoError {
    #[error("player name is empty")]
    EmptyName,
    #[error("player name is {0} bytes long, the limit is 32")]
    NameTooLong(usize),
    #[error("no character selected")]
    NoCharacter,
}

/// Registration payload sent once per connection from the lobby.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct PlayerInfo {
    pub name: String,
    pub character: PlayableCharacter,
    /// Game to join or create; empty joins any game with room.
    pub game_name: String,
    /// Slots for a newly created game; 0 uses the server default.
    pub max_players: u8,
}

impl PlayerInfo {
    pub fn new(name: impl Into<String>, character: PlayableCharacter) -> Self {
        Self {
            name: name.into(),
            character,
            game_name: String::new(),
            max_players: 0,
        }
    }

    pub fn in_game(mut self, game_name: impl Into<String>) -> Self {
        self.game_name = game_name.into();
        self
    }

    pub fn validate(&self) -> Result<(), PlayerInfoError> {
        if self.name.trim().is_empty() {
            return Err(PlayerInfoError::EmptyName);
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(PlayerInfoError::NameTooLong(self.name.len()));
        }
        if self.character == PlayableCharacter::NoneSelected {
            return Err(PlayerInfoError::NoCharacter);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct GameSummary {
    pub players: u8,
    pub max_players: u8,
}

impl GameSummary {
    pub fn has_room(&self) -> bool {
        self.players < self.max_players
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Idle,
    MoveLeft,
    MoveRight,
    Jump,
    Shoot,
    Special,
}

/// A client command stamped with the id of the player that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandCodeDto {
    pub player_id: PlayerId,
    pub command: Command,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub id: PlayerId,
    pub name: String,
    pub character: PlayableCharacter,
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub facing_left: bool,
    pub on_ground: bool,
    pub health: u8,
    pub score: u32,
}

impl PlayerState {
    pub fn new(id: PlayerId, name: String, character: PlayableCharacter, x: f32, y: f32) -> Self {
        Self {
            id,
            name,
            character,
            x,
            y,
            vel_x: 0.0,
            vel_y: 0.0,
            facing_left: false,
            on_ground: true,
            health: MAX_HEALTH,
            score: 0,
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, PLAYER_SIZE, PLAYER_SIZE)
    }

    pub fn center(&self) -> (f32, f32) {
        self.bounds().center()
    }
}

/// One tick of authoritative game state.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub tick: u32,
    pub game_over: bool,
    pub players: Vec<PlayerState>,
}

/// Axis-aligned rectangle, top-left anchored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Touching edges do not count as an intersection.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.x + self.width <= other.x
            || other.x + other.width <= self.x
            || self.y + self.height <= other.y
            || other.y + other.height <= self.y)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client to server
    LobbyOption { option: u8 },
    Register(PlayerInfo),
    Command(Command),

    // Server to client
    GameList(GameList),
    PlayerId { player_id: PlayerId },
    Rejected { reason: String },
    Snapshot(Snapshot),
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::LobbyOption { .. } => "lobby option",
            Packet::Register(_) => "register",
            Packet::Command(_) => "command",
            Packet::GameList(_) => "game list",
            Packet::PlayerId { .. } => "player id",
            Packet::Rejected { .. } => "rejected",
            Packet::Snapshot(_) => "snapshot",
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed packet: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Encodes `packet` as a single frame and writes it in one call.
pub fn write_packet<W: Write>(writer: &mut W, packet: &Packet) -> Result<(), CodecError> {
    let payload = bincode::serialize(packet)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame. EOF before the length prefix is a clean close.
pub fn read_packet<R: Read>(reader: &mut R) -> Result<Packet, CodecError> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf) {
        return Err(match e.kind() {
            ErrorKind::UnexpectedEof => CodecError::ConnectionClosed,
            _ => CodecError::Io(e),
        });
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::io::Cursor;

    fn frame(packet: &Packet) -> Vec<u8> {
        let mut buf = Vec::new();
        write_packet(&mut buf, packet).unwrap();
        buf
    }

    #[test]
    fn test_lobby_option_codes() {
        assert_eq!(LobbyOption::try_from(1), Ok(LobbyOption::ResendGameInfo));
        assert_eq!(LobbyOption::try_from(2), Ok(LobbyOption::RegisterPlayer));
        assert_eq!(LobbyOption::try_from(7), Err(7));
        assert_eq!(u8::from(LobbyOption::RegisterPlayer), 2);
    }

    #[test]
    fn test_player_info_validation() {
        assert!(PlayerInfo::new("jazz", PlayableCharacter::Jazz)
            .validate()
            .is_ok());
        assert_eq!(
            PlayerInfo::new("", PlayableCharacter::Spaz).validate(),
            Err(PlayerInfoError::EmptyName)
        );
        assert_eq!(
            PlayerInfo::new("   ", PlayableCharacter::Spaz).validate(),
            Err(PlayerInfoError::EmptyName)
        );
        assert_eq!(
            PlayerInfo::new("lori", PlayableCharacter::NoneSelected).validate(),
            Err(PlayerInfoError::NoCharacter)
        );
        assert_eq!(
            PlayerInfo::new("x".repeat(33), PlayableCharacter::Lori).validate(),
            Err(PlayerInfoError::NameTooLong(33))
        );
    }

    #[test]
    fn test_each_character_has_its_own_special() {
        let jazz = PlayableCharacter::Jazz.special_move().unwrap();
        let spaz = PlayableCharacter::Spaz.special_move().unwrap();
        let lori = PlayableCharacter::Lori.special_move().unwrap();

        assert_ne!(jazz, spaz);
        assert_ne!(spaz, lori);
        assert!(PlayableCharacter::NoneSelected.special_move().is_none());
    }

    #[test]
    fn test_frame_layout() {
        let packet = Packet::LobbyOption {
            option: REGISTER_PLAYER,
        };
        let buf = frame(&packet);

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);

        let decoded = read_packet(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_consecutive_frames_are_read_in_order() {
        let mut buf = frame(&Packet::Command(Command::Jump));
        buf.extend(frame(&Packet::Command(Command::Shoot)));

        let mut reader = Cursor::new(buf);
        assert_eq!(
            read_packet(&mut reader).unwrap(),
            Packet::Command(Command::Jump)
        );
        assert_eq!(
            read_packet(&mut reader).unwrap(),
            Packet::Command(Command::Shoot)
        );
        assert!(matches!(
            read_packet(&mut reader),
            Err(CodecError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 16]);

        match read_packet(&mut Cursor::new(buf)) {
            Err(CodecError::FrameTooLarge(len)) => assert_eq!(len, MAX_FRAME_LEN + 1),
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_frame_is_io_error() {
        let buf = frame(&Packet::Rejected {
            reason: "game is full".to_string(),
        });
        let truncated = buf[..buf.len() - 3].to_vec();

        assert!(matches!(
            read_packet(&mut Cursor::new(truncated)),
            Err(CodecError::Io(_))
        ));
    }

    #[test]
    fn test_garbage_payload_is_malformed() {
        let mut buf = 4u32.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);

        assert!(matches!(
            read_packet(&mut Cursor::new(buf)),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_rect_intersection() {
        let a = Rect::new(0.0, 0.0, 32.0, 32.0);
        let b = Rect::new(16.0, 16.0, 32.0, 32.0);
        let touching = Rect::new(32.0, 0.0, 32.0, 32.0);
        let far = Rect::new(100.0, 100.0, 32.0, 32.0);

        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&touching));
        assert!(!a.intersects(&far));
    }

    #[test]
    fn test_player_state_center() {
        let player = PlayerState::new(1, "spaz".into(), PlayableCharacter::Spaz, 100.0, 200.0);
        let (cx, cy) = player.center();

        assert_approx_eq!(cx, 100.0 + PLAYER_SIZE / 2.0);
        assert_approx_eq!(cy, 200.0 + PLAYER_SIZE / 2.0);
        assert_eq!(player.health, MAX_HEALTH);
    }

    #[test]
    fn test_game_summary_room() {
        assert!(GameSummary {
            players: 1,
            max_players: 2
        }
        .has_room());
        assert!(!GameSummary {
            players: 2,
            max_players: 2
        }
        .has_room());
    }
}
