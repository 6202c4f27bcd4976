//! Request/response layer over a client's TCP connection
//!
//! Wraps the shared frame codec with the handful of exchanges the lobby and
//! the game session need. Every call blocks; any failure is a
//! [`ProtocolError`], which the workers treat as fatal for the connection.

use log::debug;
use shared::{
    read_packet, write_packet, CodecError, Command, GameList, Packet, PlayerId, PlayerInfo,
    Snapshot,
};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("expected {expected} packet, received {found}")]
    Unexpected {
        expected: &'static str,
        found: &'static str,
    },
}

impl ProtocolError {
    /// True when the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Codec(CodecError::ConnectionClosed) => true,
            ProtocolError::Codec(CodecError::Io(e)) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Server side of one client connection.
#[derive(Debug)]
pub struct ServerProtocol {
    stream: TcpStream,
}

impl ServerProtocol {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// A second handle on the same socket, for the receiving worker.
    /// Shutting down either handle shuts down both.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            stream: self.stream.try_clone()?,
        })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn send(&mut self, packet: &Packet) -> Result<(), ProtocolError> {
        write_packet(&mut self.stream, packet)?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Packet, ProtocolError> {
        let packet = read_packet(&mut self.stream)?;
        debug!("Received {} packet", packet.kind());
        Ok(packet)
    }

    /// Raw lobby option code; validation is left to the caller.
    pub fn get_lobby_option(&mut self) -> Result<u8, ProtocolError> {
        match self.receive()? {
            Packet::LobbyOption { option } => Ok(option),
            other => Err(ProtocolError::Unexpected {
                expected: "lobby option",
                found: other.kind(),
            }),
        }
    }

    pub fn get_player_info(&mut self) -> Result<PlayerInfo, ProtocolError> {
        match self.receive()? {
            Packet::Register(info) => Ok(info),
            other => Err(ProtocolError::Unexpected {
                expected: "register",
                found: other.kind(),
            }),
        }
    }

    pub fn get_command(&mut self) -> Result<Command, ProtocolError> {
        match self.receive()? {
            Packet::Command(command) => Ok(command),
            other => Err(ProtocolError::Unexpected {
                expected: "command",
                found: other.kind(),
            }),
        }
    }

    pub fn send_game_info(&mut self, games: &GameList) -> Result<(), ProtocolError> {
        self.send(&Packet::GameList(games.clone()))
    }

    pub fn send_player_id(&mut self, player_id: PlayerId) -> Result<(), ProtocolError> {
        self.send(&Packet::PlayerId { player_id })
    }

    pub fn send_rejection(&mut self, reason: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(&Packet::Rejected {
            reason: reason.into(),
        })
    }

    /// Takes the snapshot by value; each connection already owns its copy.
    pub fn send_snapshot(&mut self, snapshot: Snapshot) -> Result<(), ProtocolError> {
        self.send(&Packet::Snapshot(snapshot))
    }

    /// Shuts down both directions, failing any blocked read or write on
    /// every handle of this socket. Already-closed sockets are fine.
    pub fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!("Socket shutdown failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{PlayableCharacter, REGISTER_PLAYER};
    use std::net::TcpListener;
    use std::thread;
    use tokio_test::{assert_err, assert_ok};

    fn connected_pair() -> (ServerProtocol, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (ServerProtocol::new(server), client)
    }

    #[test]
    fn test_lobby_option_and_player_info() {
        let (mut server, mut client) = connected_pair();
        let info = PlayerInfo::new("jazz", PlayableCharacter::Jazz);

        write_packet(
            &mut client,
            &Packet::LobbyOption {
                option: REGISTER_PLAYER,
            },
        )
        .unwrap();
        write_packet(&mut client, &Packet::Register(info.clone())).unwrap();

        assert_eq!(assert_ok!(server.get_lobby_option()), REGISTER_PLAYER);
        assert_eq!(assert_ok!(server.get_player_info()), info);
    }

    #[test]
    fn test_unexpected_packet_is_an_error() {
        let (mut server, mut client) = connected_pair();
        write_packet(&mut client, &Packet::Command(Command::Jump)).unwrap();

        let err = assert_err!(server.get_player_info());
        assert!(matches!(
            err,
            ProtocolError::Unexpected {
                expected: "register",
                found: "command"
            }
        ));
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_outbound_messages_reach_client() {
        let (mut server, mut client) = connected_pair();

        assert_ok!(server.send_player_id(3));
        assert_ok!(server.send_rejection("game castle is full"));

        assert_eq!(
            read_packet(&mut client).unwrap(),
            Packet::PlayerId { player_id: 3 }
        );
        assert!(matches!(
            read_packet(&mut client).unwrap(),
            Packet::Rejected { .. }
        ));
    }

    #[test]
    fn test_snapshot_reaches_client() {
        let (mut server, mut client) = connected_pair();
        let snapshot = Snapshot {
            tick: 12,
            game_over: true,
            players: Vec::new(),
        };

        assert_ok!(server.send_snapshot(snapshot.clone()));
        assert_eq!(read_packet(&mut client).unwrap(), Packet::Snapshot(snapshot));
    }

    #[test]
    fn test_peer_close_is_a_disconnect() {
        let (mut server, client) = connected_pair();
        drop(client);

        let err = assert_err!(server.get_command());
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_shutdown_unblocks_reader_on_clone() {
        let (server, _client) = connected_pair();
        let mut reader = server.try_clone().unwrap();

        let blocked = thread::spawn(move || reader.get_command());
        thread::sleep(std::time::Duration::from_millis(20));
        server.shutdown();

        assert!(blocked.join().unwrap().is_err());
    }
}
