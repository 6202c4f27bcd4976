//! Outbound half of a client connection and owner of its lifecycle
//!
//! A [`SenderWorker`] is created for every accepted socket. It runs the
//! lobby (game list / registration), then spawns the matching
//! [`ReceiverWorker`] and streams snapshots from its own queue until the
//! connection dies, the game ends, or it is killed.
//!
//! Teardown always follows the same order: mark dead, shut the socket down
//! (which fails the receiver's blocked read), stop and join the receiver,
//! leave the game, close the snapshot queue.

use crate::directory::{DirectoryError, GamesDirectory, Registration};
use crate::protocol::{ProtocolError, ServerProtocol};
use crate::queue::{PopTimeoutError, SnapshotQueue};
use crate::receiver::{ReceiverHandle, ReceiverWorker};
use crate::registry::GameRegistry;
use log::{debug, error, info, warn};
use shared::{LobbyOption, PlayerInfoError, Snapshot};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// How long a streaming sender waits for a snapshot before checking whether
/// its game is still running.
const IDLE_CHECK: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("invalid player info: {0}")]
    InvalidPlayer(#[from] PlayerInfoError),
    #[error("failed to start worker: {0}")]
    Io(#[from] io::Error),
    #[error("worker thread panicked")]
    Panicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SenderState {
    Lobby = 0,
    AwaitingRegistration = 1,
    Streaming = 2,
    Terminated = 3,
}

impl SenderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SenderState::Lobby,
            1 => SenderState::AwaitingRegistration,
            2 => SenderState::Streaming,
            _ => SenderState::Terminated,
        }
    }
}

pub struct SenderWorker {
    protocol: ServerProtocol,
    directory: Arc<GamesDirectory>,
    queue: Arc<SnapshotQueue>,
    alive: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    receiver: Option<ReceiverHandle>,
    game: Option<Arc<GameRegistry>>,
    peer: String,
}

impl SenderWorker {
    pub fn new(stream: TcpStream, directory: Arc<GamesDirectory>) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());

        Self {
            protocol: ServerProtocol::new(stream),
            directory,
            queue: Arc::new(SnapshotQueue::new()),
            alive: Arc::new(AtomicBool::new(true)),
            state: Arc::new(AtomicU8::new(SenderState::Lobby as u8)),
            receiver: None,
            game: None,
            peer,
        }
    }

    /// Starts the worker on its own thread.
    pub fn spawn(self) -> io::Result<SenderHandle> {
        let handle_parts = (
            Arc::clone(&self.alive),
            Arc::clone(&self.queue),
            self.protocol.try_clone()?,
            Arc::clone(&self.state),
            self.protocol.peer_addr(),
        );
        let join = thread::Builder::new()
            .name(format!("sender-{}", self.peer))
            .spawn(move || self.run())?;

        let (alive, queue, transport, state, peer) = handle_parts;
        Ok(SenderHandle {
            alive,
            queue,
            transport,
            state,
            peer,
            join,
        })
    }

    /// Serves the connection to completion. Errors raised after the worker
    /// was killed are expected and reported as success.
    pub fn run(mut self) -> Result<(), WorkerError> {
        let result = self.serve();
        let killed = !self.alive.load(Ordering::Acquire);
        self.teardown();

        match result {
            Err(e) if killed => {
                debug!("Connection {} killed: {}", self.peer, e);
                Ok(())
            }
            Err(WorkerError::Protocol(e)) if e.is_disconnect() => {
                info!("Connection {} closed by client", self.peer);
                Ok(())
            }
            Err(e) => {
                error!("Connection {} failed: {}", self.peer, e);
                Err(e)
            }
            Ok(()) => {
                info!("Connection {} finished", self.peer);
                Ok(())
            }
        }
    }

    fn set_state(&self, state: SenderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn serve(&mut self) -> Result<(), WorkerError> {
        self.send_games_options()?;
        let registration = self.lobby_loop()?;
        self.start_streaming(registration)?;
        self.stream_snapshots()
    }

    fn send_games_options(&mut self) -> Result<(), WorkerError> {
        let games = self.directory.list_games();
        self.protocol.send_game_info(&games)?;
        Ok(())
    }

    fn lobby_loop(&mut self) -> Result<Registration, WorkerError> {
        loop {
            let code = self.protocol.get_lobby_option()?;
            match LobbyOption::try_from(code) {
                Ok(LobbyOption::ResendGameInfo) => self.send_games_options()?,
                Ok(LobbyOption::RegisterPlayer) => {
                    if let Some(registration) = self.register()? {
                        return Ok(registration);
                    }
                }
                Err(code) => warn!("Ignoring unknown lobby option {} from {}", code, self.peer),
            }
        }
    }

    /// `Ok(None)` sends the client back to the lobby.
    fn register(&mut self) -> Result<Option<Registration>, WorkerError> {
        self.set_state(SenderState::AwaitingRegistration);
        let info = self.protocol.get_player_info()?;
        info.validate()?;

        match self.directory.register_player(&info, &self.queue) {
            Ok(registration) => {
                self.game = Some(Arc::clone(&registration.game));
                self.protocol.send_player_id(registration.player_id)?;
                Ok(Some(registration))
            }
            Err(DirectoryError::GameFull(name)) => {
                warn!("{} could not join game {}: full", self.peer, name);
                self.protocol
                    .send_rejection(format!("game {} is full", name))?;
                self.set_state(SenderState::Lobby);
                Ok(None)
            }
            Err(DirectoryError::InvalidPlayer(e)) => Err(e.into()),
        }
    }

    fn start_streaming(&mut self, registration: Registration) -> Result<(), WorkerError> {
        self.set_state(SenderState::Streaming);
        let receiver = ReceiverWorker::new(
            self.protocol.try_clone()?,
            registration.commands,
            registration.player_id,
        )
        .with_outbound(Arc::clone(&self.queue))
        .spawn()?;
        self.receiver = Some(receiver);

        info!(
            "Connection {} streaming game {} as player {}",
            self.peer,
            registration.game.name(),
            registration.player_id
        );
        Ok(())
    }

    fn stream_snapshots(&mut self) -> Result<(), WorkerError> {
        while self.alive.load(Ordering::Acquire) {
            match self.queue.pop_timeout(IDLE_CHECK) {
                Ok(snapshot) => {
                    if self.send_snapshot(snapshot)? {
                        break;
                    }
                }
                Err(PopTimeoutError::Closed) => break,
                Err(PopTimeoutError::Timeout) => {
                    // A game ended without a final broadcast to us sends nothing more
                    if self.game.as_ref().is_some_and(|game| game.is_over()) {
                        while let Some(snapshot) = self.queue.try_pop() {
                            if self.send_snapshot(snapshot)? {
                                break;
                            }
                        }
                        debug!("Game over for {}, stopping stream", self.peer);
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Sends one snapshot; true when it was the game's last.
    fn send_snapshot(&mut self, snapshot: Snapshot) -> Result<bool, WorkerError> {
        let game_over = snapshot.game_over;
        self.protocol.send_snapshot(snapshot)?;
        if game_over {
            debug!("Sent final snapshot to {}", self.peer);
        }
        Ok(game_over)
    }

    fn teardown(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.set_state(SenderState::Terminated);
        self.protocol.shutdown();

        if let Some(receiver) = self.receiver.take() {
            receiver.stop();
            if let Err(e) = receiver.join() {
                warn!("Receiver for {} failed: {}", self.peer, e);
            }
        }
        if let Some(game) = self.game.take() {
            game.remove_player(&self.queue);
        }
        self.queue.close();
    }
}

/// Control handle for a running [`SenderWorker`].
#[derive(Debug)]
pub struct SenderHandle {
    alive: Arc<AtomicBool>,
    queue: Arc<SnapshotQueue>,
    transport: ServerProtocol,
    state: Arc<AtomicU8>,
    peer: Option<SocketAddr>,
    join: JoinHandle<Result<(), WorkerError>>,
}

impl SenderHandle {
    /// Forces the connection down from any thread. Idempotent.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::Release);
        self.queue.close();
        self.transport.shutdown();
    }

    pub fn state(&self) -> SenderState {
        SenderState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn join(self) -> Result<(), WorkerError> {
        self.join.join().unwrap_or(Err(WorkerError::Panicked))
    }
}
