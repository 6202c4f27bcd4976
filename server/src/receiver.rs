//! Inbound half of a game session
//!
//! Reads commands from the client and hands them to the game's command
//! queue, stamped with the sender's player id. Runs on its own thread so a
//! silent client never holds up the outbound snapshot stream.

use crate::protocol::ServerProtocol;
use crate::queue::{CommandQueue, SnapshotQueue};
use crate::sender::WorkerError;
use log::{debug, info};
use shared::{CommandCodeDto, PlayerId};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct ReceiverWorker {
    protocol: ServerProtocol,
    commands: Arc<CommandQueue>,
    player_id: PlayerId,
    running: Arc<AtomicBool>,
    outbound: Option<Arc<SnapshotQueue>>,
}

impl ReceiverWorker {
    pub fn new(protocol: ServerProtocol, commands: Arc<CommandQueue>, player_id: PlayerId) -> Self {
        Self {
            protocol,
            commands,
            player_id,
            running: Arc::new(AtomicBool::new(true)),
            outbound: None,
        }
    }

    /// Closes `queue` when the client side of the connection goes away, so
    /// the sender parked on it wakes up instead of waiting for the next tick.
    pub fn with_outbound(mut self, queue: Arc<SnapshotQueue>) -> Self {
        self.outbound = Some(queue);
        self
    }

    /// Starts the worker on a dedicated thread.
    pub fn spawn(self) -> io::Result<ReceiverHandle> {
        let running = Arc::clone(&self.running);
        let join = thread::Builder::new()
            .name(format!("receiver-{}", self.player_id))
            .spawn(move || self.run())?;
        Ok(ReceiverHandle { running, join })
    }

    /// Read loop. A read failure after `stop()` is a normal exit.
    pub fn run(mut self) -> Result<(), WorkerError> {
        while self.running.load(Ordering::Acquire) {
            let command = match self.protocol.get_command() {
                Ok(command) => command,
                Err(e) => {
                    let stopped = !self.running.load(Ordering::Acquire);
                    if !stopped {
                        if let Some(outbound) = &self.outbound {
                            outbound.close();
                        }
                    }
                    if stopped || e.is_disconnect() {
                        debug!("Receiver for player {} closing: {}", self.player_id, e);
                        return Ok(());
                    }
                    return Err(e.into());
                }
            };

            let dto = CommandCodeDto {
                player_id: self.player_id,
                command,
            };
            // The game is over. Outbound stays open: it may still hold the final
            // snapshot, and the sender stops by itself once the game has ended.
            if self.commands.push(dto).is_err() {
                info!(
                    "Command queue closed, receiver for player {} exiting",
                    self.player_id
                );
                break;
            }
        }
        Ok(())
    }
}

/// Owner's side of a running receiver.
#[derive(Debug)]
pub struct ReceiverHandle {
    running: Arc<AtomicBool>,
    join: JoinHandle<Result<(), WorkerError>>,
}

impl ReceiverHandle {
    /// Asks the worker to stop after its current read. Pair with a socket
    /// shutdown to interrupt a read that is already blocked.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn join(self) -> Result<(), WorkerError> {
        self.join.join().unwrap_or(Err(WorkerError::Panicked))
    }
}
