//! Listening socket and owner of every connection worker
//!
//! The acceptor hands each accepted stream to its own [`SenderWorker`] and
//! keeps the handles so finished workers can be joined and, on shutdown,
//! live ones killed. No worker thread outlives [`Acceptor::run`].

use crate::directory::GamesDirectory;
use crate::sender::{SenderHandle, SenderWorker};
use log::{debug, error, info, warn};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Acceptor {
    listener: TcpListener,
    directory: Arc<GamesDirectory>,
    stopped: Arc<AtomicBool>,
    workers: Vec<SenderHandle>,
}

impl Acceptor {
    pub fn bind<A: ToSocketAddrs>(addr: A, directory: Arc<GamesDirectory>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            directory,
            stopped: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stop_handle(&self) -> io::Result<AcceptorStop> {
        Ok(AcceptorStop {
            stopped: Arc::clone(&self.stopped),
            addr: self.local_addr()?,
        })
    }

    /// Accepts connections until stopped, then kills and joins every worker.
    pub fn run(mut self) -> io::Result<()> {
        while !self.stopped.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.stopped.load(Ordering::Acquire) {
                        break;
                    }
                    self.reap_finished();
                    self.start_worker(stream, addr);
                }
                Err(e) => {
                    if self.stopped.load(Ordering::Acquire) {
                        break;
                    }
                    warn!("Failed to accept connection: {}", e);
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }

        info!("Acceptor stopping, closing {} connection(s)", self.workers.len());
        self.shutdown_workers();
        Ok(())
    }

    fn start_worker(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not disable Nagle for {}: {}", addr, e);
        }
        info!("Accepted connection from {}", addr);

        match SenderWorker::new(stream, Arc::clone(&self.directory)).spawn() {
            Ok(handle) => self.workers.push(handle),
            Err(e) => error!("Failed to start worker for {}: {}", addr, e),
        }
    }

    /// Joins workers whose thread has already returned.
    fn reap_finished(&mut self) {
        let (finished, live): (Vec<_>, Vec<_>) = self
            .workers
            .drain(..)
            .partition(|handle| handle.is_finished());
        self.workers = live;

        for handle in finished {
            join_worker(handle);
        }
    }

    fn shutdown_workers(&mut self) {
        for handle in &self.workers {
            handle.kill();
        }
        for handle in self.workers.drain(..) {
            join_worker(handle);
        }
    }
}

fn join_worker(handle: SenderHandle) {
    let peer = handle
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown peer".to_string());
    match handle.join() {
        Ok(()) => debug!("Worker for {} joined", peer),
        Err(e) => error!("Worker for {} ended with error: {}", peer, e),
    }
}

/// Stops a running [`Acceptor`] from another thread.
#[derive(Debug, Clone)]
pub struct AcceptorStop {
    stopped: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl AcceptorStop {
    /// Sets the stop flag and wakes the blocked `accept` with a throwaway
    /// connection. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut wake_addr = self.addr;
        if wake_addr.ip().is_unspecified() {
            let loopback = match wake_addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            };
            wake_addr.set_ip(loopback);
        }
        if let Err(e) = TcpStream::connect_timeout(&wake_addr, WAKE_TIMEOUT) {
            debug!("Wake-up connection to {} failed: {}", wake_addr, e);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
