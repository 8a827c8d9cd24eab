//! Child-side rendezvous: bind, advertise, accept one parent, stream
//!
//! ```text
//!   Idle ──start──▶ Binding ──bound──▶ Advertising ──▶ AwaitingConnection
//!                    ▲  │ bind failed                        │ accepted
//!                    │  └── port + 1 ◀┘                       ▼
//!                    └──────────────── peer gone ◀────── Streaming
//! ```
//!
//! The control thread runs as long as the session token it was started with
//! is current. [`TransportServer::stop`] swaps in the sentinel under the
//! session lock, so a bind or accept that completes afterwards sees the
//! stale token and backs out without advertising or streaming.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::sink::CaptureSource;
use crate::constants::DEFAULT_FRAME_SAMPLES;
use crate::discovery::{
    default_service_name, AdvertHandle, RegistrationEvent, ServiceDirectory, SERVICE_TYPE,
};
use crate::error::{AudioError, NetworkError, Result};
use crate::network::sender::{AudioSendLoop, SendOutcome};
use crate::network::socket::{create_listener, next_port, shutdown_listener, tune_stream, wake_listener};
use crate::network::token::{CancelFlag, ConnectionToken};

/// Pause before retrying a bind that failed for a reason other than a port conflict
const BIND_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Opens the capture source for each accepted parent
pub type CaptureFactory =
    Arc<dyn Fn() -> std::result::Result<Box<dyn CaptureSource>, AudioError> + Send + Sync>;

/// Lifecycle of the child's listen/accept loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Binding,
    Advertising,
    AwaitingConnection,
    Streaming,
}

/// Status notifications for whoever drives the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    StateChanged(ServerState),
    BindFailed { port: u16, next_port: u16 },
    Advertised { name: String, port: u16 },
    AdvertiseFailed { reason: String },
    PeerConnected { peer: String },
    PeerDisconnected { peer: String },
}

/// Child server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub service_name: String,
    pub service_type: String,
    /// Samples per captured frame; also sizes the send buffer
    pub frame_samples: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            service_name: default_service_name(),
            service_type: SERVICE_TYPE.to_string(),
            frame_samples: DEFAULT_FRAME_SAMPLES,
        }
    }
}

struct Session {
    token: ConnectionToken,
    state: ServerState,
    next_port: u16,
    /// Clone of the listening socket, kept only so `stop` can close it
    listener: Option<TcpListener>,
    bound_port: Option<u16>,
    advertisement: Option<AdvertHandle>,
    advertised_name: Option<String>,
    peer: Option<TcpStream>,
    peer_cancel: Option<CancelFlag>,
    subscribers: Vec<Sender<ServerEvent>>,
}

impl Session {
    fn new() -> Self {
        Self {
            token: ConnectionToken::SENTINEL,
            state: ServerState::Idle,
            next_port: 0,
            listener: None,
            bound_port: None,
            advertisement: None,
            advertised_name: None,
            peer: None,
            peer_cancel: None,
            subscribers: Vec::new(),
        }
    }

    fn emit(&mut self, event: ServerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&mut self, state: ServerState) {
        if self.state != state {
            self.state = state;
            self.emit(ServerEvent::StateChanged(state));
        }
    }
}

/// Single-peer TCP server for the child device
pub struct TransportServer {
    config: ServerConfig,
    directory: Arc<dyn ServiceDirectory>,
    capture: CaptureFactory,
    session: Arc<Mutex<Session>>,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl TransportServer {
    pub fn new(
        config: ServerConfig,
        directory: Arc<dyn ServiceDirectory>,
        capture: CaptureFactory,
    ) -> Self {
        Self {
            config,
            directory,
            capture,
            session: Arc::new(Mutex::new(Session::new())),
            control: Mutex::new(None),
        }
    }

    /// Start listening, beginning at `preferred_port`
    ///
    /// Port 0 binds an ephemeral port, which is then what gets advertised.
    pub fn start(&self, preferred_port: u16) -> Result<()> {
        let mut control = self.control.lock();
        if control.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(NetworkError::AlreadyRunning.into());
        }
        if let Some(finished) = control.take() {
            let _ = finished.join();
        }

        let token = ConnectionToken::mint();
        {
            let mut session = self.session.lock();
            session.token = token;
            session.next_port = preferred_port;
            session.set_state(ServerState::Binding);
        }

        let worker = ControlLoop {
            config: self.config.clone(),
            directory: self.directory.clone(),
            capture: self.capture.clone(),
            session: self.session.clone(),
            token,
        };
        let handle = thread::Builder::new()
            .name("transport-server".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                let mut session = self.session.lock();
                session.token = ConnectionToken::SENTINEL;
                session.set_state(ServerState::Idle);
                NetworkError::Spawn(e)
            })?;
        *control = Some(handle);

        tracing::info!("Child server started, preferred port {}", preferred_port);
        Ok(())
    }

    /// Stop listening and streaming; returns once the control thread has exited
    pub fn stop(&self) {
        let mut control = self.control.lock();
        let (listener, wake_port) = {
            let mut session = self.session.lock();
            session.token = ConnectionToken::SENTINEL;
            if let Some(handle) = session.advertisement.take() {
                self.directory.withdraw(handle);
            }
            session.advertised_name = None;
            if let Some(cancel) = session.peer_cancel.take() {
                cancel.cancel();
            }
            if let Some(peer) = session.peer.take() {
                let _ = peer.shutdown(Shutdown::Both);
            }
            let listener = session.listener.take();
            let wake_port = session.bound_port.take();
            session.set_state(ServerState::Idle);
            (listener, wake_port)
        };

        if let Some(listener) = listener {
            shutdown_listener(&listener);
            if let Some(port) = wake_port {
                wake_listener(self.config.bind_address, port);
            }
        }

        if let Some(handle) = control.take() {
            let _ = handle.join();
            tracing::info!("Child server stopped");
        }
    }

    pub fn state(&self) -> ServerState {
        self.session.lock().state
    }

    /// Port of the listener currently accepting, if any
    pub fn bound_port(&self) -> Option<u16> {
        self.session.lock().bound_port
    }

    /// Name the directory confirmed for the live advertisement
    pub fn advertised_name(&self) -> Option<String> {
        self.session.lock().advertised_name.clone()
    }

    /// Receive all subsequent status events
    pub fn subscribe(&self) -> Receiver<ServerEvent> {
        let (tx, rx) = unbounded();
        self.session.lock().subscribers.push(tx);
        rx
    }
}

impl Drop for TransportServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the control thread
struct ControlLoop {
    config: ServerConfig,
    directory: Arc<dyn ServiceDirectory>,
    capture: CaptureFactory,
    session: Arc<Mutex<Session>>,
    token: ConnectionToken,
}

impl ControlLoop {
    fn run(self) {
        while let Some(listener) = self.bind() {
            let Some(port) = self.advertise(&listener) else {
                return;
            };
            tracing::info!("Waiting for parent on port {}", port);
            let accepted = listener.accept();
            drop(listener);

            let Some((stream, cancel, peer)) = self.admit(accepted, port) else {
                continue;
            };
            self.stream(stream, &cancel, &peer);

            let mut session = self.session.lock();
            session.peer = None;
            session.peer_cancel = None;
            if session.token != self.token {
                return;
            }
            session.emit(ServerEvent::PeerDisconnected { peer: peer.clone() });
            drop(session);
            tracing::info!("Parent {} disconnected", peer);
        }
        tracing::debug!("Control loop exiting");
    }

    /// Bind the current port, moving to the next on failure. `None` once stopped.
    fn bind(&self) -> Option<TcpListener> {
        loop {
            let port = {
                let mut session = self.session.lock();
                if session.token != self.token {
                    return None;
                }
                session.set_state(ServerState::Binding);
                session.next_port
            };

            let source = match create_listener(self.config.bind_address, port) {
                Ok(listener) => {
                    self.keep_port(&listener);
                    return Some(listener);
                }
                Err(e) => e,
            };
            let in_use = source.kind() == io::ErrorKind::AddrInUse;
            let error = NetworkError::BindFailed { port, source };

            let next = next_port(port);
            {
                let mut session = self.session.lock();
                if session.token != self.token {
                    return None;
                }
                session.next_port = next;
                session.emit(ServerEvent::BindFailed {
                    port,
                    next_port: next,
                });
            }
            tracing::warn!("{}. Port increased to {}", error, next);
            if !in_use {
                thread::sleep(BIND_ERROR_BACKOFF);
            }
        }
    }

    /// Later rebinds reuse the port actually bound, including an ephemeral one
    fn keep_port(&self, listener: &TcpListener) {
        let Ok(addr) = listener.local_addr() else {
            return;
        };
        let mut session = self.session.lock();
        if session.token == self.token {
            session.next_port = addr.port();
        }
    }

    /// Publish the bound listener. `None` if the session was stopped meanwhile.
    fn advertise(&self, listener: &TcpListener) -> Option<u16> {
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                tracing::warn!("Bound listener has no local address: {}", e);
                self.session.lock().next_port
            }
        };

        let mut session = self.session.lock();
        if session.token != self.token {
            return None;
        }
        match listener.try_clone() {
            Ok(clone) => session.listener = Some(clone),
            Err(e) => tracing::warn!("Failed to keep listener handle: {}", e),
        }
        session.bound_port = Some(port);
        session.set_state(ServerState::Advertising);

        match self
            .directory
            .advertise(&self.config.service_name, &self.config.service_type, port)
        {
            Ok(registration) => {
                session.advertisement = Some(registration.handle);
                self.watch_registration(registration.events, registration.handle, port);
            }
            Err(e) => {
                tracing::warn!("Advertisement failed, manual connection still possible: {}", e);
                session.emit(ServerEvent::AdvertiseFailed {
                    reason: e.to_string(),
                });
            }
        }
        session.set_state(ServerState::AwaitingConnection);
        Some(port)
    }

    /// Forward registration results into the session under its lock
    fn watch_registration(&self, events: Receiver<RegistrationEvent>, handle: AdvertHandle, port: u16) {
        let session = self.session.clone();
        let token = self.token;
        let spawned = thread::Builder::new()
            .name("registration".to_string())
            .spawn(move || {
                for event in events.iter() {
                    let mut session = session.lock();
                    let current = session.token == token && session.advertisement == Some(handle);
                    match event {
                        RegistrationEvent::Registered { actual_name } if current => {
                            tracing::info!("Service name: {}", actual_name);
                            session.advertised_name = Some(actual_name.clone());
                            session.emit(ServerEvent::Advertised {
                                name: actual_name,
                                port,
                            });
                        }
                        RegistrationEvent::Failed { reason } if current => {
                            tracing::warn!("Registration failed: {}", reason);
                            session.emit(ServerEvent::AdvertiseFailed { reason });
                        }
                        RegistrationEvent::Withdrawn => {
                            tracing::debug!("Advertisement on port {} withdrawn", port);
                            break;
                        }
                        _ => {}
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("Failed to watch registration: {}", e);
        }
    }

    /// Settle an accept result under the session lock
    ///
    /// Withdraws the advertisement either way. Returns the stream only if the
    /// session is still current.
    fn admit(
        &self,
        accepted: io::Result<(TcpStream, std::net::SocketAddr)>,
        port: u16,
    ) -> Option<(TcpStream, CancelFlag, String)> {
        let mut session = self.session.lock();
        session.listener = None;
        session.bound_port = None;
        if let Some(handle) = session.advertisement.take() {
            self.directory.withdraw(handle);
        }
        session.advertised_name = None;

        if session.token != self.token {
            if let Ok((stream, addr)) = accepted {
                tracing::debug!("Discarding connection from {} accepted after stop", addr);
                let _ = stream.shutdown(Shutdown::Both);
            }
            return None;
        }

        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                let error = NetworkError::AcceptFailed(e);
                tracing::warn!("{} on port {}", error, port);
                return None;
            }
        };

        let peer = addr.to_string();
        let cancel = CancelFlag::new();
        match stream.try_clone() {
            Ok(clone) => session.peer = Some(clone),
            Err(e) => tracing::warn!("Failed to keep peer handle: {}", e),
        }
        session.peer_cancel = Some(cancel.clone());
        session.set_state(ServerState::Streaming);
        session.emit(ServerEvent::PeerConnected { peer: peer.clone() });
        drop(session);

        tracing::info!("Connection from parent device received: {}", peer);
        Some((stream, cancel, peer))
    }

    fn stream(&self, mut stream: TcpStream, cancel: &CancelFlag, peer: &str) {
        let send_buffer = self.config.frame_samples * 2;
        if let Err(e) = tune_stream(&stream, Some(send_buffer)) {
            tracing::debug!("Failed to tune stream to {}: {}", peer, e);
        }

        let capture = match (self.capture)() {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!("Failed to open capture for {}: {}", peer, e);
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        };

        let mut send = AudioSendLoop::new(capture, self.config.frame_samples);
        match send.run(&mut stream, cancel) {
            SendOutcome::Cancelled => tracing::debug!("Streaming to {} cancelled", peer),
            SendOutcome::CaptureEnded => tracing::info!("Capture ended while streaming to {}", peer),
            SendOutcome::Failed(e) => tracing::warn!("Streaming to {} failed: {}", peer, e),
        }
        tracing::debug!("Sent {} frames to {}", send.frames_sent(), peer);
        let _ = stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::ToneCapture;
    use crate::discovery::LocalDirectory;
    use std::io::Read;
    use std::time::Instant;

    const TY: &str = "_childmonitor._tcp.local.";

    fn tone_factory() -> CaptureFactory {
        Arc::new(|| {
            Ok(Box::new(ToneCapture::new(440.0, 8000, 8000, 128).paced(true)) as Box<dyn CaptureSource>)
        })
    }

    fn server(directory: &LocalDirectory) -> TransportServer {
        let config = ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            service_name: "Nursery".to_string(),
            service_type: TY.to_string(),
            frame_samples: 128,
        };
        TransportServer::new(config, Arc::new(directory.clone()), tone_factory())
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_bind_conflict_moves_to_next_port() {
        let blocker = TcpListener::bind("127.0.0.1:0").unwrap();
        let taken = blocker.local_addr().unwrap().port();
        let directory = LocalDirectory::new();
        let server = server(&directory);
        let events = server.subscribe();

        server.start(taken).unwrap();
        wait_until(|| server.state() == ServerState::AwaitingConnection);

        let bound = server.bound_port().unwrap();
        assert_ne!(bound, taken);
        assert_eq!(directory.advertised(TY), vec![("Nursery".to_string(), bound)]);
        assert!(events
            .try_iter()
            .any(|e| matches!(e, ServerEvent::BindFailed { port, .. } if port == taken)));
        wait_until(|| server.advertised_name().as_deref() == Some("Nursery"));
    }

    #[test]
    fn test_stop_while_awaiting_withdraws() {
        let directory = LocalDirectory::new();
        let server = server(&directory);
        server.start(0).unwrap();
        wait_until(|| server.state() == ServerState::AwaitingConnection);
        assert_eq!(directory.advertised(TY).len(), 1);

        let started = Instant::now();
        server.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(server.state(), ServerState::Idle);
        assert_eq!(server.bound_port(), None);
        assert!(directory.advertised(TY).is_empty());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let directory = LocalDirectory::new();
        let server = server(&directory);
        server.start(0).unwrap();
        assert!(matches!(
            server.start(0),
            Err(crate::Error::Network(NetworkError::AlreadyRunning))
        ));
        server.stop();
        server.start(0).unwrap();
        wait_until(|| server.state() == ServerState::AwaitingConnection);
    }

    #[test]
    fn test_accept_withdraws_then_readvertises() {
        let directory = LocalDirectory::new();
        let server = server(&directory);
        server.start(0).unwrap();
        wait_until(|| server.state() == ServerState::AwaitingConnection);
        let port = server.bound_port().unwrap();

        let mut parent = TcpStream::connect(("127.0.0.1", port)).unwrap();
        wait_until(|| server.state() == ServerState::Streaming);
        assert!(directory.advertised(TY).is_empty());

        let mut buf = [0u8; 128];
        parent.read_exact(&mut buf).unwrap();
        drop(parent);

        // Writes start failing once the parent is gone
        wait_until(|| server.state() == ServerState::AwaitingConnection);
        assert_eq!(server.bound_port(), Some(port));
        assert_eq!(directory.advertised(TY), vec![("Nursery".to_string(), port)]);

        // Ephemeral port from start(0) is kept for the next parent
        let _again = TcpStream::connect(("127.0.0.1", port)).unwrap();
        wait_until(|| server.state() == ServerState::Streaming);
        server.stop();
    }

    #[test]
    fn test_stop_while_streaming() {
        let directory = LocalDirectory::new();
        let server = server(&directory);
        server.start(0).unwrap();
        wait_until(|| server.state() == ServerState::AwaitingConnection);
        let port = server.bound_port().unwrap();

        let mut parent = TcpStream::connect(("127.0.0.1", port)).unwrap();
        wait_until(|| server.state() == ServerState::Streaming);

        server.stop();
        assert_eq!(server.state(), ServerState::Idle);
        let mut rest = Vec::new();
        parent
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        // Stream ends once the child shuts the socket
        let _ = parent.read_to_end(&mut rest);
        assert!(directory.advertised(TY).is_empty());
    }
}
