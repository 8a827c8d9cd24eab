//! Parent-side streaming: read, decode, play, measure
//!
//! [`AudioReceiveLoop`] is the blocking loop itself. [`ListenSession`] owns a
//! connection and runs the loop on its own thread, raising the disconnect
//! alert when the stream ends without being asked to.

use crossbeam_channel::{unbounded, Receiver};
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::sink::{AlertSignal, PlaybackSink};
use crate::codec::UlawDecoder;
use crate::error::{ConnectError, Error, NetworkError, Result};
use crate::network::client::TransportClient;
use crate::network::endpoint::SessionEndpoint;
use crate::network::token::CancelFlag;
use crate::volume::VolumeHistory;

/// How a receive loop ended
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// Stop was requested
    Cancelled,
    /// The child closed the connection
    EndOfStream,
    /// A read timed out or failed, or playback failed
    Failed(Error),
}

impl ReceiveOutcome {
    /// Whether the session ended without the user stopping it
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, ReceiveOutcome::Cancelled)
    }
}

/// Decodes whatever each read returns; there are no frame boundaries
pub struct AudioReceiveLoop<P: PlaybackSink> {
    playback: P,
    history: VolumeHistory,
    decoder: UlawDecoder,
    read_buffer: Vec<u8>,
    bytes_received: u64,
}

impl<P: PlaybackSink> AudioReceiveLoop<P> {
    pub fn new(playback: P, history: VolumeHistory, read_buffer_bytes: usize) -> Self {
        let size = read_buffer_bytes.max(1);
        Self {
            playback,
            history,
            decoder: UlawDecoder::new(size),
            read_buffer: vec![0u8; size],
            bytes_received: 0,
        }
    }

    /// Run until cancelled, the peer closes, or a read fails
    pub fn run<R: Read>(&mut self, input: &mut R, cancel: &CancelFlag) -> ReceiveOutcome {
        loop {
            if cancel.is_cancelled() {
                return ReceiveOutcome::Cancelled;
            }

            let len = match input.read(&mut self.read_buffer) {
                Ok(0) if cancel.is_cancelled() => return ReceiveOutcome::Cancelled,
                Ok(0) => return ReceiveOutcome::EndOfStream,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) if cancel.is_cancelled() => return ReceiveOutcome::Cancelled,
                Err(e) => return ReceiveOutcome::Failed(NetworkError::ReceiveFailed(e).into()),
            };
            self.bytes_received += len as u64;

            let samples = self.decoder.decode(&self.read_buffer[..len]);
            if let Err(e) = self.playback.write_frame(samples) {
                return ReceiveOutcome::Failed(e.into());
            }
            self.history.on_samples(samples);
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn history(&self) -> &VolumeHistory {
        &self.history
    }
}

/// Events from a running [`ListenSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenEvent {
    /// The stream ended on its own; sent at most once per session
    Disconnected { reason: String },
}

/// One connection to a child, streaming on a background thread
pub struct ListenSession {
    endpoint: SessionEndpoint,
    history: VolumeHistory,
    cancel: CancelFlag,
    stream: TcpStream,
    events: Receiver<ListenEvent>,
    worker: Option<JoinHandle<()>>,
}

impl ListenSession {
    /// Dial `endpoint` and start streaming into `playback` and `history`
    pub fn start<P: PlaybackSink + 'static>(
        client: &TransportClient,
        endpoint: SessionEndpoint,
        playback: P,
        alert: Arc<dyn AlertSignal>,
        history: VolumeHistory,
        read_buffer_bytes: usize,
    ) -> Result<Self> {
        let stream = client.connect(&endpoint)?;
        let mut reader = stream
            .try_clone()
            .map_err(|source| ConnectError::Unreachable {
                addr: endpoint.socket_label(),
                source,
            })?;

        let cancel = CancelFlag::new();
        let (events_tx, events) = unbounded();
        let worker = {
            let cancel = cancel.clone();
            let mut receive = AudioReceiveLoop::new(playback, history.clone(), read_buffer_bytes);
            let name = endpoint.display_name.clone();
            thread::Builder::new()
                .name("listen".to_string())
                .spawn(move || {
                    let outcome = receive.run(&mut reader, &cancel);
                    let _ = reader.shutdown(Shutdown::Both);
                    tracing::info!(
                        "Stream from {} ended after {} bytes: {:?}",
                        name,
                        receive.bytes_received(),
                        outcome
                    );
                    if outcome.is_unexpected() {
                        alert.play_alert();
                        let reason = match outcome {
                            ReceiveOutcome::Failed(e) => e.to_string(),
                            _ => "connection closed by child".to_string(),
                        };
                        let _ = events_tx.send(ListenEvent::Disconnected { reason });
                    }
                })
                .map_err(NetworkError::Spawn)?
        };

        Ok(Self {
            endpoint,
            history,
            cancel,
            stream,
            events,
            worker: Some(worker),
        })
    }

    pub fn endpoint(&self) -> &SessionEndpoint {
        &self.endpoint
    }

    /// History this session feeds
    pub fn history(&self) -> &VolumeHistory {
        &self.history
    }

    /// Disconnect notifications; closes once the worker exits
    pub fn events(&self) -> &Receiver<ListenEvent> {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop streaming without raising the alert
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.cancel.cancel();
        let _ = self.stream.shutdown(Shutdown::Both);
        let _ = worker.join();
        tracing::info!("Stopped listening to {}", self.endpoint);
    }
}

impl Drop for ListenSession {
    fn drop(&mut self) {
        self.stop();
    }
}
