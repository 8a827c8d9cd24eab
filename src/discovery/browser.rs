//! Parent-side discovery of child devices
//!
//! Consumes a browse stream on a worker thread, resolves every record it
//! finds, and keeps a deduplicated table of connectable endpoints. The table
//! is only touched under its mutex, whichever thread the backend delivers on.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{BrowseEvent, ResolvedService, ServiceDirectory, ServiceRecord};
use crate::error::DirectoryError;
use crate::network::SessionEndpoint;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Changes to the discovered set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryUpdate {
    Added(SessionEndpoint),
    Removed(SessionEndpoint),
}

struct Entry {
    /// Every live record resolving to this endpoint; the first names it
    record_names: Vec<String>,
    endpoint: SessionEndpoint,
}

#[derive(Default)]
struct DiscoveryState {
    entries: Vec<Entry>,
    subscribers: Vec<Sender<DiscoveryUpdate>>,
}

impl DiscoveryState {
    fn publish(&mut self, update: DiscoveryUpdate) {
        self.subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

/// Running browse for one service type
pub struct Discovery {
    directory: Arc<dyn ServiceDirectory>,
    service_type: String,
    state: Arc<Mutex<DiscoveryState>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Discovery {
    /// Start browsing `service_type` on `directory`
    pub fn start(
        directory: Arc<dyn ServiceDirectory>,
        service_type: &str,
    ) -> Result<Self, DirectoryError> {
        let events = directory.browse(service_type)?;
        let state = Arc::new(Mutex::new(DiscoveryState::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let directory = directory.clone();
            let service_type = service_type.to_string();
            let state = state.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("discovery".to_string())
                .spawn(move || run_worker(directory, service_type, events, state, stop))
                .map_err(|e| DirectoryError::BrowseFailed(e.to_string()))?
        };

        tracing::debug!("Service discovery started for {}", service_type);
        Ok(Self {
            directory,
            service_type: service_type.to_string(),
            state,
            stop,
            worker: Some(worker),
        })
    }

    /// Endpoints resolved so far, in discovery order
    pub fn endpoints(&self) -> Vec<SessionEndpoint> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|e| e.endpoint.clone())
            .collect()
    }

    /// Receive future additions and removals
    pub fn subscribe(&self) -> Receiver<DiscoveryUpdate> {
        let (tx, rx) = unbounded();
        self.state.lock().subscribers.push(tx);
        rx
    }

    /// Block until at least one endpoint is known or `timeout` passes
    pub fn wait_for_first(&self, timeout: Duration) -> Option<SessionEndpoint> {
        let updates = self.subscribe();
        if let Some(first) = self.endpoints().into_iter().next() {
            return Some(first);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match updates.recv_timeout(remaining) {
                Ok(DiscoveryUpdate::Added(endpoint)) => return Some(endpoint),
                Ok(DiscoveryUpdate::Removed(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Stop browsing and join the worker
    pub fn stop(&mut self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        self.directory.stop_browse(&self.service_type);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        tracing::info!("Discovery stopped: {}", self.service_type);
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    directory: Arc<dyn ServiceDirectory>,
    service_type: String,
    events: Receiver<BrowseEvent>,
    state: Arc<Mutex<DiscoveryState>>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let event = match events.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::debug!("Browse stream for {} closed", service_type);
                break;
            }
        };

        match event {
            BrowseEvent::Found(record) => {
                if record.service_type != service_type {
                    tracing::debug!("Unknown service type: {}", record.service_type);
                    continue;
                }
                tracing::debug!("Service found: {}", record.name);
                directory.resolve(&record);
            }
            BrowseEvent::Resolved(resolved) => {
                if resolved.record.service_type != service_type {
                    continue;
                }
                tracing::info!(
                    "Resolved {} at {}:{}",
                    resolved.record.name,
                    resolved.host,
                    resolved.port
                );
                add_resolved(&state, resolved);
            }
            BrowseEvent::ResolveFailed { record, reason } => {
                tracing::error!("Resolve failed for {}: {}", record.name, reason);
            }
            BrowseEvent::Lost(record) => {
                tracing::info!("Service lost: {}", record.name);
                remove_lost(&state, &record);
            }
        }
    }
}

fn add_resolved(state: &Mutex<DiscoveryState>, resolved: ResolvedService) {
    let mut state = state.lock();
    let existing = state
        .entries
        .iter_mut()
        .find(|e| e.endpoint.address == resolved.host && e.endpoint.port == resolved.port);
    if let Some(entry) = existing {
        if !entry.record_names.contains(&resolved.record.name) {
            tracing::debug!(
                "{} is another record for {}",
                resolved.record.name,
                entry.endpoint
            );
            entry.record_names.push(resolved.record.name);
        }
        return;
    }
    let endpoint = SessionEndpoint {
        display_name: unescape_service_name(&resolved.record.name),
        address: resolved.host,
        port: resolved.port,
    };
    state.entries.push(Entry {
        record_names: vec![resolved.record.name],
        endpoint: endpoint.clone(),
    });
    state.publish(DiscoveryUpdate::Added(endpoint));
}

/// Drop `record` from every entry; an entry goes once no record is left
fn remove_lost(state: &Mutex<DiscoveryState>, record: &ServiceRecord) {
    let mut state = state.lock();
    for entry in state.entries.iter_mut() {
        entry.record_names.retain(|name| *name != record.name);
    }
    let (lost, kept): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut state.entries)
        .into_iter()
        .partition(|e| e.record_names.is_empty());
    state.entries = kept;
    for entry in lost {
        state.publish(DiscoveryUpdate::Removed(entry.endpoint));
    }
}

/// Turn a backend-escaped instance name back into display text
///
/// Responders disambiguate duplicates as `Name\032(2)`, and some report the
/// backslash itself escaped (`Name\\032(2)`).
pub fn unescape_service_name(raw: &str) -> String {
    raw.replace("\\\\032", " ").replace("\\032", " ")
}
