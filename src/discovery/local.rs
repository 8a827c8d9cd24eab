//! In-process service directory
//!
//! Advertisements are visible to browsers sharing the same `LocalDirectory`
//! (clones share state). Used when multicast DNS is disabled and in tests.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{
    AdvertHandle, BrowseEvent, Registration, RegistrationEvent, ResolvedService, ServiceDirectory,
    ServiceRecord,
};
use crate::error::DirectoryError;

struct LocalAdvert {
    record: ServiceRecord,
    port: u16,
    events: Sender<RegistrationEvent>,
}

struct LocalState {
    next_handle: u64,
    adverts: HashMap<u64, LocalAdvert>,
    browsers: Vec<(String, Sender<BrowseEvent>)>,
    unresolvable: HashSet<String>,
}

impl LocalState {
    fn notify(&mut self, service_type: &str, event: BrowseEvent) {
        self.browsers.retain(|(ty, tx)| {
            if ty != service_type {
                return true;
            }
            tx.send(event.clone()).is_ok()
        });
    }

    fn name_taken(&self, name: &str, service_type: &str) -> bool {
        self.adverts
            .values()
            .any(|a| a.record.name == name && a.record.service_type == service_type)
    }
}

/// Shared in-memory directory
#[derive(Clone)]
pub struct LocalDirectory {
    host: String,
    state: Arc<Mutex<LocalState>>,
}

impl LocalDirectory {
    /// Directory whose records resolve to loopback
    pub fn new() -> Self {
        Self::with_host("127.0.0.1")
    }

    /// Directory whose records resolve to `host`
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: Arc::new(Mutex::new(LocalState {
                next_handle: 1,
                adverts: HashMap::new(),
                browsers: Vec::new(),
                unresolvable: HashSet::new(),
            })),
        }
    }

    /// Records currently advertised for `service_type`, with their ports
    pub fn advertised(&self, service_type: &str) -> Vec<(String, u16)> {
        let state = self.state.lock();
        let mut adverts: Vec<_> = state
            .adverts
            .values()
            .filter(|a| a.record.service_type == service_type)
            .map(|a| (a.record.name.clone(), a.port))
            .collect();
        adverts.sort();
        adverts
    }

    /// Make resolution of `name` fail, as for a peer that went away mid-resolve
    #[cfg(test)]
    pub(crate) fn refuse_resolve(&self, name: &str) {
        self.state.lock().unresolvable.insert(name.to_string());
    }
}

impl Default for LocalDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceDirectory for LocalDirectory {
    fn advertise(
        &self,
        name: &str,
        service_type: &str,
        port: u16,
    ) -> Result<Registration, DirectoryError> {
        let (tx, rx) = unbounded();
        let mut state = self.state.lock();

        // Duplicate names get the escaped suffix real responders produce.
        let mut actual_name = name.to_string();
        let mut suffix = 2;
        while state.name_taken(&actual_name, service_type) {
            actual_name = format!("{}\\032({})", name, suffix);
            suffix += 1;
        }

        let handle = state.next_handle;
        state.next_handle += 1;
        let record = ServiceRecord {
            name: actual_name.clone(),
            service_type: service_type.to_string(),
        };
        state.adverts.insert(
            handle,
            LocalAdvert {
                record: record.clone(),
                port,
                events: tx.clone(),
            },
        );
        state.notify(service_type, BrowseEvent::Found(record));

        let _ = tx.send(RegistrationEvent::Registered { actual_name });
        Ok(Registration {
            handle: AdvertHandle(handle),
            events: rx,
        })
    }

    fn withdraw(&self, handle: AdvertHandle) {
        let mut state = self.state.lock();
        if let Some(advert) = state.adverts.remove(&handle.0) {
            let _ = advert.events.send(RegistrationEvent::Withdrawn);
            let service_type = advert.record.service_type.clone();
            state.notify(&service_type, BrowseEvent::Lost(advert.record));
        }
    }

    fn browse(&self, service_type: &str) -> Result<Receiver<BrowseEvent>, DirectoryError> {
        let (tx, rx) = unbounded();
        let mut state = self.state.lock();
        for advert in state.adverts.values() {
            if advert.record.service_type == service_type {
                let _ = tx.send(BrowseEvent::Found(advert.record.clone()));
            }
        }
        state.browsers.push((service_type.to_string(), tx));
        Ok(rx)
    }

    fn resolve(&self, record: &ServiceRecord) {
        let mut state = self.state.lock();
        let port = state
            .adverts
            .values()
            .find(|a| &a.record == record)
            .map(|a| a.port);

        let event = match port {
            Some(_) if state.unresolvable.contains(&record.name) => BrowseEvent::ResolveFailed {
                record: record.clone(),
                reason: "host did not answer".to_string(),
            },
            Some(port) => BrowseEvent::Resolved(ResolvedService {
                record: record.clone(),
                host: self.host.clone(),
                port,
            }),
            None => BrowseEvent::ResolveFailed {
                record: record.clone(),
                reason: "no such service".to_string(),
            },
        };
        state.notify(&record.service_type, event);
    }

    fn stop_browse(&self, service_type: &str) {
        self.state.lock().browsers.retain(|(ty, _)| ty != service_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TY: &str = "_test._tcp.local.";

    #[test]
    fn test_advertise_and_browse() {
        let directory = LocalDirectory::new();
        let registration = directory.advertise("Nursery", TY, 10001).unwrap();
        assert_eq!(
            registration.events.try_recv().unwrap(),
            RegistrationEvent::Registered {
                actual_name: "Nursery".to_string()
            }
        );

        let browse = directory.browse(TY).unwrap();
        let BrowseEvent::Found(record) = browse.try_recv().unwrap() else {
            panic!("expected Found");
        };
        directory.resolve(&record);
        assert_eq!(
            browse.try_recv().unwrap(),
            BrowseEvent::Resolved(ResolvedService {
                record,
                host: "127.0.0.1".to_string(),
                port: 10001,
            })
        );
    }

    #[test]
    fn test_duplicate_names_are_escaped() {
        let directory = LocalDirectory::new();
        let _first = directory.advertise("Child Room", TY, 10000).unwrap();
        let second = directory.advertise("Child Room", TY, 10001).unwrap();
        assert_eq!(
            second.events.try_recv().unwrap(),
            RegistrationEvent::Registered {
                actual_name: "Child Room\\032(2)".to_string()
            }
        );
    }

    #[test]
    fn test_withdraw_is_idempotent() {
        let directory = LocalDirectory::new();
        let registration = directory.advertise("Nursery", TY, 10000).unwrap();
        let browse = directory.browse(TY).unwrap();
        let _ = browse.try_recv();

        directory.withdraw(registration.handle);
        directory.withdraw(registration.handle);

        assert!(matches!(browse.try_recv(), Ok(BrowseEvent::Lost(_))));
        assert!(browse.try_recv().is_err());
        assert!(directory.advertised(TY).is_empty());
    }

    #[test]
    fn test_other_types_are_invisible() {
        let directory = LocalDirectory::new();
        let _reg = directory.advertise("Printer", "_ipp._tcp.local.", 631).unwrap();
        let browse = directory.browse(TY).unwrap();
        assert!(browse.try_recv().is_err());
    }
}
