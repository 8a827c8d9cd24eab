//! DNS-SD over multicast, backed by `mdns-sd`
//!
//! The daemon resolves records on its own as part of browsing, so
//! [`ServiceDirectory::resolve`] has nothing to trigger here; resolved
//! records simply show up on the browse stream.
//!
//! `mdns-sd` publishes the instance name exactly as given and does not report
//! a rename on collision. `Registered` therefore always carries the requested
//! name; two children with the same name stay apart on the parent by address.

use crossbeam_channel::{unbounded, Receiver, Sender};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::thread;

use super::{
    host_label, AdvertHandle, BrowseEvent, Registration, RegistrationEvent, ResolvedService,
    ServiceDirectory, ServiceRecord,
};
use crate::error::DirectoryError;

struct Published {
    fullname: String,
    events: Sender<RegistrationEvent>,
}

#[derive(Default)]
struct MdnsState {
    next_handle: u64,
    published: HashMap<u64, Published>,
}

/// Directory on the local network's multicast DNS
pub struct MdnsDirectory {
    daemon: ServiceDaemon,
    state: Mutex<MdnsState>,
}

impl MdnsDirectory {
    pub fn new() -> Result<Self, DirectoryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(Self {
            daemon,
            state: Mutex::new(MdnsState::default()),
        })
    }
}

impl ServiceDirectory for MdnsDirectory {
    fn advertise(
        &self,
        name: &str,
        service_type: &str,
        port: u16,
    ) -> Result<Registration, DirectoryError> {
        let host_name = format!("{}.local.", host_label());
        let mut properties = HashMap::new();
        properties.insert("codec".to_string(), "ulaw".to_string());

        let info = ServiceInfo::new(service_type, name, &host_name, "", port, properties)
            .map_err(|e| DirectoryError::AdvertiseFailed(e.to_string()))?
            .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        let (tx, rx) = unbounded();
        match self.daemon.register(info) {
            Ok(()) => {
                // Queued with the daemon; no collision rename ever comes back
                let _ = tx.send(RegistrationEvent::Registered {
                    actual_name: name.to_string(),
                });
            }
            Err(e) => {
                tracing::error!("Registration failed: {}", e);
                let _ = tx.send(RegistrationEvent::Failed {
                    reason: e.to_string(),
                });
            }
        }

        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.published.insert(
            handle,
            Published {
                fullname,
                events: tx,
            },
        );
        Ok(Registration {
            handle: AdvertHandle(handle),
            events: rx,
        })
    }

    fn withdraw(&self, handle: AdvertHandle) {
        let Some(published) = self.state.lock().published.remove(&handle.0) else {
            return;
        };
        tracing::info!("Unregistering service {}", published.fullname);
        match self.daemon.unregister(&published.fullname) {
            Ok(_) => {
                let _ = published.events.send(RegistrationEvent::Withdrawn);
            }
            Err(e) => tracing::error!("Unregistration failed: {}", e),
        }
    }

    fn browse(&self, service_type: &str) -> Result<Receiver<BrowseEvent>, DirectoryError> {
        let daemon_events = self
            .daemon
            .browse(service_type)
            .map_err(|e| DirectoryError::BrowseFailed(e.to_string()))?;
        let (tx, rx) = unbounded();
        let service_type = service_type.to_string();

        thread::Builder::new()
            .name("mdns-browse".to_string())
            .spawn(move || {
                while let Ok(event) = daemon_events.recv() {
                    let forwarded = match event {
                        ServiceEvent::ServiceFound(ty, fullname) => {
                            BrowseEvent::Found(record_of(&ty, &fullname))
                        }
                        ServiceEvent::ServiceResolved(info) => resolved_of(&service_type, &info),
                        ServiceEvent::ServiceRemoved(ty, fullname) => {
                            BrowseEvent::Lost(record_of(&ty, &fullname))
                        }
                        ServiceEvent::SearchStopped(_) => break,
                        _ => continue,
                    };
                    if tx.send(forwarded).is_err() {
                        break;
                    }
                }
                tracing::debug!("mDNS browse for {} ended", service_type);
            })
            .map_err(|e| DirectoryError::BrowseFailed(e.to_string()))?;

        Ok(rx)
    }

    fn resolve(&self, record: &ServiceRecord) {
        tracing::debug!("Resolution of {} is automatic under mDNS", record.name);
    }

    fn stop_browse(&self, service_type: &str) {
        if let Err(e) = self.daemon.stop_browse(service_type) {
            tracing::warn!("Failed to stop browsing {}: {}", service_type, e);
        }
    }
}

impl Drop for MdnsDirectory {
    fn drop(&mut self) {
        let handles: Vec<u64> = self.state.lock().published.keys().copied().collect();
        for handle in handles {
            self.withdraw(AdvertHandle(handle));
        }
        if let Err(e) = self.daemon.shutdown() {
            tracing::debug!("mDNS daemon shutdown: {}", e);
        }
    }
}

/// Instance name is the full name minus the `.<type>` suffix
fn record_of(service_type: &str, fullname: &str) -> ServiceRecord {
    let name = fullname
        .strip_suffix(service_type)
        .map(|n| n.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string();
    ServiceRecord {
        name,
        service_type: service_type.to_string(),
    }
}

fn resolved_of(service_type: &str, info: &ServiceInfo) -> BrowseEvent {
    let record = record_of(service_type, info.get_fullname());
    let addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    // Prefer IPv4: link-local IPv6 needs a scope id to dial.
    let host = addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.first())
        .map(|a| a.to_string());

    match host {
        Some(host) => BrowseEvent::Resolved(ResolvedService {
            record,
            host,
            port: info.get_port(),
        }),
        None => BrowseEvent::ResolveFailed {
            record,
            reason: "no address in answer".to_string(),
        },
    }
}
