//! Service advertisement and discovery
//!
//! [`ServiceDirectory`] is the capability both devices use: the child
//! advertises its listening port, the parent browses and resolves. Every
//! result is delivered on a crossbeam channel, from whatever thread the
//! backend runs on.

pub mod browser;
pub mod local;
#[cfg(feature = "mdns")]
pub mod mdns;

pub use browser::{unescape_service_name, Discovery, DiscoveryUpdate};
pub use local::LocalDirectory;
#[cfg(feature = "mdns")]
pub use mdns::MdnsDirectory;

use crossbeam_channel::Receiver;
use std::sync::Arc;

use crate::error::DirectoryError;

/// Service type every child advertises
pub const SERVICE_TYPE: &str = "_childmonitor._tcp.local.";

/// A discovered, not yet resolved, advertisement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceRecord {
    /// Instance name as the backend reports it (possibly escaped)
    pub name: String,
    pub service_type: String,
}

/// A record turned into something connectable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub record: ServiceRecord,
    pub host: String,
    pub port: u16,
}

/// Events on a browse stream. No ordering is guaranteed between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    Found(ServiceRecord),
    Resolved(ResolvedService),
    ResolveFailed { record: ServiceRecord, reason: String },
    Lost(ServiceRecord),
}

/// Completion events of one advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// Published; the backend may have renamed it to resolve a collision
    Registered { actual_name: String },
    Failed { reason: String },
    Withdrawn,
}

/// Identifies one advertisement for [`ServiceDirectory::withdraw`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdvertHandle(pub(crate) u64);

/// An advertisement in flight
pub struct Registration {
    pub handle: AdvertHandle,
    pub events: Receiver<RegistrationEvent>,
}

/// Local-network service directory backend
pub trait ServiceDirectory: Send + Sync {
    /// Start publishing `name` for `service_type` at `port`
    fn advertise(
        &self,
        name: &str,
        service_type: &str,
        port: u16,
    ) -> Result<Registration, DirectoryError>;

    /// Stop publishing. Unknown or already withdrawn handles are ignored.
    fn withdraw(&self, handle: AdvertHandle);

    /// Subscribe to records of `service_type`
    fn browse(&self, service_type: &str) -> Result<Receiver<BrowseEvent>, DirectoryError>;

    /// Ask for `record` to be resolved; the outcome arrives on the browse stream
    fn resolve(&self, record: &ServiceRecord);

    /// End browsing for `service_type`
    fn stop_browse(&self, service_type: &str);
}

/// DNS-safe label for this machine
pub fn host_label() -> String {
    let raw = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default();
    let label: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string();
    if label.is_empty() {
        "child-monitor".to_string()
    } else {
        label
    }
}

/// Default advertised instance name
pub fn default_service_name() -> String {
    format!("ChildMonitor on {}", host_label())
}

/// Multicast DNS when enabled and available, else an in-process directory
///
/// Without multicast the child is still reachable by manual address entry.
pub fn system_directory(use_mdns: bool) -> Arc<dyn ServiceDirectory> {
    if use_mdns {
        if let Some(directory) = multicast_directory() {
            return directory;
        }
    }
    Arc::new(LocalDirectory::new())
}

#[cfg(feature = "mdns")]
fn multicast_directory() -> Option<Arc<dyn ServiceDirectory>> {
    match MdnsDirectory::new() {
        Ok(directory) => Some(Arc::new(directory)),
        Err(e) => {
            tracing::warn!("mDNS unavailable, manual connection only: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "mdns"))]
fn multicast_directory() -> Option<Arc<dyn ServiceDirectory>> {
    tracing::warn!("Built without mDNS support, manual connection only");
    None
}
