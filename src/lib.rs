//! # LAN Child Monitor
//!
//! Stream a child's room audio to a parent device on the same network.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         CHILD DEVICE                          │
//! │  ┌────────────┐   ┌──────────────┐   ┌──────────────────────┐ │
//! │  │ Microphone │──▶│ µ-law encode │──▶│ TransportServer      │ │
//! │  │ (cpal)     │   │ (codec)      │   │ bind → advertise →   │ │
//! │  └────────────┘   └──────────────┘   │ accept → stream      │ │
//! │                                      └──────────┬───────────┘ │
//! │  ┌────────────────────────────────┐             │             │
//! │  │ ServiceDirectory (discovery)   │◀─ advertise ┘             │
//! │  └────────────────────────────────┘                           │
//! └─────────────────────────────────────────────────┼─────────────┘
//!                           mDNS            raw µ-law over TCP
//! ┌─────────────────────────────────────────────────┼─────────────┐
//! │                         PARENT DEVICE           ▼             │
//! │  ┌────────────────────┐   ┌────────────────────────────────┐  │
//! │  │ Discovery          │──▶│ TransportClient / ListenSession│  │
//! │  │ browse → resolve   │   └──────────────┬─────────────────┘  │
//! │  └────────────────────┘                  │ µ-law decode       │
//! │                            ┌─────────────┴──────────┐         │
//! │                            ▼                        ▼         │
//! │                     ┌────────────┐        ┌───────────────┐   │
//! │                     │ Speaker    │        │ VolumeHistory │   │
//! │                     │ (cpal)     │        │ → meter       │   │
//! │                     └────────────┘        └───────────────┘   │
//! │        stream ends unexpectedly ─▶ alert + Disconnected       │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod network;
pub mod volume;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Mono 16-bit PCM at 8 kHz on both ends
    pub const SAMPLE_RATE: u32 = 8000;

    /// Samples per captured frame
    pub const DEFAULT_FRAME_SAMPLES: usize = 512;

    /// First port the child tries to bind
    pub const DEFAULT_PORT: u16 = 10000;

    /// Volume values kept for the meter
    pub const HISTORY_CAPACITY: usize = 16384;

    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// A read blocking longer than this counts as a dead link
    pub const READ_TIMEOUT: Duration = Duration::from_secs(5);
}
