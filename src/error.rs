//! Error types for the child monitor

use std::io;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DirectoryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The capture source has no more frames (device gone or synthetic source drained)
    #[error("Capture ended")]
    CaptureEnded,

    #[error("cpal error: {0}")]
    CpalError(String),
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        AudioError::CpalError(e.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(e: cpal::PlayStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

/// Transport errors on the child side and inside streaming loops
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Accept failed: {0}")]
    AcceptFailed(io::Error),

    #[error("Send failed: {0}")]
    SendFailed(io::Error),

    #[error("Receive failed: {0}")]
    ReceiveFailed(io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(io::Error),
}

/// Typed dial failures reported to the caller of the transport client
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Connection refused by {0}")]
    Refused(String),

    #[error("Connection to {0} timed out")]
    TimedOut(String),

    #[error("{addr} is unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Service directory (advertise / browse / resolve) errors
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Directory backend unavailable: {0}")]
    Unavailable(String),

    #[error("Advertisement failed: {0}")]
    AdvertiseFailed(String),

    #[error("Browse failed: {0}")]
    BrowseFailed(String),
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
