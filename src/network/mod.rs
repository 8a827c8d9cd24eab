//! Network subsystem: TCP rendezvous and the audio streaming loops

pub mod client;
pub mod endpoint;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod socket;
pub mod token;

pub use client::TransportClient;
pub use endpoint::SessionEndpoint;
pub use receiver::{AudioReceiveLoop, ListenEvent, ListenSession, ReceiveOutcome};
pub use sender::{AudioSendLoop, SendOutcome};
pub use server::{CaptureFactory, ServerConfig, ServerEvent, ServerState, TransportServer};
pub use token::{CancelFlag, ConnectionToken};
