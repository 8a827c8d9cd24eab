//! Parent-side dialing

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::constants::{CONNECT_TIMEOUT, READ_TIMEOUT};
use crate::error::ConnectError;
use crate::network::endpoint::SessionEndpoint;
use crate::network::socket::tune_stream;

/// Opens streams to a child device
#[derive(Debug, Clone)]
pub struct TransportClient {
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
}

impl Default for TransportClient {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT, Some(READ_TIMEOUT))
    }
}

impl TransportClient {
    /// `read_timeout` bounds each blocking read; `None` waits forever
    pub fn new(connect_timeout: Duration, read_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    /// Dial `endpoint`, trying each resolved address in turn
    pub fn connect(&self, endpoint: &SessionEndpoint) -> Result<TcpStream, ConnectError> {
        let label = endpoint.socket_label();
        if endpoint.port == 0 {
            return Err(ConnectError::InvalidEndpoint(label));
        }

        let addrs: Vec<SocketAddr> = (endpoint.address.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|source| ConnectError::Unreachable {
                addr: label.clone(),
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectError::InvalidEndpoint(label));
        }

        let mut last_error = None;
        for addr in addrs {
            tracing::debug!("Dialing {}", addr);
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(self.read_timeout)
                        .and_then(|_| tune_stream(&stream, None))
                        .map_err(|source| ConnectError::Unreachable {
                            addr: label.clone(),
                            source,
                        })?;
                    tracing::info!("Connected to {}", endpoint);
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        let error = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotConnected));
        tracing::warn!("Failed to connect to {}: {}", label, error);
        Err(classify(label, error))
    }
}

fn classify(label: String, error: io::Error) -> ConnectError {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => ConnectError::Refused(label),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectError::TimedOut(label),
        _ => ConnectError::Unreachable {
            addr: label,
            source: error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_refused_is_typed() {
        let endpoint = SessionEndpoint::new("nobody", "127.0.0.1", closed_port());
        let err = TransportClient::default().connect(&endpoint).unwrap_err();
        assert!(matches!(err, ConnectError::Refused(_)), "got {:?}", err);
    }

    #[test]
    fn test_connect_sets_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TransportClient::new(Duration::from_secs(1), Some(Duration::from_millis(300)));
        let stream = client
            .connect(&SessionEndpoint::new("local", "127.0.0.1", port))
            .unwrap();
        assert_eq!(stream.read_timeout().unwrap(), Some(Duration::from_millis(300)));
    }

    #[test]
    fn test_port_zero_is_invalid() {
        let endpoint = SessionEndpoint::new("zero", "127.0.0.1", 0);
        let err = TransportClient::default().connect(&endpoint).unwrap_err();
        assert!(matches!(err, ConnectError::InvalidEndpoint(_)));
    }

    #[test]
    fn test_classify() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(matches!(classify("a".into(), refused), ConnectError::Refused(_)));
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert!(matches!(classify("a".into(), timed_out), ConnectError::TimedOut(_)));
        let other = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(classify("a".into(), other), ConnectError::Unreachable { .. }));
    }
}
