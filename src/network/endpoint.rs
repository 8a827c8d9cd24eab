//! Connectable child endpoints

use std::fmt;

use crate::error::ConnectError;

/// A child device the parent can dial, from discovery or manual entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionEndpoint {
    pub display_name: String,
    pub address: String,
    pub port: u16,
}

impl SessionEndpoint {
    pub fn new(display_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            display_name: display_name.into(),
            address: address.into(),
            port,
        }
    }

    /// Validate manually entered values; the address doubles as display name
    pub fn manual(address: &str, port: u32) -> Result<Self, ConnectError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConnectError::InvalidEndpoint("empty address".to_string()));
        }
        let port = u16::try_from(port)
            .ok()
            .filter(|&p| p != 0)
            .ok_or_else(|| ConnectError::InvalidEndpoint(format!("port {} out of range", port)))?;
        Ok(Self::new(address, address, port))
    }

    /// `address:port`, bracketing IPv6 literals
    pub fn socket_label(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for SessionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.socket_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_validation() {
        let endpoint = SessionEndpoint::manual(" 192.168.1.7 ", 10000).unwrap();
        assert_eq!(endpoint.address, "192.168.1.7");
        assert_eq!(endpoint.display_name, "192.168.1.7");

        assert!(SessionEndpoint::manual("", 10000).is_err());
        assert!(SessionEndpoint::manual("host", 0).is_err());
        assert!(SessionEndpoint::manual("host", 65536).is_err());
        assert!(SessionEndpoint::manual("host", 65535).is_ok());
    }

    #[test]
    fn test_socket_label() {
        assert_eq!(SessionEndpoint::new("a", "::1", 1).socket_label(), "[::1]:1");
        assert_eq!(SessionEndpoint::new("a", "10.0.0.2", 5).socket_label(), "10.0.0.2:5");
    }
}
