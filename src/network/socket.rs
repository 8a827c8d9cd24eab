//! TCP socket setup
//!
//! Listener creation goes through socket2 so address reuse and backlog can be
//! set before `listen`.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

const LISTEN_BACKLOG: i32 = 1;
const WAKE_TIMEOUT: Duration = Duration::from_millis(250);

/// Create a listening socket on `address:port`
pub fn create_listener(address: IpAddr, port: u16) -> io::Result<TcpListener> {
    let addr = SocketAddr::new(address, port);
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    // On Windows SO_REUSEADDR lets a second listener steal the port
    #[cfg(not(windows))]
    socket.set_reuse_address(true)?;

    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Apply streaming options to an accepted or dialed connection
pub fn tune_stream(stream: &TcpStream, send_buffer: Option<usize>) -> io::Result<()> {
    stream.set_nodelay(true)?;
    if let Some(size) = send_buffer {
        SockRef::from(stream).set_send_buffer_size(size)?;
    }
    Ok(())
}

/// Stop a listener from accepting new connections
pub fn shutdown_listener(listener: &TcpListener) {
    if let Err(e) = SockRef::from(listener).shutdown(Shutdown::Both) {
        tracing::debug!("Listener shutdown: {}", e);
    }
}

/// Dial a listener once so a thread blocked in `accept` returns
pub fn wake_listener(bound: IpAddr, port: u16) {
    let target = match bound {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    match TcpStream::connect_timeout(&SocketAddr::new(target, port), WAKE_TIMEOUT) {
        Ok(stream) => {
            let _ = stream.shutdown(Shutdown::Both);
        }
        Err(e) => tracing::trace!("Wake-up dial to port {}: {}", port, e),
    }
}

/// Port to try after `port` fails to bind, wrapping past 65535 to 1024
pub fn next_port(port: u16) -> u16 {
    match port.checked_add(1) {
        Some(next) => next,
        None => 1024,
    }
}
