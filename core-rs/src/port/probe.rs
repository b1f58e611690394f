/**
 * probe.rs
 * Client-connect port probing
 *
 * A port is "occupied" when a TCP connect to it succeeds and "free" when the
 * connect is refused. Anything else (timeouts, unreachable addresses) is an
 * inconclusive probe and is returned as an error.
 */

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Result of a conclusive probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Something accepted the connection
    Occupied,
    /// Connection refused: nobody is listening
    Free,
}

/// Probe seam used by the resolver
pub trait PortProbe {
    fn probe(&self, port: u16) -> io::Result<PortState>;

    /// Dependent-port check: only a successful connect makes a port unavailable
    fn is_available(&self, port: u16) -> bool {
        !matches!(self.probe(port), Ok(PortState::Occupied))
    }
}

/// Probes `host:port` with a bounded connect per resolved address
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: &str, timeout: Duration) -> Self {
        TcpProbe {
            host: host.to_string(),
            timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        TcpProbe::new("localhost", Duration::from_millis(1000))
    }
}

impl PortProbe for TcpProbe {
    fn probe(&self, port: u16) -> io::Result<PortState> {
        // localhost may resolve to ::1 and 127.0.0.1; any live address means occupied
        let mut refused = false;
        let mut last_err = None;

        for addr in (self.host.as_str(), port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_stream) => return Ok(PortState::Occupied),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => refused = true,
                Err(e) => last_err = Some(e),
            }
        }

        if refused {
            return Ok(PortState::Free);
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} did not resolve to any address", self.host),
            )
        }))
    }
}
