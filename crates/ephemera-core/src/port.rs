//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Holds the server port until publication."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

/// A bound loopback listener keeping a port out of reach of other processes.
#[derive(Debug)]
pub struct PortReservation {
    listener: TcpListener,
    port: u16,
}

impl PortReservation {
    /// Bind `127.0.0.1:port`. Port 0 picks a free ephemeral port.
    pub fn reserve(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the listener and hand the port to the caller.
    pub fn release(self) -> u16 {
        drop(self.listener);
        self.port
    }
}
