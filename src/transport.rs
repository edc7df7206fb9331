use std::fmt::Write;
use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6, UdpSocket};
use std::time::Duration;

use dhcproto::{v6::Message, Encodable};
use tracing::{debug, info, trace};

use crate::{
    pd::{infra::InfraIf, SERVER_PORT},
    Error,
};

/// DHCPv6 client socket bound to the upstream interface.
pub struct UdpInfraIf {
    socket: UdpSocket,
    ifindex: u32,
    listening: bool,
}

impl UdpInfraIf {
    pub fn bind(bind: SocketAddr, interface: &str) -> Result<Self, Error> {
        let ifindex = interface_index(interface)?;
        let socket = UdpSocket::bind(bind)?;
        info!(%bind, interface, ifindex, "bound DHCPv6 client socket");

        Ok(Self {
            socket,
            ifindex,
            listening: false,
        })
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Receive one datagram, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the wait ran out.
    pub fn recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<(usize, SocketAddr)>> {
        // a zero timeout would mean blocking forever
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        match self.socket.recv_from(buf) {
            Ok((amount, src)) => {
                debug!("Received {amount} bytes from {src}");
                trace!("Data: {}", hex_for_text2pcap(&buf[..amount]));
                Ok(Some((amount, src)))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn destination(&self, dst: Ipv6Addr) -> SocketAddrV6 {
        // link scoped destinations need the interface to go out of
        let scope_id = if dst.is_multicast() || (dst.segments()[0] & 0xffc0) == 0xfe80 {
            self.ifindex
        } else {
            0
        };
        SocketAddrV6::new(dst, SERVER_PORT, 0, scope_id)
    }
}

impl InfraIf for UdpInfraIf {
    fn set_listening(&mut self, enabled: bool) {
        if self.listening != enabled {
            debug!(enabled, "client port listening");
        }
        self.listening = enabled;
    }

    fn send(&mut self, msg: &Message, dst: Ipv6Addr) -> Result<(), Error> {
        let write_buf = msg.to_vec()?;
        let dst = self.destination(dst);
        trace!("Data: {}", hex_for_text2pcap(&write_buf));
        let sent = self.socket.send_to(&write_buf, dst)?;
        debug!("sent {sent} bytes to {dst}");
        Ok(())
    }
}

/// Kernel interface index, as published in sysfs
fn interface_index(interface: &str) -> Result<u32, Error> {
    let path = format!("/sys/class/net/{interface}/ifindex");
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| Error::InterfaceNotFound(interface.to_string()))
}

/// Format bytes so the output can be fed to `text2pcap -6`
pub fn hex_for_text2pcap(bytes: &[u8]) -> String {
    let mut s = String::new();
    s.push_str("0000 ");
    for b in bytes {
        write!(&mut s, " {:02x}", b).expect("writing to String");
    }
    s
}
