use std::net::Ipv6Addr;
use std::time::Instant;

use dhcproto::v6::Message;

use crate::Error;

/// Infrastructure interface the client exchanges DHCPv6 messages over
pub trait InfraIf {
    /// Enable or disable reception on the DHCPv6 client port
    fn set_listening(&mut self, enabled: bool);

    /// Transmit a message to `dst` (server unicast address or ff02::1:2)
    fn send(&mut self, msg: &Message, dst: Ipv6Addr) -> Result<(), Error>;
}

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
