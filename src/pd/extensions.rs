use std::net::Ipv6Addr;

use dhcproto::v6::{DhcpOption, DhcpOptions, Message, Status, IAPD};

use super::DEFAULT_PREFERENCE;

/// Helpers for reading server responses out of dhcproto::v6::Message
pub trait PdMessageExtV6 {
    fn client_id(&self) -> Option<&[u8]>;
    fn server_id(&self) -> Option<&[u8]>;
    /// Top level Status Code, Success when absent
    fn status(&self) -> Status;
    fn preference(&self) -> u8;
    fn server_unicast(&self) -> Option<Ipv6Addr>;
    fn sol_max_rt(&self) -> Option<u32>;
    fn ia_pds(&self) -> Vec<&IAPD>;
}

impl PdMessageExtV6 for Message {
    /// Get the bytes representing the DUID
    fn client_id(&self) -> Option<&[u8]> {
        self.opts().iter().find_map(|opt| match opt {
            DhcpOption::ClientId(id) => Some(id.as_slice()),
            _ => None,
        })
    }

    fn server_id(&self) -> Option<&[u8]> {
        self.opts().iter().find_map(|opt| match opt {
            DhcpOption::ServerId(id) => Some(id.as_slice()),
            _ => None,
        })
    }

    fn status(&self) -> Status {
        status_from(self.opts())
    }

    fn preference(&self) -> u8 {
        self.opts()
            .iter()
            .find_map(|opt| match opt {
                DhcpOption::Preference(pref) => Some(*pref),
                _ => None,
            })
            .unwrap_or(DEFAULT_PREFERENCE)
    }

    fn server_unicast(&self) -> Option<Ipv6Addr> {
        self.opts().iter().find_map(|opt| match opt {
            DhcpOption::ServerUnicast(addr) => Some(*addr),
            _ => None,
        })
    }

    fn sol_max_rt(&self) -> Option<u32> {
        self.opts().iter().find_map(|opt| match opt {
            DhcpOption::SolMaxRt(secs) => Some(*secs),
            _ => None,
        })
    }

    fn ia_pds(&self) -> Vec<&IAPD> {
        self.opts()
            .iter()
            .filter_map(|opt| match opt {
                DhcpOption::IAPD(iapd) => Some(iapd),
                _ => None,
            })
            .collect()
    }
}

/// Status Code carried in an option list, Success when absent
pub fn status_from(opts: &DhcpOptions) -> Status {
    opts.iter()
        .find_map(|opt| match opt {
            DhcpOption::StatusCode(code) => Some(code.status.clone()),
            _ => None,
        })
        .unwrap_or(Status::Success)
}
