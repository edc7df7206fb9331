//! Acceptance rules for Advertise and Reply messages (RFC 8415 Section 16).
//!
//! Message level checks drop the whole message. IA_PD and IA_Prefix checks only
//! drop the offending record, the rest of the message is still used.

use std::time::Instant;

use dhcproto::v6::{DhcpOption, IAPrefix, Message, Status, IAPD};
use tracing::{debug, info};

use super::{extensions::status_from, extensions::PdMessageExtV6, prefix::PdPrefix};

/// Why an inbound message was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotListening,
    UnexpectedMessageType,
    TransactionIdMismatch,
    MissingClientId,
    ClientIdMismatch,
    MissingServerId,
    ServerIdMismatch,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotListening => "not expecting any response",
            Self::UnexpectedMessageType => "unexpected message type",
            Self::TransactionIdMismatch => "transaction id mismatch",
            Self::MissingClientId => "missing client id",
            Self::ClientIdMismatch => "client id mismatch",
            Self::MissingServerId => "missing server id",
            Self::ServerIdMismatch => "server id does not match selected server",
        }
    }
}

/// Check the transaction id and identities. Returns the server DUID on success.
pub fn validate_identity<'a>(
    msg: &'a Message,
    xid: [u8; 3],
    client_duid: &[u8],
    selected_server: Option<&[u8]>,
) -> Result<&'a [u8], DropReason> {
    if msg.xid() != xid {
        return Err(DropReason::TransactionIdMismatch);
    }

    match msg.client_id() {
        None => return Err(DropReason::MissingClientId),
        Some(id) if id != client_duid => return Err(DropReason::ClientIdMismatch),
        Some(_) => {}
    }

    let server_id = msg.server_id().ok_or(DropReason::MissingServerId)?;

    if let Some(selected) = selected_server {
        if server_id != selected {
            return Err(DropReason::ServerIdMismatch);
        }
    }

    Ok(server_id)
}

/// Prefixes offered in the IA_PD matching our IAID.
#[derive(Debug, Clone)]
pub struct IaPdPrefixes {
    /// Status Code inside the IA_PD, Success when absent
    pub status: Status,
    pub prefixes: Vec<PdPrefix>,
}

impl IaPdPrefixes {
    pub fn find_matching(&self, prefix: &PdPrefix) -> Option<&PdPrefix> {
        self.prefixes.iter().find(|p| p.prefix == prefix.prefix)
    }
}

/// Extract prefixes from the first acceptable IA_PD with the given IAID.
pub fn ia_pd_prefixes(msg: &Message, iaid: u32, now: Instant) -> IaPdPrefixes {
    let Some(iapd) = msg.ia_pds().into_iter().find(|iapd| !skip_ia_pd(iapd, iaid)) else {
        return IaPdPrefixes {
            status: Status::Success,
            prefixes: Vec::new(),
        };
    };

    let status = status_from(&iapd.opts);
    info!(?status, iaid, "processing IA_PD prefixes");

    let prefixes = iapd
        .opts
        .iter()
        .filter_map(|opt| match opt {
            DhcpOption::IAPrefix(ia_prefix) => Some(ia_prefix),
            _ => None,
        })
        .filter_map(|ia_prefix| {
            let skip = skip_ia_prefix(ia_prefix);
            info!(
                prefix = %ia_prefix.prefix_ip,
                len = ia_prefix.prefix_len,
                t1 = iapd.t1,
                t2 = iapd.t2,
                preferred = ia_prefix.preferred_lifetime,
                valid = ia_prefix.valid_lifetime,
                skip,
                "IA prefix"
            );
            if skip {
                return None;
            }
            PdPrefix::new(
                ia_prefix.prefix_ip,
                ia_prefix.prefix_len,
                iapd.t1,
                iapd.t2,
                ia_prefix.preferred_lifetime,
                ia_prefix.valid_lifetime,
                now,
            )
        })
        .collect();

    IaPdPrefixes { status, prefixes }
}

/// An IA_PD is skipped for another IAID, or when T1 > T2 with both non-zero.
fn skip_ia_pd(iapd: &IAPD, iaid: u32) -> bool {
    if iapd.id != iaid {
        debug!(iaid = iapd.id, "skipping IA_PD for other IAID");
        return true;
    }
    if iapd.t1 != 0 && iapd.t2 != 0 && iapd.t1 > iapd.t2 {
        debug!(t1 = iapd.t1, t2 = iapd.t2, "skipping IA_PD with T1 > T2");
        return true;
    }
    false
}

fn skip_ia_prefix(ia_prefix: &IAPrefix) -> bool {
    ia_prefix.prefix_len > 128 || ia_prefix.preferred_lifetime > ia_prefix.valid_lifetime
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcproto::v6::{DhcpOptions, MessageType, StatusCode};
    use ipnet::Ipv6Net;

    const CLIENT: &[u8] = &[0, 3, 0, 27, 1, 2, 3, 4, 5, 6, 7, 8];
    const SERVER: &[u8] = &[0, 1, 2, 3];
    const XID: [u8; 3] = [1, 2, 3];

    fn ia_prefix(prefix: &str, preferred: u32, valid: u32) -> DhcpOption {
        let net: Ipv6Net = prefix.parse().unwrap();
        DhcpOption::IAPrefix(IAPrefix {
            preferred_lifetime: preferred,
            valid_lifetime: valid,
            prefix_len: net.prefix_len(),
            prefix_ip: net.addr(),
            opts: DhcpOptions::new(),
        })
    }

    fn reply(iaid: u32, t1: u32, t2: u32, prefixes: Vec<DhcpOption>) -> Message {
        let mut msg = Message::new_with_id(MessageType::Reply, XID);
        let opts = msg.opts_mut();
        opts.insert(DhcpOption::ClientId(CLIENT.to_vec()));
        opts.insert(DhcpOption::ServerId(SERVER.to_vec()));
        let mut ia_opts = DhcpOptions::new();
        for p in prefixes {
            ia_opts.insert(p);
        }
        opts.insert(DhcpOption::IAPD(IAPD {
            id: iaid,
            t1,
            t2,
            opts: ia_opts,
        }));
        msg
    }

    #[test]
    fn identity_accepts_matching_message() {
        let msg = reply(0, 0, 0, vec![]);
        assert_eq!(validate_identity(&msg, XID, CLIENT, None), Ok(SERVER));
        assert_eq!(validate_identity(&msg, XID, CLIENT, Some(SERVER)), Ok(SERVER));
    }

    #[test]
    fn identity_rejections() {
        let msg = reply(0, 0, 0, vec![]);
        assert_eq!(
            validate_identity(&msg, [9, 9, 9], CLIENT, None),
            Err(DropReason::TransactionIdMismatch)
        );
        assert_eq!(
            validate_identity(&msg, XID, &[0, 3, 0, 27], None),
            Err(DropReason::ClientIdMismatch)
        );
        assert_eq!(
            validate_identity(&msg, XID, CLIENT, Some(&[9u8, 9][..])),
            Err(DropReason::ServerIdMismatch)
        );

        let mut no_server = Message::new_with_id(MessageType::Reply, XID);
        no_server
            .opts_mut()
            .insert(DhcpOption::ClientId(CLIENT.to_vec()));
        assert_eq!(
            validate_identity(&no_server, XID, CLIENT, None),
            Err(DropReason::MissingServerId)
        );

        let mut no_client = Message::new_with_id(MessageType::Reply, XID);
        no_client
            .opts_mut()
            .insert(DhcpOption::ServerId(SERVER.to_vec()));
        assert_eq!(
            validate_identity(&no_client, XID, CLIENT, None),
            Err(DropReason::MissingClientId)
        );
    }

    #[test]
    fn ia_pd_with_other_iaid_ignored() {
        let msg = reply(7, 0, 0, vec![ia_prefix("2001:db8::/48", 3600, 4000)]);
        let result = ia_pd_prefixes(&msg, 0, Instant::now());
        assert!(result.prefixes.is_empty());
        assert_eq!(result.status, Status::Success);
    }

    #[test]
    fn ia_pd_with_t1_after_t2_ignored() {
        let msg = reply(0, 3000, 2000, vec![ia_prefix("2001:db8::/48", 3600, 4000)]);
        assert!(ia_pd_prefixes(&msg, 0, Instant::now()).prefixes.is_empty());

        // only one timer set is fine
        let msg = reply(0, 3000, 0, vec![ia_prefix("2001:db8::/48", 3600, 4000)]);
        assert_eq!(ia_pd_prefixes(&msg, 0, Instant::now()).prefixes.len(), 1);
    }

    #[test]
    fn prefix_with_preferred_over_valid_dropped() {
        let msg = reply(
            0,
            0,
            0,
            vec![
                ia_prefix("2001:db8:1::/48", 4000, 3600),
                ia_prefix("2001:db8:2::/48", 3600, 4000),
            ],
        );
        let result = ia_pd_prefixes(&msg, 0, Instant::now());
        assert_eq!(result.prefixes.len(), 1);
        assert_eq!(
            result.prefixes[0].prefix,
            "2001:db8:2::/48".parse::<Ipv6Net>().unwrap()
        );
    }

    #[test]
    fn ia_pd_status_reported() {
        let mut msg = Message::new_with_id(MessageType::Reply, XID);
        let mut ia_opts = DhcpOptions::new();
        ia_opts.insert(DhcpOption::StatusCode(StatusCode {
            status: Status::NoPrefixAvail,
            msg: "no prefixes".into(),
        }));
        msg.opts_mut().insert(DhcpOption::IAPD(IAPD {
            id: 0,
            t1: 0,
            t2: 0,
            opts: ia_opts,
        }));
        let result = ia_pd_prefixes(&msg, 0, Instant::now());
        assert_eq!(result.status, Status::NoPrefixAvail);
        assert!(result.prefixes.is_empty());
    }
}
