use std::fmt;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use dhcproto::{
    v6::{DhcpOption, DhcpOptions, IAPrefix, Message, MessageType, OptionCode, Status, IAPD, ORO},
    Decodable,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, field, info, instrument, warn, Span};

use super::{
    extensions::PdMessageExtV6,
    infra::{Clock, InfraIf},
    prefix::{DelegatedPrefix, PdPrefix, PrefixSelector, SmallestAdjustedPrefix},
    retx::{Jitter, RetxTracker},
    validate::{ia_pd_prefixes, validate_identity, DropReason},
    ALL_DHCP_RELAY_AGENTS_AND_SERVERS, DEFAULT_IAID, DESIRED_PREFIX_LEN, INITIAL_REBIND_TIMEOUT,
    INITIAL_RELEASE_TIMEOUT, INITIAL_RENEW_TIMEOUT, INITIAL_REQUEST_TIMEOUT,
    INITIAL_SOLICIT_TIMEOUT, MAX_DELAY_FIRST_SOLICIT, MAX_PREFERENCE, MAX_REBIND_TIMEOUT,
    MAX_RELEASE_RETX_COUNT, MAX_RENEW_TIMEOUT, MAX_REQUEST_RETX_COUNT, MAX_REQUEST_TIMEOUT,
    MAX_SOLICIT_TIMEOUT, MAX_SOL_MAX_RT, MIN_PREFERRED_LIFETIME, MIN_SOL_MAX_RT,
    RETX_DELAY_ON_FAILED_TX,
};
use crate::Duid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum State {
    Stopped,
    /// Waiting out the random delay before the first Solicit
    ToSolicit,
    Soliciting,
    Requesting,
    /// Bound, waiting for T1
    ToRenew,
    Renewing,
    Rebinding,
    Releasing,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Stopped => "Stopped",
            State::ToSolicit => "ToSolicit",
            State::Soliciting => "Soliciting",
            State::Requesting => "Requesting",
            State::ToRenew => "ToRenew",
            State::Renewing => "Renewing",
            State::Rebinding => "Rebinding",
            State::Releasing => "Releasing",
        }
    }

    /// Message sent while in this state, if any
    fn msg_type(&self) -> Option<MessageType> {
        match self {
            State::Soliciting => Some(MessageType::Solicit),
            State::Requesting => Some(MessageType::Request),
            State::Renewing => Some(MessageType::Renew),
            State::Rebinding => Some(MessageType::Rebind),
            State::Releasing => Some(MessageType::Release),
            State::Stopped | State::ToSolicit | State::ToRenew => None,
        }
    }

    /// States in which a response from a server is expected
    fn is_awaiting_response(&self) -> bool {
        self.msg_type().is_some()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DHCPv6 Prefix Delegation client.
///
/// Single threaded and event driven: the owner feeds it received packets through
/// [`handle_received`](Self::handle_received) and calls
/// [`handle_timer`](Self::handle_timer) once [`next_fire_time`](Self::next_fire_time)
/// has been reached. Only one deadline is armed at a time.
pub struct Dhcp6PdClient<I, C> {
    infra: I,
    clock: C,
    rng: StdRng,
    duid: Duid,
    iaid: u32,
    selector: Box<dyn PrefixSelector + Send>,
    state: State,
    retx: RetxTracker,
    deadline: Option<Instant>,
    max_solicit_timeout: Duration,
    server_duid: Option<Vec<u8>>,
    server_address: Option<Ipv6Addr>,
    /// Set by a UseMulticast status, held until the server changes
    force_multicast: bool,
    /// Favored offer while soliciting, the lease once committed
    pd_prefix: Option<PdPrefix>,
    committed: bool,
}

impl<I: InfraIf, C: Clock> Dhcp6PdClient<I, C> {
    pub fn new(infra: I, clock: C, duid: Duid) -> Self {
        Self::with_rng(infra, clock, duid, StdRng::from_os_rng())
    }

    pub fn with_rng(infra: I, clock: C, duid: Duid, rng: StdRng) -> Self {
        let now = clock.now();
        Self {
            infra,
            clock,
            rng,
            duid,
            iaid: DEFAULT_IAID,
            selector: Box::new(SmallestAdjustedPrefix),
            state: State::Stopped,
            retx: RetxTracker::new(now),
            deadline: None,
            max_solicit_timeout: MAX_SOLICIT_TIMEOUT,
            server_duid: None,
            server_address: None,
            force_multicast: false,
            pd_prefix: None,
            committed: false,
        }
    }

    pub fn iaid(mut self, iaid: u32) -> Self {
        self.iaid = iaid;
        self
    }

    pub fn selector(mut self, selector: Box<dyn PrefixSelector + Send>) -> Self {
        self.selector = selector;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn duid(&self) -> &Duid {
        &self.duid
    }

    pub fn infra(&self) -> &I {
        &self.infra
    }

    pub fn next_fire_time(&self) -> Option<Instant> {
        self.deadline
    }

    /// The committed lease, if any. Nothing is reported while stopping.
    pub fn delegated_prefix(&self) -> Option<DelegatedPrefix> {
        if !self.committed || matches!(self.state, State::Stopped | State::Releasing) {
            return None;
        }
        self.pd_prefix
            .as_ref()
            .filter(|p| p.preferred_lifetime > 0)
            .and_then(DelegatedPrefix::from_pd_prefix)
    }

    pub fn start(&mut self) {
        info!(state = %self.state, "starting");

        match self.state {
            State::Stopped => {
                self.infra.set_listening(true);
                self.enter_state(State::ToSolicit);
            }
            State::Releasing => self.enter_state(State::ToSolicit),
            State::ToSolicit
            | State::Soliciting
            | State::Requesting
            | State::ToRenew
            | State::Renewing
            | State::Rebinding => {}
        }
    }

    /// Stop acquiring. A held lease is released first.
    pub fn stop(&mut self) {
        info!(state = %self.state, "stopping");

        match self.state {
            State::Stopped | State::Releasing => {}
            State::ToSolicit | State::Soliciting | State::Requesting => {
                self.enter_state(State::Stopped)
            }
            State::ToRenew | State::Renewing | State::Rebinding => {
                self.enter_state(State::Releasing)
            }
        }
    }

    pub fn handle_timer(&mut self) {
        let now = self.clock.now();
        match self.deadline {
            Some(deadline) if deadline <= now => self.deadline = None,
            _ => return,
        }

        match self.state {
            State::Stopped => {}
            State::ToSolicit => self.enter_state(State::Soliciting),
            State::ToRenew => self.enter_state(State::Renewing),
            // first Solicit timeout ended with an offer in hand
            State::Soliciting if self.pd_prefix.is_some() => self.enter_state(State::Requesting),
            State::Soliciting
            | State::Requesting
            | State::Renewing
            | State::Rebinding
            | State::Releasing => self.send_message(),
        }
    }

    /// Entry point for a DHCPv6 packet received on the client port.
    pub fn handle_received(&mut self, bytes: &[u8]) {
        match Message::from_bytes(bytes) {
            Ok(msg) => self.handle_message(&msg),
            Err(e) => debug!(%e, len = bytes.len(), "unable to parse DHCPv6 message"),
        }
    }

    #[instrument(skip_all, fields(xid = ?msg.xid(), msg_type = ?msg.msg_type(), server_id = field::Empty))]
    pub fn handle_message(&mut self, msg: &Message) {
        if let Err(reason) = self.process_message(msg) {
            debug!(reason = reason.as_str(), state = %self.state, "dropping message");
        }
    }

    fn process_message(&mut self, msg: &Message) -> Result<(), DropReason> {
        if !self.state.is_awaiting_response() {
            return Err(DropReason::NotListening);
        }

        match msg.msg_type() {
            MessageType::Advertise if self.state == State::Soliciting => {}
            MessageType::Reply if self.state != State::Soliciting => {}
            _ => return Err(DropReason::UnexpectedMessageType),
        }

        // While soliciting, Advertises from every server are considered even if
        // a favored one is already tracked.
        let selected_server = match self.state {
            State::Soliciting => None,
            _ => self.server_duid.as_deref(),
        };
        let server_id =
            validate_identity(msg, self.retx.xid(), self.duid.as_slice(), selected_server)?;
        Span::current().record(
            "server_id",
            field::display(Duid::from(server_id).to_colon_string()),
        );

        // SOL_MAX_RT is honoured even when the rest of the message is discarded
        self.process_sol_max_rt(msg);

        match msg.msg_type() {
            MessageType::Advertise => self.handle_advertise(msg),
            MessageType::Reply => self.handle_reply(msg),
            _ => {}
        }
        Ok(())
    }

    fn handle_advertise(&mut self, msg: &Message) {
        let status = msg.status();
        if status != Status::Success {
            debug!(?status, "ignoring Advertise with failure status");
            return;
        }

        info!("received Advertise");

        let ia = ia_pd_prefixes(msg, self.iaid, self.clock.now());
        if ia.status == Status::NoPrefixAvail {
            debug!("server has no prefix available");
            return;
        }

        let Some(favored) = self.selector.select(&ia.prefixes).cloned() else {
            debug!("Advertise carries no usable prefix");
            return;
        };
        let preference = msg.preference();

        // On the first Solicit attempt every Advertise is collected until the
        // timeout fires, keeping only the most favored one. Later attempts act on
        // the first valid Advertise.
        // A preference of 255 ends the wait right away, with whichever offer ranks higher.
        let keep_tracked = self.retx.is_first_attempt()
            && self.server_duid.is_some()
            && self
                .pd_prefix
                .as_ref()
                .is_some_and(|current| !self.selector.is_favored_over(&favored, current));

        if keep_tracked {
            debug!(prefix = %favored.prefix, preference, "keeping tracked offer");
        } else {
            info!(prefix = %favored.prefix, preference, "tracking offer");
            self.pd_prefix = Some(favored);
            self.save_server(msg);
        }

        if !self.retx.is_first_attempt() || preference == MAX_PREFERENCE {
            self.enter_state(State::Requesting);
        }
    }

    fn handle_reply(&mut self, msg: &Message) {
        let status = msg.status();
        info!(?status, state = %self.state, "received Reply");

        match status {
            Status::UnspecFail => return,
            Status::UseMulticast => {
                self.force_multicast = true;
                if self.server_address.take().is_some() {
                    info!("server requested multicast, resending");
                    self.send_message();
                }
                return;
            }
            _ => {}
        }

        if self.state == State::Releasing {
            // release is complete whatever the status
            info!("release acknowledged");
            self.enter_state(State::Stopped);
            return;
        }

        let ia = ia_pd_prefixes(msg, self.iaid, self.clock.now());

        match self.state {
            State::Requesting => {
                if ia.status == Status::NoPrefixAvail {
                    info!("server has no prefix available, soliciting again");
                    self.enter_state(State::ToSolicit);
                    return;
                }

                // Records failing validation are dropped, the Request keeps retrying
                let Some(favored) = self.selector.select(&ia.prefixes).cloned() else {
                    debug!("Reply carries no usable prefix, ignoring");
                    return;
                };
                self.save_server(msg);
                self.commit_pd_prefix(favored);
            }
            State::Renewing | State::Rebinding => {
                if ia.status == Status::NoPrefixAvail {
                    debug!("ignoring Reply with NoPrefixAvail");
                    return;
                }

                let mut voided = false;
                let matched = self
                    .pd_prefix
                    .as_ref()
                    .and_then(|current| ia.find_matching(current))
                    .cloned();

                if let Some(matched) = matched {
                    if matched.preferred_lifetime == 0 {
                        voided = true;
                    } else {
                        self.save_server(msg);
                        self.commit_pd_prefix(matched);
                        if self
                            .pd_prefix
                            .as_ref()
                            .is_some_and(|p| p.preferred_lifetime >= MIN_PREFERRED_LIFETIME)
                        {
                            return;
                        }
                    }
                }

                // The current prefix is gone or will not be extended. Take any
                // other usable prefix the server offers instead.
                if let Some(favored) = self.selector.select(&ia.prefixes).cloned() {
                    self.save_server(msg);
                    self.commit_pd_prefix(favored);
                    return;
                }

                if voided || ia.status == Status::NoBinding {
                    info!(status = ?ia.status, "server voided the delegated prefix");
                    self.enter_state(State::ToSolicit);
                }
            }
            _ => {}
        }
    }

    fn process_sol_max_rt(&mut self, msg: &Message) {
        let Some(sol_max_rt) = msg.sol_max_rt() else {
            return;
        };
        if !(MIN_SOL_MAX_RT..=MAX_SOL_MAX_RT).contains(&sol_max_rt) {
            debug!(sol_max_rt, "ignoring out of range SOL_MAX_RT");
            return;
        }

        let value = Duration::from_secs(sol_max_rt.into());

        // Adopt the first value seen. Servers disagreeing puts us back on the default.
        if self.max_solicit_timeout == MAX_SOLICIT_TIMEOUT {
            self.max_solicit_timeout = value;
        } else if value != self.max_solicit_timeout {
            self.max_solicit_timeout = MAX_SOLICIT_TIMEOUT;
        }
        info!(sol_max_rt = self.max_solicit_timeout.as_secs(), "processed SOL_MAX_RT");

        if self.state == State::Soliciting {
            self.retx.set_max_timeout(Some(self.max_solicit_timeout));
        }
    }

    fn enter_state(&mut self, state: State) {
        info!(from = %self.state, to = %state, "state change");
        self.state = state;

        let now = self.clock.now();

        match state {
            State::Stopped => {
                self.clear_server();
                self.clear_pd_prefix();
                self.deadline = None;
                self.infra.set_listening(false);
            }
            State::ToSolicit => {
                self.clear_server();
                self.clear_pd_prefix();
                let max_delay = MAX_DELAY_FIRST_SOLICIT.as_millis() as u64;
                let delay = Duration::from_millis(self.rng.random_range(0..=max_delay));
                self.deadline = Some(now + delay);
            }
            State::Soliciting => {
                self.clear_server();
                self.clear_pd_prefix();
                // the first Solicit timeout must be strictly greater than IRT
                self.retx.start(
                    &mut self.rng,
                    now,
                    INITIAL_SOLICIT_TIMEOUT,
                    Some(self.max_solicit_timeout),
                    Jitter::Positive,
                );
            }
            State::Requesting => {
                self.retx.start(
                    &mut self.rng,
                    now,
                    INITIAL_REQUEST_TIMEOUT,
                    Some(MAX_REQUEST_TIMEOUT),
                    Jitter::Full,
                );
                self.retx.set_max_count(MAX_REQUEST_RETX_COUNT);
            }
            State::ToRenew => {
                self.deadline = self.pd_prefix.as_ref().map(PdPrefix::t1_time);
            }
            State::Renewing => {
                self.retx.start(
                    &mut self.rng,
                    now,
                    INITIAL_RENEW_TIMEOUT,
                    Some(MAX_RENEW_TIMEOUT),
                    Jitter::Full,
                );
                if let Some(t2) = self.pd_prefix.as_ref().map(PdPrefix::t2_time) {
                    self.retx.set_end_time(t2);
                }
            }
            State::Rebinding => {
                self.clear_server();
                self.retx.start(
                    &mut self.rng,
                    now,
                    INITIAL_REBIND_TIMEOUT,
                    Some(MAX_REBIND_TIMEOUT),
                    Jitter::Full,
                );
                if let Some(expiry) = self.pd_prefix.as_ref().map(PdPrefix::preferred_expiry) {
                    self.retx.set_end_time(expiry);
                }
            }
            State::Releasing => {
                self.retx.start(&mut self.rng, now, INITIAL_RELEASE_TIMEOUT, None, Jitter::Full);
                self.retx.set_max_count(MAX_RELEASE_RETX_COUNT);
            }
        }

        self.send_message();
    }

    fn send_message(&mut self) {
        let Some(msg_type) = self.state.msg_type() else {
            return;
        };
        let now = self.clock.now();

        if !self.retx.should_retx(now) {
            debug!(?msg_type, count = self.retx.count(), "retransmissions exhausted");
            self.update_state_after_retx_exhausted();
            return;
        }

        let msg = self.build_message(msg_type, now);
        let dst = self.server_address.unwrap_or(ALL_DHCP_RELAY_AGENTS_AND_SERVERS);

        info!(
            ?msg_type,
            %dst,
            unicast = self.server_address.is_some(),
            count = self.retx.count(),
            "sending"
        );

        match self.infra.send(&msg, dst) {
            Ok(()) => {
                let deadline = self.retx.next_deadline(now);
                debug!(delay_ms = (deadline - now).as_millis() as u64, "scheduled timer");
                self.deadline = Some(deadline);
                self.retx.update_after_tx(&mut self.rng);
            }
            Err(e) => {
                warn!(%e, ?msg_type, "failed to send, retrying shortly");
                self.deadline = Some(now + RETX_DELAY_ON_FAILED_TX);
            }
        }
    }

    fn update_state_after_retx_exhausted(&mut self) {
        match self.state {
            State::Requesting => self.enter_state(State::Soliciting),
            State::Renewing => self.enter_state(State::Rebinding),
            State::Rebinding => self.enter_state(State::Soliciting),
            State::Releasing => self.enter_state(State::Stopped),
            State::Stopped | State::ToSolicit | State::Soliciting | State::ToRenew => {}
        }
    }

    fn build_message(&mut self, msg_type: MessageType, now: Instant) -> Message {
        let elapsed = self.retx.elapsed_time(now);

        let mut msg = Message::new_with_id(msg_type, self.retx.xid());
        let opts = msg.opts_mut();

        opts.insert(DhcpOption::ClientId(self.duid.bytes.clone()));
        if let Some(server_duid) = &self.server_duid {
            opts.insert(DhcpOption::ServerId(server_duid.clone()));
        }
        opts.insert(DhcpOption::ElapsedTime(elapsed));
        opts.insert(DhcpOption::ORO(ORO {
            opts: vec![OptionCode::SolMaxRt],
        }));

        // Without a prefix, `::/64` hints at the prefix length we want
        let (prefix_ip, prefix_len) = match &self.pd_prefix {
            Some(pd) => (pd.prefix.network(), pd.prefix.prefix_len()),
            None => (Ipv6Addr::UNSPECIFIED, DESIRED_PREFIX_LEN),
        };

        // lifetimes and timers from a client are ignored by servers
        let mut ia_pd_opts = DhcpOptions::new();
        ia_pd_opts.insert(DhcpOption::IAPrefix(IAPrefix {
            preferred_lifetime: 0,
            valid_lifetime: 0,
            prefix_len,
            prefix_ip,
            opts: DhcpOptions::new(),
        }));
        opts.insert(DhcpOption::IAPD(IAPD {
            id: self.iaid,
            t1: 0,
            t2: 0,
            opts: ia_pd_opts,
        }));

        msg
    }

    fn save_server(&mut self, msg: &Message) {
        let server_duid = msg.server_id().map(<[u8]>::to_vec);
        if server_duid != self.server_duid {
            self.server_address = None;
            self.force_multicast = false;
        }
        self.server_duid = server_duid;

        match msg.server_unicast() {
            Some(addr) if self.force_multicast => {
                debug!(%addr, "server asked for multicast, ignoring unicast address");
            }
            Some(addr) => {
                info!(%addr, "server unicast address");
                self.server_address = Some(addr);
            }
            None => {}
        }
    }

    fn clear_server(&mut self) {
        self.server_duid = None;
        self.server_address = None;
        self.force_multicast = false;
    }

    fn commit_pd_prefix(&mut self, mut pd_prefix: PdPrefix) {
        if self
            .pd_prefix
            .as_ref()
            .is_some_and(|current| current.prefix != pd_prefix.prefix)
        {
            self.clear_pd_prefix();
        }

        pd_prefix.adjust_lifetimes();
        self.pd_prefix = Some(pd_prefix);
        self.committed = true;

        self.enter_state(State::ToRenew);
        self.report_pd_prefix();
    }

    fn clear_pd_prefix(&mut self) {
        if self.committed {
            if let Some(pd) = &self.pd_prefix {
                info!(prefix = %pd.prefix, "delegated prefix removed");
            }
        }
        self.pd_prefix = None;
        self.committed = false;
    }

    fn report_pd_prefix(&self) {
        if let Some(pd) = &self.pd_prefix {
            info!(
                prefix = %pd.prefix,
                adjusted = ?pd.adjusted_prefix,
                t1 = pd.t1,
                t2 = pd.t2,
                preferred = pd.preferred_lifetime,
                valid = pd.valid_lifetime,
                "delegated prefix"
            );
        }
    }
}
