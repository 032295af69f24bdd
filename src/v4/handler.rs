//! DHCPv4 client exchange state machine
//!
//! One [`ClientExchange`] runs a single Discover, Offer, Request, Ack
//! handshake for one spoofed or real identity. It never touches a socket: the
//! driver in [`crate::client`] feeds it events and carries out its actions.

use super::message::{build_dhcp_discover, build_dhcp_request, DhcpMessage, Opcode};
use super::options::{DhcpOption, MessageType, OptionCode};
use crate::{
    client::{Action, DhcpStateMachine, Event, Lease},
    error::DhcpError,
};
use rand::Rng;
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

/// An Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareAddr([u8; 6]);

impl HardwareAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// A random unicast, locally administered address.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut octets = [0u8; 6];
        rng.fill(&mut octets);
        octets[0] &= 0xfe;
        octets[0] |= 0x02;
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Parses a MAC address string (e.g., "0a:1b:2c:3d:4e:5f").
impl FromStr for HardwareAddr {
    type Err = DhcpError;

    fn from_str(mac_str: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = mac_str.trim().split(':');
        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| DhcpError::MacParse(mac_str.to_string()))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|e| DhcpError::MacParse(format!("{mac_str}: {e}")))?;
        }
        if parts.next().is_some() {
            return Err(DhcpError::MacParse(mac_str.to_string()));
        }
        Ok(Self(octets))
    }
}

/// Identity of one request/reply exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionContext {
    xid: u32,
    hardware_addr: HardwareAddr,
    expected: MessageType,
}

impl TransactionContext {
    pub fn new(xid: u32, hardware_addr: HardwareAddr) -> Self {
        Self {
            xid,
            hardware_addr,
            expected: MessageType::Offer,
        }
    }

    /// Fresh random xid and hardware address.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let hardware_addr = HardwareAddr::random(rng);
        Self::new(rng.random(), hardware_addr)
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn hardware_addr(&self) -> HardwareAddr {
        self.hardware_addr
    }

    pub fn expected(&self) -> MessageType {
        self.expected
    }

    fn expect(&mut self, kind: MessageType) {
        self.expected = kind;
    }

    /// Checks that `msg` is a server reply addressed to this transaction.
    pub fn correlate(&self, msg: &DhcpMessage) -> Result<(), DhcpError> {
        let ours = msg.opcode() == Opcode::BootReply
            && msg.xid() == self.xid
            && msg.chaddr().starts_with(self.hardware_addr.as_bytes());
        if ours {
            Ok(())
        } else {
            Err(DhcpError::TransactionMismatch { xid: self.xid })
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExchangeState {
    Init,
    AwaitOffer,
    AwaitAck,
    Bound,
    Abandoned,
}

pub struct ClientExchange {
    state: ExchangeState,
    transaction: TransactionContext,
    server_target: SocketAddr,
    offered_ip: Option<Ipv4Addr>,
    server_ip: Option<Ipv4Addr>,
}

impl ClientExchange {
    /// `server_target` is where Discover and Request are sent, normally the
    /// broadcast address on the server port.
    pub fn new(transaction: TransactionContext, server_target: SocketAddr) -> Self {
        Self {
            state: ExchangeState::Init,
            transaction,
            server_target,
            offered_ip: None,
            server_ip: None,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn transaction(&self) -> &TransactionContext {
        &self.transaction
    }

    pub fn offered_ip(&self) -> Option<Ipv4Addr> {
        self.offered_ip
    }

    fn handle_init(&mut self) -> Result<Action, DhcpError> {
        let discover_packet = build_dhcp_discover(
            self.transaction.hardware_addr.as_bytes(),
            self.transaction.xid,
        )?;
        self.transaction.expect(MessageType::Offer);
        self.state = ExchangeState::AwaitOffer;
        tracing::info!(
            "Sending DISCOVER as {} (xid {:#010x})",
            self.transaction.hardware_addr,
            self.transaction.xid
        );
        Ok(Action::Send(discover_packet, self.server_target))
    }

    /// Decodes `data` and returns it only if it is the reply we are waiting for.
    fn accept(&self, data: &[u8]) -> Option<DhcpMessage> {
        let msg = match DhcpMessage::decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("Dropping undecodable packet: {}", e);
                return None;
            }
        };

        if let Err(e) = self.transaction.correlate(&msg) {
            tracing::debug!("{} (got xid {:#010x}), ignoring packet", e, msg.xid());
            return None;
        }

        match msg.message_type() {
            Ok(kind) if kind == self.transaction.expected => Some(msg),
            Ok(MessageType::Nak) if self.transaction.expected == MessageType::Ack => Some(msg),
            Ok(kind) => {
                tracing::debug!("Not the {:?} we expect: {:?}", self.transaction.expected, kind);
                None
            }
            Err(e) => {
                tracing::debug!("No usable message type: {}", e);
                None
            }
        }
    }

    fn handle_offer(&mut self, data: &[u8], from: SocketAddr) -> Result<Action, DhcpError> {
        let Some(offer) = self.accept(data) else {
            return Ok(Action::Wait);
        };

        let offered_ip = offer.yiaddr();
        let server_ip = match from.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => ip,
            _ => match offer.typed_option(OptionCode::ServerIdentifier) {
                Ok(DhcpOption::ServerIdentifier(ip)) => ip,
                _ => offer.siaddr(),
            },
        };
        tracing::info!("Received OFFER of {} from {}", offered_ip, server_ip);

        let request_packet = build_dhcp_request(
            self.transaction.hardware_addr.as_bytes(),
            self.transaction.xid,
            offered_ip,
            server_ip,
        )?;

        self.offered_ip = Some(offered_ip);
        self.server_ip = Some(server_ip);
        self.transaction.expect(MessageType::Ack);
        self.state = ExchangeState::AwaitAck;
        tracing::info!("Requesting address {}", offered_ip);
        Ok(Action::Send(request_packet, self.server_target))
    }

    fn handle_ack(&mut self, data: &[u8]) -> Result<Action, DhcpError> {
        let Some(reply) = self.accept(data) else {
            return Ok(Action::Wait);
        };

        if reply.message_type()? == MessageType::Nak {
            tracing::warn!("Received NAK for xid {:#010x}", self.transaction.xid);
            self.state = ExchangeState::Abandoned;
            return Err(DhcpError::Nak);
        }

        let lease = self.extract_lease_info(&reply);
        self.state = ExchangeState::Bound;
        Ok(Action::StoreLease(lease))
    }

    fn extract_lease_info(&self, msg: &DhcpMessage) -> Lease {
        let gateway = match msg.typed_option(OptionCode::Router) {
            Ok(DhcpOption::Router(ip)) => Some(ip),
            _ => None,
        };
        let dns_server = match msg.typed_option(OptionCode::DomainNameServer) {
            Ok(DhcpOption::DomainNameServer(ip)) => Some(ip),
            _ => None,
        };
        let lease_duration = match msg.typed_option(OptionCode::AddressLeaseTime) {
            Ok(DhcpOption::AddressLeaseTime(secs)) => Some(Duration::from_secs(u64::from(secs))),
            _ => None,
        };
        let server_identifier = match msg.typed_option(OptionCode::ServerIdentifier) {
            Ok(DhcpOption::ServerIdentifier(ip)) => Some(ip),
            _ => self.server_ip,
        };

        Lease {
            offered_ip: msg.yiaddr(),
            server_identifier,
            gateway,
            dns_server,
            lease_duration,
            hardware_addr: self.transaction.hardware_addr,
            xid: self.transaction.xid,
        }
    }

    fn abandon(&mut self) -> Result<Action, DhcpError> {
        let state = self.state_name();
        self.state = ExchangeState::Abandoned;
        tracing::warn!(
            "Timeout in {} state, abandoning xid {:#010x}",
            state,
            self.transaction.xid
        );
        Err(DhcpError::Timeout {
            waited: Duration::ZERO,
            state,
        })
    }
}

impl DhcpStateMachine for ClientExchange {
    fn state_name(&self) -> &'static str {
        match self.state {
            ExchangeState::Init => "Init",
            ExchangeState::AwaitOffer => "AwaitOffer",
            ExchangeState::AwaitAck => "AwaitAck",
            ExchangeState::Bound => "Bound",
            ExchangeState::Abandoned => "Abandoned",
        }
    }

    fn handle_event(&mut self, event: Event) -> Result<Action, DhcpError> {
        tracing::debug!("Handling event {:?} in state {:?}", event, self.state);
        match (self.state, event) {
            (ExchangeState::Init, Event::Start) => self.handle_init(),
            (ExchangeState::AwaitOffer, Event::PacketReceived { data, from }) => {
                self.handle_offer(data, from)
            }
            (ExchangeState::AwaitAck, Event::PacketReceived { data, .. }) => self.handle_ack(data),
            (ExchangeState::AwaitOffer | ExchangeState::AwaitAck, Event::Timeout) => self.abandon(),
            (ExchangeState::Bound | ExchangeState::Abandoned, _) => Ok(Action::Exit),
            (state, event) => Err(DhcpError::Critical(format!(
                "event {event:?} is not valid in state {state:?}"
            ))),
        }
    }
}
