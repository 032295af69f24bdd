use super::*;
use crate::config::DHCP_CLIENT_PORT;
use crate::v4::{build_dhcp_discover, build_dhcp_request, Flags};
use std::{io, sync::Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};

const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const CHADDR: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

fn server(policy: RequestPolicy) -> RogueServer {
    let mut config = ServerConfig::new("lo".to_string(), SERVER_IP);
    config.request_policy = policy;
    RogueServer::new(config).unwrap()
}

fn discover(xid: u32) -> Vec<u8> {
    build_dhcp_discover(&CHADDR, xid).unwrap()
}

fn request(xid: u32, requested: Ipv4Addr) -> Vec<u8> {
    build_dhcp_request(&CHADDR, xid, requested, SERVER_IP).unwrap()
}

fn assert_reply_options(reply: &DhcpMessage, kind: MessageType) {
    let entries: Vec<_> = crate::v4::options::parse(reply.options())
        .map(|entry| entry.code())
        .collect();
    assert_eq!(entries, vec![53, 3, 51, 54, 6]);
    assert_eq!(reply.message_type().unwrap(), kind);
    assert_eq!(
        reply.typed_option(OptionCode::Router).unwrap(),
        DhcpOption::Router(SERVER_IP)
    );
    assert_eq!(
        reply.option(OptionCode::AddressLeaseTime).unwrap().value().as_ref(),
        &[0, 0, 0, 120]
    );
    assert_eq!(
        reply.typed_option(OptionCode::ServerIdentifier).unwrap(),
        DhcpOption::ServerIdentifier(SERVER_IP)
    );
    assert_eq!(
        reply.typed_option(OptionCode::DomainNameServer).unwrap(),
        DhcpOption::DomainNameServer(SERVER_IP)
    );
}

#[test]
fn test_allocator_is_sequential() {
    let mut allocator = LeaseAllocator::new(Ipv4Addr::new(192, 168, 1, 1), 101, 103).unwrap();
    assert_eq!(allocator.first(), Ipv4Addr::new(192, 168, 1, 101));
    assert_eq!(allocator.last(), Ipv4Addr::new(192, 168, 1, 103));
    assert_eq!(allocator.remaining(), 3);

    assert_eq!(allocator.allocate().unwrap(), Ipv4Addr::new(192, 168, 1, 101));
    assert_eq!(allocator.allocate().unwrap(), Ipv4Addr::new(192, 168, 1, 102));
    assert_eq!(allocator.allocate().unwrap(), Ipv4Addr::new(192, 168, 1, 103));
    assert!(allocator.is_exhausted());
    assert_eq!(allocator.allocated(), 3);
    assert_eq!(allocator.remaining(), 0);

    // Exhaustion is permanent.
    for _ in 0..3 {
        assert!(matches!(
            allocator.allocate(),
            Err(DhcpError::PoolExhausted { .. })
        ));
    }
}

#[test]
fn test_allocator_reaches_last_host_byte() {
    let mut allocator = LeaseAllocator::new(Ipv4Addr::new(10, 1, 2, 3), 254, 255).unwrap();
    assert_eq!(allocator.allocate().unwrap(), Ipv4Addr::new(10, 1, 2, 254));
    assert_eq!(allocator.allocate().unwrap(), Ipv4Addr::new(10, 1, 2, 255));
    assert!(allocator.allocate().is_err());
}

#[test]
fn test_allocator_rejects_inverted_pool() {
    assert!(matches!(
        LeaseAllocator::new(SERVER_IP, 150, 101),
        Err(DhcpError::Config(_))
    ));

    let mut config = ServerConfig::new("lo".to_string(), SERVER_IP);
    config.pool_start = 200;
    assert!(RogueServer::new(config).is_err());

    let config = ServerConfig::new("lo".to_string(), Ipv4Addr::UNSPECIFIED);
    assert!(RogueServer::new(config).is_err());
}

#[test]
fn test_discover_gets_first_pool_address() {
    let mut server = server(RequestPolicy::EchoRequested);

    let reply = server.handle(&discover(0x1234)).unwrap().unwrap();

    assert_eq!(reply.opcode(), Opcode::BootReply);
    assert_eq!(reply.xid(), 0x1234);
    assert_eq!(reply.hardware_addr(), &CHADDR);
    assert_eq!(reply.yiaddr(), Ipv4Addr::new(10, 0, 0, 101));
    assert_eq!(reply.siaddr(), SERVER_IP);
    assert!(reply.flags().broadcast());
    assert_reply_options(&reply, MessageType::Offer);
    assert_eq!(server.allocator().allocated(), 1);
}

#[test]
fn test_request_is_acknowledged_with_requested_address() {
    let mut server = server(RequestPolicy::EchoRequested);
    let requested = Ipv4Addr::new(10, 0, 0, 101);

    let reply = server.handle(&request(0x1234, requested)).unwrap().unwrap();

    assert_eq!(reply.yiaddr(), requested);
    assert_eq!(reply.xid(), 0x1234);
    assert_reply_options(&reply, MessageType::Ack);
    // Requests do not consume pool addresses.
    assert_eq!(server.allocator().allocated(), 0);
}

#[test]
fn test_reply_keeps_request_header() {
    let mut server = server(RequestPolicy::EchoRequested);
    let mut msg = DhcpMessage::decode(&discover(7)).unwrap();
    msg.set_secs(9)
        .set_flags(Flags::default())
        .set_ciaddr(Ipv4Addr::new(1, 2, 3, 4));

    let reply = server.handle_message(&msg).unwrap().unwrap();
    assert_eq!(reply.secs(), 9);
    assert!(!reply.flags().broadcast());
    assert_eq!(reply.ciaddr(), Ipv4Addr::UNSPECIFIED);
    assert_eq!(reply.sname(), msg.sname());
}

#[test]
fn test_ignored_messages() {
    let mut server = server(RequestPolicy::EchoRequested);

    let mut boot_reply = DhcpMessage::decode(&discover(1)).unwrap();
    boot_reply.set_opcode(Opcode::BootReply);
    assert!(server.handle_message(&boot_reply).unwrap().is_none());

    let mut untyped = DhcpMessage::decode(&discover(2)).unwrap();
    untyped
        .set_options(OptionsBuilder::new().finish().unwrap())
        .unwrap();
    assert!(server.handle_message(&untyped).unwrap().is_none());

    let mut bare_request = DhcpMessage::decode(&discover(3)).unwrap();
    bare_request
        .set_options(
            OptionsBuilder::new()
                .insert(DhcpOption::MessageType(MessageType::Request))
                .finish()
                .unwrap(),
        )
        .unwrap();
    assert!(server.handle_message(&bare_request).unwrap().is_none());

    let mut release = DhcpMessage::decode(&discover(4)).unwrap();
    release
        .set_options(
            OptionsBuilder::new()
                .insert(DhcpOption::MessageType(MessageType::Unknown(7)))
                .finish()
                .unwrap(),
        )
        .unwrap();
    assert!(server.handle_message(&release).unwrap().is_none());

    assert_eq!(server.allocator().allocated(), 0);
}

#[test]
fn test_malformed_messages_are_errors() {
    let mut server = server(RequestPolicy::EchoRequested);

    assert!(matches!(
        server.handle(&[0u8; 300]),
        Err(DhcpError::Truncated { actual: 300, .. })
    ));

    let mut packet = discover(1);
    // Two maximal entries in a row; the second runs off the option area.
    let options_start = crate::v4::message::HEADER_LEN + 4;
    packet[options_start..options_start + 2].copy_from_slice(&[12, 255]);
    packet[options_start + 257..options_start + 259].copy_from_slice(&[12, 255]);
    assert!(matches!(
        server.handle(&packet),
        Err(DhcpError::OptionsMalformed(_))
    ));
    assert_eq!(server.allocator().allocated(), 0);
}

#[test]
fn test_exhausted_pool_stops_all_replies() {
    let mut server = server(RequestPolicy::EchoRequested);

    for i in 0..50u32 {
        let reply = server.handle(&discover(i)).unwrap().unwrap();
        assert_eq!(reply.yiaddr(), Ipv4Addr::new(10, 0, 0, 101 + i as u8));
    }
    assert!(server.allocator().is_exhausted());

    assert!(matches!(
        server.handle(&discover(50)),
        Err(DhcpError::PoolExhausted { .. })
    ));
    assert!(matches!(
        server.handle(&request(49, Ipv4Addr::new(10, 0, 0, 150))),
        Err(DhcpError::PoolExhausted { .. })
    ));
}

#[test]
fn test_offered_only_policy() {
    let mut server = server(RequestPolicy::OfferedOnly);

    let offer = server.handle(&discover(0x42)).unwrap().unwrap();
    let offered = offer.yiaddr();

    // Unknown xid, then a different address for a known xid.
    assert!(server.handle(&request(0x43, offered)).unwrap().is_none());
    assert!(server
        .handle(&request(0x42, Ipv4Addr::new(10, 0, 0, 140)))
        .unwrap()
        .is_none());

    let ack = server.handle(&request(0x42, offered)).unwrap().unwrap();
    assert_eq!(ack.yiaddr(), offered);
    assert_eq!(ack.message_type().unwrap(), MessageType::Ack);

    // The offer is consumed by the Ack.
    assert!(server.handle(&request(0x42, offered)).unwrap().is_none());
}

#[test]
fn test_offered_only_forgets_offers_on_exhaustion() {
    let mut config = ServerConfig::new("lo".to_string(), SERVER_IP);
    config.request_policy = RequestPolicy::OfferedOnly;
    config.pool_end = 103;
    let mut server = RogueServer::new(config).unwrap();

    server.handle(&discover(1)).unwrap().unwrap();
    server.handle(&discover(2)).unwrap().unwrap();
    assert_eq!(server.pending_offers(), 2);

    // The last address empties the pool; nothing can be acknowledged now.
    let last = server.handle(&discover(3)).unwrap().unwrap();
    assert_eq!(last.yiaddr(), Ipv4Addr::new(10, 0, 0, 103));
    assert_eq!(server.pending_offers(), 0);
    assert!(matches!(
        server.handle(&request(1, Ipv4Addr::new(10, 0, 0, 101))),
        Err(DhcpError::PoolExhausted { .. })
    ));
}

/// In-memory datagram link fed from a channel.
struct MockLink {
    inbound: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    sent: StdMutex<Vec<(Vec<u8>, SocketAddr)>>,
}

impl MockLink {
    fn new() -> (Self, mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Self {
            inbound: Mutex::new(rx),
            sent: StdMutex::new(Vec::new()),
        };
        (link, tx)
    }

    fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for MockLink {
    async fn send_to(&self, packet: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.sent.lock().unwrap().push((packet.to_vec(), target));
        Ok(packet.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self.inbound.lock().await.recv().await {
            Some((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            None => Err(io::ErrorKind::ConnectionAborted.into()),
        }
    }
}

#[tokio::test]
async fn test_run_serves_until_link_closes() {
    let mut server = server(RequestPolicy::EchoRequested);
    let (dhcp, dhcp_tx) = MockLink::new();
    let (side_channel, control_tx) = MockLink::new();
    let client = SocketAddr::from((Ipv4Addr::UNSPECIFIED, DHCP_CLIENT_PORT));

    control_tx
        .send((b"hello gateway\n".to_vec(), client))
        .unwrap();
    dhcp_tx.send((discover(0x1234), client)).unwrap();
    dhcp_tx.send((vec![0u8; 64], client)).unwrap();
    dhcp_tx
        .send((request(0x1234, Ipv4Addr::new(10, 0, 0, 101)), client))
        .unwrap();
    drop(dhcp_tx);

    let result = server.run(&dhcp, &side_channel).await;
    assert!(matches!(result, Err(DhcpError::Io(_))));

    let sent = dhcp.sent();
    assert_eq!(sent.len(), 2);
    for (_, target) in &sent {
        assert_eq!(*target, SocketAddr::from((Ipv4Addr::BROADCAST, DHCP_CLIENT_PORT)));
    }
    let offer = DhcpMessage::decode(&sent[0].0).unwrap();
    assert_eq!(offer.message_type().unwrap(), MessageType::Offer);
    let ack = DhcpMessage::decode(&sent[1].0).unwrap();
    assert_eq!(ack.message_type().unwrap(), MessageType::Ack);
    assert_eq!(ack.yiaddr(), Ipv4Addr::new(10, 0, 0, 101));

    assert!(side_channel.sent().is_empty());
}
