//! Fixed-layout DHCP message codec
//!
//! Every frame is exactly [`FRAME_LEN`] bytes: the 236-byte BOOTP header
//! followed by the 312-byte option area. Multi-byte integers are big-endian.

use super::options::{self, DhcpOption, MessageType, OptionCode, OptionEntry, OptionsBuilder, OPTIONS_LEN};
use crate::error::DhcpError;
use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use std::net::Ipv4Addr;

pub const CHADDR_LEN: usize = 16;
pub const SNAME_LEN: usize = 64;
pub const FILE_LEN: usize = 128;

/// Bytes before the option area.
pub const HEADER_LEN: usize = 4 + 4 + 2 + 2 + 4 * 4 + CHADDR_LEN + SNAME_LEN + FILE_LEN;

/// Size of every encoded message.
pub const FRAME_LEN: usize = HEADER_LEN + OPTIONS_LEN;

pub const HTYPE_ETHERNET: u8 = 1;
pub const HLEN_ETHERNET: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    BootRequest,
    BootReply,
    Unknown(u8),
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::BootRequest,
            2 => Self::BootReply,
            other => Self::Unknown(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::BootRequest => 1,
            Opcode::BootReply => 2,
            Opcode::Unknown(other) => other,
        }
    }
}

/// The `flags` field. Only the broadcast bit is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u16);

impl Flags {
    const BROADCAST: u16 = 0x8000;

    pub fn new(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn broadcast(self) -> bool {
        self.0 & Self::BROADCAST != 0
    }

    pub fn set_broadcast(self) -> Self {
        Self(self.0 | Self::BROADCAST)
    }
}

/// A decoded DHCP message.
///
/// The option area is kept as raw bytes; read it through [`options`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    opcode: Opcode,
    htype: u8,
    hlen: u8,
    hops: u8,
    xid: u32,
    secs: u16,
    flags: Flags,
    ciaddr: Ipv4Addr,
    yiaddr: Ipv4Addr,
    siaddr: Ipv4Addr,
    giaddr: Ipv4Addr,
    chaddr: [u8; CHADDR_LEN],
    sname: [u8; SNAME_LEN],
    file: [u8; FILE_LEN],
    options: Bytes,
}

impl Default for DhcpMessage {
    fn default() -> Self {
        Self {
            opcode: Opcode::BootRequest,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: Flags::default(),
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0; CHADDR_LEN],
            sname: [0; SNAME_LEN],
            file: [0; FILE_LEN],
            options: empty_options(),
        }
    }
}

fn empty_options() -> Bytes {
    let mut area = BytesMut::zeroed(OPTIONS_LEN);
    area[..options::MAGIC_COOKIE.len()].copy_from_slice(&options::MAGIC_COOKIE);
    area[options::MAGIC_COOKIE.len()] = u8::from(OptionCode::End);
    area.freeze()
}

impl DhcpMessage {
    /// Serializes the message into a full frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(FRAME_LEN);
        buf.put_u8(self.opcode.into());
        buf.put_u8(self.htype);
        buf.put_u8(self.hlen);
        buf.put_u8(self.hops);
        buf.put_u32(self.xid);
        buf.put_u16(self.secs);
        buf.put_u16(self.flags.bits());
        for addr in [self.ciaddr, self.yiaddr, self.siaddr, self.giaddr] {
            buf.put_slice(&addr.octets());
        }
        buf.put_slice(&self.chaddr);
        buf.put_slice(&self.sname);
        buf.put_slice(&self.file);
        // `set_options` keeps the area at exactly OPTIONS_LEN bytes.
        buf.put_slice(&self.options);
        buf.to_vec()
    }

    /// Parses a frame. Trailing bytes past [`FRAME_LEN`] are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, DhcpError> {
        if data.len() < FRAME_LEN {
            return Err(DhcpError::Truncated {
                actual: data.len(),
                expected: FRAME_LEN,
            });
        }

        let mut buf = &data[..FRAME_LEN];
        let opcode = Opcode::from(buf.get_u8());
        let htype = buf.get_u8();
        let hlen = buf.get_u8();
        let hops = buf.get_u8();
        let xid = buf.get_u32();
        let secs = buf.get_u16();
        let flags = Flags(buf.get_u16());
        let ciaddr = Ipv4Addr::from(buf.get_u32());
        let yiaddr = Ipv4Addr::from(buf.get_u32());
        let siaddr = Ipv4Addr::from(buf.get_u32());
        let giaddr = Ipv4Addr::from(buf.get_u32());
        let mut chaddr = [0; CHADDR_LEN];
        buf.copy_to_slice(&mut chaddr);
        let mut sname = [0; SNAME_LEN];
        buf.copy_to_slice(&mut sname);
        let mut file = [0; FILE_LEN];
        buf.copy_to_slice(&mut file);
        let options = Bytes::copy_from_slice(buf);

        Ok(Self {
            opcode,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options,
        })
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn htype(&self) -> u8 {
        self.htype
    }

    pub fn hlen(&self) -> u8 {
        self.hlen
    }

    pub fn hops(&self) -> u8 {
        self.hops
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn secs(&self) -> u16 {
        self.secs
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn ciaddr(&self) -> Ipv4Addr {
        self.ciaddr
    }

    pub fn yiaddr(&self) -> Ipv4Addr {
        self.yiaddr
    }

    pub fn siaddr(&self) -> Ipv4Addr {
        self.siaddr
    }

    pub fn giaddr(&self) -> Ipv4Addr {
        self.giaddr
    }

    /// The whole 16-byte `chaddr` field.
    pub fn chaddr(&self) -> &[u8; CHADDR_LEN] {
        &self.chaddr
    }

    /// The significant part of `chaddr`, as declared by `hlen`.
    pub fn hardware_addr(&self) -> &[u8] {
        &self.chaddr[..usize::from(self.hlen).min(CHADDR_LEN)]
    }

    pub fn sname(&self) -> &[u8; SNAME_LEN] {
        &self.sname
    }

    pub fn file(&self) -> &[u8; FILE_LEN] {
        &self.file
    }

    /// Raw option area, cookie included.
    pub fn options(&self) -> &Bytes {
        &self.options
    }

    pub fn option(&self, code: OptionCode) -> Result<OptionEntry, DhcpError> {
        options::find(&self.options, code)
    }

    /// Reads and interprets one option.
    pub fn typed_option(&self, code: OptionCode) -> Result<DhcpOption, DhcpError> {
        DhcpOption::from_entry(&self.option(code)?)
    }

    pub fn message_type(&self) -> Result<MessageType, DhcpError> {
        match self.typed_option(OptionCode::MessageType)? {
            DhcpOption::MessageType(kind) => Ok(kind),
            _ => Err(DhcpError::InvalidOption {
                code: OptionCode::MessageType.into(),
                reason: "not a message type",
            }),
        }
    }

    pub fn set_opcode(&mut self, opcode: Opcode) -> &mut Self {
        self.opcode = opcode;
        self
    }

    pub fn set_htype(&mut self, htype: u8) -> &mut Self {
        self.htype = htype;
        self
    }

    pub fn set_hops(&mut self, hops: u8) -> &mut Self {
        self.hops = hops;
        self
    }

    pub fn set_xid(&mut self, xid: u32) -> &mut Self {
        self.xid = xid;
        self
    }

    pub fn set_secs(&mut self, secs: u16) -> &mut Self {
        self.secs = secs;
        self
    }

    pub fn set_flags(&mut self, flags: Flags) -> &mut Self {
        self.flags = flags;
        self
    }

    pub fn set_ciaddr(&mut self, addr: Ipv4Addr) -> &mut Self {
        self.ciaddr = addr;
        self
    }

    pub fn set_yiaddr(&mut self, addr: Ipv4Addr) -> &mut Self {
        self.yiaddr = addr;
        self
    }

    pub fn set_siaddr(&mut self, addr: Ipv4Addr) -> &mut Self {
        self.siaddr = addr;
        self
    }

    pub fn set_giaddr(&mut self, addr: Ipv4Addr) -> &mut Self {
        self.giaddr = addr;
        self
    }

    /// Copies `addr` into `chaddr` and sets `hlen` to match.
    ///
    /// Addresses longer than 16 bytes are cut to the field width.
    pub fn set_chaddr(&mut self, addr: &[u8]) -> &mut Self {
        let len = addr.len().min(CHADDR_LEN);
        self.chaddr = [0; CHADDR_LEN];
        self.chaddr[..len].copy_from_slice(&addr[..len]);
        self.hlen = u8::try_from(len).unwrap_or(u8::MAX);
        self
    }

    pub fn set_sname(&mut self, sname: [u8; SNAME_LEN]) -> &mut Self {
        self.sname = sname;
        self
    }

    pub fn set_file(&mut self, file: [u8; FILE_LEN]) -> &mut Self {
        self.file = file;
        self
    }

    /// Replaces the option area. Use [`options::build`] or
    /// [`OptionsBuilder`] to produce it.
    ///
    /// Shorter areas are zero-padded to [`OPTIONS_LEN`], the same bytes
    /// `decode` reads back from the wire.
    pub fn set_options(&mut self, options: Bytes) -> Result<&mut Self, DhcpError> {
        if options.len() > OPTIONS_LEN {
            return Err(DhcpError::OptionsOverflow {
                needed: options.len(),
                capacity: OPTIONS_LEN,
            });
        }
        self.options = if options.len() == OPTIONS_LEN {
            options
        } else {
            let mut area = BytesMut::zeroed(OPTIONS_LEN);
            area[..options.len()].copy_from_slice(&options);
            area.freeze()
        };
        Ok(self)
    }
}

/// Constructs a DHCP Discover message.
pub fn build_dhcp_discover(mac_addr: &[u8], xid: u32) -> Result<Vec<u8>, DhcpError> {
    let mut msg = DhcpMessage::default();
    msg.set_opcode(Opcode::BootRequest)
        .set_chaddr(mac_addr)
        .set_htype(HTYPE_ETHERNET)
        .set_hops(0)
        .set_xid(xid)
        .set_secs(0)
        .set_flags(Flags::default().set_broadcast())
        .set_ciaddr(Ipv4Addr::UNSPECIFIED);

    // Message Type (53) - DHCPDISCOVER
    let options = OptionsBuilder::new()
        .insert(DhcpOption::MessageType(MessageType::Discover))
        .finish()?;
    msg.set_options(options)?;

    Ok(msg.encode())
}

/// Constructs a DHCP Request for an address we were offered.
pub fn build_dhcp_request(
    mac_addr: &[u8],
    xid: u32,
    offered_ip: Ipv4Addr,
    server_ip: Ipv4Addr,
) -> Result<Vec<u8>, DhcpError> {
    let mut msg = DhcpMessage::default();
    msg.set_opcode(Opcode::BootRequest)
        .set_chaddr(mac_addr)
        .set_htype(HTYPE_ETHERNET)
        .set_xid(xid)
        .set_flags(Flags::default().set_broadcast())
        .set_ciaddr(Ipv4Addr::UNSPECIFIED); // not ours until the Ack

    let options = OptionsBuilder::new()
        .insert(DhcpOption::MessageType(MessageType::Request))
        .insert(DhcpOption::RequestedIpAddress(offered_ip))
        .insert(DhcpOption::ServerIdentifier(server_ip))
        .finish()?;
    msg.set_options(options)?;

    Ok(msg.encode())
}
