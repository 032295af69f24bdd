//! DHCP option area handling
//!
//! The option area is a fixed 312-byte region that starts with the magic
//! cookie and carries a sequence of `(code, length, value)` entries closed by
//! the End marker. Everything here checks lengths against that bound before
//! reading or writing.

use crate::error::{DhcpError, Malformation};
use bytes::{BufMut as _, Bytes, BytesMut};
use std::net::Ipv4Addr;

/// Width of the option area inside a DHCP frame.
pub const OPTIONS_LEN: usize = 312;

/// Marker that identifies the option area as DHCP rather than plain BOOTP.
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

const COOKIE_LEN: usize = MAGIC_COOKIE.len();

/// Option codes this engine reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionCode {
    Pad,
    Router,
    DomainNameServer,
    RequestedIpAddress,
    AddressLeaseTime,
    MessageType,
    ServerIdentifier,
    End,
    Unknown(u8),
}

impl From<u8> for OptionCode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Pad,
            3 => Self::Router,
            6 => Self::DomainNameServer,
            50 => Self::RequestedIpAddress,
            51 => Self::AddressLeaseTime,
            53 => Self::MessageType,
            54 => Self::ServerIdentifier,
            255 => Self::End,
            other => Self::Unknown(other),
        }
    }
}

impl From<OptionCode> for u8 {
    fn from(value: OptionCode) -> Self {
        match value {
            OptionCode::Pad => 0,
            OptionCode::Router => 3,
            OptionCode::DomainNameServer => 6,
            OptionCode::RequestedIpAddress => 50,
            OptionCode::AddressLeaseTime => 51,
            OptionCode::MessageType => 53,
            OptionCode::ServerIdentifier => 54,
            OptionCode::End => 255,
            OptionCode::Unknown(code) => code,
        }
    }
}

const PAD: u8 = 0;
const END: u8 = 255;

/// DHCP message types carried in option 53.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Ack,
    Nak,
    Unknown(u8),
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            5 => Self::Ack,
            6 => Self::Nak,
            other => Self::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Discover => 1,
            MessageType::Offer => 2,
            MessageType::Request => 3,
            MessageType::Ack => 5,
            MessageType::Nak => 6,
            MessageType::Unknown(other) => other,
        }
    }
}

/// A raw option as it sits on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionEntry {
    code: u8,
    value: Bytes,
}

impl OptionEntry {
    /// Creates an entry, rejecting the framing codes and values longer than
    /// a one-byte length field can describe.
    pub fn new(code: impl Into<u8>, value: impl Into<Bytes>) -> Result<Self, DhcpError> {
        let code = code.into();
        let value = value.into();
        if code == PAD || code == END {
            return Err(DhcpError::InvalidOption {
                code,
                reason: "Pad and End carry no value",
            });
        }
        if value.len() > usize::from(u8::MAX) {
            return Err(DhcpError::InvalidOption {
                code,
                reason: "value longer than 255 bytes",
            });
        }
        Ok(Self { code, value })
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Value length as written in the length byte.
    pub fn len(&self) -> u8 {
        // `new` and the parser both bound the value to 255 bytes.
        self.value.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    fn wire_len(&self) -> usize {
        2 + self.value.len()
    }
}

/// How a walk over the option area stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The End marker was read.
    End,
    /// The cursor reached the end of the area without an End marker.
    Bound,
    /// An entry's declared length ran past the area; the entry was dropped.
    Overrun(Malformation),
}

/// Single-pass iterator over the entries of an option area.
#[derive(Debug)]
pub struct OptionIter {
    area: Bytes,
    cursor: usize,
    termination: Option<Termination>,
}

impl OptionIter {
    /// Returns how the walk ended, or `None` while entries remain.
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    fn stop(&mut self, reason: Termination) -> Option<OptionEntry> {
        self.termination = Some(reason);
        None
    }
}

impl Iterator for OptionIter {
    type Item = OptionEntry;

    fn next(&mut self) -> Option<OptionEntry> {
        if self.termination.is_some() {
            return None;
        }

        loop {
            let Some(&code) = self.area.get(self.cursor) else {
                return self.stop(Termination::Bound);
            };
            match code {
                PAD => {
                    self.cursor += 1;
                    continue;
                }
                END => return self.stop(Termination::End),
                _ => {}
            }

            let Some(&declared) = self.area.get(self.cursor + 1) else {
                return self.stop(Termination::Overrun(Malformation::Overrun {
                    code,
                    declared: 0,
                    remaining: 0,
                }));
            };
            let start = self.cursor + 2;
            let end = start + usize::from(declared);
            if end > self.area.len() {
                return self.stop(Termination::Overrun(Malformation::Overrun {
                    code,
                    declared: usize::from(declared),
                    remaining: self.area.len() - start,
                }));
            }

            self.cursor = end;
            return Some(OptionEntry {
                code,
                value: self.area.slice(start..end),
            });
        }
    }
}

/// Walks the entries of `area`, skipping the cookie without checking it.
pub fn parse(area: &Bytes) -> OptionIter {
    OptionIter {
        area: area.clone(),
        cursor: COOKIE_LEN.min(area.len()),
        termination: None,
    }
}

/// Checks that `area` begins with the magic cookie.
pub fn validate_cookie(area: &[u8]) -> Result<(), DhcpError> {
    if area.starts_with(&MAGIC_COOKIE) {
        Ok(())
    } else {
        Err(Malformation::BadCookie.into())
    }
}

/// Returns the first entry with `code`.
///
/// Fails with `OptionNotFound` when the End marker comes first, and with
/// `OptionsMalformed` when the walk ran off the area or hit an overrun.
pub fn find(area: &Bytes, code: impl Into<u8>) -> Result<OptionEntry, DhcpError> {
    let code = code.into();
    let mut entries = parse(area);
    if let Some(entry) = entries.by_ref().find(|entry| entry.code == code) {
        return Ok(entry);
    }
    match entries.termination() {
        Some(Termination::End) => Err(DhcpError::OptionNotFound(code)),
        Some(Termination::Overrun(malformation)) => Err(malformation.into()),
        Some(Termination::Bound) | None => Err(Malformation::MissingEnd.into()),
    }
}

/// Writes cookie, entries and End marker, zero-padded to [`OPTIONS_LEN`].
pub fn build(entries: &[OptionEntry]) -> Result<Bytes, DhcpError> {
    let needed = COOKIE_LEN + entries.iter().map(OptionEntry::wire_len).sum::<usize>() + 1;
    if needed > OPTIONS_LEN {
        return Err(DhcpError::OptionsOverflow {
            needed,
            capacity: OPTIONS_LEN,
        });
    }

    let mut area = BytesMut::with_capacity(OPTIONS_LEN);
    area.put_slice(&MAGIC_COOKIE);
    for entry in entries {
        area.put_u8(entry.code);
        area.put_u8(entry.len());
        area.put_slice(&entry.value);
    }
    area.put_u8(END);
    area.put_bytes(0, OPTIONS_LEN - area.len());
    Ok(area.freeze())
}

/// The options this engine understands, in typed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpOption {
    MessageType(MessageType),
    RequestedIpAddress(Ipv4Addr),
    ServerIdentifier(Ipv4Addr),
    AddressLeaseTime(u32),
    Router(Ipv4Addr),
    DomainNameServer(Ipv4Addr),
}

impl DhcpOption {
    pub fn code(&self) -> OptionCode {
        match self {
            Self::MessageType(_) => OptionCode::MessageType,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier,
            Self::AddressLeaseTime(_) => OptionCode::AddressLeaseTime,
            Self::Router(_) => OptionCode::Router,
            Self::DomainNameServer(_) => OptionCode::DomainNameServer,
        }
    }

    pub fn to_entry(&self) -> OptionEntry {
        let value = match *self {
            Self::MessageType(kind) => Bytes::copy_from_slice(&[u8::from(kind)]),
            Self::AddressLeaseTime(secs) => Bytes::copy_from_slice(&secs.to_be_bytes()),
            Self::RequestedIpAddress(ip)
            | Self::ServerIdentifier(ip)
            | Self::Router(ip)
            | Self::DomainNameServer(ip) => Bytes::copy_from_slice(&ip.octets()),
        };
        OptionEntry {
            code: self.code().into(),
            value,
        }
    }

    /// Interprets a raw entry. Router and DNS lists yield their first address.
    pub fn from_entry(entry: &OptionEntry) -> Result<Self, DhcpError> {
        let code = entry.code;
        let value = entry.value.as_ref();
        let invalid = |reason| DhcpError::InvalidOption { code, reason };

        let address = || -> Result<Ipv4Addr, DhcpError> {
            match value {
                [a, b, c, d] => Ok(Ipv4Addr::new(*a, *b, *c, *d)),
                _ => Err(invalid("expected a 4-byte address")),
            }
        };
        let first_address = || -> Result<Ipv4Addr, DhcpError> {
            if value.is_empty() || value.len() % 4 != 0 {
                return Err(invalid("expected a list of 4-byte addresses"));
            }
            Ok(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
        };

        match OptionCode::from(code) {
            OptionCode::MessageType => match value {
                [kind] => Ok(Self::MessageType(MessageType::from(*kind))),
                _ => Err(invalid("expected a single byte")),
            },
            OptionCode::RequestedIpAddress => Ok(Self::RequestedIpAddress(address()?)),
            OptionCode::ServerIdentifier => Ok(Self::ServerIdentifier(address()?)),
            OptionCode::AddressLeaseTime => match value {
                [a, b, c, d] => Ok(Self::AddressLeaseTime(u32::from_be_bytes([*a, *b, *c, *d]))),
                _ => Err(invalid("expected a 4-byte duration")),
            },
            OptionCode::Router => Ok(Self::Router(first_address()?)),
            OptionCode::DomainNameServer => Ok(Self::DomainNameServer(first_address()?)),
            OptionCode::Pad | OptionCode::End | OptionCode::Unknown(_) => {
                Err(invalid("unsupported option"))
            }
        }
    }
}

/// Collects typed options and lays them out with [`build`].
#[derive(Debug, Default, Clone)]
pub struct OptionsBuilder {
    entries: Vec<OptionEntry>,
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, option: DhcpOption) -> &mut Self {
        self.entries.push(option.to_entry());
        self
    }

    pub fn finish(&self) -> Result<Bytes, DhcpError> {
        build(&self.entries)
    }
}
