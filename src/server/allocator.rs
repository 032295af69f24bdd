use crate::error::DhcpError;
use std::net::Ipv4Addr;

/// Hands out addresses in the server's /24 in strictly increasing order.
///
/// Addresses are never returned to the pool; running past the last host
/// number leaves the allocator exhausted for good.
#[derive(Debug, Clone)]
pub struct LeaseAllocator {
    network: [u8; 3],
    start: u8,
    end: u8,
    next: u16,
}

impl LeaseAllocator {
    pub fn new(server_ip: Ipv4Addr, start: u8, end: u8) -> Result<Self, DhcpError> {
        if start > end {
            return Err(DhcpError::Config(format!(
                "pool start {start} is above pool end {end}"
            )));
        }
        let [a, b, c, _] = server_ip.octets();
        Ok(Self {
            network: [a, b, c],
            start,
            end,
            next: u16::from(start),
        })
    }

    fn address(&self, host: u8) -> Ipv4Addr {
        let [a, b, c] = self.network;
        Ipv4Addr::new(a, b, c, host)
    }

    pub fn first(&self) -> Ipv4Addr {
        self.address(self.start)
    }

    pub fn last(&self) -> Ipv4Addr {
        self.address(self.end)
    }

    pub fn is_exhausted(&self) -> bool {
        self.next > u16::from(self.end)
    }

    /// Number of addresses handed out so far.
    pub fn allocated(&self) -> usize {
        usize::from(self.next - u16::from(self.start))
    }

    pub fn remaining(&self) -> usize {
        usize::from((u16::from(self.end) + 1).saturating_sub(self.next))
    }

    pub fn exhausted_error(&self) -> DhcpError {
        DhcpError::PoolExhausted {
            start: self.first(),
            end: self.last(),
        }
    }

    pub fn allocate(&mut self) -> Result<Ipv4Addr, DhcpError> {
        if self.is_exhausted() {
            return Err(self.exhausted_error());
        }
        // `next` is at most `end` here, so it fits in the host byte.
        let host = self.next as u8;
        self.next += 1;
        Ok(self.address(host))
    }
}
