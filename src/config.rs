use crate::error::DhcpError;
use clap::{Parser, Subcommand};
use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;
pub const CONTROL_PORT: u16 = 547;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// The network interface to bind to (e.g., 'eth0', 'enp0s3')
    #[arg(short, long, global = true, default_value = "eth0")]
    pub interface: String,

    #[command(subcommand)]
    pub role: Role,
}

#[derive(Subcommand, Debug)]
pub enum Role {
    /// Exhaust a DHCP server's pool with spoofed handshakes
    Attack {
        /// Number of fake handshakes to run
        #[arg(short = 'n', long, default_value_t = 40)]
        iterations: usize,

        /// Seconds to wait for each reply
        #[arg(short, long, default_value_t = 2)]
        timeout: u64,

        #[arg(long, default_value_t = DHCP_SERVER_PORT)]
        server_port: u16,
    },

    /// Run the rogue DHCP server
    Server {
        /// Address to hand out as router, DNS and server id (default: the interface's)
        #[arg(long)]
        server_ip: Option<Ipv4Addr>,

        /// First host number of the pool
        #[arg(long, default_value_t = 101)]
        pool_start: u8,

        /// Last host number of the pool
        #[arg(long, default_value_t = 150)]
        pool_end: u8,

        /// Lease time in seconds
        #[arg(long, default_value_t = 120)]
        lease_time: u32,

        /// Only acknowledge requests for addresses this server offered
        #[arg(long)]
        offered_only: bool,
    },

    /// Obtain a lease like a regular host, then talk to the gateway
    Client {
        /// Hardware address to use (default: random)
        #[arg(long)]
        mac: Option<String>,

        /// Seconds to wait for each reply
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,

        /// Number of messages to read from stdin and send to the gateway
        #[arg(long, default_value_t = 5)]
        messages: usize,

        #[arg(long, default_value_t = DHCP_SERVER_PORT)]
        server_port: u16,
    },
}

/// Bounded retry for sends that fail at the OS boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub interface: String,
    pub client_port: u16,
    pub server_port: u16,
    pub broadcast_address: Ipv4Addr,
    pub reply_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(interface: String) -> Self {
        Self {
            interface,
            client_port: DHCP_CLIENT_PORT,
            server_port: DHCP_SERVER_PORT,
            broadcast_address: Ipv4Addr::BROADCAST,
            reply_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }

    /// The attacker polls with a shorter window.
    pub fn for_attacker(interface: String) -> Self {
        Self {
            reply_timeout: Duration::from_secs(2),
            ..Self::new(interface)
        }
    }

    pub fn server_target(&self) -> SocketAddr {
        SocketAddr::from((self.broadcast_address, self.server_port))
    }
}

#[derive(Debug, Clone)]
pub struct AttackConfig {
    pub client: ClientConfig,
    pub iterations: usize,
}

impl AttackConfig {
    pub fn new(interface: String) -> Self {
        Self {
            client: ClientConfig::for_attacker(interface),
            iterations: 40,
        }
    }
}

/// How the rogue server answers a Request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPolicy {
    /// Acknowledge whatever address option 50 asks for.
    #[default]
    EchoRequested,
    /// Acknowledge only addresses offered to the same xid.
    OfferedOnly,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub interface: String,
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    pub client_port: u16,
    pub control_port: u16,
    pub broadcast_address: Ipv4Addr,
    pub pool_start: u8,
    pub pool_end: u8,
    pub lease_time: u32,
    pub request_policy: RequestPolicy,
    pub retry: RetryPolicy,
}

impl ServerConfig {
    pub fn new(interface: String, server_ip: Ipv4Addr) -> Self {
        Self {
            interface,
            server_ip,
            server_port: DHCP_SERVER_PORT,
            client_port: DHCP_CLIENT_PORT,
            control_port: CONTROL_PORT,
            broadcast_address: Ipv4Addr::BROADCAST,
            pool_start: 101,
            pool_end: 150,
            lease_time: 120,
            request_policy: RequestPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), DhcpError> {
        if self.pool_start > self.pool_end {
            return Err(DhcpError::Config(format!(
                "pool start {} is above pool end {}",
                self.pool_start, self.pool_end
            )));
        }
        if self.server_ip.is_unspecified() {
            return Err(DhcpError::Config(
                "server address must not be 0.0.0.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn client_target(&self) -> SocketAddr {
        SocketAddr::from((self.broadcast_address, self.client_port))
    }
}
