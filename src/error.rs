use crate::network::SocketError;
use std::{io, net::Ipv4Addr, time::Duration};
use thiserror::Error;

/// Ways an option area can be unreadable.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformation {
    #[error("magic cookie missing")]
    BadCookie,

    #[error("option {code} declares {declared} bytes but only {remaining} remain")]
    Overrun {
        code: u8,
        declared: usize,
        remaining: usize,
    },

    #[error("no End marker before the end of the option area")]
    MissingEnd,
}

#[derive(Error, Debug)]
pub enum DhcpError {
    #[error("Socket operation failed")]
    Socket(#[from] SocketError),

    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("Message truncated: {actual} bytes, a DHCP frame needs {expected}")]
    Truncated { actual: usize, expected: usize },

    #[error("Malformed option area: {0}")]
    OptionsMalformed(Malformation),

    #[error("Options need {needed} bytes but the option area holds {capacity}")]
    OptionsOverflow { needed: usize, capacity: usize },

    #[error("Option {0} not present")]
    OptionNotFound(u8),

    #[error("Invalid value for option {code}: {reason}")]
    InvalidOption { code: u8, reason: &'static str },

    #[error("Reply does not belong to transaction {xid:#010x}")]
    TransactionMismatch { xid: u32 },

    #[error("No matching reply within {waited:?} while in state {state}")]
    Timeout {
        waited: Duration,
        state: &'static str,
    },

    #[error("Server refused the request with a NAK")]
    Nak,

    #[error("Send to {target} failed after {attempts} attempts")]
    Transport {
        target: std::net::SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("Address pool {start}..={end} is exhausted")]
    PoolExhausted { start: Ipv4Addr, end: Ipv4Addr },

    #[error("Failed to parse MAC address: {0}")]
    MacParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("State machine reached a critical failure: {0}")]
    Critical(String),
}

impl From<Malformation> for DhcpError {
    fn from(value: Malformation) -> Self {
        Self::OptionsMalformed(value)
    }
}
