//! DHCPv4 protocol implementation
//!
//! This module contains the DHCPv4-specific implementation including:
//! - The fixed-layout message codec
//! - The option area walker and builder
//! - The client exchange state machine

pub mod handler;
pub mod message;
pub mod options;


pub use handler::{ClientExchange, ExchangeState, HardwareAddr, TransactionContext};
pub use message::{build_dhcp_discover, build_dhcp_request, DhcpMessage, Flags, Opcode, FRAME_LEN};
pub use options::{DhcpOption, MessageType, OptionCode, OptionEntry, OptionsBuilder, OPTIONS_LEN};
