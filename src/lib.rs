//! # Famine - DHCP Starvation Lab
//!
//! Famine demonstrates a DHCP pool-exhaustion attack with three roles that
//! share one DHCPv4 engine:
//!
//! - an attacker that completes many DORA (Discover, Offer, Request,
//!   Acknowledge) handshakes under spoofed hardware addresses,
//! - a rogue server that hands out a small sequential pool and names itself
//!   as gateway,
//! - a legitimate client that takes a lease and then talks to its gateway.
//!
//! ## Features
//!
//! - Fixed-layout DHCP codec with a bounds-checked option builder and walker
//! - Pure client state machine driven over any [`network::Transport`]
//! - Asynchronous operation using Tokio
//!
//! ## Example
//!
//! ```rust,no_run
//! use famine::{AttackConfig, AttackDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AttackConfig::new("eth0".to_string());
//!     let socket = famine::network::new_tokio_socket_bound_to_device(
//!         &config.client.interface,
//!         config.client.client_port,
//!     )?;
//!     let report = AttackDriver::new(&socket, config).run().await;
//!     println!("Took {} addresses", report.bound());
//!     Ok(())
//! }
//! ```

pub mod attack;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod network;
pub mod server;
pub mod v4;

pub use attack::{AttackDriver, AttackReport};
pub use client::{DhcpClient, Lease};
pub use config::{Args, AttackConfig, ClientConfig, RequestPolicy, RetryPolicy, ServerConfig};
pub use error::DhcpError;
pub use server::{LeaseAllocator, RogueServer};
