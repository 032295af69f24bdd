//! DHCP client driver
//!
//! This module contains the loop that runs a client state machine:
//! - Sending what the machine asks for, with bounded retries
//! - Waiting for replies against a single deadline per request
//! - Turning the final action into a lease or an error

use crate::{
    config::{ClientConfig, RetryPolicy},
    error::DhcpError,
    network::{self, Transport},
    v4::{handler::HardwareAddr, ClientExchange, TransactionContext},
};
use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::time::{self, Instant};

/// Actions a state machine asks the driver to perform.
#[derive(Debug)]
pub enum Action {
    /// Send the packet, then wait for a reply with a fresh deadline.
    Send(Vec<u8>, SocketAddr),
    /// Keep waiting against the current deadline.
    Wait,
    StoreLease(Lease),
    Exit,
}

/// External events a state machine reacts to.
pub enum Event<'a> {
    Start,
    PacketReceived { data: &'a [u8], from: SocketAddr },
    Timeout,
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("Start"),
            Self::PacketReceived { data, from } => f
                .debug_struct("PacketReceived")
                .field("len", &data.len())
                .field("from", from)
                .finish(),
            Self::Timeout => f.write_str("Timeout"),
        }
    }
}

/// Lease obtained by a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub offered_ip: Ipv4Addr,
    pub server_identifier: Option<Ipv4Addr>,
    /// Router option of the Ack.
    pub gateway: Option<Ipv4Addr>,
    pub dns_server: Option<Ipv4Addr>,
    pub lease_duration: Option<Duration>,
    pub hardware_addr: HardwareAddr,
    pub xid: u32,
}

/// Common interface of DHCP client state machines.
pub trait DhcpStateMachine {
    /// Handles one event and returns the next action to perform.
    fn handle_event(&mut self, event: Event) -> Result<Action, DhcpError>;
    /// Name of the current state, for logging.
    fn state_name(&self) -> &'static str;
}

pub struct DhcpClient<'t, T> {
    transport: &'t T,
    reply_timeout: Duration,
    retry: RetryPolicy,
    state_machine: Box<dyn DhcpStateMachine + Send>,
}

impl<'t, T: Transport> DhcpClient<'t, T> {
    pub fn new(
        transport: &'t T,
        reply_timeout: Duration,
        retry: RetryPolicy,
        state_machine: Box<dyn DhcpStateMachine + Send>,
    ) -> Self {
        Self {
            transport,
            reply_timeout,
            retry,
            state_machine,
        }
    }

    /// A client running one exchange for `transaction` with the settings of `config`.
    pub fn for_transaction(
        transport: &'t T,
        config: &ClientConfig,
        transaction: TransactionContext,
    ) -> Self {
        let exchange = ClientExchange::new(transaction, config.server_target());
        Self::new(
            transport,
            config.reply_timeout,
            config.retry.clone(),
            Box::new(exchange),
        )
    }

    /// Waits for a response until `deadline`, then hands it to the state machine.
    async fn wait_for_response(&mut self, deadline: Instant) -> Result<Action, DhcpError> {
        let mut buf = [0u8; 1500];
        match time::timeout_at(deadline, self.transport.recv_from(&mut buf)).await {
            Ok(Ok((len, addr))) => {
                tracing::debug!("Received {} bytes from {}", len, addr);
                self.state_machine.handle_event(Event::PacketReceived {
                    data: &buf[..len],
                    from: addr,
                })
            }
            Ok(Err(e)) => {
                tracing::error!("Socket receive error: {}", e);
                Err(DhcpError::Io(e))
            }
            Err(_) => {
                tracing::debug!("Timeout waiting for response");
                match self.state_machine.handle_event(Event::Timeout) {
                    Err(DhcpError::Timeout { state, .. }) => Err(DhcpError::Timeout {
                        waited: self.reply_timeout,
                        state,
                    }),
                    other => other,
                }
            }
        }
    }

    pub async fn run(&mut self) -> Result<Lease, DhcpError> {
        let mut next_action = self.state_machine.handle_event(Event::Start)?;
        let mut deadline = Instant::now() + self.reply_timeout;

        loop {
            tracing::debug!("State: {}", self.state_machine.state_name());

            match next_action {
                Action::Send(packet, addr) => {
                    network::send_with_retry(self.transport, &packet, addr, &self.retry).await?;
                    deadline = Instant::now() + self.reply_timeout;
                    next_action = self.wait_for_response(deadline).await?;
                }
                Action::Wait => {
                    next_action = self.wait_for_response(deadline).await?;
                }
                Action::StoreLease(lease) => {
                    tracing::info!(
                        "DHCP bind successful: {} bound to {}",
                        lease.hardware_addr,
                        lease.offered_ip
                    );
                    return Ok(lease);
                }
                Action::Exit => {
                    return Err(DhcpError::Critical(
                        "State machine exited prematurely".to_string(),
                    ));
                }
            }
        }
    }
}

/// Acquires one lease for `hardware_addr`, the cooperative client's path.
pub async fn acquire_lease<T: Transport>(
    transport: &T,
    config: &ClientConfig,
    hardware_addr: HardwareAddr,
) -> Result<Lease, DhcpError> {
    let transaction = TransactionContext::new(rand::random(), hardware_addr);
    DhcpClient::for_transaction(transport, config, transaction)
        .run()
        .await
}
