use crate::{config::RetryPolicy, error::DhcpError};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket},
};
use thiserror::Error;
use tokio::net::UdpSocket as TokioUdpSocket;

/// Defines all possible errors for socket operations.
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("Failed to create a new socket")]
    CreateSocket(#[source] io::Error),

    #[error("Failed to enable broadcast on socket")]
    SetBroadcast(#[source] io::Error),

    #[error("Failed to set SO_BINDTODEVICE on interface '{interface}'")]
    BindToDevice {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bind socket to port {port}")]
    BindSocket {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to set SO_REUSEADDR on socket")]
    SetReuseAddress(#[source] io::Error),

    #[error("Failed to set socket to non-blocking mode")]
    SetNonBlocking(#[source] io::Error),

    #[error("Failed to convert socket to TokioUdpSocket")]
    ConvertToTokio(#[source] io::Error),

    #[error("No interface named '{0}'")]
    InterfaceNotFound(String),

    #[error("Interface '{0}' has no IPv4 address")]
    NoIpv4Address(String),

    #[allow(dead_code)]
    #[error("Binding to a specific device is not implemented on this platform")]
    NotImplemented,
}

/// Datagram I/O the protocol engine runs on.
///
/// Implemented by tokio's `UdpSocket`; tests provide in-memory versions.
/// Callers bound `recv_from` with their own deadline.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send_to(&self, packet: &[u8], target: SocketAddr) -> io::Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl Transport for TokioUdpSocket {
    async fn send_to(&self, packet: &[u8], target: SocketAddr) -> io::Result<usize> {
        TokioUdpSocket::send_to(self, packet, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        TokioUdpSocket::recv_from(self, buf).await
    }
}

/// Sends `packet`, retrying failed sends with exponential backoff.
///
/// Gives up with [`DhcpError::Transport`] once `policy.max_attempts` sends
/// have failed.
pub async fn send_with_retry<T: Transport>(
    transport: &T,
    packet: &[u8],
    target: SocketAddr,
    policy: &RetryPolicy,
) -> Result<usize, DhcpError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match transport.send_to(packet, target).await {
            Ok(sent) => {
                tracing::debug!("Sent {} bytes to {}", sent, target);
                return Ok(sent);
            }
            Err(source) if attempt >= policy.max_attempts => {
                tracing::error!("Giving up on {} after {} failed sends", target, attempt);
                return Err(DhcpError::Transport {
                    target,
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    "Error sending packet to {} ({}), resending in {:?}",
                    target,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Creates a new `tokio::net::UdpSocket` bound to a specific network device and port.
///
/// This function handles the low-level socket configuration required for operations
/// like sending broadcast packets from a specific interface.
///
/// # Arguments
/// * `interface` - The name of the network interface (e.g., "eth0").
/// * `port` - The port number to bind the socket to.
#[cfg(target_os = "linux")]
pub fn new_tokio_socket_bound_to_device(
    interface: &str,
    port: u16,
) -> Result<TokioUdpSocket, SocketError> {
    use socket2::{Domain, Protocol, Socket, Type};
    use std::os::fd::AsRawFd;

    let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(SocketError::CreateSocket)?;

    // DHCP traffic is broadcast in both directions.
    socket2
        .set_broadcast(true)
        .map_err(SocketError::SetBroadcast)?;

    socket2
        .set_reuse_address(true)
        .map_err(SocketError::SetReuseAddress)?;

    // Raw syscall on a descriptor we own, with a length that matches the name.
    let ret = unsafe {
        libc::setsockopt(
            socket2.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            interface.as_ptr() as *const libc::c_void,
            interface.len() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(SocketError::BindToDevice {
            interface: interface.to_string(),
            source: io::Error::last_os_error(),
        });
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket2
        .bind(&addr.into())
        .map_err(|source| SocketError::BindSocket { port, source })?;

    let std_socket: StdUdpSocket = socket2.into();
    std_socket
        .set_nonblocking(true)
        .map_err(SocketError::SetNonBlocking)?;
    TokioUdpSocket::from_std(std_socket).map_err(SocketError::ConvertToTokio)
}

/// Fallback for non-Linux systems where `SO_BINDTODEVICE` is not available.
#[cfg(not(target_os = "linux"))]
pub fn new_tokio_socket_bound_to_device(
    _interface: &str,
    _port: u16,
) -> Result<TokioUdpSocket, SocketError> {
    Err(SocketError::NotImplemented)
}

/// Returns the first IPv4 address assigned to `interface`.
pub fn interface_ipv4(interface: &str) -> Result<Ipv4Addr, SocketError> {
    let iface = pnet_datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == interface)
        .ok_or_else(|| SocketError::InterfaceNotFound(interface.to_string()))?;

    iface
        .ips
        .iter()
        .find_map(|network| match network.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| SocketError::NoIpv4Address(interface.to_string()))
}
