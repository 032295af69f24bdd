//! Free-text side channel between a bound client and its gateway.
//!
//! Unrelated to DHCP: once the victim has a lease it sends short text
//! messages to whatever the Ack named as router, which the rogue server logs.

use crate::{
    config::RetryPolicy,
    error::DhcpError,
    network::{self, Transport},
};
use std::net::SocketAddr;

/// Longest message carried on the wire, in bytes.
pub const MAX_MESSAGE_LEN: usize = 100;

/// Encodes `text`, cut to [`MAX_MESSAGE_LEN`] bytes on a character boundary.
pub fn encode_message(text: &str) -> Vec<u8> {
    let mut end = text.len().min(MAX_MESSAGE_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.as_bytes()[..end].to_vec()
}

/// Decodes a received message, dropping NUL padding and the line ending.
pub fn decode_message(data: &[u8]) -> String {
    let data = match data.iter().position(|&b| b == 0) {
        Some(nul) => &data[..nul],
        None => data,
    };
    String::from_utf8_lossy(data)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

pub async fn send_message<T: Transport>(
    transport: &T,
    target: SocketAddr,
    text: &str,
    retry: &RetryPolicy,
) -> Result<usize, DhcpError> {
    let payload = encode_message(text);
    network::send_with_retry(transport, &payload, target, retry).await
}

pub fn log_message(data: &[u8], from: SocketAddr) {
    tracing::info!("Message from client {}: {}", from, decode_message(data));
}
