//! Best-effort automatic port forwarding through the local gateway.
//!
//! Discovery and mapping run under a hard 5-second budget. Failure is
//! reported to the caller (who surfaces it as a server event) and never
//! blocks startup; teardown failures are logged and swallowed.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use igd_next::aio::Gateway;
use igd_next::aio::tokio::{Tokio, search_gateway};
use igd_next::{PortMappingProtocol, SearchOptions};

/// Total budget for gateway discovery plus both mappings.
pub const DISCOVERY_BUDGET: Duration = Duration::from_secs(5);

/// Description attached to the mappings, visible in router UIs.
const MAPPING_NAME: &str = "rift game server";

/// Errors from the port-forwarding attempt. All of them are non-fatal to
/// the server.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// No UPnP gateway answered within the budget.
    #[error("gateway discovery failed: {0}")]
    Discovery(#[from] igd_next::SearchError),

    /// The gateway refused a mapping.
    #[error("port mapping failed: {0}")]
    Mapping(#[from] igd_next::AddPortError),

    /// Could not determine the LAN-facing local address.
    #[error("local address lookup failed: {0}")]
    LocalAddr(#[from] std::io::Error),

    /// The whole attempt exceeded [`DISCOVERY_BUDGET`].
    #[error("port forwarding timed out after {DISCOVERY_BUDGET:?}")]
    Timeout,
}

/// Live gateway mappings, removed best-effort on [`close`](Self::close).
pub struct ForwardHandle {
    gateway: Gateway<Tokio>,
    tcp_port: u16,
    udp_port: u16,
}

impl ForwardHandle {
    /// Removes both mappings. Failures are logged; the router's lease will
    /// eventually expire them anyway.
    pub async fn close(self) {
        if let Err(e) = self
            .gateway
            .remove_port(PortMappingProtocol::TCP, self.tcp_port)
            .await
        {
            tracing::warn!("failed to remove TCP port mapping: {e}");
        }
        if let Err(e) = self
            .gateway
            .remove_port(PortMappingProtocol::UDP, self.udp_port)
            .await
        {
            tracing::warn!("failed to remove UDP port mapping: {e}");
        }
    }
}

/// Attempts to map `tcp_port` and `udp_port` on the gateway, within
/// [`DISCOVERY_BUDGET`].
pub async fn open(tcp_port: u16, udp_port: u16) -> Result<ForwardHandle, ForwardError> {
    match tokio::time::timeout(DISCOVERY_BUDGET, open_inner(tcp_port, udp_port)).await {
        Ok(result) => result,
        Err(_) => Err(ForwardError::Timeout),
    }
}

async fn open_inner(tcp_port: u16, udp_port: u16) -> Result<ForwardHandle, ForwardError> {
    let options = SearchOptions {
        timeout: Some(Duration::from_secs(3)),
        ..SearchOptions::default()
    };
    let gateway = search_gateway(options).await?;
    let local_ip = lan_address()?;

    // Lease 0 = indefinite; close() removes the mappings on shutdown.
    gateway
        .add_port(
            PortMappingProtocol::TCP,
            tcp_port,
            SocketAddr::new(local_ip, tcp_port),
            0,
            MAPPING_NAME,
        )
        .await?;
    gateway
        .add_port(
            PortMappingProtocol::UDP,
            udp_port,
            SocketAddr::new(local_ip, udp_port),
            0,
            MAPPING_NAME,
        )
        .await?;

    tracing::info!("forwarded tcp:{tcp_port} udp:{udp_port} at {local_ip}");
    Ok(ForwardHandle {
        gateway,
        tcp_port,
        udp_port,
    })
}

/// The LAN-facing local address, found by routing a UDP socket toward a
/// public address. Nothing is sent; `connect` only selects the route.
fn lan_address() -> std::io::Result<IpAddr> {
    let probe = std::net::UdpSocket::bind("0.0.0.0:0")?;
    probe.connect("8.8.8.8:80")?;
    Ok(probe.local_addr()?.ip())
}
