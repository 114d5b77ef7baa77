//! Socket configuration shared by the server host and client connector.
//!
//! Encapsulates the platform-specific options (TCP_NODELAY, keepalive,
//! SO_REUSEADDR) applied to every stream, and builds the server listener
//! through `socket2` so backlog and address reuse are under our control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};

/// TCP options applied to every connection on both sides.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm; commands are latency-sensitive. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive probing. Default: true.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive probe. Default: 60 s.
    pub keepalive_idle: Duration,
    /// Interval between keepalive probes. Default: 10 s.
    pub keepalive_interval: Duration,
    /// Probes before the connection is declared dead (where supported).
    /// Default: 3.
    pub keepalive_retries: u32,
    /// Set `SO_REUSEADDR` on the listener. Default: true except Windows.
    pub reuse_addr: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            keepalive_retries: 3,
            reuse_addr: !cfg!(target_os = "windows"),
        }
    }
}

/// Applies the configured options to a connected stream.
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let sock_ref = SockRef::from(stream);
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);

        // Retries exist on Linux and Windows but not macOS.
        #[cfg(any(target_os = "linux", target_os = "windows"))]
        let keepalive = keepalive.with_retries(config.keepalive_retries);

        sock_ref.set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

/// Builds and binds the server listener with address reuse, a fixed
/// backlog, and non-blocking mode.
pub async fn create_listener(
    addr: SocketAddr,
    config: &SocketConfig,
) -> std::io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// The bind address for a server socket: all interfaces, or loopback only.
///
/// IPv4 throughout — the handshake derives each client's datagram endpoint
/// from the stream's remote IP, and keeping both transports in one address
/// family keeps that match exact.
pub fn bind_address(bind_all_interfaces: bool, port: u16) -> SocketAddr {
    let ip = if bind_all_interfaces {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    };
    SocketAddr::new(ip, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address_scope() {
        assert_eq!(bind_address(true, 7777).ip(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(bind_address(false, 7777).ip(), Ipv4Addr::LOCALHOST);
        assert_eq!(bind_address(true, 7777).port(), 7777);
    }

    #[tokio::test]
    async fn test_listener_binds_ephemeral_port() {
        let listener = create_listener(bind_address(false, 0), &SocketConfig::default())
            .await
            .unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_stream_options_apply() {
        let listener = create_listener(bind_address(false, 0), &SocketConfig::default())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = TcpStream::connect(addr).await.unwrap();
        configure_stream(&stream, &SocketConfig::default()).unwrap();
        assert!(stream.nodelay().unwrap());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_keepalive_can_be_disabled() {
        let listener = create_listener(bind_address(false, 0), &SocketConfig::default())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = TcpStream::connect(addr).await.unwrap();
        let config = SocketConfig {
            keepalive_enabled: false,
            tcp_nodelay: false,
            ..SocketConfig::default()
        };
        configure_stream(&stream, &config).unwrap();
        assert!(!stream.nodelay().unwrap());
        accept.await.unwrap();
    }
}
