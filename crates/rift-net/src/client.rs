//! The client connector: mirrors the server's handshake from the
//! connecting side and owns the single server endpoint on both channels.
//!
//! `connect` performs the whole handshake before returning, then spawns
//! three background tasks: the stream receive loop, the datagram receive
//! loop, and a keep-alive loop that pings the server's datagram endpoint so
//! NAT bindings stay warm. Inbound packets surface as [`ClientEvent`]s
//! drained by the game tick loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{Mutex, mpsc, watch};

use rift_protocol::{
    ClientId, ConnectionRequest, Disconnect, Packet, PacketKind, SceneEpoch, SceneKey,
};

use crate::framing::{StreamError, recv_packet, send_packet};
use crate::socket::{SocketConfig, configure_stream};

/// Cadence of the 1-byte keep-alive datagram.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(2);

/// Datagram receive buffer size, matching the server side.
const DATAGRAM_BUF_LEN: usize = 64 * 1024;

/// Capacity of the event queue between I/O tasks and the tick loop.
const EVENT_QUEUE_LEN: usize = 1024;

/// What the tick loop learns from the connection, in arrival order.
#[derive(Debug)]
pub enum ClientEvent {
    /// A decoded packet from either channel.
    Packet(Packet),
    /// The stream faulted or the server sent a `Disconnect`.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
}

/// Errors establishing a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Socket setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream faulted or produced garbage during the handshake.
    #[error("handshake stream error: {0}")]
    Stream(#[from] StreamError),

    /// The server answered the request with a `Disconnect`.
    #[error("server rejected connection: {0}")]
    Rejected(String),

    /// The server answered with something other than accept or reject.
    #[error("unexpected {0:?} during handshake")]
    UnexpectedPacket(PacketKind),
}

/// Observable connected flag backed by a watch channel, so any number of
/// consumers can await the transition without polling.
struct ConnectedFlag {
    tx: watch::Sender<bool>,
}

impl ConnectedFlag {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    fn set(&self, connected: bool) {
        let _ = self.tx.send(connected);
    }

    fn get(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Handle to a connected server session.
pub struct NetClient {
    client_id: ClientId,
    server_udp_addr: SocketAddr,
    scene_epoch: SceneEpoch,
    scene_key: SceneKey,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    udp: Arc<UdpSocket>,
    connected: Arc<ConnectedFlag>,
    events_rx: mpsc::Receiver<ClientEvent>,
    shutdown: watch::Sender<bool>,
}

impl NetClient {
    /// Connects to `server`, completes the handshake, and spawns the
    /// background loops. Returns only once the server has accepted.
    pub async fn connect(
        server: SocketAddr,
        client_name: &str,
        socket: &SocketConfig,
    ) -> Result<NetClient, ConnectError> {
        let mut stream = TcpStream::connect(server).await?;
        configure_stream(&stream, socket)?;

        let udp = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let udp_port = udp.local_addr()?.port();

        send_packet(
            &mut stream,
            &Packet::ConnectionRequest(ConnectionRequest {
                client_name: client_name.to_string(),
                udp_port,
            }),
        )
        .await?;

        let accept = match recv_packet(&mut stream).await? {
            Packet::ConnectionAccept(accept) => accept,
            Packet::Disconnect(d) => return Err(ConnectError::Rejected(d.reason)),
            other => return Err(ConnectError::UnexpectedPacket(other.kind())),
        };

        let server_udp_addr = SocketAddr::new(server.ip(), accept.server_udp_port);
        let (reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));
        let connected = Arc::new(ConnectedFlag::new());
        connected.set(true);

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(stream_loop(
            reader,
            events_tx.clone(),
            Arc::clone(&connected),
            shutdown_rx.clone(),
        ));
        tokio::spawn(datagram_loop(
            Arc::clone(&udp),
            server_udp_addr,
            events_tx,
            shutdown_rx.clone(),
        ));
        tokio::spawn(keep_alive_loop(
            Arc::clone(&udp),
            server_udp_addr,
            shutdown_rx,
        ));

        tracing::info!(
            "connected to {server} as {} (udp {udp_port} -> {server_udp_addr})",
            accept.client_id
        );
        Ok(NetClient {
            client_id: accept.client_id,
            server_udp_addr,
            scene_epoch: accept.scene_epoch,
            scene_key: accept.scene_key,
            writer,
            udp,
            connected,
            events_rx,
            shutdown: shutdown_tx,
        })
    }

    /// The id the server allocated for this client.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Scene epoch the authority reported at accept time.
    pub fn scene_epoch(&self) -> SceneEpoch {
        self.scene_epoch
    }

    /// Scene key the authority reported at accept time.
    pub fn scene_key(&self) -> &SceneKey {
        &self.scene_key
    }

    /// `true` until the stream faults, the server disconnects us, or
    /// [`disconnect`](Self::disconnect) is called.
    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Sends a packet on the reliable stream.
    pub async fn send_packet(&self, packet: &Packet) -> Result<(), StreamError> {
        let mut writer = self.writer.lock().await;
        let result = send_packet(&mut *writer, packet).await;
        if let Err(ref e) = result
            && e.is_fatal()
        {
            self.connected.set(false);
        }
        result
    }

    /// Sends a packet as a raw datagram to the server.
    pub async fn send_datagram(&self, packet: &Packet) -> std::io::Result<()> {
        self.udp
            .send_to(&packet.to_bytes(), self.server_udp_addr)
            .await
            .map(|_| ())
    }

    /// Drains every queued [`ClientEvent`]. Call once per tick.
    pub fn poll_events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Best-effort notifies the server, then tears down both channels.
    pub async fn disconnect(&mut self, reason: &str) {
        if self.connected.get() {
            let _ = self
                .send_packet(&Packet::Disconnect(Disconnect {
                    reason: reason.to_string(),
                }))
                .await;
        }
        let _ = self.shutdown.send(true);
        self.connected.set(false);
        tracing::info!("disconnected: {reason}");
    }
}

// ---------------------------------------------------------------------------
// Background loops
// ---------------------------------------------------------------------------

async fn stream_loop(
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<ClientEvent>,
    connected: Arc<ConnectedFlag>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = recv_packet(&mut reader) => {
                match result {
                    Ok(Packet::Disconnect(d)) => {
                        connected.set(false);
                        let _ = events.send(ClientEvent::Disconnected { reason: d.reason }).await;
                        break;
                    }
                    Ok(packet) => {
                        let _ = events.send(ClientEvent::Packet(packet)).await;
                    }
                    Err(e) if !e.is_fatal() => {
                        tracing::warn!("undecodable frame from server: {e}");
                    }
                    Err(_) => {
                        connected.set(false);
                        let _ = events
                            .send(ClientEvent::Disconnected {
                                reason: "connection lost".to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Receives server datagrams. Anything not from the server's endpoint, or
/// not starting with a known tag, is dropped without processing.
async fn datagram_loop(
    udp: Arc<UdpSocket>,
    server_udp_addr: SocketAddr,
    events: mpsc::Sender<ClientEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; DATAGRAM_BUF_LEN];
    loop {
        tokio::select! {
            result = udp.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(ok) => ok,
                    Err(e) => {
                        tracing::debug!("datagram receive failed: {e}");
                        continue;
                    }
                };
                if from != server_udp_addr {
                    continue;
                }
                let data = &buf[..len];
                if data.is_empty() || PacketKind::from_u8(data[0]).is_none() {
                    continue;
                }
                match Packet::from_bytes(data) {
                    Ok(Packet::KeepAlive) => {}
                    Ok(packet) => {
                        let _ = events.send(ClientEvent::Packet(packet)).await;
                    }
                    Err(e) => {
                        tracing::debug!("bad datagram from server: {e}");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Sends the 1-byte keep-alive datagram immediately and then at a fixed
/// cadence, so the server-side NAT binding for our UDP endpoint stays warm.
async fn keep_alive_loop(
    udp: Arc<UdpSocket>,
    server_udp_addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let bytes = Packet::KeepAlive.to_bytes();
    let mut interval = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = udp.send_to(&bytes, server_udp_addr).await {
                    tracing::debug!("keep-alive send failed: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
