//! The server host: accepts stream connections, performs the handshake,
//! owns the client registry and the shared datagram socket, and broadcasts
//! to every connected client.
//!
//! Lifecycle per listener is `Stopped → Running → Stopped`. All inbound
//! traffic and lifecycle notices are delivered as [`ServerEvent`]s through a
//! bounded queue drained by the game tick loop; the accept, per-connection,
//! and datagram loops never touch gameplay state directly.
//!
//! The registry is read and written from several tasks, so every iteration
//! first snapshots the `Arc` handles out of the lock and operates on the
//! snapshot — no guard is ever held across an await, and a client removed
//! mid-broadcast cannot invalidate the iteration.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{Mutex, mpsc, watch};

use rift_protocol::{
    ClientId, ConnectionAccept, Disconnect, Packet, PacketKind, SceneEpoch, SceneKey,
};

use crate::forward::{self, ForwardHandle};
use crate::framing::{StreamError, recv_packet, send_packet};
use crate::socket::{SocketConfig, bind_address, configure_stream, create_listener};

/// Size of the datagram receive buffer; larger datagrams are truncated by
/// the OS and will fail to decode, which drops them.
const DATAGRAM_BUF_LEN: usize = 64 * 1024;

/// Capacity of the event queue between I/O tasks and the tick loop.
const EVENT_QUEUE_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// Configuration & events
// ---------------------------------------------------------------------------

/// Server construction parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Join attempts beyond this count are rejected with
    /// `Disconnect{"Server is full"}`.
    pub max_players: usize,
    /// Stream listener port (0 = ephemeral).
    pub tcp_port: u16,
    /// Datagram socket port (0 = ephemeral).
    pub udp_port: u16,
    /// Stream socket options.
    pub socket: SocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_players: 16,
            tcp_port: 7777,
            udp_port: 0,
            socket: SocketConfig::default(),
        }
    }
}

/// Everything the tick loop learns from the network, in arrival order.
#[derive(Debug)]
pub enum ServerEvent {
    /// Handshake completed; the client is registered.
    ClientConnected {
        /// The allocated id.
        client_id: ClientId,
        /// Name from the connection request.
        name: String,
    },
    /// The client left, faulted, or was removed mid-broadcast.
    ClientDisconnected {
        /// The removed client.
        client_id: ClientId,
        /// Why it was removed.
        reason: String,
    },
    /// A decoded packet from either channel.
    Packet {
        /// Sending client.
        from: ClientId,
        /// The packet.
        packet: Packet,
    },
    /// Outcome of the best-effort port-forwarding attempt.
    PortForwarding {
        /// Whether both mappings were created.
        success: bool,
        /// Human-readable detail.
        detail: String,
    },
}

/// Errors from server lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// `start` called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// An operation that needs live sockets was called while stopped.
    #[error("server not running")]
    NotRunning,

    /// Socket setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// RemoteClient & shared state
// ---------------------------------------------------------------------------

/// One registered client: stream writer plus both endpoints.
pub struct RemoteClient {
    /// The allocated id, never reused by this server.
    pub id: ClientId,
    /// Name from the connection request.
    pub name: String,
    /// Remote address of the stream connection.
    pub peer_addr: SocketAddr,
    /// Datagram endpoint: stream remote IP + the UDP port the client
    /// declared in its request.
    pub udp_addr: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
}

impl RemoteClient {
    /// Sends one packet on this client's stream.
    pub async fn send(&self, packet: &Packet) -> Result<(), StreamError> {
        let mut writer = self.writer.lock().await;
        send_packet(&mut *writer, packet).await
    }
}

struct ServerShared {
    max_players: usize,
    clients: RwLock<HashMap<ClientId, Arc<RemoteClient>>>,
    next_id: AtomicU64,
    scene: RwLock<(SceneEpoch, SceneKey)>,
    events: mpsc::Sender<ServerEvent>,
    forward: Mutex<Option<ForwardHandle>>,
}

impl ServerShared {
    fn allocate_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a client unless the server is at capacity. Capacity check
    /// and insertion share one critical section.
    fn insert(&self, client: Arc<RemoteClient>) -> Result<(), ()> {
        let mut clients = self.clients.write().expect("client registry poisoned");
        if clients.len() >= self.max_players {
            return Err(());
        }
        clients.insert(client.id, client);
        Ok(())
    }

    fn remove(&self, id: ClientId) -> Option<Arc<RemoteClient>> {
        self.clients
            .write()
            .expect("client registry poisoned")
            .remove(&id)
    }

    /// Clones the handles out of the lock; callers iterate the snapshot.
    fn snapshot(&self) -> Vec<Arc<RemoteClient>> {
        self.clients
            .read()
            .expect("client registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    fn get(&self, id: ClientId) -> Option<Arc<RemoteClient>> {
        self.clients
            .read()
            .expect("client registry poisoned")
            .get(&id)
            .cloned()
    }

    fn by_udp_addr(&self, addr: SocketAddr) -> Option<Arc<RemoteClient>> {
        self.clients
            .read()
            .expect("client registry poisoned")
            .values()
            .find(|c| c.udp_addr == addr)
            .cloned()
    }

    fn len(&self) -> usize {
        self.clients.read().expect("client registry poisoned").len()
    }

    fn clear(&self) {
        self.clients
            .write()
            .expect("client registry poisoned")
            .clear();
    }

    fn scene_stamp(&self) -> (SceneEpoch, SceneKey) {
        self.scene.read().expect("scene stamp poisoned").clone()
    }

    async fn notify(&self, event: ServerEvent) {
        let _ = self.events.send(event).await;
    }

    /// Removes a client and fires the disconnect notification, exactly once
    /// even if several tasks race to remove it.
    async fn drop_client(&self, id: ClientId, reason: &str) {
        if self.remove(id).is_some() {
            tracing::info!("{id} removed: {reason}");
            self.notify(ServerEvent::ClientDisconnected {
                client_id: id,
                reason: reason.to_string(),
            })
            .await;
        }
    }
}

// ---------------------------------------------------------------------------
// NetServer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Stopped,
    Running,
}

/// The server half of the dual transport.
pub struct NetServer {
    config: ServerConfig,
    shared: Arc<ServerShared>,
    events_rx: mpsc::Receiver<ServerEvent>,
    shutdown: Option<watch::Sender<bool>>,
    udp: Option<Arc<UdpSocket>>,
    bound_tcp_port: u16,
    bound_udp_port: u16,
    state: ServerState,
}

impl NetServer {
    /// Creates a stopped server.
    pub fn new(config: ServerConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let shared = Arc::new(ServerShared {
            max_players: config.max_players,
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            scene: RwLock::new((SceneEpoch::default(), SceneKey::new())),
            events: events_tx,
            forward: Mutex::new(None),
        });
        Self {
            config,
            shared,
            events_rx,
            shutdown: None,
            udp: None,
            bound_tcp_port: 0,
            bound_udp_port: 0,
            state: ServerState::Stopped,
        }
    }

    /// `true` once `start` has succeeded and until `stop`.
    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }

    /// The actually bound stream port (resolves an ephemeral request).
    pub fn tcp_port(&self) -> u16 {
        self.bound_tcp_port
    }

    /// The actually bound datagram port.
    pub fn udp_port(&self) -> u16 {
        self.bound_udp_port
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.shared.len()
    }

    /// Ids of every registered client, in no particular order.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.shared.snapshot().iter().map(|c| c.id).collect()
    }

    /// Records the scene the authority is currently in; handed to joining
    /// clients in their `ConnectionAccept`.
    pub fn set_scene(&self, epoch: SceneEpoch, key: SceneKey) {
        *self.shared.scene.write().expect("scene stamp poisoned") = (epoch, key);
    }

    /// Binds both sockets and launches the accept and datagram loops.
    ///
    /// `use_upnp` additionally spawns the best-effort port-forwarding task;
    /// its outcome arrives as [`ServerEvent::PortForwarding`] and never
    /// fails the start.
    pub async fn start(&mut self, bind_all_interfaces: bool, use_upnp: bool) -> Result<(), ServerError> {
        if self.state == ServerState::Running {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = create_listener(
            bind_address(bind_all_interfaces, self.config.tcp_port),
            &self.config.socket,
        )
        .await?;
        self.bound_tcp_port = listener.local_addr()?.port();

        let udp = Arc::new(
            UdpSocket::bind(bind_address(bind_all_interfaces, self.config.udp_port)).await?,
        );
        self.bound_udp_port = udp.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            self.config.socket.clone(),
            self.bound_udp_port,
            shutdown_rx.clone(),
        ));
        tokio::spawn(datagram_loop(
            Arc::clone(&udp),
            Arc::clone(&self.shared),
            shutdown_rx,
        ));

        if use_upnp {
            let shared = Arc::clone(&self.shared);
            let (tcp_port, udp_port) = (self.bound_tcp_port, self.bound_udp_port);
            tokio::spawn(async move {
                match forward::open(tcp_port, udp_port).await {
                    Ok(handle) => {
                        *shared.forward.lock().await = Some(handle);
                        shared
                            .notify(ServerEvent::PortForwarding {
                                success: true,
                                detail: format!("mapped tcp:{tcp_port} udp:{udp_port}"),
                            })
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!("port forwarding unavailable: {e}");
                        shared
                            .notify(ServerEvent::PortForwarding {
                                success: false,
                                detail: e.to_string(),
                            })
                            .await;
                    }
                }
            });
        }

        self.udp = Some(udp);
        self.shutdown = Some(shutdown_tx);
        self.state = ServerState::Running;
        tracing::info!(
            "server running on tcp:{} udp:{}",
            self.bound_tcp_port,
            self.bound_udp_port
        );
        Ok(())
    }

    /// Notifies clients best-effort, cancels both loops, clears the
    /// registry, closes both sockets, and removes any port mappings.
    pub async fn stop(&mut self, reason: &str) {
        if self.state == ServerState::Stopped {
            return;
        }
        self.broadcast_tcp(
            &Packet::Disconnect(Disconnect {
                reason: reason.to_string(),
            }),
            None,
        )
        .await;

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.shared.clear();
        self.udp = None;

        if let Some(handle) = self.shared.forward.lock().await.take() {
            handle.close().await;
        }

        self.state = ServerState::Stopped;
        tracing::info!("server stopped: {reason}");
    }

    /// Drains every queued [`ServerEvent`]. Call once per tick.
    pub fn poll_events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Sends a packet to one client's stream.
    pub async fn send_to(&self, client_id: ClientId, packet: &Packet) -> Result<(), ServerError> {
        if let Some(client) = self.shared.get(client_id)
            && client.send(packet).await.is_err()
        {
            self.shared.drop_client(client_id, "connection lost").await;
        }
        Ok(())
    }

    /// Sends a packet to every client's stream except `exclude`.
    ///
    /// Self-healing, not transactional: a client whose stream faults
    /// mid-broadcast is removed on the spot, and the remaining clients
    /// still receive the packet.
    pub async fn broadcast_tcp(&self, packet: &Packet, exclude: Option<ClientId>) {
        for client in self.shared.snapshot() {
            if Some(client.id) == exclude {
                continue;
            }
            if client.send(packet).await.is_err() {
                self.shared.drop_client(client.id, "connection lost").await;
            }
        }
    }

    /// Sends a packet as a datagram to every client's UDP endpoint except
    /// `exclude`. Datagram faults are logged, never acted on — the next
    /// snapshot supersedes a lost one.
    pub async fn broadcast_udp(&self, packet: &Packet, exclude: Option<ClientId>) -> Result<(), ServerError> {
        let udp = self.udp.as_ref().ok_or(ServerError::NotRunning)?;
        let bytes = packet.to_bytes();
        for client in self.shared.snapshot() {
            if Some(client.id) == exclude {
                continue;
            }
            if let Err(e) = udp.send_to(&bytes, client.udp_addr).await {
                tracing::debug!("datagram to {} failed: {e}", client.id);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// I/O loops
// ---------------------------------------------------------------------------

async fn accept_loop(
    listener: tokio::net::TcpListener,
    shared: Arc<ServerShared>,
    socket_config: SocketConfig,
    server_udp_port: u16,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = configure_stream(&stream, &socket_config) {
                            tracing::warn!("socket options for {peer_addr} failed: {e}");
                        }
                        let shared = Arc::clone(&shared);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer_addr, shared, server_udp_port, shutdown)
                                .await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
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

/// Handshake + receive loop for one stream connection.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    shared: Arc<ServerShared>,
    server_udp_port: u16,
    shutdown: watch::Receiver<bool>,
) {
    // Handshake: the first frame must decode to a ConnectionRequest. Any
    // fault here closes the connection — unlike steady state, where a bad
    // frame is logged and skipped.
    let request = match recv_packet(&mut stream).await {
        Ok(Packet::ConnectionRequest(request)) => request,
        Ok(other) => {
            tracing::warn!("{peer_addr} opened with {:?}, closing", other.kind());
            return;
        }
        Err(e) => {
            tracing::warn!("{peer_addr} handshake failed: {e}");
            return;
        }
    };

    let (reader, writer) = stream.into_split();
    let id = shared.allocate_id();
    let client = Arc::new(RemoteClient {
        id,
        name: request.client_name.clone(),
        peer_addr,
        udp_addr: SocketAddr::new(peer_addr.ip(), request.udp_port),
        writer: Mutex::new(writer),
    });

    // Reject before registering: a client over capacity is never observed
    // by the rest of the server.
    if shared.insert(Arc::clone(&client)).is_err() {
        tracing::info!("{peer_addr} rejected: server is full");
        let _ = client
            .send(&Packet::Disconnect(Disconnect {
                reason: "Server is full".to_string(),
            }))
            .await;
        return;
    }

    let (scene_epoch, scene_key) = shared.scene_stamp();
    let accept = Packet::ConnectionAccept(ConnectionAccept {
        client_id: id,
        server_udp_port,
        scene_epoch,
        scene_key,
    });
    if client.send(&accept).await.is_err() {
        shared.drop_client(id, "handshake reply failed").await;
        return;
    }

    tracing::info!("{id} ({}) joined from {peer_addr}", request.client_name);
    shared
        .notify(ServerEvent::ClientConnected {
            client_id: id,
            name: request.client_name,
        })
        .await;

    receive_loop(reader, id, shared, shutdown).await;
}

/// Reads frames from one client until fault, Disconnect, or shutdown.
async fn receive_loop(
    mut reader: OwnedReadHalf,
    id: ClientId,
    shared: Arc<ServerShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = recv_packet(&mut reader) => {
                match result {
                    Ok(Packet::Disconnect(d)) => {
                        shared.drop_client(id, &d.reason).await;
                        break;
                    }
                    Ok(packet) => {
                        shared.notify(ServerEvent::Packet { from: id, packet }).await;
                    }
                    Err(e) if !e.is_fatal() => {
                        tracing::warn!("{id} sent an undecodable frame: {e}");
                    }
                    Err(_) => {
                        shared.drop_client(id, "connection lost").await;
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

/// Reads datagrams on the shared socket and attributes them to clients by
/// source endpoint. Unknown tags and unmatched endpoints are dropped
/// without processing.
async fn datagram_loop(
    udp: Arc<UdpSocket>,
    shared: Arc<ServerShared>,
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
                let data = &buf[..len];
                if data.is_empty() || PacketKind::from_u8(data[0]).is_none() {
                    continue; // noise, not ours
                }
                let Some(client) = shared.by_udp_addr(from) else {
                    continue; // unmatched endpoint
                };
                match Packet::from_bytes(data) {
                    Ok(Packet::KeepAlive) => {}
                    Ok(packet) => {
                        shared
                            .notify(ServerEvent::Packet { from: client.id, packet })
                            .await;
                    }
                    Err(e) => {
                        tracing::debug!("bad datagram from {}: {e}", client.id);
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
