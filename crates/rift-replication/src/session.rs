//! The session state machine: singleplayer, multiplayer host, and
//! multiplayer client, behind one driver the game loop talks to.
//!
//! Exactly one session is active at a time. A host session owns a
//! [`NetServer`] *and* an embedded client connected to loopback — the
//! host's own player is a client of its own server, so host and remote
//! players run the identical prediction path, with the two documented
//! embedded special cases (no re-apply on snapshots, no scene rebuild on
//! scene changes).
//!
//! The driver owns a tokio runtime for the background I/O tasks; the
//! methods here are called from the synchronous game tick loop and drain
//! the transport's event queues, so every scene mutation happens on the
//! caller's thread. There are no globals: the scene, the entity registry,
//! and the gameplay hooks are all threaded through explicitly.

use std::net::SocketAddr;

use rift_net::{
    ClientEvent, ConnectError, NetClient, NetServer, ServerConfig, ServerError, ServerEvent,
    SocketConfig,
};
use rift_protocol::{
    Chat, ClientId, CommandPayload, NetworkId, Packet, SceneChange, SceneEpoch, SceneKey,
    Snapshot, Tick,
};

use crate::entity::EntityRegistry;
use crate::scene::Scene;
use crate::snapshot::capture_scene;
use crate::sync::{AuthoritySync, ClientSync, SceneChangeAction};

/// Simulation rate the tick counters advance at.
pub const TICK_RATE: u32 = 60;

/// Default ticks between snapshot broadcasts (20 Hz at [`TICK_RATE`]).
pub const DEFAULT_SNAPSHOT_INTERVAL: Tick = 3;

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// Which session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Local play, no networking.
    Singleplayer,
    /// Authority plus an embedded loopback client for the local player.
    MultiplayerHost,
    /// Remote client of someone else's authority.
    MultiplayerClient,
}

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server parameters for host sessions.
    pub server: ServerConfig,
    /// Stream socket options for outgoing connections.
    pub socket: SocketConfig,
    /// Where client sessions connect.
    pub server_address: SocketAddr,
    /// Name sent in the connection request.
    pub client_name: String,
    /// Ticks between snapshot broadcasts on the authority.
    pub snapshot_interval: Tick,
    /// Host: bind every interface, or loopback only.
    pub bind_all_interfaces: bool,
    /// Host: attempt best-effort port forwarding on start.
    pub use_upnp: bool,
    /// Key of the scene built when the driver comes up.
    pub initial_scene: SceneKey,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            socket: SocketConfig::default(),
            server_address: "127.0.0.1:7777".parse().expect("loopback address"),
            client_name: "player".to_string(),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            bind_all_interfaces: false,
            use_upnp: false,
            initial_scene: "main".to_string(),
        }
    }
}

impl SessionConfig {
    /// Builds session parameters from the persisted configuration.
    ///
    /// An unresolvable server address falls back to the default loopback
    /// endpoint with a warning rather than failing startup.
    pub fn from_config(config: &rift_config::Config) -> Self {
        use std::net::ToSocketAddrs;

        let net = &config.network;
        let defaults = SessionConfig::default();

        let server_address = format!("{}:{}", net.server_address, net.tcp_port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .unwrap_or_else(|| {
                tracing::warn!(
                    "could not resolve '{}', using {}",
                    net.server_address,
                    defaults.server_address
                );
                defaults.server_address
            });

        Self {
            server: ServerConfig {
                max_players: net.max_players as usize,
                tcp_port: net.tcp_port,
                udp_port: net.udp_port,
                socket: SocketConfig::default(),
            },
            socket: SocketConfig::default(),
            server_address,
            client_name: net.player_name.clone(),
            snapshot_interval: Tick::from(TICK_RATE / net.snapshot_rate.clamp(1, TICK_RATE)).max(1),
            bind_all_interfaces: net.bind_all_interfaces,
            use_upnp: net.use_upnp,
            initial_scene: defaults.initial_scene,
        }
    }
}

/// The gameplay layer's seam: scene construction and player
/// representation. The replication layer never decides what a scene
/// contains or what an avatar is.
pub trait GameHooks: Send {
    /// Builds the scene for `key` at `epoch`.
    fn build_scene(&mut self, key: &str, epoch: SceneEpoch) -> Scene;

    /// Spawns the in-game representation for a joined client and returns
    /// its id. `None` means this client has no avatar (spectators).
    fn spawn_avatar(&mut self, scene: &mut Scene, client_id: ClientId) -> Option<NetworkId>;

    /// Removes a departed client's presence. The default despawns the
    /// avatar.
    fn remove_avatar(&mut self, scene: &mut Scene, client_id: ClientId) {
        if let Some(id) = scene.avatar_of(client_id) {
            let _ = scene.despawn(id);
        }
    }
}

/// What the session surfaces to gameplay each tick, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A client completed the handshake (includes the host's own embedded
    /// client).
    ClientJoined {
        /// The new client.
        client_id: ClientId,
        /// Its requested name.
        name: String,
    },
    /// A client left or faulted.
    ClientLeft {
        /// The departed client.
        client_id: ClientId,
        /// Why.
        reason: String,
    },
    /// Chat text from a client or the server.
    Chat {
        /// The sender.
        from: ClientId,
        /// The text.
        text: String,
    },
    /// This session's connection to the authority ended.
    Disconnected {
        /// Why.
        reason: String,
    },
    /// The active scene switched.
    SceneChanged {
        /// New epoch.
        epoch: SceneEpoch,
        /// New scene key.
        key: SceneKey,
    },
    /// Outcome of the host's port-forwarding attempt.
    PortForwarding {
        /// Whether the mappings were created.
        success: bool,
        /// Human-readable detail.
        detail: String,
    },
}

/// Errors from session transitions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Host startup failed.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// Connecting to the authority failed.
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Runtime construction failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A scene switch was requested on a non-authority session.
    #[error("operation requires the authority")]
    NotAuthority,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct ClientSession {
    net: NetClient,
    sync: ClientSync,
}

struct HostSession {
    server: NetServer,
    authority: AuthoritySync,
    /// The host's own player, connected over loopback.
    local: ClientSession,
}

enum ActiveSession {
    Single,
    Host(HostSession),
    Client(ClientSession),
}

/// Owns the active session, the scene, and the tick counters.
pub struct SessionDriver {
    runtime: tokio::runtime::Runtime,
    config: SessionConfig,
    registry: EntityRegistry,
    hooks: Box<dyn GameHooks>,
    scene: Scene,
    active: ActiveSession,
    server_tick: Tick,
    client_tick: Tick,
    queued: Vec<SessionEvent>,
}

impl SessionDriver {
    /// Builds a driver in singleplayer with the initial scene.
    pub fn new(
        config: SessionConfig,
        registry: EntityRegistry,
        mut hooks: Box<dyn GameHooks>,
    ) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let mut scene = hooks.build_scene(&config.initial_scene, SceneEpoch(0));
        if let Some(id) = hooks.spawn_avatar(&mut scene, ClientId::SERVER) {
            let _ = scene.set_avatar(ClientId::SERVER, id);
        }
        Ok(Self {
            runtime,
            config,
            registry,
            hooks,
            scene,
            active: ActiveSession::Single,
            server_tick: 0,
            client_tick: 0,
            queued: Vec::new(),
        })
    }

    /// The active session kind.
    pub fn kind(&self) -> SessionKind {
        match self.active {
            ActiveSession::Single => SessionKind::Singleplayer,
            ActiveSession::Host(_) => SessionKind::MultiplayerHost,
            ActiveSession::Client(_) => SessionKind::MultiplayerClient,
        }
    }

    /// `true` when this process owns canonical state.
    pub fn is_authority(&self) -> bool {
        !matches!(self.active, ActiveSession::Client(_))
    }

    /// The active scene.
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// The active scene, mutably. Authority gameplay mutates through
    /// here; clients should treat it as read-mostly between updates.
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    /// The id commands from [`handle_input`](Self::handle_input) are
    /// issued under.
    pub fn local_client_id(&self) -> ClientId {
        match &self.active {
            ActiveSession::Single => ClientId::SERVER,
            ActiveSession::Host(host) => host.local.sync.my_id(),
            ActiveSession::Client(client) => client.sync.my_id(),
        }
    }

    /// `(tcp, udp)` ports of the owned server, for host sessions.
    pub fn server_ports(&self) -> Option<(u16, u16)> {
        match &self.active {
            ActiveSession::Host(host) => Some((host.server.tcp_port(), host.server.udp_port())),
            _ => None,
        }
    }

    /// Commands awaiting authority confirmation (0 outside client paths).
    pub fn pending_count(&self) -> usize {
        match &self.active {
            ActiveSession::Single => 0,
            ActiveSession::Host(host) => host.local.sync.pending_len(),
            ActiveSession::Client(client) => client.sync.pending_len(),
        }
    }

    /// Authority tick counter.
    pub fn server_tick(&self) -> Tick {
        self.server_tick
    }

    /// Local tick counter.
    pub fn client_tick(&self) -> Tick {
        self.client_tick
    }

    /// Tears down the current session and initializes `kind`. Both tick
    /// counters reset to zero.
    pub fn switch_session(&mut self, kind: SessionKind) -> Result<(), SessionError> {
        self.teardown();
        self.server_tick = 0;
        self.client_tick = 0;

        match kind {
            SessionKind::Singleplayer => {
                if self.scene.avatar_of(ClientId::SERVER).is_none()
                    && let Some(id) = self.hooks.spawn_avatar(&mut self.scene, ClientId::SERVER)
                {
                    let _ = self.scene.set_avatar(ClientId::SERVER, id);
                }
                self.active = ActiveSession::Single;
            }
            SessionKind::MultiplayerHost => {
                let mut server = NetServer::new(self.config.server.clone());
                self.runtime.block_on(
                    server.start(self.config.bind_all_interfaces, self.config.use_upnp),
                )?;
                server.set_scene(self.scene.epoch(), self.scene.key().clone());

                let loopback: SocketAddr = format!("127.0.0.1:{}", server.tcp_port())
                    .parse()
                    .expect("loopback address");
                let net = match self.runtime.block_on(NetClient::connect(
                    loopback,
                    &self.config.client_name,
                    &self.config.socket,
                )) {
                    Ok(net) => net,
                    Err(e) => {
                        self.runtime.block_on(server.stop("startup failed"));
                        return Err(e.into());
                    }
                };
                let sync = ClientSync::new(net.client_id(), true);
                self.active = ActiveSession::Host(HostSession {
                    server,
                    authority: AuthoritySync::new(),
                    local: ClientSession { net, sync },
                });
            }
            SessionKind::MultiplayerClient => {
                let net = self.runtime.block_on(NetClient::connect(
                    self.config.server_address,
                    &self.config.client_name,
                    &self.config.socket,
                ))?;
                // The authority's scene is canonical from the first frame.
                self.scene = self
                    .hooks
                    .build_scene(net.scene_key().as_str(), net.scene_epoch());
                let sync = ClientSync::new(net.client_id(), false);
                self.active = ActiveSession::Client(ClientSession { net, sync });
            }
        }
        tracing::info!("session switched to {kind:?}");
        Ok(())
    }

    fn teardown(&mut self) {
        match std::mem::replace(&mut self.active, ActiveSession::Single) {
            ActiveSession::Single => {}
            ActiveSession::Host(mut host) => self.runtime.block_on(async {
                host.local.net.disconnect("session closed").await;
                host.server.stop("session closed").await;
            }),
            ActiveSession::Client(mut client) => self
                .runtime
                .block_on(client.net.disconnect("session closed")),
        }
    }

    /// Switches the authority to a new scene: bumps the epoch exactly
    /// once, rebuilds via [`GameHooks`], respawns avatars, and notifies
    /// every client. Clients never call this — they follow the inbound
    /// `SceneChange`.
    pub fn switch_scene(&mut self, key: impl Into<SceneKey>) -> Result<(), SessionError> {
        if matches!(self.active, ActiveSession::Client(_)) {
            return Err(SessionError::NotAuthority);
        }
        let key: SceneKey = key.into();
        let epoch = self.scene.epoch().next();
        self.scene = self.hooks.build_scene(&key, epoch);

        match &mut self.active {
            ActiveSession::Single => {
                if let Some(id) = self.hooks.spawn_avatar(&mut self.scene, ClientId::SERVER) {
                    let _ = self.scene.set_avatar(ClientId::SERVER, id);
                }
            }
            ActiveSession::Host(host) => {
                for client_id in host.server.client_ids() {
                    if let Some(id) = self.hooks.spawn_avatar(&mut self.scene, client_id) {
                        let _ = self.scene.set_avatar(client_id, id);
                    }
                }
                host.server.set_scene(epoch, key.clone());
                let notice = Packet::SceneChange(SceneChange {
                    scene_epoch: epoch,
                    scene_key: key.clone(),
                });
                self.runtime.block_on(host.server.broadcast_tcp(&notice, None));
            }
            ActiveSession::Client(_) => unreachable!("rejected above"),
        }

        tracing::info!("scene switched to '{key}' (epoch {})", epoch.0);
        self.queued.push(SessionEvent::SceneChanged { epoch, key });
        Ok(())
    }

    /// Feeds locally generated inputs into the session: applied to the
    /// local scene immediately, and (in multiplayer) stamped, buffered as
    /// pending, and sent to the authority.
    pub fn handle_input(&mut self, payloads: Vec<CommandPayload>) {
        if payloads.is_empty() {
            return;
        }
        match &mut self.active {
            ActiveSession::Single => {
                for payload in &payloads {
                    self.scene.apply_command(ClientId::SERVER, payload);
                }
            }
            ActiveSession::Host(host) => send_input(
                &self.runtime,
                &mut self.scene,
                self.client_tick,
                &mut host.local,
                payloads,
            ),
            ActiveSession::Client(client) => send_input(
                &self.runtime,
                &mut self.scene,
                self.client_tick,
                client,
                payloads,
            ),
        }
    }

    /// Sends chat. The authority broadcasts directly; clients go through
    /// the server relay.
    pub fn send_chat(&mut self, text: impl Into<String>) {
        let text = text.into();
        match &mut self.active {
            ActiveSession::Single => self.queued.push(SessionEvent::Chat {
                from: ClientId::SERVER,
                text,
            }),
            ActiveSession::Host(host) => {
                let from = host.local.sync.my_id();
                let packet = Packet::Chat(Chat {
                    sender: from,
                    text: text.clone(),
                });
                self.runtime
                    .block_on(host.server.broadcast_tcp(&packet, Some(from)));
                self.queued.push(SessionEvent::Chat { from, text });
            }
            ActiveSession::Client(client) => {
                let packet = Packet::Chat(Chat {
                    sender: client.sync.my_id(),
                    text,
                });
                if let Err(e) = self.runtime.block_on(client.net.send_packet(&packet)) {
                    tracing::warn!("chat send failed: {e}");
                }
            }
        }
    }

    /// Runs one tick: drains the transport queues, advances the counters,
    /// and (on the authority) broadcasts the snapshot at the configured
    /// cadence. Returns the session events for this tick, in order.
    pub fn update(&mut self) -> Vec<SessionEvent> {
        let mut events = std::mem::take(&mut self.queued);
        let mut active = std::mem::replace(&mut self.active, ActiveSession::Single);
        match &mut active {
            ActiveSession::Single => {
                self.server_tick += 1;
                self.client_tick += 1;
            }
            ActiveSession::Host(host) => self.update_host(host, &mut events),
            ActiveSession::Client(client) => {
                self.update_client_half(client, &mut events);
                self.client_tick += 1;
            }
        }
        self.active = active;
        events
    }

    fn update_host(&mut self, host: &mut HostSession, events: &mut Vec<SessionEvent>) {
        let embedded_id = host.local.sync.my_id();

        for event in host.server.poll_events() {
            match event {
                ServerEvent::ClientConnected { client_id, name } => {
                    if let Some(id) = self.hooks.spawn_avatar(&mut self.scene, client_id) {
                        let _ = self.scene.set_avatar(client_id, id);
                    }
                    events.push(SessionEvent::ClientJoined { client_id, name });
                }
                ServerEvent::ClientDisconnected { client_id, reason } => {
                    host.authority.forget(client_id);
                    self.hooks.remove_avatar(&mut self.scene, client_id);
                    events.push(SessionEvent::ClientLeft { client_id, reason });
                }
                ServerEvent::Packet { from, packet } => match packet {
                    Packet::Command(batch) => {
                        host.authority.ingest_batch(
                            &mut self.scene,
                            from,
                            &batch,
                            from == embedded_id,
                        );
                    }
                    Packet::Chat(chat) => {
                        let relay = Packet::Chat(Chat {
                            sender: from,
                            text: chat.text.clone(),
                        });
                        self.runtime
                            .block_on(host.server.broadcast_tcp(&relay, Some(from)));
                        events.push(SessionEvent::Chat {
                            from,
                            text: chat.text,
                        });
                    }
                    other => {
                        tracing::debug!("authority ignoring {:?}", other.kind());
                    }
                },
                ServerEvent::PortForwarding { success, detail } => {
                    events.push(SessionEvent::PortForwarding { success, detail });
                }
            }
        }

        self.server_tick += 1;
        if self.server_tick % self.config.snapshot_interval.max(1) == 0 {
            let snapshot = Packet::Snapshot(Snapshot {
                tick: self.server_tick,
                scene_epoch: self.scene.epoch(),
                last_processed: host.authority.report(),
                objects: capture_scene(&self.scene),
            });
            if let Err(e) = self
                .runtime
                .block_on(host.server.broadcast_udp(&snapshot, None))
            {
                tracing::warn!("snapshot broadcast failed: {e}");
            }
        }

        // The host's own player runs the same client path as everyone
        // else, over loopback.
        self.update_client_half(&mut host.local, events);
        self.client_tick += 1;
    }

    fn update_client_half(&mut self, client: &mut ClientSession, events: &mut Vec<SessionEvent>) {
        for event in client.net.poll_events() {
            match event {
                ClientEvent::Packet(Packet::Snapshot(snapshot)) => {
                    if let Err(e) =
                        client
                            .sync
                            .on_snapshot(&mut self.scene, &self.registry, snapshot)
                    {
                        tracing::warn!("snapshot merge failed: {e}");
                    }
                }
                ClientEvent::Packet(Packet::SceneChange(change)) => {
                    match client.sync.on_scene_change(&self.scene, &change) {
                        SceneChangeAction::Ignore => {}
                        SceneChangeAction::ClearedOnly => {
                            if let Some(snapshot) = client.sync.take_buffered(&self.scene)
                                && let Err(e) = client.sync.on_snapshot(
                                    &mut self.scene,
                                    &self.registry,
                                    snapshot,
                                )
                            {
                                tracing::warn!("buffered snapshot failed: {e}");
                            }
                        }
                        SceneChangeAction::Switch => {
                            self.scene = self
                                .hooks
                                .build_scene(&change.scene_key, change.scene_epoch);
                            events.push(SessionEvent::SceneChanged {
                                epoch: change.scene_epoch,
                                key: change.scene_key,
                            });
                            if let Some(snapshot) = client.sync.take_buffered(&self.scene)
                                && let Err(e) = client.sync.on_snapshot(
                                    &mut self.scene,
                                    &self.registry,
                                    snapshot,
                                )
                            {
                                tracing::warn!("buffered snapshot failed: {e}");
                            }
                        }
                    }
                }
                ClientEvent::Packet(Packet::Chat(chat)) => {
                    // The host player's copy already surfaced from the
                    // authority drain; the loopback echo would duplicate it.
                    if !client.sync.is_embedded() {
                        events.push(SessionEvent::Chat {
                            from: chat.sender,
                            text: chat.text,
                        });
                    }
                }
                ClientEvent::Packet(other) => {
                    tracing::debug!("client ignoring {:?}", other.kind());
                }
                ClientEvent::Disconnected { reason } => {
                    events.push(SessionEvent::Disconnected { reason });
                }
            }
        }
    }
}

fn send_input(
    runtime: &tokio::runtime::Runtime,
    scene: &mut Scene,
    tick: Tick,
    client: &mut ClientSession,
    payloads: Vec<CommandPayload>,
) {
    let batch = client.sync.predict(scene, tick, payloads);
    let packet = Packet::Command(batch);
    if let Err(e) = runtime.block_on(client.net.send_packet(&packet)) {
        tracing::warn!("command send failed: {e}");
    }
}

// ---------------------------------------------------------------------------
// Tests (offline paths; the networked flows live in tests/session_flow.rs)
// ---------------------------------------------------------------------------
