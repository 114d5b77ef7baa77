//! Dual-transport network layer: a reliable, ordered, length-framed stream
//! per client plus one shared unreliable datagram socket, with the server
//! host and client connector built on top.
//!
//! Background I/O runs on tokio tasks; everything gameplay-facing is
//! delivered through bounded event queues drained by the game tick loop, so
//! scene mutation stays single-threaded.

pub mod client;
pub mod forward;
pub mod framing;
pub mod server;
pub mod socket;

pub use client::{ClientEvent, ConnectError, NetClient};
pub use forward::{ForwardError, ForwardHandle};
pub use framing::{MAX_FRAME_LEN, StreamError, read_frame, recv_packet, send_packet, write_frame};
pub use server::{NetServer, RemoteClient, ServerConfig, ServerError, ServerEvent};
pub use socket::{SocketConfig, bind_address, configure_stream, create_listener};
