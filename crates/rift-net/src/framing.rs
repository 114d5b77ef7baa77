//! Length-prefixed packet framing for the reliable stream.
//!
//! Every stream message is a frame:
//!
//! ```text
//! +-------------------+------------------------+
//! | length (4 bytes)  |  tagged packet bytes   |
//! | u32 little-endian |  (length bytes)        |
//! +-------------------+------------------------+
//! ```
//!
//! The length covers the payload only, not the prefix itself. Receivers
//! block until a full frame is available or the peer closes the stream.
//! Datagrams never pass through here — they carry the tagged packet bytes
//! raw.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use rift_protocol::{Packet, PacketError};

/// Largest accepted frame payload. Commands, chat, and scene notices are
/// tiny; this bound exists to reject a hostile or corrupt length prefix
/// before allocating.
pub const MAX_FRAME_LEN: u32 = 256 * 1024;

/// Errors on the framed stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The length prefix exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared payload size.
        size: u32,
        /// The enforced maximum.
        max: u32,
    },

    /// The peer closed the stream (possibly mid-frame).
    #[error("connection closed")]
    ConnectionClosed,

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame arrived intact but its payload is not a valid packet.
    /// Recoverable outside the handshake: log it and read the next frame.
    #[error("decode error: {0}")]
    Decode(#[from] PacketError),
}

impl StreamError {
    /// `true` for faults that end the connection, as opposed to a single
    /// undecodable frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StreamError::Decode(_))
    }
}

/// Reads one frame payload. Blocks until complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>, StreamError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(StreamError::ConnectionClosed);
        }
        Err(e) => return Err(StreamError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(StreamError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len as usize];
    if len > 0 {
        reader.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                StreamError::ConnectionClosed
            } else {
                StreamError::Io(e)
            }
        })?;
    }
    Ok(payload)
}

/// Writes one frame: length prefix, payload, flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), StreamError> {
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(StreamError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Sends a packet as one frame.
pub async fn send_packet<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), StreamError> {
    write_frame(writer, &packet.to_bytes()).await
}

/// Receives the next frame and decodes it.
///
/// A [`StreamError::Decode`] here means this frame was bad, not the stream:
/// callers outside the handshake should log and call again.
pub async fn recv_packet<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Packet, StreamError> {
    let payload = read_frame(reader).await?;
    Ok(Packet::from_bytes(&payload)?)
}
