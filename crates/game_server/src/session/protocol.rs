//! Wire envelopes for the client handshake.
//!
//! Datagrams carry a single bincode-encoded [`ClientPacket`] (client to
//! server) or [`ServerPacket`] (server to client).

use crate::error::SessionError;
use serde::{Deserialize, Serialize};

/// Default limit for an encoded outbound message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientPacket {
    /// Asks for a session under a display name
    Hello { name: String },
    /// Application payload for an established session
    Data { payload: Vec<u8> },
    /// Ends the session
    Goodbye,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HelloReply {
    Ok { client_id: u32 },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerPacket {
    Hello(HelloReply),
}

pub fn decode<T: for<'de> Deserialize<'de>>(datagram: &[u8]) -> Result<T, SessionError> {
    bincode::deserialize(datagram).map_err(|e| SessionError::Decode(e.to_string()))
}

/// Encodes `message` into `buffer`, replacing its contents.
///
/// Messages larger than `limit` are rejected whole, never truncated.
pub fn encode_into<T: Serialize>(buffer: &mut Vec<u8>, limit: usize, message: &T) -> Result<(), SessionError> {
    let size = bincode::serialized_size(message).map_err(|e| SessionError::Encode(e.to_string()))?;
    if size > limit as u64 {
        return Err(SessionError::MessageTooLarge { size, limit });
    }
    buffer.clear();
    bincode::serialize_into(&mut *buffer, message).map_err(|e| SessionError::Encode(e.to_string()))
}
