use crate::message::Message;

/// Hard cap on a single frame's payload size.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// WireError
// ---------------------------------------------------------------------------

/// Protocol-level decode/encode failures. These never change receiver
/// state; the connection that produced one is simply answered with an
/// error (when possible) and closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    ZeroLength,
    Oversize(usize),
    Malformed(String),
    ChecksumMismatch,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::ZeroLength => write!(f, "invalid message length: 0"),
            WireError::Oversize(n) => write!(f, "invalid message length: {n}"),
            WireError::Malformed(e) => write!(f, "failed to decode message: {e}"),
            WireError::ChecksumMismatch => write!(f, "checksum verification failed"),
        }
    }
}

impl std::error::Error for WireError {}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Serialize a message to its JSON payload bytes (no length prefix).
pub fn encode(msg: &Message) -> Result<Vec<u8>, WireError> {
    let bytes = serde_json::to_vec(msg).map_err(|e| WireError::Malformed(e.to_string()))?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(WireError::Oversize(bytes.len()));
    }
    Ok(bytes)
}

/// Parse payload bytes and verify the checksum.
pub fn decode(bytes: &[u8]) -> Result<Message, WireError> {
    let msg: Message =
        serde_json::from_slice(bytes).map_err(|e| WireError::Malformed(e.to_string()))?;
    if !msg.verify() {
        return Err(WireError::ChecksumMismatch);
    }
    Ok(msg)
}

/// Validate a big-endian length prefix against the frame bounds.
pub fn frame_len(prefix: [u8; 4]) -> Result<usize, WireError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 {
        return Err(WireError::ZeroLength);
    }
    if len > MAX_FRAME_BYTES {
        return Err(WireError::Oversize(len));
    }
    Ok(len)
}
