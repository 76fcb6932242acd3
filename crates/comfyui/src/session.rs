//! Session identity.
//!
//! ComfyUI multiplexes every client's events over one event stream and
//! routes per-client messages by the `clientId` given during the
//! WebSocket handshake. The same identifier must accompany each
//! submitted prompt so the server addresses that job's events (and
//! binary previews) back to this connection.

use std::fmt;

/// Unique identifier for one client session (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
