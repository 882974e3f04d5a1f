//! HTTP protocol version handling.
//!
//! The engine speaks HTTP/1.x only; anything newer is rejected at the parsing
//! boundary so the state machine never sees a framing model it does not
//! understand.

use std::fmt;

/// The HTTP protocol versions a request can be executed under.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1, the default
    #[default]
    Http11,
}

impl ProtocolVersion {
    /// Returns the version token as it appears on the wire, e.g. `HTTP/1.1`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::Http10 => "HTTP/1.0",
            ProtocolVersion::Http11 => "HTTP/1.1",
        }
    }

    /// Parses a wire token (`HTTP/1.0` or `HTTP/1.1`) into a version.
    ///
    /// Returns `None` for unsupported or malformed tokens.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.0" => Some(ProtocolVersion::Http10),
            "HTTP/1.1" => Some(ProtocolVersion::Http11),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
