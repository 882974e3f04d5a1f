//! In-memory accumulating content handler.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};

use super::{Content, ContentHandler, SelectiveDiscarder};
use crate::protocol::Error;

/// Content handler that buffers the whole response body in memory and yields
/// it as [`Bytes`].
///
/// Acceptance is delegated to an embedded [`SelectiveDiscarder`] policy;
/// by default everything is accepted.
#[derive(Debug, Default)]
pub struct Accumulator {
    policy: SelectiveDiscarder,
    buffer: BytesMut,
}

impl Accumulator {
    /// Creates an accumulator that accepts every response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an accumulator with a custom acceptance policy.
    pub fn with_policy(policy: SelectiveDiscarder) -> Self {
        Self { policy, buffer: BytesMut::new() }
    }

    /// Bytes buffered so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been buffered yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl ContentHandler for Accumulator {
    fn prepare(&mut self, status: StatusCode, _reason: &str, headers: &HeaderMap) -> Result<(), Error> {
        self.policy.check(status, headers)
    }

    fn append(&mut self, data: &[u8]) -> usize {
        self.buffer.extend_from_slice(data);
        data.len()
    }

    fn parse_content(&mut self) -> Result<Option<Content>, Error> {
        Ok(Some(Box::new(self.buffer.split().freeze())))
    }
}
