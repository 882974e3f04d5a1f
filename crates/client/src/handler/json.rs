//! JSON content handler.

use bytes::BytesMut;
use http::{HeaderMap, StatusCode};
use serde_json::Value;

use super::{Content, ContentHandler, SelectiveDiscarder};
use crate::protocol::Error;

/// Content handler that buffers the response body and parses it as JSON,
/// yielding a [`serde_json::Value`] tree.
///
/// By default only responses whose `Content-Type` contains `json` are
/// accepted; pass a custom policy to widen or narrow that.
#[derive(Debug)]
pub struct JsonDecoder {
    policy: SelectiveDiscarder,
    buffer: BytesMut,
}

impl JsonDecoder {
    /// Creates a JSON decoder accepting `json`-flavoured content types.
    pub fn new() -> Self {
        Self::with_policy(SelectiveDiscarder::new().with_acceptable_content_types(["json"]))
    }

    /// Creates a JSON decoder with a custom acceptance policy.
    pub fn with_policy(policy: SelectiveDiscarder) -> Self {
        Self { policy, buffer: BytesMut::new() }
    }
}

impl Default for JsonDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHandler for JsonDecoder {
    fn prepare(&mut self, status: StatusCode, _reason: &str, headers: &HeaderMap) -> Result<(), Error> {
        self.policy.check(status, headers)
    }

    fn append(&mut self, data: &[u8]) -> usize {
        self.buffer.extend_from_slice(data);
        data.len()
    }

    fn parse_content(&mut self) -> Result<Option<Content>, Error> {
        let bytes = self.buffer.split().freeze();
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Ok(Some(Box::new(value))),
            Err(e) => Err(Error::content_decoding(format!("response body is not valid json: {e}"))),
        }
    }
}
