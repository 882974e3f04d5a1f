//! UTF-8 text content handler.

use bytes::BytesMut;
use http::{HeaderMap, StatusCode};

use super::{Content, ContentHandler, SelectiveDiscarder};
use crate::protocol::Error;

/// Content handler that buffers the response body and decodes it as strict
/// UTF-8, yielding a [`String`].
///
/// Invalid UTF-8 fails content parsing; the request then terminates with a
/// content-decoding error.
#[derive(Debug, Default)]
pub struct TextDecoder {
    policy: SelectiveDiscarder,
    buffer: BytesMut,
}

impl TextDecoder {
    /// Creates a text decoder that accepts every response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a text decoder with a custom acceptance policy.
    pub fn with_policy(policy: SelectiveDiscarder) -> Self {
        Self { policy, buffer: BytesMut::new() }
    }
}

impl ContentHandler for TextDecoder {
    fn prepare(&mut self, status: StatusCode, _reason: &str, headers: &HeaderMap) -> Result<(), Error> {
        self.policy.check(status, headers)
    }

    fn append(&mut self, data: &[u8]) -> usize {
        self.buffer.extend_from_slice(data);
        data.len()
    }

    fn parse_content(&mut self) -> Result<Option<Content>, Error> {
        let bytes = self.buffer.split().freeze();
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Ok(Some(Box::new(text))),
            Err(e) => Err(Error::content_decoding(format!("response body is not valid utf-8: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf8_body() {
        let mut decoder = TextDecoder::new();
        decoder.prepare(StatusCode::OK, "OK", &HeaderMap::new()).unwrap();
        decoder.append("grüß ".as_bytes());
        decoder.append("gott".as_bytes());

        let content = decoder.parse_content().unwrap().unwrap();
        assert_eq!(content.downcast_ref::<String>().unwrap(), "grüß gott");
    }

    #[test]
    fn invalid_utf8_fails_with_decoding_error() {
        let mut decoder = TextDecoder::new();
        decoder.prepare(StatusCode::OK, "OK", &HeaderMap::new()).unwrap();
        decoder.append(&[0xff, 0xfe, 0xfd]);

        let error = decoder.parse_content().unwrap_err();
        assert_eq!(error.code(), 1005);
    }
}
