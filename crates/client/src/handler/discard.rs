//! The selective discarder, default handler of every request.
//!
//! Accepts or rejects a response based on its status code and `Content-Type`
//! header, then throws every body byte away. Other handlers embed it for the
//! acceptance decision and layer actual content handling on top.

use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};

use super::{Content, ContentHandler};
use crate::protocol::Error;

/// Content handler that validates a response and discards its body.
///
/// Two allow-lists drive the decision:
///
/// - `acceptable_responses`: status codes to accept; empty accepts all.
/// - `acceptable_content_types`: substrings tested, in order, against the
///   response's `Content-Type`; empty accepts all.
///
/// The content-type test is a dumb case-insensitive substring search, by
/// design. Wildcard behavior falls out of passing partial strings:
///
/// - `application/json` allows `application/json;charset=utf-8`
/// - `text/` allows any content type beginning with `text/`
/// - `json` allows any content type containing `json`
#[derive(Debug, Clone, Default)]
pub struct SelectiveDiscarder {
    acceptable_responses: Vec<StatusCode>,
    acceptable_content_types: Vec<String>,
}

impl SelectiveDiscarder {
    /// Creates a discarder that accepts every response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts acceptance to the given status codes.
    pub fn with_acceptable_responses<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = StatusCode>,
    {
        self.acceptable_responses = codes.into_iter().collect();
        self
    }

    /// Restricts acceptance to `Content-Type` values matching any of the
    /// given substrings.
    pub fn with_acceptable_content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptable_content_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the status code passes the allow-list.
    pub fn is_acceptable_response(&self, status: StatusCode) -> bool {
        self.acceptable_responses.is_empty() || self.acceptable_responses.contains(&status)
    }

    /// Whether the `Content-Type` value passes the allow-list.
    pub fn is_acceptable_content_type(&self, content_type: &str) -> bool {
        if self.acceptable_content_types.is_empty() {
            return true;
        }
        let lowered = content_type.to_ascii_lowercase();
        self.acceptable_content_types.iter().any(|candidate| lowered.contains(&candidate.to_ascii_lowercase()))
    }

    /// Runs both checks against a response head, producing the rejection
    /// error other handlers reuse from their own `prepare`.
    pub(crate) fn check(&self, status: StatusCode, headers: &HeaderMap) -> Result<(), Error> {
        if !self.is_acceptable_response(status) {
            return Err(Error::unacceptable(format!("status code {} not in acceptable responses", status.as_u16())));
        }

        let content_type = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).unwrap_or("");
        if !self.is_acceptable_content_type(content_type) {
            return Err(Error::unacceptable(format!("content type {content_type:?} not in acceptable content types")));
        }

        Ok(())
    }
}

impl ContentHandler for SelectiveDiscarder {
    fn prepare(&mut self, status: StatusCode, _reason: &str, headers: &HeaderMap) -> Result<(), Error> {
        self.check(status, headers)
    }

    fn append(&mut self, data: &[u8]) -> usize {
        data.len()
    }

    fn parse_content(&mut self) -> Result<Option<Content>, Error> {
        Ok(None)
    }
}
