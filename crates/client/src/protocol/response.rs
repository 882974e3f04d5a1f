//! HTTP response representation.
//!
//! A [`Response`] is an accumulating value: the per-request context creates
//! it from a parsed status line, feeds header lines into it as they arrive,
//! and finalizes it exactly once with the content artifact produced by the
//! request's content handler. After finalization it is immutable and shared
//! as `Arc<Response>`.
//!
//! Interim responses (status < 200, e.g. `100 Continue`) are first-class
//! values: they land in the request's observed-responses list and can be
//! inspected for diagnostics, but only the final response surfaces on
//! [`Request::response`](crate::protocol::Request::response).

use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tracing::trace;

use super::ProtocolVersion;
use crate::handler::Content;

/// A single HTTP response: status line, headers, and the content artifact
/// the content handler produced from its body.
pub struct Response {
    version: ProtocolVersion,
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    content: Option<Content>,
    content_size: u64,
    successful: bool,
    finished: bool,
}

impl Response {
    /// Parses a status line of the form `HTTP/1.1 200 OK`.
    ///
    /// The reason phrase may be empty. Returns `None` for malformed lines or
    /// unsupported protocol versions; the transfer is then aborted as a
    /// protocol violation.
    pub(crate) fn from_status_line(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, ' ');

        let version = ProtocolVersion::from_token(parts.next()?)?;
        let status = parts.next()?.parse::<u16>().ok().and_then(|code| StatusCode::from_u16(code).ok())?;
        let reason = parts.next().unwrap_or("").trim().to_string();

        Some(Self {
            version,
            status,
            reason,
            headers: HeaderMap::new(),
            content: None,
            content_size: 0,
            successful: false,
            finished: false,
        })
    }

    /// Adds a header received for this response.
    ///
    /// Repeated names accumulate; lookups stay case-insensitive.
    pub(crate) fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    /// Writes the terminal fields of this response, exactly once.
    pub(crate) fn finish(&mut self, content: Option<Content>, size: u64, successful: bool) {
        if self.finished {
            trace!(status = self.status.as_u16(), "ignoring second finalization of response");
            return;
        }
        self.content = content;
        self.content_size = size;
        self.successful = successful;
        self.finished = true;
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// The protocol version the server answered with.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// The response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase from the status line, possibly empty.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// All response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Looks up a header value by case-insensitive name.
    ///
    /// Returns the first value when the header was sent multiple times, or
    /// `None` when absent or not valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Downcasts the content artifact to the type the content handler
    /// produced.
    ///
    /// Returns `None` when there is no content (discarded or interim
    /// responses) or when `T` is not the artifact's type.
    pub fn content<T: 'static>(&self) -> Option<&T> {
        self.content.as_ref().and_then(|content| content.downcast_ref())
    }

    /// Whether a content artifact is attached.
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Size of the response body, in bytes.
    pub fn content_size(&self) -> u64 {
        self.content_size
    }

    /// Whether the execution that produced this response was successful:
    /// the content handler accepted it and the transfer completed without
    /// error.
    pub fn is_successful(&self) -> bool {
        self.successful
    }

    /// Whether this is an interim (1xx) response that does not terminate the
    /// exchange.
    pub fn is_interim(&self) -> bool {
        self.status.is_informational()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("version", &self.version)
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("content_size", &self.content_size)
            .field("successful", &self.successful)
            .finish_non_exhaustive()
    }
}

/// Splits a raw `Name: value` header line into its parts.
///
/// Whitespace around the value is trimmed. Returns `None` for lines without
/// a colon or with an empty name.
pub(crate) fn split_header_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_regular_status_line() {
        let response = Response::from_status_line("HTTP/1.1 200 OK").unwrap();
        assert_eq!(response.version(), ProtocolVersion::Http11);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.reason(), "OK");
        assert!(!response.is_interim());
    }

    #[test]
    fn parses_an_interim_status_line() {
        let response = Response::from_status_line("HTTP/1.1 100 Continue").unwrap();
        assert_eq!(response.status(), StatusCode::CONTINUE);
        assert!(response.is_interim());
    }

    #[test]
    fn reason_phrase_may_be_empty_or_multi_word() {
        let bare = Response::from_status_line("HTTP/1.0 404").unwrap();
        assert_eq!(bare.reason(), "");

        let wordy = Response::from_status_line("HTTP/1.1 500 The Bees They're In My Eyes").unwrap();
        assert_eq!(wordy.reason(), "The Bees They're In My Eyes");
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(Response::from_status_line("HTTP/2 200 OK").is_none());
        assert!(Response::from_status_line("garbage").is_none());
        assert!(Response::from_status_line("HTTP/1.1 abc OK").is_none());
        assert!(Response::from_status_line("HTTP/1.1 1000 Out Of Range").is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut response = Response::from_status_line("HTTP/1.1 200 OK").unwrap();
        response.append_header(HeaderName::from_static("content-type"), HeaderValue::from_static("text/plain"));

        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.header("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn finalization_happens_exactly_once() {
        let mut response = Response::from_status_line("HTTP/1.1 200 OK").unwrap();
        response.finish(Some(Box::new("first".to_string())), 5, true);
        response.finish(Some(Box::new("second".to_string())), 6, false);

        assert_eq!(response.content::<String>().unwrap(), "first");
        assert_eq!(response.content_size(), 5);
        assert!(response.is_successful());
    }

    #[test]
    fn content_downcast_is_typed() {
        let mut response = Response::from_status_line("HTTP/1.1 200 OK").unwrap();
        response.finish(Some(Box::new("hello".to_string())), 5, true);

        assert_eq!(response.content::<String>().map(String::as_str), Some("hello"));
        assert!(response.content::<Vec<u8>>().is_none());
    }

    #[test]
    fn splits_header_lines() {
        assert_eq!(split_header_line("Content-Type: text/plain"), Some(("Content-Type", "text/plain")));
        assert_eq!(split_header_line("X-Empty:"), Some(("X-Empty", "")));
        assert_eq!(split_header_line("no colon here"), None);
        assert_eq!(split_header_line(": no name"), None);
    }
}
