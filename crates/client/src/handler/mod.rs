//! Response content handlers.
//!
//! This module defines the sink side of the engine: response bodies are not
//! buffered by the core but streamed, byte chunk by byte chunk, into a
//! [`ContentHandler`]. The handler decides up front whether it wants the
//! response at all, consumes the body incrementally with backpressure, and
//! finally produces a typed content artifact.
//!
//! # The contract
//!
//! For every response a handler sees, the call sequence is:
//!
//! 1. [`prepare`](ContentHandler::prepare): exactly once, with the status
//!    code, reason phrase and headers. Returning an error rejects the
//!    response and aborts the transfer before any body byte is handled.
//! 2. [`append`](ContentHandler::append): zero or more times. Returning
//!    fewer bytes than offered aborts the transfer.
//! 3. Exactly one of:
//!    - [`parse_content`](ContentHandler::parse_content): on the accepted
//!      path, to produce the final artifact;
//!    - [`cleanup`](ContentHandler::cleanup): on abnormal termination
//!      (error or cancellation), so partially created resources can be
//!      released.
//!
//! # Implementations
//!
//! - [`SelectiveDiscarder`]: accepts by status/content-type policy, discards
//!   every byte, yields no content. The default handler of every request.
//! - [`Accumulator`]: buffers the body, yields [`bytes::Bytes`].
//! - [`TextDecoder`]: buffers and decodes UTF-8, yields [`String`].
//! - [`JsonDecoder`]: buffers and parses, yields [`serde_json::Value`].
//! - [`FileWriter`]: streams to disk, yields the target [`std::path::PathBuf`];
//!   removes the partial file when the transfer dies underneath it.

use std::any::Any;

use http::{HeaderMap, StatusCode};

use crate::protocol::Error;

mod accumulator;
mod discard;
mod file;
mod json;
mod text;

pub use accumulator::Accumulator;
pub use discard::SelectiveDiscarder;
pub use file::FileWriter;
pub use json::JsonDecoder;
pub use text::TextDecoder;

/// The opaque content artifact a handler produces.
///
/// Responses expose it back to callers through a typed downcast, see
/// [`Response::content`](crate::protocol::Response::content).
pub type Content = Box<dyn Any + Send + Sync>;

/// A consumer of response body bytes that yields the decoded content.
///
/// Implementations are driven by the per-request context; they never see the
/// transport. All calls for one response happen on the executor's dispatch
/// thread, in the order documented at the [module level](self).
pub trait ContentHandler: Send {
    /// Inspects the response line and headers and decides whether this
    /// handler accepts the response.
    ///
    /// Returning an error short-circuits the body phase: the transfer is
    /// aborted and the error becomes the request's terminal error.
    fn prepare(&mut self, status: StatusCode, reason: &str, headers: &HeaderMap) -> Result<(), Error>;

    /// Feeds a chunk of response body data to the handler.
    ///
    /// Returns the number of bytes consumed. Returning fewer than
    /// `data.len()` signals that the handler cannot keep up or has failed,
    /// and aborts the transfer.
    fn append(&mut self, data: &[u8]) -> usize;

    /// Produces the final content artifact.
    ///
    /// Called exactly once per accepted response, after the last `append`.
    /// `Ok(None)` means the handler deliberately yields no content.
    fn parse_content(&mut self) -> Result<Option<Content>, Error>;

    /// Releases partially created resources after an abnormal termination.
    ///
    /// Invoked instead of `parse_content` when the transfer errored out or
    /// was cancelled after this handler was prepared.
    fn cleanup(&mut self) {}
}
