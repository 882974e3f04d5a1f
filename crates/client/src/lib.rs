//! An embeddable HTTP/1.x client execution engine.
//!
//! ferry-http drives fully described HTTP requests (verb, URL, headers,
//! optional streaming body) to completion against remote servers and
//! delivers a structured response or a typed error. Socket I/O, TLS and
//! wire framing are delegated to libcurl; this crate wraps that transport
//! in a correct, concurrent, cancellable execution model:
//!
//! - an [`Executor`] bounds parallelism, pools transport handles and admits
//!   requests against a bounded FIFO queue;
//! - a per-request state machine tracks the response phase, supports
//!   interim (1xx) responses, and coordinates upload pausing around the
//!   `Expect: 100-Continue` handshake, including the hard case of a server
//!   responding midway through an upload;
//! - response bodies stream through a pluggable [`ContentHandler`] that
//!   accepts or rejects a response up front, consumes bytes with
//!   backpressure, and produces the final typed content artifact.
//!
//! # Example
//!
//! ```no_run
//! use ferry_http::{Executor, Request, TextDecoder};
//! use http::Method;
//!
//! let request = Request::builder("https://example.com/greeting", Method::GET)
//!     .content_handler(TextDecoder::new())
//!     .on_finish(|req| {
//!         let response = req.response().unwrap();
//!         println!("{}: {:?}", response.status(), response.content::<String>());
//!     })
//!     .on_error(|_, e| eprintln!("failed: {e}"))
//!     .build()
//!     .unwrap();
//!
//! Executor::shared().submit(request);
//! ```

pub mod executor;
pub mod handler;
pub mod protocol;

mod context;
mod transport;
mod utils;

pub use executor::Executor;
pub use handler::{Accumulator, Content, ContentHandler, FileWriter, JsonDecoder, SelectiveDiscarder, TextDecoder};
pub use protocol::{BodySource, BuildError, Error, ProtocolVersion, Request, RequestBuilder, Response};
