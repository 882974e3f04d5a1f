//! Core data model for request execution.
//!
//! This module provides the value types the engine is built around:
//!
//! - **Requests** ([`request`]): outbound call descriptions
//!   - [`Request`]: immutable-after-start description plus observable
//!     lifecycle state
//!   - [`RequestBuilder`]: fluent construction with build-time validation
//!   - [`BodySource`]: upload body variants (buffer, file, stream)
//!
//! - **Responses** ([`response`]): what came back
//!   - [`Response`]: status line, headers, and the decoded content artifact
//!
//! - **Versions** ([`version`]): the supported HTTP/1.x protocol versions
//!   - [`ProtocolVersion`]: HTTP/1.0 and HTTP/1.1
//!
//! - **Errors** ([`error`]): the external error contract
//!   - [`Error`]: terminal execution errors with stable numeric codes
//!   - [`BuildError`]: synchronous construction-time rejection
//!
//! Execution itself lives in [`crate::executor`]; the state machine that
//! connects these types to the transport is internal.

mod error;
pub use error::BuildError;
pub use error::Error;

mod version;
pub use version::ProtocolVersion;

mod request;
pub use request::BodySource;
pub use request::Request;
pub use request::RequestBuilder;
pub(crate) use request::Outcome;

mod response;
pub use response::Response;
pub(crate) use response::split_header_line;
