//! Error types for request execution.
//!
//! This module provides the error taxonomy surfaced by the engine:
//!
//! - [`Error`]: terminal outcome of an execution, delivered through the
//!   request's error callback and stored on the request
//! - [`BuildError`]: construction-time rejection from the request builder,
//!   returned synchronously before anything touches the network
//!
//! Every [`Error`] carries a stable numeric [`code`](Error::code). Engine-level
//! failures occupy the 1000 range; transport failures pass the transport's own
//! code through unchanged, so callers can branch on either family.
use std::path::PathBuf;

use thiserror::Error;

/// Terminal error of a request execution.
///
/// Exactly one of the request's finish/error/cancelled callbacks fires per
/// execution; this type is what the error callback receives. It is cheap to
/// clone so it can simultaneously live on the request for later inspection.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The request was cancelled by the caller.
    ///
    /// Cancellation is not a failure and normally routes to the cancelled
    /// callback instead; this variant only backs the numeric code space.
    #[error("request was cancelled")]
    Cancelled,

    /// The upload body could not be read from its backing file.
    #[error("error reading upload body from file {}: {message}", .path.display())]
    UploadFileStream { path: PathBuf, message: String },

    /// The upload body could not be read from its backing stream.
    #[error("error reading upload body from stream: {message}")]
    UploadDataStream { message: String },

    /// The content handler failed to consume response body bytes.
    #[error("content handler cannot write response data: {message}")]
    DownloadCannotWriteToHandler { message: String },

    /// The content handler refused the response based on its status code or
    /// `Content-Type`, or the response was discarded as non-2xx.
    #[error("response not acceptable: {reason}")]
    UnacceptableContentType { reason: String },

    /// The content handler accepted and consumed the body but could not turn
    /// it into its final artifact (e.g. invalid UTF-8 or malformed JSON).
    #[error("failed to decode response content: {message}")]
    ContentDecodingFailed { message: String },

    /// A failure reported by the underlying transport: connect failure,
    /// timeout, TLS failure, protocol violation.
    #[error("transport failure {code}: {message}")]
    Transport { code: u32, message: String },
}

impl Error {
    /// Creates a new UploadFileStream error.
    pub fn upload_file_stream<S: ToString>(path: PathBuf, message: S) -> Self {
        Self::UploadFileStream { path, message: message.to_string() }
    }

    /// Creates a new UploadDataStream error.
    pub fn upload_data_stream<S: ToString>(message: S) -> Self {
        Self::UploadDataStream { message: message.to_string() }
    }

    /// Creates a new DownloadCannotWriteToHandler error.
    pub fn download_write<S: ToString>(message: S) -> Self {
        Self::DownloadCannotWriteToHandler { message: message.to_string() }
    }

    /// Creates a new UnacceptableContentType error.
    pub fn unacceptable<S: ToString>(reason: S) -> Self {
        Self::UnacceptableContentType { reason: reason.to_string() }
    }

    /// Creates a new ContentDecodingFailed error.
    pub fn content_decoding<S: ToString>(message: S) -> Self {
        Self::ContentDecodingFailed { message: message.to_string() }
    }

    /// Creates a new transport passthrough error.
    pub fn transport<S: ToString>(code: u32, message: S) -> Self {
        Self::Transport { code, message: message.to_string() }
    }

    /// The stable numeric code of this error.
    ///
    /// Engine errors map into the 1000 range; transport errors report the
    /// transport's own code.
    pub fn code(&self) -> u32 {
        match self {
            Error::Cancelled => 1000,
            Error::UploadFileStream { .. } => 1001,
            Error::UploadDataStream { .. } => 1002,
            Error::DownloadCannotWriteToHandler { .. } => 1003,
            Error::UnacceptableContentType { .. } => 1004,
            Error::ContentDecodingFailed { .. } => 1005,
            Error::Transport { code, .. } => *code,
        }
    }

    /// Returns true if this error came from the underlying transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}

/// Errors that reject a request at construction time.
///
/// Nothing has been submitted when one of these is returned; no callbacks
/// fire and no network activity takes place.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The target URL was empty.
    #[error("target url must not be empty")]
    EmptyUrl,

    /// A header name or value was not valid.
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// An in-memory upload body was empty.
    #[error("upload body must not be empty")]
    EmptyBody,

    /// An upload file could not be inspected.
    #[error("cannot read upload file {}: {message}", .path.display())]
    UnreadableFile { path: PathBuf, message: String },

    /// A streaming upload of unknown size was requested on HTTP/1.0, which
    /// has no chunked transfer encoding.
    #[error("stream upload with unknown size requires HTTP/1.1")]
    UnknownSizeRequiresHttp11,
}

impl BuildError {
    /// Creates a new InvalidHeader error.
    pub fn invalid_header<S: ToString>(name: S, reason: S) -> Self {
        Self::InvalidHeader { name: name.to_string(), reason: reason.to_string() }
    }

    /// Creates a new UnreadableFile error.
    pub fn unreadable_file<S: ToString>(path: PathBuf, message: S) -> Self {
        Self::UnreadableFile { path, message: message.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_codes_are_stable() {
        assert_eq!(Error::Cancelled.code(), 1000);
        assert_eq!(Error::upload_file_stream(PathBuf::from("/tmp/x"), "gone").code(), 1001);
        assert_eq!(Error::upload_data_stream("broken pipe").code(), 1002);
        assert_eq!(Error::download_write("handler refused bytes").code(), 1003);
        assert_eq!(Error::unacceptable("status 413").code(), 1004);
        assert_eq!(Error::content_decoding("invalid utf-8").code(), 1005);
    }

    #[test]
    fn transport_errors_pass_their_code_through() {
        let error = Error::transport(28, "timeout was reached");
        assert_eq!(error.code(), 28);
        assert!(error.is_transport());
        assert!(!Error::Cancelled.is_transport());
    }

    #[test]
    fn display_mentions_the_failing_path() {
        let error = Error::upload_file_stream(PathBuf::from("/tmp/payload.bin"), "permission denied");
        assert!(error.to_string().contains("/tmp/payload.bin"));
    }
}
