//! libcurl transport adapter.
//!
//! This is the only module that names the transport library. Everything
//! above it sees requests, contexts and the error taxonomy; everything
//! below this line is curl: easy handles carry single transfers, the
//! executor's supervisor drives them through a multi handle, and the
//! [`CallbackBridge`] marshals curl's callbacks into the bound
//! [`RequestContext`](crate::context::RequestContext).
//!
//! [`configure`] translates a [`Request`] into easy-handle options. Notable
//! mappings:
//!
//! - the read-idle timeout uses curl's low-speed cutoff (1 byte/s over the
//!   configured window), the intended inter-byte semantics
//! - uploads of known size advertise `Content-Length` through the transport;
//!   unknown or forced-chunked uploads send `Transfer-Encoding: chunked`
//! - `Expect: 100-Continue` is set explicitly on uploads, or pinned empty
//!   when suppressed so the transport cannot re-add it

use std::sync::Arc;

use curl::easy::{Easy2, HttpVersion, List};
use tracing::debug;

use crate::protocol::{Error, ProtocolVersion, Request};

mod bridge;
pub(crate) use bridge::CallbackBridge;

/// One reusable transfer handle, pooled by the executor.
pub(crate) type Transport = Easy2<CallbackBridge>;

/// Creates a fresh, unconfigured transport handle.
pub(crate) fn new_handle() -> Transport {
    Easy2::new(CallbackBridge::new())
}

impl From<curl::Error> for Error {
    fn from(e: curl::Error) -> Self {
        Error::transport(e.code() as u32, e.description())
    }
}

/// Converts a multi-driver failure into the error taxonomy.
pub(crate) fn multi_error(e: curl::MultiError) -> Error {
    Error::transport(e.code() as u32, e.description())
}

/// Translates the request's description into transport options.
///
/// The handle is fully reset first, so a pooled handle carries nothing over
/// from its previous transfer except live connections.
pub(crate) fn configure(easy: &mut Transport, request: &Arc<Request>, verbose: bool, dont_reuse: bool) -> Result<(), Error> {
    easy.reset();

    // never let the transport install signal handlers; transfers run on a
    // shared supervisor thread
    easy.signal(false)?;

    easy.url(request.url())?;
    easy.custom_request(request.verb().as_str())?;
    if request.verb() == &http::Method::HEAD {
        easy.nobody(true)?;
    }
    easy.http_version(match request.version() {
        ProtocolVersion::Http10 => HttpVersion::V10,
        ProtocolVersion::Http11 => HttpVersion::V11,
    })?;

    let config = request.config();
    easy.connect_timeout(config.connect_timeout)?;
    if let Some(read_timeout) = config.read_timeout {
        easy.low_speed_limit(1)?;
        easy.low_speed_time(read_timeout)?;
    }
    if config.max_redirects > 0 {
        easy.follow_location(true)?;
        easy.max_redirections(config.max_redirects)?;
    }
    if config.allow_invalid_tls {
        easy.ssl_verify_peer(false)?;
        easy.ssl_verify_host(false)?;
    }
    if dont_reuse {
        easy.forbid_reuse(true)?;
    }
    easy.verbose(verbose)?;
    easy.progress(true)?;

    let mut headers = List::new();
    for (name, value) in request.headers().iter() {
        headers.append(&format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes())))?;
    }

    if request.is_upload() {
        easy.upload(true)?;

        let chunked = match request.upload_size() {
            None => true,
            Some(_) => config.chunked_transfer && request.version() == ProtocolVersion::Http11,
        };
        if chunked {
            headers.append("Transfer-Encoding: chunked")?;
        } else if let Some(size) = request.upload_size() {
            easy.in_filesize(size)?;
        }

        if config.suppress_expect_100 {
            // a bare name strips the header the transport would add itself
            headers.append("Expect:")?;
        } else {
            headers.append("Expect: 100-continue")?;
        }
    }

    easy.http_headers(headers)?;

    debug!(url = %request.url(), verb = %request.verb(), "transport handle configured");
    Ok(())
}
