//! HTTP request representation and builder.
//!
//! A [`Request`] fully describes one outbound call: target URL, verb,
//! protocol version, headers, an optional upload body, the content handler
//! that will consume the response, numeric limits, behavior flags, and the
//! lifecycle callbacks the engine fires as the transfer progresses.
//!
//! Requests are built through [`RequestBuilder`], validated at
//! [`build`](RequestBuilder::build), and submitted to an
//! [`Executor`](crate::executor::Executor) as `Arc<Request>`. The
//! description is immutable once execution starts (headers can still be
//! adjusted between `build` and submission), while the lifecycle state
//! (cancel flag, timing and byte counters, terminal error, responses) is
//! interior-mutable and observable from any thread.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tracing::debug;

use super::{BuildError, Error, ProtocolVersion, Response};
use crate::handler::{ContentHandler, SelectiveDiscarder};
use crate::utils::{current_time_millis, ensure};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const OCTET_STREAM: &str = "application/octet-stream";

/// The source of an upload body.
pub enum BodySource {
    /// A fully in-memory payload.
    Buffer { data: Bytes, content_type: String },
    /// A file on disk, opened lazily when the transfer first needs bytes.
    /// The size is captured when the request is built.
    File { path: PathBuf, size: u64 },
    /// An arbitrary byte stream with known or unknown size. Unknown size
    /// forces chunked transfer encoding and requires HTTP/1.1.
    Stream { reader: Box<dyn Read + Send>, content_type: String, size: Option<u64> },
}

impl BodySource {
    /// The number of bytes this source will produce, when known up front.
    pub fn size(&self) -> Option<u64> {
        match self {
            BodySource::Buffer { data, .. } => Some(data.len() as u64),
            BodySource::File { size, .. } => Some(*size),
            BodySource::Stream { size, .. } => *size,
        }
    }

    fn content_type(&self) -> &str {
        match self {
            BodySource::Buffer { content_type, .. } => content_type,
            BodySource::File { .. } => OCTET_STREAM,
            BodySource::Stream { content_type, .. } => content_type,
        }
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Buffer { data, content_type } => {
                f.debug_struct("Buffer").field("len", &data.len()).field("content_type", content_type).finish()
            }
            BodySource::File { path, size } => f.debug_struct("File").field("path", path).field("size", size).finish(),
            BodySource::Stream { content_type, size, .. } => {
                f.debug_struct("Stream").field("content_type", content_type).field("size", size).finish()
            }
        }
    }
}

/// Tunables and flags that shape how a request is executed.
#[derive(Debug, Clone)]
pub(crate) struct TransferConfig {
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) max_redirects: u32,
    pub(crate) suppress_expect_100: bool,
    pub(crate) discard_body_on_non_2xx: bool,
    pub(crate) chunked_transfer: bool,
    pub(crate) allow_invalid_tls: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            max_redirects: 0,
            suppress_expect_100: false,
            discard_body_on_non_2xx: true,
            chunked_transfer: false,
            allow_invalid_tls: false,
        }
    }
}

type LifecycleCallback = Box<dyn FnOnce(&Request) + Send>;
type ErrorCallback = Box<dyn FnOnce(&Request, &Error) + Send>;
type ProgressCallback = Box<dyn FnMut(u64, u64) + Send>;

/// Lifecycle callbacks. Terminal ones are taken out of their slot on
/// invocation, which guards every callback against firing twice.
#[derive(Default)]
struct Callbacks {
    start: Option<LifecycleCallback>,
    finish: Option<LifecycleCallback>,
    error: Option<ErrorCallback>,
    cancelled: Option<LifecycleCallback>,
    finally: Option<LifecycleCallback>,
    upload_progress: Option<ProgressCallback>,
    download_progress: Option<ProgressCallback>,
}

/// How an execution terminated. Exactly one terminal callback corresponds
/// to each variant.
pub(crate) enum Outcome {
    Finished,
    Errored(Error),
    Cancelled,
}

/// An HTTP or HTTPS request to a resource on a remote server.
///
/// See the [module docs](self) for the lifecycle; see
/// [`RequestBuilder`] for construction.
pub struct Request {
    url: String,
    verb: Method,
    version: ProtocolVersion,
    config: TransferConfig,

    headers: Mutex<HeaderMap>,
    body: Mutex<Option<BodySource>>,
    handler: Mutex<Option<Box<dyn ContentHandler>>>,
    callbacks: Mutex<Callbacks>,

    is_upload: bool,
    upload_size: Option<u64>,

    submitted: AtomicBool,
    started: AtomicBool,
    finished: AtomicBool,
    cancelled: AtomicBool,

    start_timestamp: AtomicI64,
    end_timestamp: AtomicI64,
    sent_bytes: AtomicU64,
    received_bytes: AtomicU64,
    download_size: AtomicU64,

    error: Mutex<Option<Error>>,
    response: Mutex<Option<Arc<Response>>>,
    responses: Mutex<Vec<Arc<Response>>>,
}

impl Request {
    /// Starts building a request to `url` with the given verb, HTTP/1.1.
    pub fn builder(url: impl Into<String>, verb: Method) -> RequestBuilder {
        RequestBuilder::new(url, verb)
    }

    /// The target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The HTTP verb.
    pub fn verb(&self) -> &Method {
        &self.verb
    }

    /// The protocol version the request will be executed under.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Looks up a request header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<String> {
        let headers = self.headers.lock().unwrap();
        headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
    }

    /// Whether a header with the given name is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.lock().unwrap().contains_key(name)
    }

    /// Sets or replaces a header.
    ///
    /// Returns `false`, leaving the map untouched, once execution has
    /// started, or when the name or value is invalid.
    pub fn set_header(&self, name: &str, value: &str) -> bool {
        if self.has_started() {
            return false;
        }
        let Ok(name) = HeaderName::try_from(name) else {
            return false;
        };
        let Ok(value) = HeaderValue::try_from(value) else {
            return false;
        };
        self.headers.lock().unwrap().insert(name, value);
        true
    }

    /// A snapshot of all request headers.
    pub fn headers(&self) -> HeaderMap {
        self.headers.lock().unwrap().clone()
    }

    /// Whether this request uploads a body (from buffer, file or stream).
    pub fn is_upload(&self) -> bool {
        self.is_upload
    }

    /// The upload size in bytes; `None` for a stream of unknown size.
    pub fn upload_size(&self) -> Option<u64> {
        self.upload_size
    }

    /// Whether the size of the upload is known up front.
    pub fn upload_size_known(&self) -> bool {
        !self.is_upload || self.upload_size.is_some()
    }

    /// Cancels this request.
    ///
    /// Queued requests are discarded when they reach the head of the queue;
    /// active transfers are aborted at the transport's next yield. Either
    /// way the cancelled callback fires, followed by finally. Returns
    /// `false` when the request already finished or was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.has_finished() {
            return false;
        }
        let newly = !self.cancelled.swap(true, Ordering::AcqRel);
        if newly {
            debug!(url = %self.url, "request cancelled");
        }
        newly
    }

    /// Whether the cancel flag is set. Monotonic: never goes back to false.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether execution has started.
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Whether execution has terminated, in any way.
    pub fn has_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Whether the request is currently in flight.
    pub fn is_executing(&self) -> bool {
        self.has_started() && !self.has_finished()
    }

    /// Wall-clock millis at execution start, 0 if not started.
    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp.load(Ordering::Acquire)
    }

    /// Wall-clock millis at termination, 0 if not finished.
    pub fn end_timestamp(&self) -> i64 {
        self.end_timestamp.load(Ordering::Acquire)
    }

    /// Body bytes sent so far.
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes.load(Ordering::Acquire)
    }

    /// Response body bytes received so far.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes.load(Ordering::Acquire)
    }

    /// Advertised size of the response body, 0 when unknown.
    pub fn download_size(&self) -> u64 {
        self.download_size.load(Ordering::Acquire)
    }

    /// Fraction of the upload completed so far, 0.0 when there is no upload
    /// or its size is unknown.
    pub fn upload_progress(&self) -> f64 {
        match self.upload_size {
            Some(total) if total > 0 => self.sent_bytes() as f64 / total as f64,
            _ => 0.0,
        }
    }

    /// Fraction of the download completed so far, 0.0 while the response
    /// size is unknown.
    pub fn download_progress(&self) -> f64 {
        let total = self.download_size();
        if total == 0 { 0.0 } else { self.received_bytes() as f64 / total as f64 }
    }

    /// The terminal error, if execution failed.
    pub fn error(&self) -> Option<Error> {
        self.error.lock().unwrap().clone()
    }

    /// The final response, once execution terminated with one.
    pub fn response(&self) -> Option<Arc<Response>> {
        self.response.lock().unwrap().clone()
    }

    /// Every response observed during execution, interim (1xx) responses
    /// included, in arrival order.
    pub fn responses(&self) -> Vec<Arc<Response>> {
        self.responses.lock().unwrap().clone()
    }

    /// Status code of the final response, when there is one.
    pub fn response_status(&self) -> Option<StatusCode> {
        self.response().map(|response| response.status())
    }

    /// Whether execution completed with a response the content handler
    /// accepted and no error.
    pub fn was_successful(&self) -> bool {
        self.error().is_none() && self.response().is_some_and(|response| response.is_successful())
    }

    pub(crate) fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Marks the request as owned by an executor. Returns `false` when it
    /// was already submitted somewhere.
    pub(crate) fn mark_submitted(&self) -> bool {
        !self.submitted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
        self.start_timestamp.store(current_time_millis(), Ordering::Release);
    }

    /// Takes the body source out of the request; the context owns it for
    /// the duration of the transfer.
    pub(crate) fn take_body(&self) -> Option<BodySource> {
        self.body.lock().unwrap().take()
    }

    /// Takes the content handler, falling back to a fresh discarder.
    pub(crate) fn take_handler(&self) -> Box<dyn ContentHandler> {
        self.handler.lock().unwrap().take().unwrap_or_else(|| Box::new(SelectiveDiscarder::new()))
    }

    pub(crate) fn add_sent_bytes(&self, n: u64) {
        self.sent_bytes.fetch_add(n, Ordering::AcqRel);
    }

    pub(crate) fn add_received_bytes(&self, n: u64) {
        self.received_bytes.fetch_add(n, Ordering::AcqRel);
    }

    pub(crate) fn set_download_size(&self, n: u64) {
        self.download_size.store(n, Ordering::Release);
    }

    pub(crate) fn fire_start(&self) {
        let callback = self.callbacks.lock().unwrap().start.take();
        if let Some(callback) = callback {
            callback(self);
        }
    }

    pub(crate) fn fire_upload_progress(&self, sent: u64, total: u64) {
        let callback = self.callbacks.lock().unwrap().upload_progress.take();
        if let Some(mut callback) = callback {
            callback(sent, total);
            self.callbacks.lock().unwrap().upload_progress = Some(callback);
        }
    }

    pub(crate) fn fire_download_progress(&self, received: u64, total: u64) {
        let callback = self.callbacks.lock().unwrap().download_progress.take();
        if let Some(mut callback) = callback {
            callback(received, total);
            self.callbacks.lock().unwrap().download_progress = Some(callback);
        }
    }

    /// Terminates the request: records the outcome, then fires exactly one
    /// of finish/error/cancelled followed by finally.
    ///
    /// Idempotent; only the first call has any effect.
    pub(crate) fn finalize(&self, outcome: Outcome, responses: Vec<Arc<Response>>) {
        if self.finished.swap(true, Ordering::AcqRel) {
            debug!(url = %self.url, "ignoring second finalization");
            return;
        }

        self.end_timestamp.store(current_time_millis(), Ordering::Release);

        let final_response = responses.iter().rev().find(|response| !response.is_interim()).cloned();
        *self.responses.lock().unwrap() = responses;
        *self.response.lock().unwrap() = final_response;

        if let Outcome::Errored(error) = &outcome {
            *self.error.lock().unwrap() = Some(error.clone());
        }

        match outcome {
            Outcome::Finished => {
                let callback = self.callbacks.lock().unwrap().finish.take();
                if let Some(callback) = callback {
                    callback(self);
                }
            }
            Outcome::Errored(error) => {
                let callback = self.callbacks.lock().unwrap().error.take();
                if let Some(callback) = callback {
                    callback(self, &error);
                }
            }
            Outcome::Cancelled => {
                let callback = self.callbacks.lock().unwrap().cancelled.take();
                if let Some(callback) = callback {
                    callback(self);
                }
            }
        }

        let callback = self.callbacks.lock().unwrap().finally.take();
        if let Some(callback) = callback {
            callback(self);
        }
    }

    /// Terminal path for requests discarded before any transport activity:
    /// cancelled while queued, or dropped at shutdown.
    pub(crate) fn finalize_cancelled_unstarted(&self) {
        self.finalize(Outcome::Cancelled, Vec::new());
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("verb", &self.verb)
            .field("version", &self.version)
            .field("is_upload", &self.is_upload)
            .field("started", &self.has_started())
            .field("finished", &self.has_finished())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Request`].
///
/// The builder is infallible until [`build`](Self::build), where the whole
/// description is validated at once.
///
/// # Examples
///
/// ```no_run
/// use ferry_http::{Request, TextDecoder};
/// use http::Method;
///
/// let request = Request::builder("https://example.com/greeting", Method::GET)
///     .header("Accept", "text/plain")
///     .content_handler(TextDecoder::new())
///     .on_finish(|req| println!("got {:?}", req.response_status()))
///     .build()
///     .unwrap();
/// ```
pub struct RequestBuilder {
    url: String,
    verb: Method,
    version: ProtocolVersion,
    headers: Vec<(String, String)>,
    body: Option<BodyInput>,
    handler: Option<Box<dyn ContentHandler>>,
    config: TransferConfig,
    callbacks: Callbacks,
}

enum BodyInput {
    Buffer { data: Bytes, content_type: String },
    File { path: PathBuf },
    Stream { reader: Box<dyn Read + Send>, content_type: String, size: Option<u64> },
}

impl RequestBuilder {
    fn new(url: impl Into<String>, verb: Method) -> Self {
        Self {
            url: url.into(),
            verb,
            version: ProtocolVersion::default(),
            headers: Vec::new(),
            body: None,
            handler: None,
            config: TransferConfig::default(),
            callbacks: Callbacks::default(),
        }
    }

    /// Sets the protocol version. Defaults to HTTP/1.1.
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Adds a header. Setting the same name twice keeps the later value.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Uses an in-memory buffer as the upload body.
    ///
    /// Replaces any body source set before.
    pub fn body_bytes(mut self, data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.body = Some(BodyInput::Buffer { data: data.into(), content_type: content_type.into() });
        self
    }

    /// Uploads a file from disk. The file's size is captured at build time
    /// and sent as `Content-Length`.
    ///
    /// Replaces any body source set before.
    pub fn body_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body = Some(BodyInput::File { path: path.into() });
        self
    }

    /// Uploads from an arbitrary byte stream.
    ///
    /// Pass `None` as size when it is unknown up front; the request then
    /// uses chunked transfer encoding (HTTP/1.1 only) and upload progress
    /// reports a total of 0. Replaces any body source set before.
    pub fn body_stream(
        mut self,
        reader: impl Read + Send + 'static,
        content_type: impl Into<String>,
        size: Option<u64>,
    ) -> Self {
        self.body = Some(BodyInput::Stream { reader: Box::new(reader), content_type: content_type.into(), size });
        self
    }

    /// Sets the content handler the response body is streamed into.
    ///
    /// Defaults to an accept-everything [`SelectiveDiscarder`].
    pub fn content_handler(mut self, handler: impl ContentHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Deadline for the connection phase (TCP + TLS handshake).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Inter-byte idle deadline while reading the response. A transfer that
    /// stalls longer than this fails with a transport timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    /// Maximum number of redirects to follow; 0 (the default) disables
    /// following redirects.
    pub fn max_redirects(mut self, max: u32) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Omits `Expect: 100-Continue` on uploads.
    ///
    /// Only reach for this when a server answered `417` to a previous
    /// request.
    pub fn suppress_expect_100(mut self, suppress: bool) -> Self {
        self.config.suppress_expect_100 = suppress;
        self
    }

    /// Routes the body of non-2xx responses to a no-op sink instead of the
    /// configured content handler. Defaults to `true`.
    pub fn discard_body_on_non_2xx(mut self, discard: bool) -> Self {
        self.config.discard_body_on_non_2xx = discard;
        self
    }

    /// Forces chunked transfer encoding for the upload. Ignored on
    /// HTTP/1.0.
    pub fn chunked_transfer(mut self, chunked: bool) -> Self {
        self.config.chunked_transfer = chunked;
        self
    }

    /// Disables TLS peer verification.
    pub fn allow_invalid_tls(mut self, allow: bool) -> Self {
        self.config.allow_invalid_tls = allow;
        self
    }

    /// Called once when execution begins.
    pub fn on_start(mut self, callback: impl FnOnce(&Request) + Send + 'static) -> Self {
        self.callbacks.start = Some(Box::new(callback));
        self
    }

    /// Called once when execution completes successfully.
    pub fn on_finish(mut self, callback: impl FnOnce(&Request) + Send + 'static) -> Self {
        self.callbacks.finish = Some(Box::new(callback));
        self
    }

    /// Called once when execution fails.
    pub fn on_error(mut self, callback: impl FnOnce(&Request, &Error) + Send + 'static) -> Self {
        self.callbacks.error = Some(Box::new(callback));
        self
    }

    /// Called once when the request is cancelled.
    pub fn on_cancelled(mut self, callback: impl FnOnce(&Request) + Send + 'static) -> Self {
        self.callbacks.cancelled = Some(Box::new(callback));
        self
    }

    /// Called once after whichever terminal callback fired.
    pub fn on_finally(mut self, callback: impl FnOnce(&Request) + Send + 'static) -> Self {
        self.callbacks.finally = Some(Box::new(callback));
        self
    }

    /// Called with `(sent, total)` for every chunk of uploaded body data.
    /// `total` is 0 when the upload size is unknown.
    pub fn on_upload_progress(mut self, callback: impl FnMut(u64, u64) + Send + 'static) -> Self {
        self.callbacks.upload_progress = Some(Box::new(callback));
        self
    }

    /// Called with `(received, total)` for every chunk of downloaded body
    /// data. `total` is 0 when the response size is unknown.
    pub fn on_download_progress(mut self, callback: impl FnMut(u64, u64) + Send + 'static) -> Self {
        self.callbacks.download_progress = Some(Box::new(callback));
        self
    }

    /// Validates the description and produces the request.
    pub fn build(self) -> Result<Arc<Request>, BuildError> {
        ensure!(!self.url.trim().is_empty(), BuildError::EmptyUrl);

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| BuildError::invalid_header(name.clone(), e.to_string()))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| BuildError::invalid_header(name.to_string(), e.to_string()))?;
            headers.insert(name, value);
        }

        let body = match self.body {
            None => None,
            Some(BodyInput::Buffer { data, content_type }) => {
                ensure!(!data.is_empty(), BuildError::EmptyBody);
                Some(BodySource::Buffer { data, content_type })
            }
            Some(BodyInput::File { path }) => {
                let metadata =
                    std::fs::metadata(&path).map_err(|e| BuildError::unreadable_file(path.clone(), e.to_string()))?;
                ensure!(metadata.len() > 0, BuildError::EmptyBody);
                Some(BodySource::File { path, size: metadata.len() })
            }
            Some(BodyInput::Stream { reader, content_type, size }) => {
                if size.is_none() {
                    ensure!(self.version == ProtocolVersion::Http11, BuildError::UnknownSizeRequiresHttp11);
                }
                Some(BodySource::Stream { reader, content_type, size })
            }
        };

        if let Some(body) = &body {
            if !headers.contains_key(CONTENT_TYPE) {
                if let Ok(value) = HeaderValue::try_from(body.content_type()) {
                    headers.insert(CONTENT_TYPE, value);
                }
            }
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(concat!("ferry-http/", env!("CARGO_PKG_VERSION"))));
        }

        let is_upload = body.is_some();
        let upload_size = body.as_ref().and_then(BodySource::size);

        Ok(Arc::new(Request {
            url: self.url,
            verb: self.verb,
            version: self.version,
            config: self.config,
            headers: Mutex::new(headers),
            body: Mutex::new(body),
            handler: Mutex::new(self.handler),
            callbacks: Mutex::new(self.callbacks),
            is_upload,
            upload_size,
            submitted: AtomicBool::new(false),
            started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            start_timestamp: AtomicI64::new(0),
            end_timestamp: AtomicI64::new(0),
            sent_bytes: AtomicU64::new(0),
            received_bytes: AtomicU64::new(0),
            download_size: AtomicU64::new(0),
            error: Mutex::new(None),
            response: Mutex::new(None),
            responses: Mutex::new(Vec::new()),
        }))
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("url", &self.url)
            .field("verb", &self.verb)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_url_is_rejected() {
        assert!(matches!(Request::builder("  ", Method::GET).build(), Err(BuildError::EmptyUrl)));
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let result = Request::builder("http://localhost/", Method::GET).header("bad header", "x").build();
        assert!(matches!(result, Err(BuildError::InvalidHeader { .. })));
    }

    #[test]
    fn empty_buffer_body_is_rejected() {
        let result = Request::builder("http://localhost/", Method::POST).body_bytes(Vec::new(), "text/plain").build();
        assert!(matches!(result, Err(BuildError::EmptyBody)));
    }

    #[test]
    fn missing_upload_file_is_rejected() {
        let result =
            Request::builder("http://localhost/", Method::PUT).body_file("/definitely/not/here.bin").build();
        assert!(matches!(result, Err(BuildError::UnreadableFile { .. })));
    }

    #[test]
    fn unknown_size_stream_requires_http11() {
        let result = Request::builder("http://localhost/", Method::POST)
            .version(ProtocolVersion::Http10)
            .body_stream(std::io::empty(), "text/plain", None)
            .build();
        assert!(matches!(result, Err(BuildError::UnknownSizeRequiresHttp11)));

        let request = Request::builder("http://localhost/", Method::POST)
            .body_stream(std::io::empty(), "text/plain", None)
            .build()
            .unwrap();
        assert!(request.is_upload());
        assert!(!request.upload_size_known());
    }

    #[test]
    fn body_content_type_becomes_a_header() {
        let request = Request::builder("http://localhost/", Method::POST)
            .body_bytes(&b"{}"[..], "application/json")
            .build()
            .unwrap();
        assert_eq!(request.header("content-type").as_deref(), Some("application/json"));
        assert_eq!(request.upload_size(), Some(2));
    }

    #[test]
    fn explicit_content_type_header_wins() {
        let request = Request::builder("http://localhost/", Method::POST)
            .header("Content-Type", "text/csv")
            .body_bytes(&b"a,b"[..], "text/plain")
            .build()
            .unwrap();
        assert_eq!(request.header("content-type").as_deref(), Some("text/csv"));
    }

    #[test]
    fn a_default_user_agent_is_set() {
        let request = Request::builder("http://localhost/", Method::GET).build().unwrap();
        assert!(request.header("user-agent").unwrap().starts_with("ferry-http/"));
    }

    #[test]
    fn later_body_source_replaces_the_earlier_one() {
        let request = Request::builder("http://localhost/", Method::POST)
            .body_bytes(&b"first"[..], "text/plain")
            .body_bytes(&b"the second body"[..], "text/plain")
            .build()
            .unwrap();
        assert_eq!(request.upload_size(), Some(15));
    }

    #[test]
    fn duplicate_headers_are_deduplicated() {
        let request = Request::builder("http://localhost/", Method::GET)
            .header("Accept", "text/html")
            .header("accept", "application/json")
            .build()
            .unwrap();
        assert_eq!(request.header("Accept").as_deref(), Some("application/json"));
        assert_eq!(request.headers().get_all("accept").iter().count(), 1);
    }

    #[test]
    fn headers_freeze_once_started() {
        let request = Request::builder("http://localhost/", Method::GET).build().unwrap();
        assert!(request.set_header("X-Token", "abc"));
        assert_eq!(request.header("x-token").as_deref(), Some("abc"));

        request.mark_started();
        assert!(!request.set_header("X-Token", "def"));
        assert_eq!(request.header("x-token").as_deref(), Some("abc"));
    }

    #[test]
    fn cancel_is_monotonic() {
        let request = Request::builder("http://localhost/", Method::GET).build().unwrap();
        assert!(!request.is_cancelled());
        assert!(request.cancel());
        assert!(request.is_cancelled());
        // second cancel is a no-op
        assert!(!request.cancel());
        assert!(request.is_cancelled());
    }

    #[test]
    fn submit_guard_trips_on_second_submission() {
        let request = Request::builder("http://localhost/", Method::GET).build().unwrap();
        assert!(request.mark_submitted());
        assert!(!request.mark_submitted());
    }

    #[test]
    fn finalize_fires_terminal_then_finally_exactly_once() {
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let (o1, o2, o3) = (order.clone(), order.clone(), order.clone());

        let request = Request::builder("http://localhost/", Method::GET)
            .on_finish(move |_| o1.lock().unwrap().push("finish"))
            .on_error(move |_, _| o2.lock().unwrap().push("error"))
            .on_finally(move |_| o3.lock().unwrap().push("finally"))
            .build()
            .unwrap();

        request.mark_started();
        request.finalize(Outcome::Finished, Vec::new());
        // a second finalization must not re-fire anything
        request.finalize(Outcome::Errored(Error::Cancelled), Vec::new());

        assert_eq!(*order.lock().unwrap(), vec!["finish", "finally"]);
        assert!(request.has_finished());
        assert!(request.end_timestamp() >= request.start_timestamp());
    }

    #[test]
    fn errored_finalization_records_the_error() {
        let request = Request::builder("http://localhost/", Method::GET).build().unwrap();
        request.mark_started();
        request.finalize(Outcome::Errored(Error::transport(7, "couldn't connect")), Vec::new());

        assert_eq!(request.error().unwrap().code(), 7);
        assert!(!request.was_successful());
    }
}
