//! Per-request execution context.
//!
//! A [`RequestContext`] links one in-flight [`Request`] to the transport
//! handle driving it: it receives the transport's callbacks (status line,
//! header lines, body bytes, upload reads), advances the response state
//! machine, pumps the upload body out with 100-Continue coordination, routes
//! downloaded bytes into the content handler, and finalizes the request when
//! the transfer terminates.
//!
//! # Response states
//!
//! ```text
//! Ready ──upload byte──▶ SendingData
//!   │                        │
//!   └──────status line───────┴──▶ ReadingStatusLine ─▶ ReadingHeaders
//!                                                          │
//!                              interim (1xx) header end ◀──┤
//!                              (back to Ready)             │
//!                                                          ▼
//!                                       first body byte: ReadingData
//!                                                          │
//!                                  transfer end / error ───┴──▶ Finished
//! ```
//!
//! A request may observe several responses: interim 1xx responses and
//! redirect hops each restart the cycle at `Ready`; only the last
//! non-interim response is the final one.
//!
//! # Mid-upload responses
//!
//! The defining behavior of this engine: when the server answers before the
//! upload ran to completion, rejecting an `Expect: 100-Continue`
//! expectation or failing an upload halfway, the context stops feeding
//! body bytes, lets the transfer drain the server's response, and delivers
//! that response faithfully to the caller.

use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use http::{HeaderName, HeaderValue, StatusCode};
use tracing::{debug, error, trace, warn};

use crate::handler::ContentHandler;
use crate::protocol::{BodySource, Error, Outcome, Request, Response, split_header_line};

/// Phase of the current response within a request's lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ResponseState {
    Ready,
    SendingData,
    ReadingStatusLine,
    ReadingHeaders,
    ReadingData,
    Finished,
}

/// Result of one upload read: how the transport's request for body bytes
/// was answered.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum UploadChunk {
    /// `n` bytes were copied into the transport's buffer.
    Copied(usize),
    /// The upload body is exhausted.
    Eof,
    /// No bytes can be produced right now; halt the upload without
    /// terminating it.
    Pause,
    /// The upload source failed; terminate the transfer.
    Abort,
}

/// The upload body pump. Owns whichever source backs the request body and
/// hands out sequential chunks.
enum UploadSource {
    Buffer { data: bytes::Bytes, pos: usize },
    File { path: std::path::PathBuf, file: Option<File> },
    Stream { reader: Box<dyn Read + Send> },
}

impl UploadSource {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, Error> {
        match self {
            UploadSource::Buffer { data, pos } => {
                let n = (data.len() - *pos).min(dst.len());
                dst[..n].copy_from_slice(&data[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
            UploadSource::File { path, file } => {
                if file.is_none() {
                    let opened =
                        File::open(&*path).map_err(|e| Error::upload_file_stream(path.clone(), e.to_string()))?;
                    *file = Some(opened);
                }
                match file.as_mut() {
                    Some(handle) => handle.read(dst).map_err(|e| Error::upload_file_stream(path.clone(), e.to_string())),
                    None => Ok(0),
                }
            }
            UploadSource::Stream { reader } => reader.read(dst).map_err(|e| Error::upload_data_stream(e.to_string())),
        }
    }
}

/// Holds the originating request and all the responses received in its
/// context, and drives the state transitions of one execution.
///
/// Owned by the transport handle's callback bridge for the duration of the
/// transfer; consumed by [`complete`](Self::complete).
pub(crate) struct RequestContext {
    request: Arc<Request>,
    state: ResponseState,
    responses: Vec<Response>,
    pending_header_lines: Vec<String>,
    error: Option<Error>,

    sink: Box<dyn ContentHandler>,
    sink_prepared: bool,
    sink_parsed: bool,
    route_decided: bool,
    discard_current: bool,

    upload: Option<UploadSource>,
    upload_finished: bool,
    uploaded_bytes: u64,
    wait_for_100: bool,
    upload_accepted: bool,
    upload_paused: bool,
    upload_aborted: bool,
    unpause_requested: bool,

    downloaded_bytes: u64,
    download_size: u64,
}

impl RequestContext {
    pub(crate) fn new(request: Arc<Request>) -> Self {
        let sink = request.take_handler();
        let upload = request.take_body().map(|body| match body {
            BodySource::Buffer { data, .. } => UploadSource::Buffer { data, pos: 0 },
            BodySource::File { path, .. } => UploadSource::File { path, file: None },
            BodySource::Stream { reader, .. } => UploadSource::Stream { reader },
        });
        let wait_for_100 = upload.is_some() && !request.config().suppress_expect_100;

        Self {
            request,
            state: ResponseState::Ready,
            responses: Vec::new(),
            pending_header_lines: Vec::new(),
            error: None,
            sink,
            sink_prepared: false,
            sink_parsed: false,
            route_decided: false,
            discard_current: false,
            upload,
            upload_finished: false,
            uploaded_bytes: 0,
            wait_for_100,
            upload_accepted: false,
            upload_paused: false,
            upload_aborted: false,
            unpause_requested: false,
            downloaded_bytes: 0,
            download_size: 0,
        }
    }

    pub(crate) fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.request.is_cancelled()
    }

    /// Whether the upload should be resumed; reading the flag clears it.
    /// The supervisor polls this between transfer advances, since the
    /// actual unpause must happen outside the transport's callbacks.
    pub(crate) fn take_unpause_request(&mut self) -> bool {
        std::mem::take(&mut self.unpause_requested)
    }

    #[cfg(test)]
    pub(crate) fn has_upload_been_accepted(&self) -> bool {
        self.upload_accepted
    }

    #[cfg(test)]
    pub(crate) fn has_upload_been_aborted(&self) -> bool {
        self.upload_aborted
    }

    /// Ingress for one line of the response head, as delivered by the
    /// transport. Returns `false` to abort the transfer.
    pub(crate) fn receive_header_line(&mut self, raw: &[u8]) -> bool {
        if self.request.is_cancelled() || self.state == ResponseState::Finished {
            return false;
        }

        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);

        if line.is_empty() {
            return self.end_of_headers();
        }

        // header names cannot contain a slash, so this is always a new
        // status line: the first response, an interim follow-up, or a
        // redirect hop
        if line.starts_with("HTTP/") {
            return self.begin_response(line);
        }

        match self.state {
            ResponseState::ReadingHeaders => {
                self.push_header_line(line);
                true
            }
            // trailer headers of a chunked body; not part of the response head
            ResponseState::ReadingData => {
                trace!(line, "ignoring trailer header line");
                true
            }
            state => {
                warn!(?state, line, "ignoring unexpected header line");
                true
            }
        }
    }

    /// Starts a new response from a status line. Any response still open
    /// (an unconsumed redirect hop) is closed first.
    fn begin_response(&mut self, line: &str) -> bool {
        self.state = ResponseState::ReadingStatusLine;

        let Some(response) = Response::from_status_line(line) else {
            warn!(line, "aborting on malformed status line");
            return false;
        };

        if let Some(previous) = self.responses.last_mut() {
            if !previous.is_finished() {
                previous.finish(None, 0, false);
            }
        }

        trace!(status = response.status().as_u16(), "received status line");
        self.responses.push(response);
        self.pending_header_lines.clear();
        self.route_decided = false;
        self.discard_current = false;
        self.state = ResponseState::ReadingHeaders;
        true
    }

    /// Collects one raw header line, collapsing folded continuations onto
    /// the previous line.
    fn push_header_line(&mut self, line: &str) {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = self.pending_header_lines.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
                return;
            }
        }
        self.pending_header_lines.push(line.to_string());
    }

    /// The current response's header block ended.
    fn end_of_headers(&mut self) -> bool {
        if self.state != ResponseState::ReadingHeaders {
            return true;
        }

        self.materialize_headers();

        let (status, is_interim) = match self.responses.last() {
            Some(response) => (response.status(), response.is_interim()),
            None => return true,
        };

        if is_interim {
            debug!(status = status.as_u16(), "interim response received");
            if let Some(response) = self.responses.last_mut() {
                response.finish(None, 0, false);
            }
            if status == StatusCode::CONTINUE {
                self.upload_accepted = true;
                if self.wait_for_100 {
                    self.wait_for_100 = false;
                    if self.upload_paused {
                        self.unpause_requested = true;
                    }
                }
            }
            // the next response starts fresh
            self.state = ResponseState::Ready;
            return true;
        }

        let content_length = self
            .responses
            .last()
            .and_then(|response| response.header("content-length"))
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        self.download_size = content_length;
        self.request.set_download_size(content_length);

        if self.upload.is_some() && !self.upload_complete() {
            debug!(status = status.as_u16(), "server responded before the upload completed; aborting upload");
            self.upload_aborted = true;
            self.wait_for_100 = false;
        }

        // remain in ReadingHeaders until the first body byte or completion
        true
    }

    fn materialize_headers(&mut self) {
        let lines = std::mem::take(&mut self.pending_header_lines);
        let Some(response) = self.responses.last_mut() else {
            return;
        };

        for line in lines {
            let Some((name, value)) = split_header_line(&line) else {
                warn!(line, "ignoring malformed header line");
                continue;
            };
            match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
                (Ok(name), Ok(value)) => response.append_header(name, value),
                _ => warn!(line, "ignoring header line with invalid name or value"),
            }
        }
    }

    fn upload_complete(&self) -> bool {
        if self.upload_finished {
            return true;
        }
        match self.request.upload_size() {
            Some(total) => self.uploaded_bytes >= total,
            None => false,
        }
    }

    /// Answers the transport's request for upload body bytes.
    pub(crate) fn transfer_input_to_buffer(&mut self, dst: &mut [u8]) -> UploadChunk {
        if self.request.is_cancelled() {
            return UploadChunk::Abort;
        }
        if self.upload_aborted {
            // never send another body byte once the server has responded
            return UploadChunk::Eof;
        }
        if self.wait_for_100 && !self.upload_accepted {
            if !self.upload_paused {
                debug!("holding upload until the server acknowledges the expectation");
            }
            self.upload_paused = true;
            return UploadChunk::Pause;
        }
        self.upload_paused = false;

        let Some(source) = self.upload.as_mut() else {
            return UploadChunk::Eof;
        };

        if self.state == ResponseState::Ready {
            self.state = ResponseState::SendingData;
        }

        match source.read(dst) {
            Ok(0) => {
                trace!(uploaded = self.uploaded_bytes, "upload source exhausted");
                self.upload_finished = true;
                UploadChunk::Eof
            }
            Ok(n) => {
                self.uploaded_bytes += n as u64;
                self.request.add_sent_bytes(n as u64);
                self.request.fire_upload_progress(self.uploaded_bytes, self.request.upload_size().unwrap_or(0));
                UploadChunk::Copied(n)
            }
            Err(e) => {
                self.fail(e);
                UploadChunk::Abort
            }
        }
    }

    /// Ingress for response body bytes. Returns the number of bytes
    /// consumed; anything short of `data.len()` aborts the transfer.
    pub(crate) fn append_body(&mut self, data: &[u8]) -> usize {
        if self.request.is_cancelled() {
            return 0;
        }

        match self.state {
            ResponseState::ReadingHeaders => {
                if let Err(e) = self.decide_route() {
                    self.fail(e);
                    return 0;
                }
                self.state = ResponseState::ReadingData;
            }
            ResponseState::ReadingData => {}
            state => {
                error!(?state, "received body data outside of a response body phase");
                return 0;
            }
        }

        let consumed = if self.discard_current { data.len() } else { self.sink.append(data) };
        self.downloaded_bytes += consumed as u64;
        self.request.add_received_bytes(consumed as u64);
        self.request.fire_download_progress(self.downloaded_bytes, self.download_size);

        if consumed < data.len() {
            self.fail(Error::download_write("content handler did not consume all response data"));
        }
        consumed
    }

    /// Decides where body bytes of the current response go: the configured
    /// content handler, or a no-op route for discarded non-2xx responses.
    /// Prepares the handler on the former path.
    fn decide_route(&mut self) -> Result<(), Error> {
        self.route_decided = true;

        let (status, reason, headers) = match self.responses.last() {
            Some(response) => (response.status(), response.reason().to_string(), response.headers().clone()),
            None => return Err(Error::transport(0, "response body before any status line")),
        };

        if self.request.config().discard_body_on_non_2xx && !status.is_success() {
            debug!(status = status.as_u16(), "discarding body of non-2xx response");
            self.discard_current = true;
            return Ok(());
        }

        self.sink.prepare(status, &reason, &headers)?;
        self.sink_prepared = true;
        Ok(())
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            warn!(cause = %error, url = %self.request.url(), "transfer failed");
            self.error = Some(error);
        }
        self.state = ResponseState::Finished;
    }

    /// Terminates this context: computes the outcome, runs the content
    /// handler's terminal call, finalizes the responses onto the request and
    /// fires its callbacks.
    ///
    /// Returns `true` when the transfer did not complete cleanly, in which
    /// case the transport handle must not be pooled again.
    pub(crate) fn complete(mut self, transport_result: Result<(), Error>) -> bool {
        let outcome = self.determine_outcome(transport_result);
        self.state = ResponseState::Finished;

        let clean = matches!(outcome, Outcome::Finished);
        if !clean && self.sink_prepared && !self.sink_parsed {
            self.sink.cleanup();
        }

        if let Some(current) = self.responses.last_mut() {
            if !current.is_finished() {
                current.finish(None, 0, false);
            }
        }

        let responses: Vec<Arc<Response>> = self.responses.drain(..).map(Arc::new).collect();
        self.request.finalize(outcome, responses);
        !clean
    }

    fn determine_outcome(&mut self, transport_result: Result<(), Error>) -> Outcome {
        if self.request.is_cancelled() {
            return Outcome::Cancelled;
        }
        if let Some(error) = self.error.take() {
            // a context-level failure is more precise than whatever the
            // transport reported after we aborted it
            return Outcome::Errored(error);
        }
        if let Err(e) = transport_result {
            return Outcome::Errored(e);
        }
        self.finalize_final_response()
    }

    /// Clean-transfer path: evaluate acceptance if no body byte ever did,
    /// produce the content artifact, and finish the final response.
    fn finalize_final_response(&mut self) -> Outcome {
        let Some(index) = self.responses.iter().rposition(|response| !response.is_interim()) else {
            return Outcome::Errored(Error::transport(0, "transfer completed without a final response"));
        };

        if !self.route_decided {
            // bodyless response: acceptance still gets evaluated
            if let Err(e) = self.decide_route() {
                self.responses[index].finish(None, 0, false);
                return Outcome::Errored(e);
            }
        }

        if self.discard_current {
            let status = self.responses[index].status();
            self.responses[index].finish(None, 0, false);
            return Outcome::Errored(Error::unacceptable(format!("response with status {} discarded", status.as_u16())));
        }

        self.sink_parsed = true;
        match self.sink.parse_content() {
            Ok(content) => {
                self.responses[index].finish(content, self.downloaded_bytes, true);
                Outcome::Finished
            }
            Err(e) => {
                self.responses[index].finish(None, 0, false);
                Outcome::Errored(e)
            }
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("url", &self.request.url())
            .field("state", &self.state)
            .field("responses", &self.responses.len())
            .field("uploaded_bytes", &self.uploaded_bytes)
            .field("downloaded_bytes", &self.downloaded_bytes)
            .finish_non_exhaustive()
    }
}
