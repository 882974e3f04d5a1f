//! Marshals transport callbacks into the request context.

use std::fmt;
use std::io::SeekFrom;

use curl::easy::{Handler, InfoType, ReadError, SeekResult, WriteError};
use tracing::{error, trace};

use crate::context::{RequestContext, UploadChunk};

/// The handler installed on every transport handle.
///
/// A handle outlives the transfers it runs, so the bridge holds the
/// per-transfer [`RequestContext`] in a rebindable slot: the supervisor
/// binds a fresh context when a request is dispatched onto the handle and
/// takes it back out when the transfer retires.
pub(crate) struct CallbackBridge {
    ctx: Option<RequestContext>,
}

impl CallbackBridge {
    pub(crate) fn new() -> Self {
        Self { ctx: None }
    }

    /// Binds the context for the next transfer. The slot must be free.
    pub(crate) fn bind(&mut self, ctx: RequestContext) {
        debug_assert!(self.ctx.is_none(), "binding a context over an active transfer");
        self.ctx = Some(ctx);
    }

    /// Takes the context back out when the transfer retires.
    pub(crate) fn unbind(&mut self) -> Option<RequestContext> {
        self.ctx.take()
    }

    /// Whether the bound context asked for its upload to be resumed.
    /// Reading the flag clears it; the supervisor polls this between
    /// transfer advances.
    pub(crate) fn take_unpause_request(&mut self) -> bool {
        self.ctx.as_mut().is_some_and(RequestContext::take_unpause_request)
    }

    /// Whether the bound request has been cancelled.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.ctx.as_ref().is_some_and(RequestContext::is_cancelled)
    }
}

impl Handler for CallbackBridge {
    /// Called by the transport for each line of the response head.
    fn header(&mut self, data: &[u8]) -> bool {
        match self.ctx.as_mut() {
            Some(ctx) => ctx.receive_header_line(data),
            None => {
                error!("header callback without a bound context");
                false
            }
        }
    }

    /// Called by the transport with response body bytes. Consuming fewer
    /// bytes than offered makes the transport abort the transfer.
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        match self.ctx.as_mut() {
            Some(ctx) => Ok(ctx.append_body(data)),
            None => {
                error!("write callback without a bound context");
                Ok(0)
            }
        }
    }

    /// Called by the transport when it wants upload body bytes.
    fn read(&mut self, data: &mut [u8]) -> Result<usize, ReadError> {
        let Some(ctx) = self.ctx.as_mut() else {
            error!("read callback without a bound context");
            return Err(ReadError::Abort);
        };

        match ctx.transfer_input_to_buffer(data) {
            UploadChunk::Copied(n) => Ok(n),
            UploadChunk::Eof => Ok(0),
            UploadChunk::Pause => Err(ReadError::Pause),
            UploadChunk::Abort => Err(ReadError::Abort),
        }
    }

    /// Upload sources are strictly sequential; rewinding is not supported.
    fn seek(&mut self, _whence: SeekFrom) -> SeekResult {
        SeekResult::CantSeek
    }

    /// Progress ticks double as the cancellation yield point for transfers
    /// that are otherwise idle.
    fn progress(&mut self, _dltotal: f64, _dlnow: f64, _ultotal: f64, _ulnow: f64) -> bool {
        !self.is_cancelled()
    }

    /// Forwards the transport's debug stream into tracing when verbose mode
    /// is on.
    fn debug(&mut self, kind: InfoType, data: &[u8]) {
        match kind {
            InfoType::Text => {
                trace!(target: "ferry_http::wire", "{}", String::from_utf8_lossy(data).trim_end());
            }
            InfoType::HeaderIn => {
                trace!(target: "ferry_http::wire", "<< {}", String::from_utf8_lossy(data).trim_end());
            }
            InfoType::HeaderOut => {
                trace!(target: "ferry_http::wire", ">> {}", String::from_utf8_lossy(data).trim_end());
            }
            InfoType::DataIn => trace!(target: "ferry_http::wire", "<< {} body bytes", data.len()),
            InfoType::DataOut => trace!(target: "ferry_http::wire", ">> {} body bytes", data.len()),
            _ => (),
        }
    }
}

impl fmt::Debug for CallbackBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBridge").field("bound", &self.ctx.is_some()).finish()
    }
}
