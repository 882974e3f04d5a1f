//! File-writing content handler.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use http::{HeaderMap, StatusCode};
use tracing::{debug, warn};

use super::{Content, ContentHandler, SelectiveDiscarder};
use crate::protocol::Error;

/// Content handler that streams the response body to a file.
///
/// The file is created when the response is accepted and yielded as the
/// content artifact (its [`PathBuf`]) once the transfer completes. If the
/// transfer dies midway the partially written file is removed in
/// [`cleanup`](ContentHandler::cleanup), so a failed download never leaves
/// half a payload on disk.
#[derive(Debug)]
pub struct FileWriter {
    path: PathBuf,
    policy: SelectiveDiscarder,
    file: Option<File>,
    written: u64,
}

impl FileWriter {
    /// Creates a file writer targeting `path`, accepting every response.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_policy(path, SelectiveDiscarder::new())
    }

    /// Creates a file writer with a custom acceptance policy.
    pub fn with_policy(path: impl Into<PathBuf>, policy: SelectiveDiscarder) -> Self {
        Self { path: path.into(), policy, file: None, written: 0 }
    }

    /// Bytes written to disk so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl ContentHandler for FileWriter {
    fn prepare(&mut self, status: StatusCode, _reason: &str, headers: &HeaderMap) -> Result<(), Error> {
        self.policy.check(status, headers)?;

        let file = File::create(&self.path)
            .map_err(|e| Error::download_write(format!("cannot create {}: {e}", self.path.display())))?;
        self.file = Some(file);
        self.written = 0;
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> usize {
        let Some(file) = self.file.as_mut() else {
            return 0;
        };

        match file.write_all(data) {
            Ok(()) => {
                self.written += data.len() as u64;
                data.len()
            }
            Err(e) => {
                warn!(path = %self.path.display(), cause = %e, "failed writing response data to file");
                0
            }
        }
    }

    fn parse_content(&mut self) -> Result<Option<Content>, Error> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e| Error::download_write(format!("cannot flush {}: {e}", self.path.display())))?;
        }
        Ok(Some(Box::new(self.path.clone())))
    }

    fn cleanup(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), "removing partially written download");
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), cause = %e, "failed to remove partial download");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("ferry-http-file-writer-{}-{name}", std::process::id()));
        path
    }

    #[test]
    fn writes_body_to_disk_and_yields_the_path() {
        let path = scratch_path("ok");
        let mut writer = FileWriter::new(&path);

        writer.prepare(StatusCode::OK, "OK", &HeaderMap::new()).unwrap();
        assert_eq!(writer.append(b"some "), 5);
        assert_eq!(writer.append(b"payload"), 7);

        let content = writer.parse_content().unwrap().unwrap();
        assert_eq!(content.downcast_ref::<PathBuf>().unwrap(), &path);
        assert_eq!(std::fs::read(&path).unwrap(), b"some payload");
        assert_eq!(writer.written(), 12);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn cleanup_removes_the_partial_file() {
        let path = scratch_path("partial");
        let mut writer = FileWriter::new(&path);

        writer.prepare(StatusCode::OK, "OK", &HeaderMap::new()).unwrap();
        writer.append(b"half a pay");
        writer.cleanup();

        assert!(!path.exists());
    }

    #[test]
    fn append_without_prepare_consumes_nothing() {
        let mut writer = FileWriter::new(scratch_path("unprepared"));
        assert_eq!(writer.append(b"data"), 0);
    }

    #[test]
    fn rejected_response_never_touches_disk() {
        let path = scratch_path("rejected");
        let policy = SelectiveDiscarder::new().with_acceptable_responses([StatusCode::OK]);
        let mut writer = FileWriter::with_policy(&path, policy);

        assert!(writer.prepare(StatusCode::NOT_FOUND, "Not Found", &HeaderMap::new()).is_err());
        assert!(!path.exists());
    }
}
