//! Size-limiting writer guarding the archive sink

use std::fmt;
use std::io::{self, Write};

/// Marker carried inside an `io::Error` when a write would pass the limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitExceeded {
    pub limit: u64,
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "written data exceeds the limit of {} bytes", self.limit)
    }
}

impl std::error::Error for LimitExceeded {}

/// Wraps a writer and refuses any write that would push the total past `limit`.
///
/// The check is all-or-nothing: an oversized write reaches the inner writer
/// not at all. Partial writes by the inner writer are accounted exactly.
#[derive(Debug)]
pub struct LimitWriter<W> {
    inner: W,
    limit: u64,
    written: u64,
}

impl<W: Write> LimitWriter<W> {
    pub fn new(inner: W, limit: u64) -> Self {
        Self {
            inner,
            limit,
            written: 0,
        }
    }

    /// Bytes accepted by the inner writer so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for LimitWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written.saturating_add(buf.len() as u64) > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                LimitExceeded { limit: self.limit },
            ));
        }
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
