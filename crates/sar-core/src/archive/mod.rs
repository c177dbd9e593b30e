//! Archive handle: one sink or source, layered codec, and a small lifecycle
//!
//! A handle is set up for exactly one direction. Writing stacks the size
//! limiter, the compressor and the tar builder over the sink; reading stacks
//! the decompressor and the tar reader over the source. [`Archive::close`]
//! tears the stack down outermost first.

pub mod conflict;
mod create;
mod extract;

pub use conflict::{ConflictPolicy, ConflictResolver, Prompt, PromptChoice, Resolution};
pub use extract::{ExtractOptions, ExtractSummary};

use crate::limit::LimitWriter;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Default gzip level
pub const DEFAULT_LEVEL: u32 = 6;

/// Container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    #[default]
    Tar,
}

impl FromStr for ArchiveType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tar" => Ok(ArchiveType::Tar),
            other => Err(Error::Setup(format!("unsupported archive type: {}", other))),
        }
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveType::Tar => write!(f, "tar"),
        }
    }
}

/// Stream compressor wrapped around the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
    #[default]
    None,
    Gzip,
}

impl FromStr for Compressor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "store" => Ok(Compressor::None),
            "gzip" | "gz" => Ok(Compressor::Gzip),
            other => Err(Error::Setup(format!("unsupported compressor: {}", other))),
        }
    }
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compressor::None => write!(f, "none"),
            Compressor::Gzip => write!(f, "gzip"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Ready,
    Closed,
}

type Sink<'a> = Box<dyn Write + 'a>;
type Source<'a> = Box<dyn Read + 'a>;

/// Compression layer on the write side
enum Encoder<'a> {
    Plain(Sink<'a>),
    Gzip(GzEncoder<Sink<'a>>),
}

impl Write for Encoder<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(buf),
            Encoder::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gzip(w) => w.flush(),
        }
    }
}

impl Encoder<'_> {
    /// Finish the compressed stream and flush the sink below it
    fn close(self, problems: &mut Vec<(&'static str, io::Error)>) {
        let sink = match self {
            Encoder::Plain(sink) => Some(sink),
            Encoder::Gzip(encoder) => match encoder.finish() {
                Ok(sink) => Some(sink),
                Err(e) => {
                    problems.push(("closing gzip", e));
                    None
                }
            },
        };
        if let Some(mut sink) = sink {
            if let Err(e) = sink.flush() {
                problems.push(("flushing sink", e));
            }
        }
    }
}

/// Decompression layer on the read side
enum Decoder<'a> {
    Plain(Source<'a>),
    Gzip(GzDecoder<Source<'a>>),
}

impl Read for Decoder<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Plain(r) => r.read(buf),
            Decoder::Gzip(r) => r.read(buf),
        }
    }
}

/// A sequential archive bound to one sink or one source.
///
/// ```no_run
/// use sar_core::Archive;
/// use std::fs::File;
///
/// let file = File::create("backup.tar.gz")?;
/// let mut archive = Archive::tar_gz().with_writer(file).limit_archive(64 << 20);
/// archive.archive_path(["./data"])?;
/// archive.close()?;
/// # Ok::<(), sar_core::Error>(())
/// ```
pub struct Archive<'a> {
    archive_type: ArchiveType,
    compressor: Compressor,
    level: u32,
    sink: Option<Sink<'a>>,
    source: Option<Source<'a>>,
    write_limit: u64,
    read_limit: u64,
    read_bytes: u64,
    state: State,
    builder: Option<tar::Builder<Encoder<'a>>>,
    reader: Option<tar::Archive<Decoder<'a>>>,
    /// First archived name per (device, inode) of multiply linked files
    hard_links: HashMap<(u64, u64), PathBuf>,
}

impl<'a> Archive<'a> {
    pub fn new(archive_type: ArchiveType, compressor: Compressor) -> Self {
        Self {
            archive_type,
            compressor,
            level: DEFAULT_LEVEL,
            sink: None,
            source: None,
            write_limit: 0,
            read_limit: 0,
            read_bytes: 0,
            state: State::Uninitialized,
            builder: None,
            reader: None,
            hard_links: HashMap::new(),
        }
    }

    /// Uncompressed tar
    pub fn tar() -> Self {
        Self::new(ArchiveType::Tar, Compressor::None)
    }

    /// Gzip-compressed tar
    pub fn tar_gz() -> Self {
        Self::new(ArchiveType::Tar, Compressor::Gzip)
    }

    pub fn with_writer(mut self, writer: impl Write + 'a) -> Self {
        self.sink = Some(Box::new(writer));
        self
    }

    pub fn with_reader(mut self, reader: impl Read + 'a) -> Self {
        self.source = Some(Box::new(reader));
        self
    }

    /// Limit the bytes written to the sink; 0 disables the limit
    pub fn limit_archive(mut self, bytes: u64) -> Self {
        self.write_limit = bytes;
        self
    }

    /// Limit the file payload bytes read while archiving; 0 disables the limit
    pub fn limit_data(mut self, bytes: u64) -> Self {
        self.read_limit = bytes;
        self
    }

    /// Gzip level 0-9; ignored without compression
    pub fn compression_level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    pub fn archive_type(&self) -> ArchiveType {
        self.archive_type
    }

    pub fn compressor(&self) -> Compressor {
        self.compressor
    }

    pub fn write_limit(&self) -> u64 {
        self.write_limit
    }

    pub fn read_limit(&self) -> u64 {
        self.read_limit
    }

    /// File payload bytes consumed by the create pipeline so far
    pub fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Build the write stack. Calling it again once ready is a no-op.
    pub fn setup_writer(&mut self) -> Result<()> {
        match self.state {
            State::Closed => return Err(Error::Setup("archive is closed".to_string())),
            State::Ready if self.builder.is_some() => return Ok(()),
            State::Ready => {
                return Err(Error::Setup("archive is set up for reading".to_string()))
            }
            State::Uninitialized => {}
        }

        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| Error::Setup("no writer attached".to_string()))?;
        if self.write_limit > 0 {
            sink = Box::new(LimitWriter::new(sink, self.write_limit));
        }

        let encoder = match self.compressor {
            Compressor::None => Encoder::Plain(sink),
            Compressor::Gzip => Encoder::Gzip(GzEncoder::new(sink, Compression::new(self.level))),
        };

        self.builder = Some(match self.archive_type {
            ArchiveType::Tar => tar::Builder::new(encoder),
        });
        self.state = State::Ready;

        debug!(
            archive_type = %self.archive_type,
            compressor = %self.compressor,
            write_limit = self.write_limit,
            "Archive writer ready"
        );
        Ok(())
    }

    /// Build the read stack. Calling it again once ready is a no-op.
    pub fn setup_reader(&mut self) -> Result<()> {
        match self.state {
            State::Closed => return Err(Error::Setup("archive is closed".to_string())),
            State::Ready if self.reader.is_some() => return Ok(()),
            State::Ready => {
                return Err(Error::Setup("archive is set up for writing".to_string()))
            }
            State::Uninitialized => {}
        }

        let source = self
            .source
            .take()
            .ok_or_else(|| Error::Setup("no reader attached".to_string()))?;

        let decoder = match self.compressor {
            Compressor::None => Decoder::Plain(source),
            Compressor::Gzip => Decoder::Gzip(GzDecoder::new(source)),
        };

        self.reader = Some(match self.archive_type {
            ArchiveType::Tar => tar::Archive::new(decoder),
        });
        self.state = State::Ready;

        debug!(
            archive_type = %self.archive_type,
            compressor = %self.compressor,
            "Archive reader ready"
        );
        Ok(())
    }

    /// Tear down the stack: tar trailer, then the compressor, then the sink.
    ///
    /// Every layer is closed even when an earlier one fails. A single failure
    /// is returned as is, several are joined into [`Error::Close`]. A second
    /// call fails with [`Error::AlreadyClosed`].
    pub fn close(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Err(Error::AlreadyClosed);
        }
        self.state = State::Closed;

        let mut problems = Vec::new();
        if let Some(mut builder) = self.builder.take() {
            if let Err(e) = builder.finish() {
                problems.push(("closing tar writer", e));
            }
            match builder.into_inner() {
                Ok(encoder) => encoder.close(&mut problems),
                Err(e) => problems.push(("closing tar writer", e)),
            }
        }
        // Nothing on the read side can fail on release
        self.reader = None;
        self.sink = None;
        self.source = None;

        if problems.len() > 1 {
            let messages = problems
                .into_iter()
                .map(|(layer, e)| format!("{}: {}", layer, e))
                .collect();
            return Err(Error::Close(messages));
        }
        match problems.pop() {
            None => {
                debug!("Archive closed");
                Ok(())
            }
            Some((layer, e)) => match Error::from(e) {
                Error::Io(e) => Err(Error::Close(vec![format!("{}: {}", layer, e)])),
                other => Err(other),
            },
        }
    }
}

impl fmt::Debug for Archive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("archive_type", &self.archive_type)
            .field("compressor", &self.compressor)
            .field("level", &self.level)
            .field("write_limit", &self.write_limit)
            .field("read_limit", &self.read_limit)
            .field("read_bytes", &self.read_bytes)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink whose flush always fails
    struct BrokenFlush;

    impl Write for BrokenFlush {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink gone"))
        }
    }

    /// Sink that fails every write and every flush
    struct Dead;

    impl Write for Dead {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "dead"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "dead flush"))
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("tar".parse::<ArchiveType>().unwrap(), ArchiveType::Tar);
        assert_eq!("GZ".parse::<Compressor>().unwrap(), Compressor::Gzip);
        assert_eq!("none".parse::<Compressor>().unwrap(), Compressor::None);
        assert!(matches!("zip".parse::<ArchiveType>(), Err(Error::Setup(_))));
        assert!(matches!("lz4".parse::<Compressor>(), Err(Error::Setup(_))));
    }

    #[test]
    fn test_setup_without_writer() {
        let mut archive = Archive::tar();
        assert!(matches!(archive.setup_writer(), Err(Error::Setup(_))));
        assert!(matches!(archive.setup_reader(), Err(Error::Setup(_))));
    }

    #[test]
    fn test_setup_writer_is_idempotent() {
        let mut buf = Vec::new();
        {
            let mut archive = Archive::tar_gz().with_writer(&mut buf);
            archive.setup_writer().unwrap();
            archive.setup_writer().unwrap();
            archive.close().unwrap();
        }
        // A single gzip member holding the empty tar trailer
        let mut decoded = Vec::new();
        GzDecoder::new(buf.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded.len(), 1024);
        assert!(decoded.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_one_direction_per_handle() {
        let mut buf = Vec::new();
        let mut archive = Archive::tar()
            .with_writer(&mut buf)
            .with_reader(io::empty());
        archive.setup_writer().unwrap();
        assert!(matches!(archive.setup_reader(), Err(Error::Setup(_))));
    }

    #[test]
    fn test_close_once() {
        let mut archive = Archive::tar().with_writer(io::sink());
        archive.setup_writer().unwrap();
        archive.close().unwrap();
        assert!(archive.is_closed());
        assert!(matches!(archive.close(), Err(Error::AlreadyClosed)));
        assert!(matches!(archive.setup_writer(), Err(Error::Setup(_))));
    }

    #[test]
    fn test_close_reports_sink_failure() {
        let mut archive = Archive::tar().with_writer(BrokenFlush);
        archive.setup_writer().unwrap();
        match archive.close() {
            Err(Error::Close(problems)) => {
                assert_eq!(problems.len(), 1);
                assert!(problems[0].contains("sink gone"));
            }
            other => panic!("expected close error, got {:?}", other),
        }
    }

    #[test]
    fn test_close_joins_every_layer_failure() {
        let mut archive = Archive::tar().with_writer(Dead);
        archive.setup_writer().unwrap();
        match archive.close() {
            Err(Error::Close(problems)) => {
                assert_eq!(problems.len(), 2, "{:?}", problems);
                assert!(problems[0].starts_with("closing tar writer"));
                assert!(problems[1].contains("dead flush"));
            }
            other => panic!("expected close error, got {:?}", other),
        }
        assert!(matches!(archive.close(), Err(Error::AlreadyClosed)));
    }

    #[test]
    fn test_write_limit_hit_on_trailer() {
        let mut buf = Vec::new();
        let mut archive = Archive::tar().with_writer(&mut buf).limit_archive(512);
        archive.setup_writer().unwrap();
        // The 1024-byte trailer does not fit; every layer still gets closed
        assert!(matches!(archive.close(), Err(Error::WriteLimitExceeded)));
        assert!(archive.is_closed());
        drop(archive);
        assert!(buf.is_empty());
    }
}
