use std::fmt;
use std::io;
use std::result;

use thiserror::Error as ThisError;

use crate::btf::BtfKind;

/// Byte range of the input that a decode error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRange {
    /// Absolute offset of the first byte of the offending region.
    pub offset: u64,
    /// Length of the region in bytes.
    pub size: usize,
}

/// Error codes reported by the byte reader and the per-kind parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum ErrorKind {
    #[error("unknown error")]
    Unknown,
    #[error("memory allocation failure")]
    MemoryAllocationFailure,
    #[error("file not found")]
    FileNotFound,
    #[error("I/O error")]
    IoError,
    #[error("invalid magic value")]
    InvalidMagicValue,
    #[error("invalid BTF kind")]
    InvalidBtfKind,
    #[error("unsupported BTF kind")]
    UnsupportedBtfKind,
    #[error("invalid encoding for `{0}` BTF type")]
    InvalidTypeEncoding(BtfKind),
    #[error("invalid string offset")]
    InvalidStringOffset,
}

/// Canonical error type for this crate.
///
/// Decode errors point back at the offending record through [`Error::range`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    range: Option<FileRange>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, range: None }
    }

    pub(crate) fn with_range(kind: ErrorKind, range: FileRange) -> Self {
        Self {
            kind,
            range: Some(range),
        }
    }

    /// The error code.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The input range the error refers to, when known.
    pub fn range(&self) -> Option<FileRange> {
        self.range
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: '{}'", self.kind)?;
        if let Some(range) = self.range {
            write!(
                f,
                ", file range: {} - {}",
                range.offset,
                range.offset + range.size as u64
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            io::ErrorKind::OutOfMemory => ErrorKind::MemoryAllocationFailure,
            _ => ErrorKind::IoError,
        };
        Self::new(kind)
    }
}

pub type Result<T> = result::Result<T, Error>;
