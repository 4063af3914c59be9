//! Types for tag operations

use std::fmt;

use crate::batch::BatchState;

/// Identifier of a tag for the duration of one presentation in the field.
///
/// Not globally unique across time; only used to tell "same tag still
/// present" from "new tag presented".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagId(Vec<u8>);

impl TagId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bytes_to_hex(&self.0))
    }
}

/// A decoded NDEF URI record
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UriRecord {
    /// Full URI with the abbreviation expanded
    pub uri: String,
    /// URI identifier code used on the wire (0x00 = no abbreviation)
    pub prefix_code: u8,
}

impl fmt::Display for UriRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// A pending write requested by the collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteRequest {
    pub uri: String,
    pub lock_after_write: bool,
    pub allow_overwrite: bool,
    /// Number of tags to write in this batch
    pub copies: u32,
}

impl WriteRequest {
    /// A single unlocked write that refuses to overwrite existing content
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            lock_after_write: false,
            allow_overwrite: false,
            copies: 1,
        }
    }

    pub fn lock_after_write(mut self, lock: bool) -> Self {
        self.lock_after_write = lock;
        self
    }

    pub fn allow_overwrite(mut self, allow: bool) -> Self {
        self.allow_overwrite = allow;
        self
    }

    pub fn copies(mut self, copies: u32) -> Self {
        self.copies = copies;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), TagError> {
        if self.uri.trim().is_empty() {
            return Err(TagError::InvalidParameter("URI must not be empty".into()));
        }
        if self.copies == 0 || self.copies > crate::config::MAX_BATCH {
            return Err(TagError::InvalidParameter(format!(
                "Batch count must be between 1 and {}, got {}",
                crate::config::MAX_BATCH,
                self.copies
            )));
        }
        Ok(())
    }
}

/// What the monitor does with the next tag presentation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mode {
    /// Read and decode every presented tag
    #[default]
    Read,
    /// Write the pending request to presented tags
    Write(WriteRequest),
    /// Set the lock bits of the next presented tag, leaving its data as is
    Lock,
    /// Write mode with no pending request (batch finished)
    Idle,
}

/// Result of a completed tag write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub record: UriRecord,
    /// Number of page write commands acknowledged for the data area
    pub pages_written: usize,
    pub locked: bool,
}

/// Write attempt as delivered to the collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStatus {
    pub tag: TagId,
    pub result: Result<WriteReport, TagError>,
    /// Batch counters after this attempt was accounted for
    pub progress: BatchState,
}

impl fmt::Display for WriteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(report) => {
                write!(f, "Wrote {} to tag {}", report.record, self.tag)?;
                if report.locked {
                    f.write_str(" (locked)")?;
                }
                if self.progress.total > 1 {
                    write!(f, " [{}/{}]", self.progress.completed, self.progress.total)?;
                }
                Ok(())
            }
            Err(err) => write!(f, "Write to tag {} failed: {}", self.tag, err),
        }
    }
}

/// Lock attempt as delivered to the collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct LockStatus {
    pub tag: TagId,
    pub result: Result<(), TagError>,
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(()) => write!(f, "Locked tag {}", self.tag),
            Err(err) => write!(f, "Lock of tag {} failed: {}", self.tag, err),
        }
    }
}

/// Reader connectivity as reported to the collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderStatus {
    Connected(String),
    Disconnected(String),
}

/// Event sent from the monitor to the collaborator, in completion order
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Read(UriRecord),
    Write(WriteStatus),
    Lock(LockStatus),
    Log(String),
    Status(ReaderStatus),
}

/// Errors that can occur during tag operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    /// No compatible reader attached, or the driver layer is unavailable
    #[error("no NFC reader found")]
    NoReaderFound,
    /// Reader stopped answering polls
    #[error("reader disconnected: {0}")]
    Disconnected(String),
    /// Transport layer error (PC/SC, USB, etc.)
    #[error("transport error: {0}")]
    Transport(String),
    /// Reader answered with a failure status word
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Capability container missing or not NDEF
    #[error("tag is not NDEF formatted")]
    NotNdefFormatted,
    /// Formatted tag without a message
    #[error("tag holds no NDEF message")]
    EmptyTag,
    #[error("malformed NDEF data: {0}")]
    MalformedRecord(String),
    #[error("unsupported NDEF record: {0}")]
    UnsupportedRecord(String),
    #[error("URI needs {needed} bytes but the tag holds {capacity}")]
    TooLarge { needed: usize, capacity: usize },
    #[error("tag already holds {0}")]
    AlreadyWritten(String),
    #[error("tag is read-only")]
    ReadOnly,
    /// Data committed but the lock step failed part way. Lock bits set
    /// before the failure stay set (the CC may already deny writes), so
    /// recovery is `TagReader::lock_tag` or lock mode, not a rewrite.
    #[error("data written but locking failed: {0}")]
    LockFailedAfterWrite(String),
    /// Invalid parameter passed to a function
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Coarse classification used to decide between logging and escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Device,
    Transport,
    TagFormat,
    Capacity,
    Policy,
    PartialWrite,
    Parameter,
}

impl TagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TagError::NoReaderFound | TagError::Disconnected(_) => ErrorKind::Device,
            TagError::Transport(_) | TagError::InvalidResponse(_) => ErrorKind::Transport,
            TagError::NotNdefFormatted
            | TagError::EmptyTag
            | TagError::MalformedRecord(_)
            | TagError::UnsupportedRecord(_) => ErrorKind::TagFormat,
            TagError::TooLarge { .. } => ErrorKind::Capacity,
            TagError::AlreadyWritten(_) | TagError::ReadOnly => ErrorKind::Policy,
            TagError::LockFailedAfterWrite(_) => ErrorKind::PartialWrite,
            TagError::InvalidParameter(_) => ErrorKind::Parameter,
        }
    }

    /// Whether a fresh attempt on the same presentation may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Whether the tag may differ from both its old and the requested content
    pub fn modified_tag(&self) -> bool {
        self.kind() == ErrorKind::PartialWrite
    }
}

/// Outcome of one operation on one tag presentation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome<T> {
    Success(T),
    Retryable(TagError),
    Fatal(TagError),
}

impl<T> From<Result<T, TagError>> for OperationOutcome<T> {
    fn from(result: Result<T, TagError>) -> Self {
        match result {
            Ok(value) => OperationOutcome::Success(value),
            Err(err) if err.is_retryable() => OperationOutcome::Retryable(err),
            Err(err) => OperationOutcome::Fatal(err),
        }
    }
}

impl<T> OperationOutcome<T> {
    pub fn into_result(self) -> Result<T, TagError> {
        match self {
            OperationOutcome::Success(value) => Ok(value),
            OperationOutcome::Retryable(err) | OperationOutcome::Fatal(err) => Err(err),
        }
    }
}

/// Convert bytes to uppercase hex string
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
