use std::io;

/// Errors raised by a shared fast store backend.
///
/// A command that fails has not changed any state. Only
/// [`is_transient`](Self::is_transient) errors are worth retrying; the rest
/// describe the stored data.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The backend could not be reached, or its journal could not be written.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A journal record could not be encoded, or a complete record failed to
    /// decode during replay.
    #[error("journal error: {0}")]
    Journal(#[from] serde_json::Error),

    /// An earlier append could not be rolled back; the journal accepts no
    /// further writes.
    #[error("journal refuses writes after a failed rollback")]
    JournalPoisoned,

    /// A journal line other than the last one is unreadable.
    #[error("journal corrupted at line {line}")]
    CorruptJournal { line: usize },

    /// The key holds a value of a different kind than the command expects.
    #[error("WRONGTYPE operation against `{key}` holding the wrong kind of value")]
    WrongType { key: String },

    /// The key holds a string that is not a base-10 signed integer.
    #[error("value at `{key}` is not an integer or out of range")]
    NotAnInteger { key: String },

    /// A scripted command required a key that does not exist.
    #[error("required key `{key}` does not exist")]
    MissingKey { key: String },

    /// The stream or the consumer group does not exist.
    #[error("NOGROUP no such key `{stream}` or consumer group `{group}`")]
    NoGroup { stream: String, group: String },
}

impl StoreError {
    /// Returns `true` if the command may succeed when retried: the store was
    /// unreachable, or the consumer group is about to be recreated.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::NoGroup { .. })
    }

    /// Returns `true` if the consumer group has to be (re)created before the
    /// command can succeed.
    pub const fn is_no_group(&self) -> bool {
        matches!(self, Self::NoGroup { .. })
    }
}
