//! Crate-level error type.
//!
//! Each layer has its own error enum ([`StoreError`], [`RepositoryError`],
//! [`DecodeError`]); [`Error`] wraps them so that gate and worker operations
//! can propagate any of them with `?`.

use crate::{DecodeError, PromotionId, RepositoryError, StoreError};

/// A result type defaulting to the crate-level [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors the flash-sale pipeline can produce.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The shared fast store (or the queue living in it) failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The persisted-order store failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A queue entry does not carry a well-formed claim.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The promotion metadata provider does not know the promotion.
    #[error("promotion {0} not found")]
    PromotionNotFound(PromotionId),

    /// The day-scoped id counter outgrew its bit width.
    #[error("id sequence exhausted for `{namespace}` on {date}")]
    SequenceExhausted { namespace: String, date: String },
}

impl Error {
    /// Returns `true` for transient infrastructure failures.
    ///
    /// The outcome of the interrupted operation is unknown: a caller should
    /// back off and, before retrying an admission, check
    /// [`AdmissionGate::is_admitted`](crate::AdmissionGate::is_admitted).
    /// Every other error is final, including store errors that describe the
    /// data rather than the connection.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Repository(RepositoryError::Unavailable { .. }) => true,
            _ => false,
        }
    }
}
