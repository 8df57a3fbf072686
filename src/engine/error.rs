use thiserror::Error;
use ulid::Ulid;

use crate::booking::BookingError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] BookingError),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn not_found(id: Ulid) -> Self {
        EngineError::Rejected(BookingError::NotFound(id))
    }

    pub(crate) fn forbidden(reason: &'static str) -> Self {
        EngineError::Rejected(BookingError::Forbidden(reason))
    }
}
