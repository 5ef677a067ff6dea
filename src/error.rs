use rocket::{
    http::{Status, StatusClass},
    response::Responder,
    serde::json::{serde_json, Json},
    Request,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every way a request against the voting core can be rejected.
///
/// None of these leave shared state partially modified.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing {0}")]
    MissingFields(&'static str),
    #[error("Voter has already authenticated")]
    DuplicateVoter,
    #[error("One-time password was rejected")]
    InvalidOtp,
    #[error("Invalid vote: '{0}' is not a candidate")]
    InvalidCandidate(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("This token has already been used")]
    TokenAlreadyUsed,
    #[error("Candidate '{0}' has no tally entry")]
    UnknownCandidate(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
}

/// Failures of the backing store. These are infrastructure problems, not
/// anything the caller did wrong.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] rocket::tokio::task::JoinError),
    #[error("state lock poisoned by an earlier panic")]
    Poisoned,
    #[error("inconsistent stored state: {0}")]
    Inconsistent(String),
}

impl Error {
    /// Stable machine-readable name of the rejection.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingFields(_) => "MissingFields",
            Self::DuplicateVoter => "DuplicateVoter",
            Self::InvalidOtp => "InvalidOtp",
            Self::InvalidCandidate(_) => "InvalidCandidate",
            Self::InvalidToken => "InvalidToken",
            Self::TokenAlreadyUsed => "TokenAlreadyUsed",
            Self::UnknownCandidate(_) => "UnknownCandidate",
            Self::StorageUnavailable(_) => "StorageUnavailable",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::MissingFields(_) | Self::InvalidCandidate(_) => Status::BadRequest,
            Self::InvalidOtp | Self::InvalidToken => Status::Unauthorized,
            Self::DuplicateVoter | Self::TokenAlreadyUsed => Status::Conflict,
            Self::UnknownCandidate(_) => Status::InternalServerError,
            Self::StorageUnavailable(_) => Status::ServiceUnavailable,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageUnavailable(err.into())
    }
}

/// JSON body sent back with every rejection.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub reason: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status.class() == StatusClass::ServerError {
            error!("{self}");
        } else {
            debug!("Rejected request: {self}");
        }
        let body = ErrorBody {
            error: self.kind(),
            reason: self.to_string(),
        };
        (status, Json(body)).respond_to(req)
    }
}
