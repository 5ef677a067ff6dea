//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::model::token::VotingToken;

/// Event name used for tally pushes on the live results stream.
pub const UPDATE_EVENT: &str = "update_results";

/// A voter presenting their identity and one-time password.
///
/// Fields are optional so that an absent field is reported as
/// `MissingFields` rather than as a malformed body.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub voter_id: Option<String>,
    pub otp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: VotingToken,
}

/// An anonymous vote: the token stands in for the voter.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub token: Option<String>,
    pub vote: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub message: String,
}
