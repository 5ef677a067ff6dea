use std::borrow::Borrow;
use std::fmt::Display;

use data_encoding::BASE32_NOPAD;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

/// Number of random bytes behind each token (256 bits of entropy).
pub const TOKEN_BYTES: usize = 32;

/// A one-time voting token.
///
/// This is the voter's only credential once issued. It is deliberately opaque:
/// nothing about the voter can be derived from it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VotingToken(String);

impl VotingToken {
    /// Generate a fresh token from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(BASE32_NOPAD.encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VotingToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl Borrow<str> for VotingToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for VotingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
