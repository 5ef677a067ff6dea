use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The name of a candidate, as configured at startup.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CandidateId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The fixed, closed set of candidates for the election.
///
/// Order is preserved as configured; membership never changes after construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<String>")]
pub struct CandidateSet {
    candidates: Vec<CandidateId>,
}

impl CandidateSet {
    /// Build the candidate set, rejecting an empty list, blank names, and duplicates.
    pub fn new<I, S>(names: I) -> Result<Self, CandidateSetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for name in names {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(CandidateSetError::BlankName);
            }
            if !seen.insert(name.clone()) {
                return Err(CandidateSetError::Duplicate(name));
            }
            candidates.push(CandidateId(name));
        }
        if candidates.is_empty() {
            return Err(CandidateSetError::Empty);
        }
        Ok(Self { candidates })
    }

    /// Look up a candidate by name.
    pub fn get(&self, name: &str) -> Option<&CandidateId> {
        self.candidates.iter().find(|c| c.as_str() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateId> {
        self.candidates.iter()
    }
}

impl TryFrom<Vec<String>> for CandidateSet {
    type Error = CandidateSetError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CandidateSetError {
    #[error("at least one candidate must be configured")]
    Empty,
    #[error("candidate names must not be blank")]
    BlankName,
    #[error("candidate '{0}' is configured more than once")]
    Duplicate(String),
}
