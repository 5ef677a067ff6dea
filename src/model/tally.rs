use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, StorageError};
use crate::model::candidate::{CandidateId, CandidateSet};
use crate::store::JsonFile;

pub type Counts = BTreeMap<CandidateId, u64>;

/// An immutable point-in-time copy of the tally.
///
/// Serializes as a plain `{candidate: count}` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TallySnapshot(Counts);

impl TallySnapshot {
    pub fn count(&self, candidate: &str) -> Option<u64> {
        self.0.get(candidate).copied()
    }

    /// Total votes recorded across all candidates.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&CandidateId, &u64)> {
        self.0.iter()
    }
}

/// Vote counts per candidate. Keys are fixed to the configured candidate set.
#[derive(Debug)]
pub struct Tally {
    counts: Counts,
    file: JsonFile<Counts>,
}

impl Tally {
    /// Load the tally, starting every configured candidate missing from the
    /// file at zero. A stored candidate outside the configured set is an error.
    pub fn load(file: JsonFile<Counts>, candidates: &CandidateSet) -> Result<Self> {
        let stored = file.load()?;
        let fresh = stored.is_none();
        let mut counts = stored.unwrap_or_default();

        if let Some(unknown) = counts.keys().find(|c| !candidates.contains(c.as_str())) {
            return Err(StorageError::Inconsistent(format!(
                "stored tally has votes for unconfigured candidate '{unknown}'"
            ))
            .into());
        }
        for candidate in candidates.iter() {
            counts.entry(candidate.clone()).or_insert(0);
        }

        let tally = Self { counts, file };
        if fresh {
            tally.file.save(&tally.counts)?;
        }
        Ok(tally)
    }

    /// Record one vote for `candidate` and return the updated snapshot.
    pub fn increment(&mut self, candidate: &str) -> Result<TallySnapshot> {
        let count = self
            .counts
            .get_mut(candidate)
            .ok_or_else(|| Error::UnknownCandidate(candidate.to_string()))?;
        *count += 1;
        if let Err(e) = self.file.save(&self.counts) {
            if let Some(count) = self.counts.get_mut(candidate) {
                *count -= 1;
            }
            return Err(e.into());
        }
        Ok(self.snapshot())
    }

    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot(self.counts.clone())
    }
}
