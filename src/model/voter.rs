use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result, StorageError};
use crate::model::token::VotingToken;
use crate::store::JsonFile;

pub type HmacSha256 = Hmac<Sha256>;

/// Voter unique ID: the HMAC of their external identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterKey(String);

impl VoterKey {
    pub fn derive(voter_id: &str, secret: &[u8]) -> Self {
        let mut hmac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
        hmac.update(voter_id.as_bytes());
        Self(HEXLOWER.encode(&hmac.finalize().into_bytes()))
    }
}

/// A voter who has authenticated and been issued their token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub token: VotingToken,
    pub issued_at: DateTime<Utc>,
}

pub type VoterRecords = BTreeMap<VoterKey, VoterRecord>;

/// Issues exactly one token per voter and remembers which tokens exist.
#[derive(Debug)]
pub struct VoterRegistry {
    records: VoterRecords,
    /// Index of every token ever issued, for validating votes without
    /// touching voter keys.
    issued: HashSet<VotingToken>,
    hmac_secret: Vec<u8>,
    file: JsonFile<VoterRecords>,
}

impl VoterRegistry {
    /// Load the registry from its backing file.
    pub fn load(file: JsonFile<VoterRecords>, hmac_secret: &[u8]) -> Result<Self> {
        let records = file.load()?.unwrap_or_default();
        let mut issued = HashSet::with_capacity(records.len());
        for record in records.values() {
            if !issued.insert(record.token.clone()) {
                return Err(StorageError::Inconsistent(
                    "the same token was issued to two voters".to_string(),
                )
                .into());
            }
        }
        debug!("Loaded {} voter records", records.len());
        Ok(Self {
            records,
            issued,
            hmac_secret: hmac_secret.to_vec(),
            file,
        })
    }

    /// Issue a fresh token to `voter_id`. Fails if they already hold one.
    pub fn issue(&mut self, voter_id: &str) -> Result<VotingToken> {
        let key = VoterKey::derive(voter_id, &self.hmac_secret);
        if self.records.contains_key(&key) {
            return Err(Error::DuplicateVoter);
        }

        let mut token = VotingToken::generate();
        while self.issued.contains(&token) {
            token = VotingToken::generate();
        }

        let record = VoterRecord {
            token: token.clone(),
            issued_at: Utc::now(),
        };
        self.records.insert(key.clone(), record);
        if let Err(e) = self.file.save(&self.records) {
            self.records.remove(&key);
            return Err(e.into());
        }
        self.issued.insert(token.clone());
        Ok(token)
    }

    /// Has this token ever been issued?
    pub fn is_issued(&self, token: &str) -> bool {
        self.issued.contains(token)
    }

    #[cfg(test)]
    pub fn is_registered(&self, voter_id: &str) -> bool {
        self.records
            .contains_key(&VoterKey::derive(voter_id, &self.hmac_secret))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
