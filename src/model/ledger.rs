use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::model::token::VotingToken;
use crate::store::JsonFile;

pub type UsedTokens = BTreeSet<VotingToken>;

/// The set of tokens that have already been redeemed.
///
/// Only ever grows, except to undo a consumption whose paired tally update
/// could not be stored.
#[derive(Debug)]
pub struct TokenLedger {
    used: UsedTokens,
    file: JsonFile<UsedTokens>,
}

impl TokenLedger {
    pub fn load(file: JsonFile<UsedTokens>) -> Result<Self> {
        let used = file.load()?.unwrap_or_default();
        debug!("Loaded {} used tokens", used.len());
        Ok(Self { used, file })
    }

    pub fn is_used(&self, token: &str) -> bool {
        self.used.contains(token)
    }

    /// Mark `token` as used, failing if it already was.
    ///
    /// The check and the insertion happen under the same `&mut` borrow, so
    /// callers holding the ledger behind a lock get an atomic test-and-set.
    pub fn consume(&mut self, token: &VotingToken) -> Result<()> {
        if !self.used.insert(token.clone()) {
            return Err(Error::TokenAlreadyUsed);
        }
        if let Err(e) = self.file.save(&self.used) {
            self.used.remove(token);
            return Err(e.into());
        }
        Ok(())
    }

    /// Undo a [`consume`](Self::consume) whose vote could not be recorded.
    pub(crate) fn revert(&mut self, token: &VotingToken) -> Result<()> {
        if self.used.remove(token) {
            if let Err(e) = self.file.save(&self.used) {
                // Leave memory agreeing with the file rather than with intent.
                self.used.insert(token.clone());
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}
