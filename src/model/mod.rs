pub mod api;
pub mod candidate;
pub mod ledger;
pub mod tally;
pub mod token;
pub mod voter;
