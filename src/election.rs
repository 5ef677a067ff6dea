use std::sync::{Arc, Mutex, MutexGuard};

use rocket::tokio::sync::broadcast;

use crate::config::Config;
use crate::error::{Error, Result, StorageError};
use crate::model::{
    candidate::CandidateSet,
    ledger::TokenLedger,
    tally::{Tally, TallySnapshot},
    token::VotingToken,
    voter::VoterRegistry,
};
use crate::otp::OtpValidator;
use crate::store::{JsonFile, USED_TOKENS_FILE, VOTERS_FILE, VOTES_FILE};

/// The three stores that must change together.
#[derive(Debug)]
struct Ballots {
    voters: VoterRegistry,
    ledger: TokenLedger,
    tally: Tally,
}

/// Fan-out of tally snapshots to live observers.
///
/// Sending only enqueues the snapshot into a bounded ring buffer; each
/// observer drains it on its own task, so a stalled observer never holds up
/// the sender. Observers that fall behind skip straight to newer snapshots.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<TallySnapshot>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a snapshot, returning how many observers will see it.
    pub fn publish(&self, snapshot: TallySnapshot) -> usize {
        // An error only means nobody is listening right now.
        self.sender.send(snapshot).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TallySnapshot> {
        self.sender.subscribe()
    }

    #[cfg(test)]
    pub fn observers(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A live view of the tally: the state at the moment of subscribing, followed
/// by every later snapshot.
#[derive(Debug)]
pub struct Subscription {
    pub initial: TallySnapshot,
    pub updates: broadcast::Receiver<TallySnapshot>,
}

/// Coordinates token issuance, vote casting and result publication.
///
/// All mutation happens under one lock, so every check-then-act sequence
/// (is the voter new, is the token unused) is atomic with its action.
pub struct Election {
    candidates: CandidateSet,
    ballots: Mutex<Ballots>,
    broadcaster: Broadcaster,
    otp: Arc<dyn OtpValidator>,
}

impl Election {
    /// Load the election state from the configured data directory, or start
    /// an in-memory election if none is configured.
    pub fn open(config: &Config, otp: Arc<dyn OtpValidator>) -> Result<Self> {
        let candidates = config.candidates().clone();
        let (voters_file, ledger_file, tally_file) = match config.data_dir() {
            Some(dir) => (
                JsonFile::in_dir(dir, VOTERS_FILE),
                JsonFile::in_dir(dir, USED_TOKENS_FILE),
                JsonFile::in_dir(dir, VOTES_FILE),
            ),
            None => (JsonFile::memory(), JsonFile::memory(), JsonFile::memory()),
        };

        let ballots = Ballots {
            voters: VoterRegistry::load(voters_file, config.hmac_secret())?,
            ledger: TokenLedger::load(ledger_file)?,
            tally: Tally::load(tally_file, &candidates)?,
        };
        if ballots.tally.snapshot().total() != ballots.ledger.len() as u64 {
            warn!(
                "Stored tally has {} votes but {} tokens are used",
                ballots.tally.snapshot().total(),
                ballots.ledger.len()
            );
        }

        Ok(Self {
            candidates,
            ballots: Mutex::new(ballots),
            broadcaster: Broadcaster::new(config.subscriber_capacity()),
            otp,
        })
    }

    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    /// Authenticate a voter and issue their one-time voting token.
    ///
    /// Succeeds at most once per voter.
    pub fn authenticate(&self, voter_id: &str, otp: &str) -> Result<VotingToken> {
        if voter_id.trim().is_empty() || otp.trim().is_empty() {
            return Err(Error::MissingFields("voter ID or OTP"));
        }
        if !self.otp.validate(voter_id, otp) {
            return Err(Error::InvalidOtp);
        }

        let mut ballots = self.lock()?;
        let token = ballots.voters.issue(voter_id)?;
        info!("Issued voting token ({} voters authenticated)", ballots.voters.len());
        Ok(token)
    }

    /// Redeem `token` for a vote for `candidate`.
    ///
    /// The election never learns which voter the token belonged to. On
    /// success, returns the tally including this vote.
    pub fn cast_vote(&self, token: &str, candidate: &str) -> Result<TallySnapshot> {
        if token.trim().is_empty() || candidate.trim().is_empty() {
            return Err(Error::MissingFields("token or vote"));
        }
        let candidate = self
            .candidates
            .get(candidate)
            .ok_or_else(|| Error::InvalidCandidate(candidate.to_string()))?;

        let mut ballots = self.lock()?;
        if !ballots.voters.is_issued(token) {
            return Err(Error::InvalidToken);
        }
        if ballots.ledger.is_used(token) {
            return Err(Error::TokenAlreadyUsed);
        }

        // Ledger first: a crash between the two writes can lose a vote but
        // never allow the token to be spent twice.
        let token = VotingToken::from(token);
        ballots.ledger.consume(&token)?;
        let snapshot = match ballots.tally.increment(candidate.as_str()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if let Err(revert) = ballots.ledger.revert(&token) {
                    error!("Could not release token after failed tally write: {revert}");
                }
                return Err(e);
            }
        };

        // Enqueue while still holding the lock so observers see snapshots in
        // commit order. Delivery happens on the observers' own tasks.
        let observers = self.broadcaster.publish(snapshot.clone());
        drop(ballots);

        info!("Accepted vote for '{candidate}' ({observers} live observers)");
        Ok(snapshot)
    }

    /// Is `token` one we issued that has not been redeemed yet?
    pub fn is_valid_unused_token(&self, token: &str) -> Result<bool> {
        let ballots = self.lock()?;
        Ok(ballots.voters.is_issued(token) && !ballots.ledger.is_used(token))
    }

    /// The current tally.
    pub fn results(&self) -> Result<TallySnapshot> {
        Ok(self.lock()?.tally.snapshot())
    }

    /// Start observing the tally.
    pub fn subscribe(&self) -> Result<Subscription> {
        // Taken together under the lock so no vote falls between the initial
        // snapshot and the first update.
        let ballots = self.lock()?;
        Ok(Subscription {
            initial: ballots.tally.snapshot(),
            updates: self.broadcaster.subscribe(),
        })
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ballots>> {
        self.ballots
            .lock()
            .map_err(|_| Error::StorageUnavailable(StorageError::Poisoned))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use rocket::tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::otp::TrustedOtp;

    fn election() -> Election {
        Election::open(&Config::example(), Arc::new(TrustedOtp)).unwrap()
    }

    struct RejectAll;

    impl OtpValidator for RejectAll {
        fn validate(&self, _voter_id: &str, _otp: &str) -> bool {
            false
        }
    }

    #[test]
    fn full_voting_scenario() {
        let election = election();

        let token = election.authenticate("v1", "123456").unwrap();
        assert!(election.is_valid_unused_token(token.as_str()).unwrap());

        let tally = election.cast_vote(token.as_str(), "Rep A").unwrap();
        assert_eq!(tally.count("Rep A"), Some(1));
        assert!(!election.is_valid_unused_token(token.as_str()).unwrap());

        assert!(matches!(
            election.cast_vote(token.as_str(), "Rep A"),
            Err(Error::TokenAlreadyUsed)
        ));
        assert!(matches!(
            election.cast_vote("bogus-token", "Rep B"),
            Err(Error::InvalidToken)
        ));

        let results = election.results().unwrap();
        assert_eq!(results.count("Rep A"), Some(1));
        assert_eq!(results.count("Rep B"), Some(0));
        assert_eq!(results.count("Rep C"), Some(0));
        assert_eq!(results.total(), 1);
    }

    #[test]
    fn authentication_is_one_shot() {
        let election = election();
        election.authenticate("v1", "123456").unwrap();
        assert!(matches!(
            election.authenticate("v1", "654321"),
            Err(Error::DuplicateVoter)
        ));
    }

    #[test]
    fn missing_fields_are_rejected_first() {
        let election = election();
        assert!(matches!(
            election.authenticate("", "123456"),
            Err(Error::MissingFields(_))
        ));
        assert!(matches!(
            election.authenticate("v1", "  "),
            Err(Error::MissingFields(_))
        ));
        assert!(matches!(
            election.cast_vote("", "Rep Z"),
            Err(Error::MissingFields(_))
        ));
        assert!(matches!(
            election.cast_vote("bogus-token", ""),
            Err(Error::MissingFields(_))
        ));
        // Missing fields never cost the voter their single authentication.
        election.authenticate("v1", "123456").unwrap();
    }

    #[test]
    fn candidate_is_checked_before_token() {
        let election = election();
        let token = election.authenticate("v1", "123456").unwrap();

        assert!(matches!(
            election.cast_vote("bogus-token", "Rep Z"),
            Err(Error::InvalidCandidate(_))
        ));
        assert!(matches!(
            election.cast_vote(token.as_str(), "Rep Z"),
            Err(Error::InvalidCandidate(_))
        ));

        // The rejected attempt did not spend the token.
        assert_eq!(election.results().unwrap().total(), 0);
        election.cast_vote(token.as_str(), "Rep C").unwrap();
    }

    #[test]
    fn rejected_otp_issues_nothing() {
        let election = Election::open(&Config::example(), Arc::new(RejectAll)).unwrap();
        assert!(matches!(
            election.authenticate("v1", "000000"),
            Err(Error::InvalidOtp)
        ));
        assert!(election.lock().unwrap().voters.is_empty());
    }

    #[test]
    fn tally_total_matches_accepted_votes() {
        let election = election();
        let mut accepted = 0;
        for (i, candidate) in ["Rep A", "Rep B", "Rep A", "Rep Z", "Rep C"]
            .into_iter()
            .enumerate()
        {
            let token = election.authenticate(&format!("voter{i}"), "1").unwrap();
            if election.cast_vote(token.as_str(), candidate).is_ok() {
                accepted += 1;
            }
            let replay = election.cast_vote(token.as_str(), candidate);
            if candidate == "Rep Z" {
                assert!(matches!(replay, Err(Error::InvalidCandidate(_))));
            } else {
                assert!(matches!(replay, Err(Error::TokenAlreadyUsed)));
            }
        }
        assert_eq!(accepted, 4);
        assert_eq!(election.results().unwrap().total(), accepted);
    }

    #[test]
    fn concurrent_redemptions_of_one_token() {
        const ATTEMPTS: usize = 16;

        let election = election();
        let token = election.authenticate("v1", "123456").unwrap();
        let barrier = Barrier::new(ATTEMPTS);

        let outcomes = thread::scope(|s| {
            let handles = (0..ATTEMPTS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        election.cast_vote(token.as_str(), "Rep B")
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        let accepted = outcomes.iter().filter(|o| o.is_ok()).count();
        let replays = outcomes
            .iter()
            .filter(|o| matches!(o, Err(Error::TokenAlreadyUsed)))
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(replays, ATTEMPTS - 1);
        assert_eq!(election.results().unwrap().count("Rep B"), Some(1));
    }

    #[test]
    fn concurrent_votes_are_not_lost() {
        const VOTERS: usize = 32;

        let election = election();
        let tokens = (0..VOTERS)
            .map(|i| election.authenticate(&format!("voter{i}"), "1").unwrap())
            .collect::<Vec<_>>();

        thread::scope(|s| {
            for token in &tokens {
                let election = &election;
                s.spawn(move || election.cast_vote(token.as_str(), "Rep A").unwrap());
            }
        });

        assert_eq!(
            election.results().unwrap().count("Rep A"),
            Some(VOTERS as u64)
        );
    }

    #[test]
    fn subscribers_see_current_then_updated_tally() {
        let election = election();
        let early = election.authenticate("v1", "1").unwrap();
        election.cast_vote(early.as_str(), "Rep C").unwrap();

        let mut subscription = election.subscribe().unwrap();
        assert_eq!(subscription.initial.count("Rep C"), Some(1));
        assert!(matches!(
            subscription.updates.try_recv(),
            Err(TryRecvError::Empty)
        ));

        let mut late = election.subscribe().unwrap();
        let token = election.authenticate("v2", "1").unwrap();
        election.cast_vote(token.as_str(), "Rep A").unwrap();

        for updates in [&mut subscription.updates, &mut late.updates] {
            let update = updates.try_recv().unwrap();
            assert_eq!(update.count("Rep A"), Some(1));
            assert_eq!(update.count("Rep C"), Some(1));
            assert_eq!(update.total(), subscription.initial.total() + 1);
        }
    }

    #[test]
    fn rejected_votes_publish_nothing() {
        let election = election();
        let mut subscription = election.subscribe().unwrap();
        assert!(matches!(
            election.cast_vote("bogus-token", "Rep A"),
            Err(Error::InvalidToken)
        ));
        assert!(matches!(
            subscription.updates.try_recv(),
            Err(TryRecvError::Empty)
        ));
    }

    #[test]
    fn dropped_observers_do_not_block_voting() {
        let election = election();
        let subscription = election.subscribe().unwrap();
        drop(subscription);
        assert_eq!(election.broadcaster().observers(), 0);

        let token = election.authenticate("v1", "1").unwrap();
        election.cast_vote(token.as_str(), "Rep A").unwrap();
    }

    #[test]
    fn state_survives_restart() {
        let config = Config::example_with_data_dir();

        let token = {
            let election = Election::open(&config, Arc::new(TrustedOtp)).unwrap();
            let token = election.authenticate("v1", "1").unwrap();
            election.cast_vote(token.as_str(), "Rep B").unwrap();
            token
        };

        let election = Election::open(&config, Arc::new(TrustedOtp)).unwrap();
        assert_eq!(election.results().unwrap().count("Rep B"), Some(1));
        assert!(matches!(
            election.cast_vote(token.as_str(), "Rep A"),
            Err(Error::TokenAlreadyUsed)
        ));
        assert!(matches!(
            election.authenticate("v1", "1"),
            Err(Error::DuplicateVoter)
        ));

        if let Some(dir) = config.data_dir() {
            std::fs::remove_dir_all(dir).unwrap();
        }
    }

    #[test]
    fn failed_tally_write_keeps_token_spendable() {
        let config = Config::example_with_data_dir();
        let election = Election::open(&config, Arc::new(TrustedOtp)).unwrap();
        let token = election.authenticate("v1", "1").unwrap();
        let dir = config.data_dir().unwrap().to_path_buf();

        // A directory squatting on the temporary file path makes the tally
        // write fail while the ledger write still succeeds.
        std::fs::create_dir_all(dir.join("votes.json.tmp")).unwrap();
        assert!(matches!(
            election.cast_vote(token.as_str(), "Rep A"),
            Err(Error::StorageUnavailable(_))
        ));
        assert!(election.is_valid_unused_token(token.as_str()).unwrap());
        assert_eq!(election.results().unwrap().total(), 0);

        std::fs::remove_dir_all(dir.join("votes.json.tmp")).unwrap();
        election.cast_vote(token.as_str(), "Rep A").unwrap();

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn failed_ledger_write_leaves_state_untouched() {
        let config = Config::example_with_data_dir();
        let election = Election::open(&config, Arc::new(TrustedOtp)).unwrap();
        let token = election.authenticate("v1", "1").unwrap();
        let mut subscription = election.subscribe().unwrap();
        let dir = config.data_dir().unwrap().to_path_buf();

        std::fs::create_dir_all(dir.join("used_tokens.json.tmp")).unwrap();
        assert!(matches!(
            election.cast_vote(token.as_str(), "Rep B"),
            Err(Error::StorageUnavailable(_))
        ));
        assert!(election.is_valid_unused_token(token.as_str()).unwrap());
        assert_eq!(election.results().unwrap().total(), 0);
        assert!(matches!(
            subscription.updates.try_recv(),
            Err(TryRecvError::Empty)
        ));
        assert!(!dir.join(USED_TOKENS_FILE).exists());

        std::fs::remove_dir_all(dir.join("used_tokens.json.tmp")).unwrap();
        election.cast_vote(token.as_str(), "Rep B").unwrap();
        assert_eq!(election.results().unwrap().count("Rep B"), Some(1));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
