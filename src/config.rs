use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::election::Election;
use crate::model::candidate::CandidateSet;
use crate::otp::OtpValidator;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    candidates: CandidateSet,
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default = "default_subscriber_capacity")]
    subscriber_capacity: usize,
    // secrets
    hmac_secret: String,
}

fn default_subscriber_capacity() -> usize {
    64
}

impl Config {
    /// The fixed set of candidates voters may choose from.
    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    /// Directory holding the stores. `None` keeps everything in memory.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// How many snapshots a live observer may fall behind before it starts
    /// skipping to newer ones.
    pub fn subscriber_capacity(&self) -> usize {
        self.subscriber_capacity.max(1)
    }

    /// Secret key used to HMAC voter identifiers.
    pub fn hmac_secret(&self) -> &[u8] {
        self.hmac_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the election fairing and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// A fairing that opens the election stores and places the [`Election`]
/// into managed state as an `Arc<Election>`. Must be attached after [`ConfigFairing`].
pub struct ElectionFairing {
    otp: Arc<dyn OtpValidator>,
}

impl ElectionFairing {
    pub fn new(otp: Arc<dyn OtpValidator>) -> Self {
        Self { otp }
    }
}

#[rocket::async_trait]
impl Fairing for ElectionFairing {
    fn info(&self) -> Info {
        Info {
            name: "Election",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(config) = rocket.state::<Config>() else {
            error!("Election fairing ran before the config was loaded");
            return Err(rocket);
        };
        match config.data_dir() {
            Some(dir) => info!("Loading election state from {}...", dir.display()),
            None => warn!("No `data_dir` configured, election state will not be persisted"),
        }

        let election = match Election::open(config, self.otp.clone()) {
            Ok(election) => election,
            Err(e) => {
                error!("Failed to open election state: {e}");
                return Err(rocket);
            }
        };
        let candidates = election
            .candidates()
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        info!("...election open with candidates: {candidates}");

        // Manage the state.
        rocket = rocket.manage(Arc::new(election));
        Ok(rocket)
    }
}
