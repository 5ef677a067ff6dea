#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use std::sync::Arc;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, ElectionFairing};
use crate::logging::LoggerFairing;
use crate::otp::{OtpValidator, TrustedOtp};

pub mod api;
pub mod config;
pub mod election;
pub mod error;
pub mod logging;
pub mod model;
pub mod otp;
pub mod store;

/// Build the server, trusting OTPs to have been verified upstream.
pub fn build() -> Rocket<Build> {
    build_with_validator(Arc::new(TrustedOtp))
}

/// Build the server with a specific OTP authority.
pub fn build_with_validator(otp: Arc<dyn OtpValidator>) -> Rocket<Build> {
    attach(rocket::build(), otp)
}

fn attach(rocket: Rocket<Build>, otp: Arc<dyn OtpValidator>) -> Rocket<Build> {
    rocket
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .attach(ElectionFairing::new(otp))
        .attach(LoggerFairing)
}

/// Build a server for tests, persisting to `data_dir` and independent of any
/// `Rocket.toml` in the working directory.
#[cfg(test)]
pub(crate) fn rocket_for_data_dir(data_dir: &std::path::Path) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("candidates", ["Rep A", "Rep B", "Rep C"]))
        .merge(("hmac_secret", "test-hmac-secret"))
        .merge(("data_dir", data_dir))
        .merge(("log_level", "off"));
    attach(rocket::custom(figment), Arc::new(TrustedOtp))
}

/// Pick a fresh data directory for a test.
#[cfg(test)]
pub(crate) fn test_data_dir() -> std::path::PathBuf {
    let random: u32 = rand::random();
    let dir = std::env::temp_dir().join(format!("anonvote-test{random}"));
    info!("Using data directory {}", dir.display());
    dir
}
