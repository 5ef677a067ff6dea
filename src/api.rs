use std::sync::Arc;

use rocket::{tokio::task::spawn_blocking, Catcher, Route, State};

use crate::election::Election;
use crate::error::{Error, Result, StorageError};

mod auth;
mod results;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(auth::routes());
    routes.extend(voting::routes());
    routes.extend(results::routes());
    routes
}

/// Run an election operation on the blocking pool. Operations may rewrite and
/// fsync store files while holding the election lock, which must not happen
/// on an async worker thread.
async fn on_election<T, F>(election: &State<Arc<Election>>, op: F) -> Result<T>
where
    F: FnOnce(&Election) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let election = election.inner().clone();
    spawn_blocking(move || op(&election))
        .await
        .map_err(StorageError::from)?
}

pub fn catchers() -> Vec<Catcher> {
    catchers![malformed_body, unprocessable_body]
}

/// Request bodies that are not JSON at all.
#[catch(400)]
fn malformed_body() -> Error {
    Error::MissingFields("a well-formed JSON body")
}

/// JSON bodies whose fields have the wrong types.
#[catch(422)]
fn unprocessable_body() -> Error {
    Error::MissingFields("a well-formed JSON body")
}
