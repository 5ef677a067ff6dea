use std::sync::Arc;

use rocket::{serde::json::Json, Route, State};

use super::on_election;
use crate::{
    election::Election,
    error::Result,
    model::api::{VoteRequest, VoteResponse},
};

pub fn routes() -> Vec<Route> {
    routes![cast_vote]
}

#[post("/vote", data = "<request>", format = "json")]
async fn cast_vote(
    request: Json<VoteRequest>,
    election: &State<Arc<Election>>,
) -> Result<Json<VoteResponse>> {
    let VoteRequest { token, vote } = request.into_inner();
    on_election(election, move |election| {
        election.cast_vote(
            token.as_deref().unwrap_or_default(),
            vote.as_deref().unwrap_or_default(),
        )
    })
    .await?;
    Ok(Json(VoteResponse {
        message: "Vote submitted successfully".to_string(),
    }))
}
