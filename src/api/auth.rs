use std::sync::Arc;

use rocket::{serde::json::Json, Route, State};

use super::on_election;
use crate::{
    election::Election,
    error::Result,
    model::api::{AuthRequest, AuthResponse},
};

pub fn routes() -> Vec<Route> {
    routes![authenticate]
}

#[post("/authenticate", data = "<request>", format = "json")]
pub async fn authenticate(
    request: Json<AuthRequest>,
    election: &State<Arc<Election>>,
) -> Result<Json<AuthResponse>> {
    let AuthRequest { voter_id, otp } = request.into_inner();
    let token = on_election(election, move |election| {
        election.authenticate(
            voter_id.as_deref().unwrap_or_default(),
            otp.as_deref().unwrap_or_default(),
        )
    })
    .await?;
    Ok(Json(AuthResponse { token }))
}
