use std::sync::Arc;

use rocket::{
    response::stream::{Event, EventStream},
    serde::json::Json,
    tokio::{select, sync::broadcast::error::RecvError},
    Route, Shutdown, State,
};

use super::on_election;
use crate::{
    election::{Election, Subscription},
    error::Result,
    model::{api::UPDATE_EVENT, tally::TallySnapshot},
};

pub fn routes() -> Vec<Route> {
    routes![results, results_stream, candidates]
}

#[get("/results")]
async fn results(election: &State<Arc<Election>>) -> Result<Json<TallySnapshot>> {
    let results = on_election(election, |election| election.results()).await?;
    Ok(Json(results))
}

/// Live tally as server-sent events: the current tally straight away, then a
/// fresh one after every accepted vote.
#[get("/results/stream")]
async fn results_stream(
    election: &State<Arc<Election>>,
    mut shutdown: Shutdown,
) -> Result<EventStream![]> {
    let Subscription {
        initial,
        mut updates,
    } = on_election(election, |election| election.subscribe()).await?;
    debug!("Live observer connected");

    Ok(EventStream! {
        yield Event::json(&initial).event(UPDATE_EVENT);
        loop {
            let snapshot = select! {
                update = updates.recv() => match update {
                    Ok(snapshot) => snapshot,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Live observer fell behind, skipped {skipped} snapshots");
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };
            yield Event::json(&snapshot).event(UPDATE_EVENT);
        }
        debug!("Live observer disconnected");
    })
}

#[get("/candidates")]
async fn candidates(election: &State<Arc<Election>>) -> Json<Vec<String>> {
    Json(
        election
            .candidates()
            .iter()
            .map(|c| c.to_string())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::{serde_json, serde_json::json, Value},
        tokio::io::AsyncReadExt,
    };

    use super::*;
    use crate::model::api::{AuthRequest, AuthResponse, VoteRequest};

    /// Read one server-sent event and return its JSON data.
    async fn next_event(response: &mut LocalResponse<'_>) -> Value {
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        while !raw.windows(2).any(|w| w == b"\n\n") {
            let n = response.read(&mut buf).await.unwrap();
            assert_ne!(n, 0, "event stream ended early");
            raw.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8(raw).unwrap();
        assert!(text.contains(UPDATE_EVENT));
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data:"))
            .unwrap();
        serde_json::from_str(data.trim()).unwrap()
    }

    async fn authenticate_and_vote(client: &Client, voter_id: &str, candidate: &str) {
        let token = client
            .post("/authenticate")
            .header(ContentType::JSON)
            .body(json!(AuthRequest::example(voter_id)).to_string())
            .dispatch()
            .await
            .into_json::<AuthResponse>()
            .await
            .unwrap()
            .token;
        let response = client
            .post("/vote")
            .header(ContentType::JSON)
            .body(json!(VoteRequest::example(token.as_str(), candidate)).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test]
    async fn empty_results(client: Client) {
        let response = client.get(uri!(results)).dispatch().await;

        assert_eq!(Status::Ok, response.status());
        assert_eq!(
            response.into_json::<Value>().await.unwrap(),
            json!({"Rep A": 0, "Rep B": 0, "Rep C": 0})
        );
    }

    #[backend_test]
    async fn candidates_in_configured_order(client: Client) {
        let response = client.get(uri!(candidates)).dispatch().await;

        assert_eq!(
            response.into_json::<Vec<String>>().await.unwrap(),
            vec!["Rep A", "Rep B", "Rep C"]
        );
    }

    #[backend_test]
    async fn stream_starts_with_current_tally(client: Client) {
        authenticate_and_vote(&client, "v1", "Rep B").await;

        let mut response = client.get(uri!(results_stream)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(
            next_event(&mut response).await,
            json!({"Rep A": 0, "Rep B": 1, "Rep C": 0})
        );
    }

    #[backend_test]
    async fn stream_pushes_accepted_votes(client: Client) {
        let mut first = client.get(uri!(results_stream)).dispatch().await;
        let mut second = client.get(uri!(results_stream)).dispatch().await;
        next_event(&mut first).await;
        next_event(&mut second).await;

        authenticate_and_vote(&client, "v1", "Rep A").await;

        let expected = json!({"Rep A": 1, "Rep B": 0, "Rep C": 0});
        assert_eq!(next_event(&mut first).await, expected);
        assert_eq!(next_event(&mut second).await, expected);

        authenticate_and_vote(&client, "v2", "Rep C").await;
        assert_eq!(
            next_event(&mut first).await,
            json!({"Rep A": 1, "Rep B": 0, "Rep C": 1})
        );
    }

    #[backend_test]
    async fn closed_stream_does_not_affect_voting(client: Client) {
        let mut observer = client.get(uri!(results_stream)).dispatch().await;
        next_event(&mut observer).await;
        drop(observer);

        authenticate_and_vote(&client, "v1", "Rep A").await;
        let election = client.rocket().state::<Arc<Election>>().unwrap();
        assert_eq!(election.results().unwrap().count("Rep A"), Some(1));
    }
}
