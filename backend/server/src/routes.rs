use std::{sync::Arc, time::Duration};

use axum::{
    Json,
    extract::{self, Path, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info};

use crate::{
    error::{AppError, VoteError},
    models::{PollId, PollOptionId, Standing},
    state::State,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteBody {
    poll_option_id: PollOptionId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub poll_id: PollId,
    pub standings: Vec<Standing>,
}

fn parse_poll_id(raw: &str) -> Result<PollId, AppError> {
    raw.parse().map_err(|_| AppError::MalformedPayload)
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn votes_handler(
    extract::State(state): extract::State<Arc<State>>,
    Path(poll_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<VoteBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let poll_id = parse_poll_id(&poll_id)?;
    let Json(body) = body.map_err(|_| AppError::MalformedPayload)?;
    let session_id = state.signer.read_headers(&headers);

    #[cfg(feature = "verbose")]
    info!("Vote on {poll_id} for {} from {session_id:?}", body.poll_option_id);

    let changed = state
        .coordinator
        .cast_vote(session_id, poll_id, body.poll_option_id)
        .await
        .inspect_err(|err| {
            if let VoteError::StoreUnavailable(source) = err {
                error!("Vote on poll {poll_id} failed: {source}");
            }
        })?;

    let response = match changed.new_session_id {
        Some(session_id) => {
            let cookie = state
                .signer
                .cookie(session_id, state.config.session_max_age_secs);

            (StatusCode::CREATED, [(SET_COOKIE, cookie)]).into_response()
        }
        None => StatusCode::CREATED.into_response(),
    };

    Ok(response)
}

pub async fn results_handler(
    extract::State(state): extract::State<Arc<State>>,
    Path(poll_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let poll_id = parse_poll_id(&poll_id)?;
    info!("New results subscriber on poll {poll_id}");

    let stream = state
        .coordinator
        .subscribe(poll_id)
        .map(|change| Event::default().event("vote").json_data(change));

    let keep_alive = KeepAlive::new().interval(Duration::from_secs(state.config.keep_alive_secs));

    Ok(Sse::new(stream).keep_alive(keep_alive))
}

pub async fn standings_handler(
    extract::State(state): extract::State<Arc<State>>,
    Path(poll_id): Path<String>,
) -> Result<Json<PollResults>, AppError> {
    let poll_id = parse_poll_id(&poll_id)?;
    let standings = state.coordinator.standings(poll_id).await?;

    Ok(Json(PollResults { poll_id, standings }))
}

pub async fn recount_handler(
    extract::State(state): extract::State<Arc<State>>,
    Path(poll_id): Path<String>,
) -> Result<Json<PollResults>, AppError> {
    let poll_id = parse_poll_id(&poll_id)?;
    let standings = state.coordinator.recount(poll_id).await?;

    Ok(Json(PollResults { poll_id, standings }))
}
