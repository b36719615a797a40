//! Common test utilities.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use http_body_util::BodyExt;
use server::{
    app,
    config::Config,
    ledger::MemoryLedger,
    models::SessionId,
    state::State,
    tally::MemoryTally,
};

pub const POLL: &str = "5f0c7a52-7a1e-4c8f-9a64-1d2f3b4c5d6e";
pub const OPTION_A: &str = "0b6f1f7e-1111-4a5b-8c9d-aaaaaaaaaaaa";
pub const OPTION_B: &str = "0b6f1f7e-2222-4a5b-8c9d-bbbbbbbbbbbb";

/// Create a test `State` on the in-memory stores.
pub fn test_state() -> Arc<State> {
    let config = Config {
        session_secret: "test-secret".to_string(),
        ..Config::default()
    };

    State::with_stores(
        config,
        Arc::new(MemoryLedger::new()),
        Arc::new(MemoryTally::new()),
    )
}

/// Create a test app with empty state.
pub fn test_app() -> (Router, Arc<State>) {
    let state = test_state();
    (app(state.clone()), state)
}

pub fn vote_request(option: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::post(format!("/polls/{POLL}/votes"))
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }

    builder
        .body(Body::from(format!(r#"{{"pollOptionId": "{option}"}}"#)))
        .unwrap()
}

/// The `name=value` part of the response's `Set-Cookie`, ready to send back.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(ToString::to_string)
}

pub fn signed_cookie(state: &State, session_id: SessionId) -> String {
    format!("sessionId={}", state.signer.sign(session_id))
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}
