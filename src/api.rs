// src/api.rs
//! HTTP surface for feedback, ratings, interest flags and profile inspection.
//!
//! - `POST /feedback` → 200 `{"outcome":"accepted"|"duplicate"}` or 404 `{"outcome":"not_found"}`
//! - `POST /ratings`  → 200 `{"outcome":"recorded"|"replaced"}` or 404
//! - `POST /interests` → 200 `{"outcome":"flagged"|"replaced", "flag": {..}}` or 404
//! - `GET  /profile`  → gated, decayed profile view
//! - `GET  /resolve/{reference}` → hash id for `yesterday-3` style references
//! - `GET  /health`
//!
//! Malformed payloads are rejected with 422. Store access blocks on file
//! locks, so handlers run it on the blocking pool.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::config::CurationSettings;
use crate::error::CuratorError;
use crate::feedback::{
    FeedbackEvent, FeedbackOutcome, FeedbackRecorder, FlagOutcome, RatingOutcome, RawFeedback,
};
use crate::ledger::HistoryLedger;
use crate::profile::interests::InterestPriority;
use crate::profile::ratings::RawRating;
use crate::profile::LearnedProfile;
use crate::store::{self, keys, StateStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub settings: Arc<CurationSettings>,
    pub recorder: Arc<FeedbackRecorder>,
}

impl AppState {
    pub fn new(store: Arc<dyn StateStore>, settings: Arc<CurationSettings>) -> Self {
        let recorder = Arc::new(FeedbackRecorder::new(store.clone(), settings.clone()));
        Self {
            store,
            settings,
            recorder,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/feedback", post(post_feedback))
        .route("/ratings", post(post_rating))
        .route("/interests", post(post_interest))
        .route("/profile", get(get_profile))
        .route("/resolve/{reference}", get(get_resolve))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn error_response(e: CuratorError) -> Response {
    match e {
        CuratorError::InvalidEvent(msg) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": msg })),
        )
            .into_response(),
        CuratorError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "outcome": "not_found", "hash_id": id })),
        )
            .into_response(),
        other => {
            error!(error = %other, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T, CuratorError>
where
    F: FnOnce() -> Result<T, CuratorError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CuratorError::Io(std::io::Error::other(e)))?
}

#[derive(Debug, Deserialize)]
struct InterestRequest {
    reference: String,
    priority: String,
    #[serde(default)]
    note: Option<String>,
}

async fn post_feedback(State(state): State<AppState>, Json(raw): Json<RawFeedback>) -> Response {
    let event = match FeedbackEvent::try_from(raw) {
        Ok(ev) => ev,
        Err(e) => return error_response(e),
    };
    let recorder = state.recorder.clone();
    let event_id = event.event_id.clone();
    match blocking(move || recorder.record(&event, Utc::now())).await {
        Ok(outcome) => {
            let status = match outcome {
                FeedbackOutcome::NotFound => StatusCode::NOT_FOUND,
                _ => StatusCode::OK,
            };
            (
                status,
                Json(json!({ "outcome": outcome, "event_id": event_id })),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn post_rating(State(state): State<AppState>, Json(raw): Json<RawRating>) -> Response {
    let recorder = state.recorder.clone();
    match blocking(move || recorder.record_rating(raw, Utc::now())).await {
        Ok(outcome) => {
            let status = match outcome {
                RatingOutcome::NotFound => StatusCode::NOT_FOUND,
                _ => StatusCode::OK,
            };
            (status, Json(json!({ "outcome": outcome }))).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn post_interest(State(state): State<AppState>, Json(req): Json<InterestRequest>) -> Response {
    let priority: InterestPriority = match req.priority.parse() {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let recorder = state.recorder.clone();
    let reference = req.reference.clone();
    let res = blocking(move || {
        recorder.flag_interest(&req.reference, priority, req.note, Utc::now())
    })
    .await;
    match res {
        Ok(FlagOutcome::NotFound) => error_response(CuratorError::NotFound(reference)),
        Ok(outcome) => Json(json!({
            "outcome": outcome.as_str(),
            "hash_id": outcome.flagged().map(|f| f.hash_id.clone()),
            "flag": outcome.flagged().map(|f| &f.flag),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_profile(State(state): State<AppState>) -> Response {
    let store = state.store.clone();
    let loaded = blocking(move || {
        Ok(store::load_or_default::<LearnedProfile>(store.as_ref(), keys::PROFILE))
    })
    .await;
    let (profile, version) = match loaded {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let view = profile.view(&state.settings, Utc::now());
    Json(json!({
        "domain": state.settings.active_domain,
        "version": version,
        "view": view,
    }))
    .into_response()
}

async fn get_resolve(State(state): State<AppState>, Path(reference): Path<String>) -> Response {
    let store = state.store.clone();
    let loaded = blocking(move || {
        Ok(store::load_or_default::<HistoryLedger>(store.as_ref(), keys::LEDGER).0)
    })
    .await;
    let ledger = match loaded {
        Ok(l) => l,
        Err(e) => return error_response(e),
    };
    match ledger.resolve_reference(&reference, Utc::now().date_naive()) {
        Some(hash_id) => Json(json!({ "reference": reference, "hash_id": hash_id })).into_response(),
        None => error_response(CuratorError::NotFound(reference)),
    }
}
