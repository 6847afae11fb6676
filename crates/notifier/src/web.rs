use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::db::Db;
use crate::notifier::{Notifier, PreferenceError, PreferenceUpdate};
use crate::preference::UserId;
use crate::state::SharedState;

const STATUS_EVENTS_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub db: Db,
    pub notifier: Arc<Notifier>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/status-events", get(api_status_events))
        .route("/api/coverage", get(api_coverage))
        .route(
            "/api/preferences/{owner_id}",
            get(get_preference).put(put_preference),
        )
        .with_state(state)
}

fn error_reply(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn internal_error() -> Response {
    error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        "an error occurred, please try again later",
    )
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

async fn api_status_events(State(state): State<AppState>) -> Response {
    match state.db.recent_status_events(STATUS_EVENTS_LIMIT).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => {
            error!("status events query failed: {e:#}");
            internal_error()
        }
    }
}

async fn api_coverage(State(state): State<AppState>) -> Response {
    match state.notifier.coverage_report().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!("coverage report failed: {e:#}");
            state
                .shared
                .write()
                .await
                .record_error(format!("coverage report failed: {e:#}"));
            internal_error()
        }
    }
}

async fn get_preference(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> Response {
    let Ok(owner) = owner_id.parse::<UserId>() else {
        return error_reply(StatusCode::BAD_REQUEST, "owner_id must be a numeric id");
    };
    match state.db.get_preference(&owner.to_string()).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error_reply(StatusCode::NOT_FOUND, "no preferences saved"),
        Err(e) => {
            error!(user = %owner, "get_preference failed: {e:#}");
            internal_error()
        }
    }
}

async fn put_preference(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Json(update): Json<PreferenceUpdate>,
) -> Response {
    let Ok(owner) = owner_id.parse::<UserId>() else {
        return error_reply(StatusCode::BAD_REQUEST, "owner_id must be a numeric id");
    };
    match state.notifier.update_preference(owner, update).await {
        Ok(record) => Json(record).into_response(),
        Err(PreferenceError::InvalidTimeFormat(e)) => {
            error_reply(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(PreferenceError::Store(e)) => {
            error!(user = %owner, "failed to save preferences: {e:#}");
            state
                .shared
                .write()
                .await
                .record_error(format!("failed to save preferences for {owner}"));
            internal_error()
        }
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::PreferenceRecord;
    use crate::notifier::Settings;
    use crate::platform::RecordingPlatform;
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use time::macros::datetime;
    use time::UtcOffset;
    use tower::ServiceExt;

    async fn test_app() -> (Router, AppState, Arc<RecordingPlatform>) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let shared = SystemState::shared();
        let platform = Arc::new(RecordingPlatform::with_holders(&[7]));
        let notifier = Notifier::new(
            db.clone(),
            Arc::clone(&shared),
            Arc::new(ManualClock::new(datetime!(2025-06-01 12:00 UTC))),
            platform.clone(),
            Settings {
                message_channel_id: "1200".into(),
                role_id: "1400".into(),
                lead_time: Duration::from_secs(30),
                utc_offset: UtcOffset::UTC,
            },
        );
        let state = AppState {
            shared,
            db,
            notifier: Arc::new(notifier),
        };
        (router(state.clone()), state, platform)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn put_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn status_reports_idle_scheduler() {
        let (app, _, _) = test_app().await;
        let resp = app.oneshot(get("/api/status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["phase"], "idle");
        assert!(json["events"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_then_get_preference() {
        let (app, _, _) = test_app().await;
        let resp = app
            .clone()
            .oneshot(put_json(
                "/api/preferences/42",
                json!({ "enabled": true, "start_time": "22:00", "end_time": "02:00" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.oneshot(get("/api/preferences/42")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["owner_id"], "42");
        assert_eq!(json["start_time"], "22:00");
        assert_eq!(json["enabled"], true);
    }

    #[tokio::test]
    async fn invalid_time_is_bad_request() {
        let (app, state, _) = test_app().await;
        let resp = app
            .oneshot(put_json(
                "/api/preferences/42",
                json!({ "enabled": true, "start_time": "7h", "end_time": "08:00" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("HH:MM"));
        assert!(state.db.get_preference("42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_numeric_owner_is_bad_request() {
        let (app, _, _) = test_app().await;
        let resp = app.oneshot(get("/api/preferences/alice")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_preference_is_not_found() {
        let (app, _, _) = test_app().await;
        let resp = app.oneshot(get("/api/preferences/404")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn disabling_over_http_removes_role() {
        let (app, _, platform) = test_app().await;
        let resp = app
            .oneshot(put_json(
                "/api/preferences/7",
                json!({ "enabled": false, "start_time": "09:00", "end_time": "17:00" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(platform.holders().is_empty());
    }

    #[tokio::test]
    async fn failing_role_removal_is_internal_error() {
        let (app, _, platform) = test_app().await;
        platform.fail_users.lock().unwrap().insert(UserId(7));
        let resp = app
            .oneshot(put_json(
                "/api/preferences/7",
                json!({ "enabled": false, "start_time": "09:00", "end_time": "17:00" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn coverage_lists_gaps() {
        let (app, state, _) = test_app().await;
        for (owner, start, end) in [("1", "09:00", "17:00"), ("2", "18:00", "22:00")] {
            state
                .db
                .upsert_preference(&PreferenceRecord {
                    owner_id: owner.into(),
                    enabled: true,
                    start_time: start.into(),
                    end_time: end.into(),
                })
                .await
                .unwrap();
        }

        let resp = app.oneshot(get("/api/coverage")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["total"], 2);
        assert_eq!(json["enabled"], 2);
        assert_eq!(json["full_coverage"], false);
        let gaps = json["gaps"].as_array().unwrap();
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0]["start"], "17:01");
        assert_eq!(gaps[0]["end"], "18:00");
        assert_eq!(gaps[1]["start"], "22:01");
        assert_eq!(gaps[1]["end"], "09:00");
    }

    #[tokio::test]
    async fn status_events_listed() {
        let (app, state, _) = test_app().await;
        state.notifier.handle_status(Some("dormant")).await;

        let resp = app.oneshot(get("/api/status-events")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json[0]["outcome"], "not-growing");
    }
}
