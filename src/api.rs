use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::admin::{AdminPublisher, AdminSession, AnnouncementForm, PriceForm, PushReceipt};
use crate::error::SyncError;
use crate::page::{PageHandle, PageView};
use crate::poller::{CheckRequester, CheckTrigger};

#[derive(Clone)]
pub struct AppState {
    pub page: PageHandle,
    pub publisher: Arc<AdminPublisher>,
    pub checks: CheckRequester,
    pub admin_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/page", get(page_view))
        .route("/check", post(manual_check))
        .route("/events/visibility", post(visibility_changed))
        .route("/events/online", post(came_online))
        .route("/admin/announcements", post(post_announcement))
        .route("/admin/prices", post(post_price))
        .route("/notifications/{id}/dismiss", post(dismiss_notification))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn page_view(State(state): State<AppState>) -> Json<PageView> {
    Json(state.page.view(Instant::now()))
}

#[derive(serde::Serialize)]
struct Queued {
    queued: bool,
}

fn queued(ok: bool) -> (StatusCode, Json<Queued>) {
    let status = if ok {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(Queued { queued: ok }))
}

async fn manual_check(State(state): State<AppState>) -> (StatusCode, Json<Queued>) {
    queued(state.checks.request(CheckTrigger::Manual))
}

#[derive(serde::Deserialize)]
struct VisibilityReq {
    hidden: bool,
}

async fn visibility_changed(
    State(state): State<AppState>,
    Json(body): Json<VisibilityReq>,
) -> (StatusCode, Json<Queued>) {
    if body.hidden {
        return (StatusCode::ACCEPTED, Json(Queued { queued: false }));
    }
    queued(state.checks.visibility_changed(false))
}

async fn came_online(State(state): State<AppState>) -> (StatusCode, Json<Queued>) {
    queued(state.checks.online())
}

/// `Authorization: Bearer <token>` matching the configured admin token grants
/// an admin session; `X-User-Name` names the author.
fn session_from(headers: &HeaderMap, admin_token: Option<&str>) -> AdminSession {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let is_admin = matches!((bearer, admin_token), (Some(b), Some(t)) if !t.is_empty() && b == t);
    let user_name = headers
        .get("x-user-name")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    AdminSession {
        is_admin,
        user_name,
    }
}

#[derive(serde::Serialize)]
struct PushResp {
    category: Option<String>,
    persisted: bool,
    blob_id: Option<String>,
    error: Option<String>,
}

fn push_response(res: Result<PushReceipt, SyncError>) -> (StatusCode, Json<PushResp>) {
    match res {
        Ok(r) => (
            StatusCode::OK,
            Json(PushResp {
                persisted: r.persisted(),
                category: Some(r.category),
                blob_id: r.blob_id,
                error: None,
            }),
        ),
        Err(e) => {
            let status = match e {
                SyncError::Unauthorized => StatusCode::UNAUTHORIZED,
                SyncError::InvalidForm(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::BAD_GATEWAY,
            };
            (
                status,
                Json(PushResp {
                    category: None,
                    persisted: false,
                    blob_id: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn post_announcement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<AnnouncementForm>,
) -> (StatusCode, Json<PushResp>) {
    let session = session_from(&headers, state.admin_token.as_deref());
    push_response(state.publisher.submit_announcement(&session, form).await)
}

async fn post_price(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<PriceForm>,
) -> (StatusCode, Json<PushResp>) {
    let session = session_from(&headers, state.admin_token.as_deref());
    push_response(state.publisher.submit_price(&session, form).await)
}

async fn dismiss_notification(State(state): State<AppState>, Path(id): Path<u64>) -> StatusCode {
    if state.page.dismiss(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
