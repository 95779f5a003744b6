//! Thin HTTP mutation handlers.
//!
//! Each handler authenticates the bearer token, hands the request to the
//! core [`BoardService`], and maps the outcome onto a status code. All
//! ordering and permission logic lives in the core; by the time a response
//! leaves here the mutation is committed and its events are already on the
//! bus.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
};
use corkboard_core::CorkboardError;
use corkboard_core::hierarchy::{BoardService, ProjectPatch};
use corkboard_core::model::{Card, CardDraft, CardPatch, Identity, PermissionOverrides, Scope};
use corkboard_core::store::BoardRepo;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::identity::resolve_identity;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub repo: Arc<BoardRepo>,
    pub service: Arc<BoardService>,
}

/// Create API routes
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/cards", post(create_card))
        .route("/cards/{card_id}", patch(edit_card))
        .route("/cards/{card_id}/move", post(move_card))
        .route("/cards/{card_id}/archive", post(archive_card))
        .route("/boards", post(create_board))
        .route("/boards/{board_id}", patch(edit_board))
        .route("/boards/{board_id}/move", post(move_board))
        .route("/boards/{board_id}/archive", post(archive_board))
        .route("/boards/{board_id}/lanes", post(add_lane))
        .route("/boards/{board_id}/lanes/{lane_id}/move", post(move_lane))
        .route("/boards/{board_id}/lanes/{lane_id}/archive", post(archive_lane))
        .route("/boards/{board_id}/lanes/{lane_id}/cards", get(fetch_scope))
        .route("/projects", post(create_project))
        .route("/projects/{project_id}", patch(edit_project))
        .with_state(state)
}

// ===== Request/response bodies =====

#[derive(Debug, Deserialize)]
struct CreateCardRequest {
    board_id: String,
    lane_id: String,
    position: Option<usize>,
    #[serde(flatten)]
    draft: CardDraft,
}

#[derive(Debug, Deserialize)]
struct MoveCardRequest {
    /// Both present for a cross-scope move; absent for an in-scope reorder.
    board_id: Option<String>,
    lane_id: Option<String>,
    position: usize,
}

#[derive(Debug, Deserialize)]
struct CreateBoardRequest {
    project_id: String,
    title: String,
    #[serde(default)]
    lanes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EditBoardRequest {
    title: String,
}

#[derive(Debug, Deserialize)]
struct MoveBoardRequest {
    project_id: String,
    position: usize,
}

#[derive(Debug, Deserialize)]
struct AddLaneRequest {
    title: String,
}

#[derive(Debug, Deserialize)]
struct MoveLaneRequest {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    title: String,
    team_id: Option<String>,
    #[serde(default)]
    invite_only: bool,
}

#[derive(Debug, Deserialize)]
struct EditProjectRequest {
    title: Option<String>,
    invite_only: Option<bool>,
    member_ids: Option<Vec<String>>,
    permission_overrides: Option<PermissionOverrides>,
}

/// A scope fetch: the full live ordering plus the lane's rev stamp so the
/// client mirror can drop older broadcasts.
#[derive(Debug, Serialize)]
struct ScopeResponse {
    cards: Vec<Card>,
    rev: i64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

// ===== Handlers =====

async fn create_card(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateCardRequest>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let scope = Scope::new(req.board_id, req.lane_id);
    match state.service.create_card(&identity, &scope, req.position, req.draft) {
        Ok(card) => (StatusCode::CREATED, Json(card)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn edit_card(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(card_id): Path<String>,
    Json(patch): Json<CardPatch>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    match state.service.edit_card(&identity, &card_id, patch) {
        Ok(card) => Json(card).into_response(),
        Err(e) => error_response(e),
    }
}

async fn move_card(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(card_id): Path<String>,
    Json(req): Json<MoveCardRequest>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let new_scope = match (req.board_id, req.lane_id) {
        (Some(board_id), Some(lane_id)) => Some(Scope::new(board_id, lane_id)),
        _ => None,
    };
    match state
        .service
        .move_card(&identity, &card_id, new_scope, req.position)
    {
        Ok(card) => Json(card).into_response(),
        Err(e) => error_response(e),
    }
}

async fn archive_card(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(card_id): Path<String>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    match state.service.archive_card(&identity, &card_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn fetch_scope(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((board_id, lane_id)): Path<(String, String)>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let scope = Scope::new(board_id, lane_id.clone());
    let cards = match state.service.fetch_scope(&identity, &scope) {
        Ok(cards) => cards,
        Err(e) => return error_response(e),
    };
    let rev = match state.repo.lane(&lane_id) {
        Ok(Some(lane)) => lane.rev,
        Ok(None) => 0,
        Err(e) => return error_response(e),
    };
    Json(ScopeResponse { cards, rev }).into_response()
}

async fn create_board(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateBoardRequest>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let lane_titles: Vec<&str> = req.lanes.iter().map(String::as_str).collect();
    match state
        .service
        .create_board(&identity, &req.project_id, &req.title, &lane_titles)
    {
        Ok(board) => (StatusCode::CREATED, Json(board)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn edit_board(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(board_id): Path<String>,
    Json(req): Json<EditBoardRequest>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    match state.service.edit_board(&identity, &board_id, &req.title) {
        Ok(board) => Json(board).into_response(),
        Err(e) => error_response(e),
    }
}

async fn move_board(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(board_id): Path<String>,
    Json(req): Json<MoveBoardRequest>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    match state
        .service
        .move_board(&identity, &board_id, &req.project_id, req.position)
    {
        Ok(board) => Json(board).into_response(),
        Err(e) => error_response(e),
    }
}

async fn archive_board(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(board_id): Path<String>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    match state.service.archive_board(&identity, &board_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn add_lane(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(board_id): Path<String>,
    Json(req): Json<AddLaneRequest>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    match state.service.add_lane(&identity, &board_id, &req.title) {
        Ok(lane) => (StatusCode::CREATED, Json(lane)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn move_lane(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((board_id, lane_id)): Path<(String, String)>,
    Json(req): Json<MoveLaneRequest>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    match state
        .service
        .move_lane(&identity, &board_id, &lane_id, req.index)
    {
        Ok(board) => Json(board).into_response(),
        Err(e) => error_response(e),
    }
}

async fn archive_lane(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((board_id, lane_id)): Path<(String, String)>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    match state.service.archive_lane(&identity, &board_id, &lane_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn create_project(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateProjectRequest>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    match state.service.create_project(
        &identity,
        &req.title,
        req.team_id.as_deref(),
        req.invite_only,
    ) {
        Ok(project) => (StatusCode::CREATED, Json(project)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn edit_project(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(req): Json<EditProjectRequest>,
) -> Response {
    let identity = match require_identity(&state, &headers) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let patch = ProjectPatch {
        title: req.title,
        invite_only: req.invite_only,
        member_ids: req.member_ids,
        permission_overrides: req.permission_overrides,
    };
    match state.service.edit_project(&identity, &project_id, patch) {
        Ok(project) => Json(project).into_response(),
        Err(e) => error_response(e),
    }
}

// ===== Helpers =====

/// Resolve the bearer token to an identity or produce the 401 response.
fn require_identity(state: &ApiState, headers: &HeaderMap) -> Result<Identity, Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return Err(StatusCode::UNAUTHORIZED.into_response());
    };
    match resolve_identity(&state.repo, token) {
        Ok(Some(identity)) => Ok(identity),
        Ok(None) => Err(StatusCode::UNAUTHORIZED.into_response()),
        Err(e) => {
            error!("identity resolution failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// Map a core error onto the response taxonomy: denied, missing, invalid,
/// or a logged 500.
fn error_response(err: CorkboardError) -> Response {
    let status = if err.is_denied() {
        StatusCode::FORBIDDEN
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_validation() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        error!("mutation failed: {}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use corkboard_core::model::BoardAction;

    #[test]
    fn errors_map_to_expected_statuses() {
        let denied = CorkboardError::Denied {
            project_id: "p1".into(),
            action: BoardAction::MoveCard,
        };
        assert_eq!(error_response(denied).status(), StatusCode::FORBIDDEN);

        let missing = CorkboardError::NotFound {
            kind: "card",
            id: "x".into(),
        };
        assert_eq!(error_response(missing).status(), StatusCode::NOT_FOUND);

        let invalid = CorkboardError::InvalidPosition { given: 9, len: 2 };
        assert_eq!(
            error_response(invalid).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
