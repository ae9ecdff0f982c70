//! HTTP JSON API over a [`Session`]
//!
//! Every mutating endpoint answers with the fresh view plus the notices
//! queued while it ran, so a front end can render from a single response.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::{RemoteError, RepoError};
use crate::filter::FilterChange;
use crate::models::{Priority, Tag, TaskDetail, TaskDetailInput};
use crate::notice::Notice;
use crate::session::{Session, Snapshot};

/// Application state shared across handlers
pub struct AppState {
    pub session: Arc<Session>,
}

impl AppState {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new(Self { session })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/view", get(view))
        .route("/api/v1/notices", get(notices))
        .route("/api/v1/reload", post(reload))
        .route("/api/v1/tasks", post(add_task))
        .route("/api/v1/tasks/{id}", patch(update_task).delete(delete_task))
        .route("/api/v1/tasks/{id}/toggle", post(toggle_task))
        .route(
            "/api/v1/tasks/{id}/details",
            get(get_details).put(save_details),
        )
        .route("/api/v1/tags", get(list_tags).post(add_tag))
        .route("/api/v1/tags/{id}", patch(rename_tag).delete(delete_tag))
        .route("/api/v1/filter", post(update_filter))
        .route("/api/v1/auth/sign-in", post(sign_in))
        .route("/api/v1/auth/sign-up", post(sign_up))
        .route("/api/v1/auth/sign-out", post(sign_out))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Rendered view plus the notices drained with it
#[derive(Debug, Serialize)]
pub struct ViewResponse {
    #[serde(flatten)]
    pub view: Snapshot,
    pub notices: Vec<Notice>,
}

impl ViewResponse {
    fn of(session: &Session) -> Json<Self> {
        Json(Self {
            view: session.snapshot(),
            notices: session.take_notices(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct NewTaskBody {
    pub content: String,
    #[serde(default)]
    pub tag_id: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskUpdateBody {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Deserialize)]
pub struct TagBody {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SignInBody {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignUpBody {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize)]
pub struct DetailResponse {
    pub detail: Option<TaskDetail>,
}

type ApiResult<T> = Result<T, ApiError>;

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "taskpad",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn view(State(state): State<Arc<AppState>>) -> Json<ViewResponse> {
    ViewResponse::of(&state.session)
}

async fn notices(State(state): State<Arc<AppState>>) -> Json<Vec<Notice>> {
    Json(state.session.take_notices())
}

async fn reload(State(state): State<Arc<AppState>>) -> Json<ViewResponse> {
    state.session.reload().await;
    ViewResponse::of(&state.session)
}

async fn add_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewTaskBody>,
) -> ApiResult<(StatusCode, Json<ViewResponse>)> {
    state
        .session
        .add_task(&body.content, body.tag_id, body.priority)
        .await?;
    Ok((StatusCode::CREATED, ViewResponse::of(&state.session)))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TaskUpdateBody>,
) -> ApiResult<Json<ViewResponse>> {
    if let Some(content) = &body.content {
        state.session.set_task_content(&id, content).await?;
    }
    if let Some(priority) = body.priority {
        state.session.set_task_priority(&id, priority).await?;
    }
    Ok(ViewResponse::of(&state.session))
}

async fn toggle_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ViewResponse>> {
    state.session.toggle_task(&id).await?;
    Ok(ViewResponse::of(&state.session))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ViewResponse>> {
    state.session.remove_task(&id).await?;
    Ok(ViewResponse::of(&state.session))
}

async fn get_details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DetailResponse>> {
    let detail = state.session.task_detail(&id).await?;
    Ok(Json(DetailResponse { detail }))
}

async fn save_details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<TaskDetailInput>,
) -> ApiResult<Json<DetailResponse>> {
    let detail = state.session.save_task_detail(&id, input).await?;
    Ok(Json(DetailResponse {
        detail: Some(detail),
    }))
}

async fn list_tags(State(state): State<Arc<AppState>>) -> Json<Vec<Tag>> {
    Json(state.session.tags())
}

async fn add_tag(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TagBody>,
) -> ApiResult<(StatusCode, Json<ViewResponse>)> {
    state.session.add_tag(&body.name).await?;
    Ok((StatusCode::CREATED, ViewResponse::of(&state.session)))
}

async fn rename_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TagBody>,
) -> ApiResult<Json<ViewResponse>> {
    state.session.rename_tag(&id, &body.name).await?;
    Ok(ViewResponse::of(&state.session))
}

async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ViewResponse>> {
    state.session.remove_tag(&id).await?;
    Ok(ViewResponse::of(&state.session))
}

async fn update_filter(
    State(state): State<Arc<AppState>>,
    Json(change): Json<FilterChange>,
) -> Json<ViewResponse> {
    let filter = state.session.update_filter(change);
    tracing::debug!(?filter, "Filter updated");
    ViewResponse::of(&state.session)
}

async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SignInBody>,
) -> ApiResult<Json<ViewResponse>> {
    let identity = state.session.sign_in(&body.email, &body.password).await?;
    tracing::debug!(user_id = %identity.id(), "Session switched");
    Ok(ViewResponse::of(&state.session))
}

async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SignUpBody>,
) -> ApiResult<Json<ViewResponse>> {
    state
        .session
        .sign_up(&body.email, &body.password, &body.confirm_password)
        .await?;
    Ok(ViewResponse::of(&state.session))
}

async fn sign_out(State(state): State<Arc<AppState>>) -> ApiResult<Json<ViewResponse>> {
    state.session.sign_out().await?;
    Ok(ViewResponse::of(&state.session))
}

/// API error type
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        let status = match &err {
            RepoError::Validation(_) => StatusCode::BAD_REQUEST,
            RepoError::TaskNotFound(_)
            | RepoError::TagNotFound(_)
            | RepoError::Remote(RemoteError::NotFound) => StatusCode::NOT_FOUND,
            RepoError::Remote(RemoteError::AlreadyRegistered)
            | RepoError::DetailsUnavailable
            | RepoError::IdentityChanged => StatusCode::CONFLICT,
            RepoError::Remote(RemoteError::InvalidCredentials | RemoteError::NotSignedIn) => {
                StatusCode::UNAUTHORIZED
            }
            RepoError::Remote(RemoteError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "API error");
        } else {
            tracing::debug!(status = %self.status, error = %self.message, "Request rejected");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn errors_map_to_statuses() {
        let cases = [
            (
                RepoError::from(ValidationError::EmptyContent),
                StatusCode::BAD_REQUEST,
            ),
            (RepoError::TaskNotFound("x".into()), StatusCode::NOT_FOUND),
            (
                RepoError::from(RemoteError::AlreadyRegistered),
                StatusCode::CONFLICT,
            ),
            (
                RepoError::from(RemoteError::InvalidCredentials),
                StatusCode::UNAUTHORIZED,
            ),
            (
                RepoError::from(RemoteError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                RepoError::from(RemoteError::Hash("bad".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }
}
