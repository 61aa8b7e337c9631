//! HTTP handlers for the caller's enrollments.

use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::{enrollments::EnrollmentResponse, users::CurrentUser},
    db::handlers::Enrollments,
    errors::{Error, Result},
};

/// List the caller's enrollments
#[utoipa::path(
    get,
    path = "/api/v1/enrollments",
    tag = "enrollments",
    summary = "List my enrollments",
    description = "List the courses the caller is enrolled in, newest first.",
    responses(
        (status = 200, description = "Enrollments", body = [EnrollmentResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_my_enrollments(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<Vec<EnrollmentResponse>>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let enrollments = Enrollments::new(&mut pool_conn).list_for_user(current_user.id).await?;

    Ok(Json(enrollments.into_iter().map(EnrollmentResponse::from).collect()))
}
