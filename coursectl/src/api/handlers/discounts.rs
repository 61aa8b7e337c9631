//! HTTP handlers for discount code administration and price previews.

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;

use crate::{
    AppState,
    api::models::{
        discounts::{DiscountCodeCreate, DiscountCodeResponse, DiscountValidateRequest, DiscountValidateResponse},
        users::CurrentUser,
    },
    db::{
        errors::DbError,
        handlers::{Courses, DiscountCodes},
        models::discounts::DiscountCodeCreateDBRequest,
    },
    discounts::check_code,
    errors::{Error, Result},
    pricing::compute_price,
};

/// Create a discount code
#[utoipa::path(
    post,
    path = "/api/v1/discounts",
    tag = "discounts",
    summary = "Create a discount code",
    description = "Create a new discount code. Codes are stored upper-cased and must be unique (Admin role required).",
    request_body = DiscountCodeCreate,
    responses(
        (status = 201, description = "Discount code created", body = DiscountCodeResponse),
        (status = 400, description = "Invalid discount definition", body = crate::errors::ErrorBody),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - requires Admin role"),
        (status = 409, description = "A code with this name already exists"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_discount_code(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(data): Json<DiscountCodeCreate>,
) -> Result<(StatusCode, Json<DiscountCodeResponse>)> {
    if !current_user.is_admin() {
        return Err(Error::Forbidden {
            message: "Only administrators can create discount codes".to_string(),
        });
    }

    let request = DiscountCodeCreateDBRequest::try_from(data)?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let code = DiscountCodes::new(&mut pool_conn).create(&request).await.map_err(|e| match e {
        DbError::UniqueViolation { .. } => Error::Conflict {
            message: format!("Discount code {} already exists", request.code.to_uppercase()),
        },
        other => other.into(),
    })?;

    tracing::info!(code = %code.code, created_by = %current_user.id, "Created discount code");

    Ok((StatusCode::CREATED, Json(DiscountCodeResponse::from(code))))
}

/// Preview a discount code against a course
#[utoipa::path(
    post,
    path = "/api/v1/discounts/validate",
    tag = "discounts",
    summary = "Validate a discount code",
    description = "Checks whether the caller could use the code on the course and returns the resulting price. \
                   Nothing is reserved or recorded.",
    request_body = DiscountValidateRequest,
    responses(
        (status = 200, description = "Code is valid", body = DiscountValidateResponse),
        (status = 400, description = "Code rejected; `reason` says why", body = crate::errors::ErrorBody),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Course not found"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn validate_discount_code(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(data): Json<DiscountValidateRequest>,
) -> Result<Json<DiscountValidateResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let course = Courses::new(&mut pool_conn)
        .get(data.course_id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Course".to_string(),
            id: data.course_id.to_string(),
        })?;

    if course.is_free() {
        return Err(Error::BadRequest {
            message: "Discount codes do not apply to free courses".to_string(),
        });
    }

    let code = check_code(&mut pool_conn, &data.code, &course, current_user.id, Utc::now()).await?;
    let price = compute_price(course.price, Some(&code));

    Ok(Json(DiscountValidateResponse::new(&code, price)))
}
