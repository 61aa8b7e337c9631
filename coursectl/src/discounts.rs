//! Discount code validation.
//!
//! [`validate`] is a pure rule chain over an already-loaded code; [`check_code`] loads the code and
//! the caller's prior and in-flight redemptions and runs it. Usage itself is recorded by
//! [`DiscountCodes::record_usage`] once a payment is confirmed.

use crate::{
    db::{
        handlers::DiscountCodes,
        models::{
            courses::CourseDBResponse,
            discounts::{DiscountCodeDBResponse, DiscountScope},
        },
    },
    errors::{Error, Result},
    types::UserId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgConnection;
use utoipa::ToSchema;

/// Why a discount code cannot be applied to a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountRejection {
    InvalidCode,
    Expired,
    NotYetActive,
    Exhausted,
    PerUserLimit,
    BelowMinimum,
    NotApplicable,
}

impl DiscountRejection {
    pub fn describe(&self) -> &'static str {
        match self {
            DiscountRejection::InvalidCode => "Discount code is invalid",
            DiscountRejection::Expired => "Discount code has expired",
            DiscountRejection::NotYetActive => "Discount code is not active yet",
            DiscountRejection::Exhausted => "Discount code has reached its usage limit",
            DiscountRejection::PerUserLimit => "You have already used this discount code",
            DiscountRejection::BelowMinimum => "Purchase amount is below the minimum for this discount code",
            DiscountRejection::NotApplicable => "Discount code does not apply to this course",
        }
    }
}

impl std::fmt::Display for DiscountRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Apply the validation rules in order; the first failing rule wins.
pub fn validate<'a>(
    code: Option<&'a DiscountCodeDBResponse>,
    course: &CourseDBResponse,
    prior_usages: i64,
    now: DateTime<Utc>,
) -> std::result::Result<&'a DiscountCodeDBResponse, DiscountRejection> {
    let code = match code {
        Some(code) if code.is_active => code,
        _ => return Err(DiscountRejection::InvalidCode),
    };

    if code.expires_at.is_some_and(|expires_at| now > expires_at) {
        return Err(DiscountRejection::Expired);
    }

    if code.starts_at.is_some_and(|starts_at| now < starts_at) {
        return Err(DiscountRejection::NotYetActive);
    }

    if code.max_uses.is_some_and(|max| code.used_count >= max) {
        return Err(DiscountRejection::Exhausted);
    }

    if code.max_uses_per_user.is_some_and(|max| prior_usages >= i64::from(max)) {
        return Err(DiscountRejection::PerUserLimit);
    }

    if code.min_purchase_amount.is_some_and(|min| course.price < min) {
        return Err(DiscountRejection::BelowMinimum);
    }

    match code.applicable_to_type {
        DiscountScope::All => {}
        DiscountScope::Course if code.applicable_to_id != Some(course.id) => {
            return Err(DiscountRejection::NotApplicable);
        }
        DiscountScope::Category if code.applicable_to_id.is_none() || code.applicable_to_id != course.category_id => {
            return Err(DiscountRejection::NotApplicable);
        }
        DiscountScope::Course | DiscountScope::Category => {}
    }

    Ok(code)
}

/// Look up `code` (case-insensitively) and validate it for `user_id` buying `course`.
///
/// Redemptions already recorded and the learner's PENDING orders carrying the code both count
/// towards the per-user limit.
#[tracing::instrument(skip(conn, course), fields(course_id = %course.id), err)]
pub async fn check_code(
    conn: &mut PgConnection,
    code: &str,
    course: &CourseDBResponse,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<DiscountCodeDBResponse> {
    let mut repo = DiscountCodes::new(conn);

    let record = repo.get_by_code(code.trim()).await?;
    let prior_usages = match &record {
        Some(record) => {
            repo.count_user_usages(record.id, user_id).await? + repo.count_user_pending_orders(record.id, user_id).await?
        }
        None => 0,
    };

    match validate(record.as_ref(), course, prior_usages, now) {
        Ok(valid) => Ok(valid.clone()),
        Err(reason) => {
            tracing::debug!(?reason, "Discount code rejected");
            Err(Error::DiscountRejected(reason))
        }
    }
}
