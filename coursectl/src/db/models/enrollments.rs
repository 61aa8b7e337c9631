//! Database models for enrollments.

use crate::types::{CourseId, EnrollmentId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct EnrollmentDBResponse {
    pub id: EnrollmentId,
    pub user_id: UserId,
    pub course_id: CourseId,
    /// Percentage complete, 0-100
    pub progress: i32,
    pub last_accessed: Option<DateTime<Utc>>,
    /// Gateway payment-intent id for paid enrollments
    pub payment_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
