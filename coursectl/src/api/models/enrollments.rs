//! API response models for enrollments.

use crate::{
    db::models::enrollments::EnrollmentDBResponse,
    types::{CourseId, EnrollmentId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: EnrollmentId,
    #[schema(value_type = String, format = "uuid")]
    pub course_id: CourseId,
    pub progress: i32,
    pub last_accessed: Option<DateTime<Utc>>,
    /// Payment intent that paid for the enrollment; absent for free enrollments
    pub payment_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<EnrollmentDBResponse> for EnrollmentResponse {
    fn from(db: EnrollmentDBResponse) -> Self {
        Self {
            id: db.id,
            course_id: db.course_id,
            progress: db.progress,
            last_accessed: db.last_accessed,
            payment_transaction_id: db.payment_transaction_id,
            created_at: db.created_at,
        }
    }
}
