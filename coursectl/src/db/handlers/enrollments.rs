use crate::{
    db::{errors::Result, models::enrollments::EnrollmentDBResponse},
    types::{CourseId, UserId},
};
use sqlx::PgConnection;

pub struct Enrollments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Enrollments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Enroll a user in a course unless they already are.
    ///
    /// Returns the new row, or `None` when an enrollment for (user, course) already existed. An
    /// existing enrollment is never modified, including its payment transaction id.
    pub async fn enroll_if_absent(
        &mut self,
        user_id: UserId,
        course_id: CourseId,
        payment_transaction_id: Option<&str>,
    ) -> Result<Option<EnrollmentDBResponse>> {
        let enrollment = sqlx::query_as::<_, EnrollmentDBResponse>(
            r#"
            INSERT INTO enrollments (user_id, course_id, payment_transaction_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, course_id) DO NOTHING
            RETURNING id, user_id, course_id, progress, last_accessed, payment_transaction_id, created_at
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .bind(payment_transaction_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(enrollment)
    }

    pub async fn get(&mut self, user_id: UserId, course_id: CourseId) -> Result<Option<EnrollmentDBResponse>> {
        let enrollment = sqlx::query_as::<_, EnrollmentDBResponse>(
            r#"
            SELECT id, user_id, course_id, progress, last_accessed, payment_transaction_id, created_at
            FROM enrollments
            WHERE user_id = $1 AND course_id = $2
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(enrollment)
    }

    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<EnrollmentDBResponse>> {
        let enrollments = sqlx::query_as::<_, EnrollmentDBResponse>(
            r#"
            SELECT id, user_id, course_id, progress, last_accessed, payment_transaction_id, created_at
            FROM enrollments
            WHERE user_id = $1
            ORDER BY created_at DESC, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(enrollments)
    }
}
