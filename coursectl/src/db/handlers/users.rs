use crate::{
    api::models::users::CurrentUser,
    db::{
        errors::Result,
        models::users::{UserCreateDBRequest, UserDBResponse},
    },
};
use sqlx::PgConnection;

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create(&mut self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (email, role)
            VALUES ($1, $2)
            RETURNING id, email, role, created_at
            "#,
        )
        .bind(&request.email)
        .bind(request.role)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    /// Provision the user a verified session token describes. The identity service owns the
    /// account, so email and role are refreshed from the token on every call.
    pub async fn ensure(&mut self, user: &CurrentUser) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (id, email, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET email = EXCLUDED.email, role = EXCLUDED.role
            RETURNING id, email, role, created_at
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(user.role)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }
}
