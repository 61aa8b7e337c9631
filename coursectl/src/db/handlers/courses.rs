use crate::{
    db::{
        errors::Result,
        models::courses::{CategoryCreateDBRequest, CategoryDBResponse, CourseCreateDBRequest, CourseDBResponse},
    },
    types::CourseId,
};
use sqlx::PgConnection;

pub struct Courses<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Courses<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create_category(&mut self, request: &CategoryCreateDBRequest) -> Result<CategoryDBResponse> {
        let category = sqlx::query_as::<_, CategoryDBResponse>(
            "INSERT INTO categories (name) VALUES ($1) RETURNING id, name, created_at",
        )
        .bind(&request.name)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(category)
    }

    pub async fn create(&mut self, request: &CourseCreateDBRequest) -> Result<CourseDBResponse> {
        let course = sqlx::query_as::<_, CourseDBResponse>(
            r#"
            INSERT INTO courses (title, price, is_paid, category_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, title, price, is_paid, category_id, created_at
            "#,
        )
        .bind(&request.title)
        .bind(request.price)
        .bind(request.is_paid)
        .bind(request.category_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(course)
    }

    pub async fn get(&mut self, id: CourseId) -> Result<Option<CourseDBResponse>> {
        let course = sqlx::query_as::<_, CourseDBResponse>(
            "SELECT id, title, price, is_paid, category_id, created_at FROM courses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(course)
    }
}
