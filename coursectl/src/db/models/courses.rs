//! Database models for courses and categories.
//!
//! Courses are read-only as far as the purchase flow is concerned; creation exists for seeding and
//! for fixtures.

use crate::types::{CategoryId, CourseId, Money};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct CategoryCreateDBRequest {
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct CategoryDBResponse {
    pub id: CategoryId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CourseCreateDBRequest {
    pub title: String,
    pub price: Money,
    pub is_paid: bool,
    pub category_id: Option<CategoryId>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CourseDBResponse {
    pub id: CourseId,
    pub title: String,
    /// List price in minor units
    pub price: Money,
    pub is_paid: bool,
    pub category_id: Option<CategoryId>,
    pub created_at: DateTime<Utc>,
}

impl CourseDBResponse {
    /// A course is free when it is not flagged as paid or has no price.
    pub fn is_free(&self) -> bool {
        !self.is_paid || self.price.is_zero()
    }
}
