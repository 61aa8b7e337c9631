//! Database models for orders and their line items.

use crate::types::{CourseId, DiscountCodeId, Money, OrderId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Order lifecycle state stored as TEXT in database.
///
/// Transitions are PENDING -> COMPLETED and PENDING -> CANCELED only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Canceled,
}

/// Database request for creating a single-item order
#[derive(Debug, Clone)]
pub struct OrderCreateDBRequest {
    pub user_id: UserId,
    pub course_id: CourseId,
    /// Course price snapshotted at purchase time
    pub subtotal_amount: Money,
    pub discount_amount: Money,
    pub total_amount: Money,
    pub discount_code_id: Option<DiscountCodeId>,
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderDBResponse {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub subtotal_amount: Money,
    pub discount_amount: Money,
    pub total_amount: Money,
    pub discount_code_id: Option<DiscountCodeId>,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderItemDBResponse {
    pub id: Uuid,
    pub order_id: OrderId,
    pub course_id: CourseId,
    pub price: Money,
    pub created_at: DateTime<Utc>,
}
