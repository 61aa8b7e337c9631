//! Database models for discount codes and their usage ledger.

use crate::types::{DiscountCodeId, Money, OrderId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Discount kind stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
}

/// Which purchases a code may be applied to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountScope {
    All,
    Category,
    Course,
}

/// The value of a discount, tied to its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountValue {
    /// Percent off the base price, 0 < p <= 100
    Percentage(Decimal),
    /// Flat amount off in minor units
    FixedAmount(Money),
}

impl DiscountValue {
    pub fn discount_type(&self) -> DiscountType {
        match self {
            DiscountValue::Percentage(_) => DiscountType::Percentage,
            DiscountValue::FixedAmount(_) => DiscountType::FixedAmount,
        }
    }

    pub fn percent_off(&self) -> Option<Decimal> {
        match self {
            DiscountValue::Percentage(p) => Some(*p),
            DiscountValue::FixedAmount(_) => None,
        }
    }

    pub fn amount_off(&self) -> Option<Money> {
        match self {
            DiscountValue::Percentage(_) => None,
            DiscountValue::FixedAmount(m) => Some(*m),
        }
    }
}

/// Database request for creating a discount code
#[derive(Debug, Clone)]
pub struct DiscountCodeCreateDBRequest {
    /// Normalized (upper-cased) by the repository before insert
    pub code: String,
    pub value: DiscountValue,
    pub max_uses: Option<i32>,
    pub max_uses_per_user: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub min_purchase_amount: Option<Money>,
    pub max_discount_amount: Option<Money>,
    pub applicable_to_type: DiscountScope,
    pub applicable_to_id: Option<Uuid>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct DiscountCodeDBResponse {
    pub id: DiscountCodeId,
    pub code: String,
    pub value: DiscountValue,
    pub max_uses: Option<i32>,
    pub max_uses_per_user: Option<i32>,
    pub used_count: i32,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub min_purchase_amount: Option<Money>,
    pub max_discount_amount: Option<Money>,
    pub applicable_to_type: DiscountScope,
    /// Course or category id, depending on `applicable_to_type`
    pub applicable_to_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Database request for recording that a code was redeemed
#[derive(Debug, Clone)]
pub struct DiscountUsageCreateDBRequest {
    pub discount_code_id: DiscountCodeId,
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub original_amount: Money,
    pub discount_amount: Money,
    pub final_amount: Money,
}

#[derive(Debug, Clone, FromRow)]
pub struct DiscountUsageDBResponse {
    pub id: Uuid,
    pub discount_code_id: DiscountCodeId,
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub original_amount: Money,
    pub discount_amount: Money,
    pub final_amount: Money,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`crate::db::handlers::DiscountCodes::record_usage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageRecord {
    /// A new usage row was inserted and the code's counter incremented
    Recorded,
    /// A usage row for this order already existed; nothing changed
    AlreadyRecorded,
}

