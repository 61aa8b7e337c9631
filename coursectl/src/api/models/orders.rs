//! API response models for orders.

use crate::{
    db::models::orders::{OrderDBResponse, OrderItemDBResponse, OrderStatus},
    types::{CourseId, DiscountCodeId, Money, OrderId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    #[schema(value_type = String, format = "uuid")]
    pub course_id: CourseId,
    /// Course price at purchase time, in minor units
    pub price: Money,
}

impl From<OrderItemDBResponse> for OrderItemResponse {
    fn from(item: OrderItemDBResponse) -> Self {
        Self {
            course_id: item.course_id,
            price: item.price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: OrderId,
    pub status: OrderStatus,
    pub subtotal_amount: Money,
    pub discount_amount: Money,
    pub total_amount: Money,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub discount_code_id: Option<DiscountCodeId>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl OrderResponse {
    pub fn new(order: OrderDBResponse, items: Vec<OrderItemDBResponse>) -> Self {
        Self {
            id: order.id,
            status: order.status,
            subtotal_amount: order.subtotal_amount,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            discount_code_id: order.discount_code_id,
            items: items.into_iter().map(Into::into).collect(),
            created_at: order.created_at,
            completed_at: order.completed_at,
            canceled_at: order.canceled_at,
        }
    }
}
