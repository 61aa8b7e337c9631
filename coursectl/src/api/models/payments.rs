//! API request/response models for checkout and payment confirmation.

use crate::{
    api::models::orders::OrderResponse,
    reconciler::ReconcileSummary,
    types::{CourseId, Money, OrderId},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[schema(value_type = String, format = "uuid")]
    pub course_id: CourseId,
    /// Optional discount code, matched case-insensitively
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifySessionRequest {
    pub session_id: String,
    /// When present, must match the course recorded on the session
    #[serde(default)]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub course_id: Option<CourseId>,
    /// When present, must match the order recorded on the session
    #[serde(default)]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub order_id: Option<OrderId>,
}

// Response models

/// Result of a checkout request.
///
/// Paid purchases carry `url` and `sessionId` for the hosted payment page. Purchases with nothing
/// to pay, and learners who are already enrolled, get a `message` instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub order_id: Option<OrderId>,
    /// Amount taken off by the discount code, in minor units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_applied: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifySessionResponse {
    pub success: bool,
    pub order: OrderResponse,
    /// Payment intent id, when the provider reported one
    pub transaction_id: Option<String>,
    /// Amount charged in minor units
    pub amount: Money,
    pub currency: String,
    /// Payment intent status as reported by the provider, e.g. `succeeded`
    pub payment_status: Option<String>,
    pub summary: ReconcileSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}
