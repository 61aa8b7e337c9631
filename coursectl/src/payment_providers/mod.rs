//! Payment provider abstraction layer
//!
//! This module defines the `PaymentProvider` trait which wraps a hosted-checkout payment
//! gateway: creating checkout sessions, reading them back, reading payment intents, and
//! authenticating webhook deliveries. Providers never touch the database; turning a confirmed
//! payment into an enrollment is the job of [`crate::reconciler`].

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    config::PaymentConfig,
    types::{CourseId, Money, OrderId, UserId},
};

pub mod dummy;
pub mod stripe;

/// Create a payment provider from configuration
///
/// This is the single point where we convert config into provider instances.
pub fn create_provider(config: PaymentConfig) -> std::result::Result<Arc<dyn PaymentProvider>, PaymentError> {
    Ok(match config {
        PaymentConfig::Stripe(stripe_config) => Arc::new(stripe::StripeProvider::try_from(stripe_config)?),
        PaymentConfig::Dummy(dummy_config) => Arc::new(dummy::DummyProvider::from(dummy_config)),
    })
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur during payment processing
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The provider rejected the request
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    /// Timeout, connection failure, rate limiting or a provider-side 5xx. Safe to retry.
    #[error("Payment provider unavailable: {0}")]
    Transient(String),

    #[error("Checkout session {0} not found")]
    SessionNotFound(String),

    #[error("Payment not completed: {0}")]
    PaymentNotCompleted(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid payment data: {0}")]
    InvalidData(String),
}

/// Metadata map attached to a checkout session and echoed back by the provider.
pub type Metadata = BTreeMap<String, String>;

/// Value of the `type` metadata key for course purchases.
pub const COURSE_PURCHASE: &str = "course_purchase";

/// Purchase identifiers carried through the provider as session metadata.
///
/// Amounts are written as minor-unit integers so they round-trip exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub order_id: OrderId,
    pub coupon_code: Option<String>,
    pub original_amount: Money,
    pub discount_amount: Money,
    pub final_amount: Money,
}

impl CheckoutMetadata {
    pub fn to_map(&self) -> Metadata {
        let mut map = Metadata::new();
        map.insert("type".to_string(), COURSE_PURCHASE.to_string());
        map.insert("userId".to_string(), self.user_id.to_string());
        map.insert("courseId".to_string(), self.course_id.to_string());
        map.insert("orderId".to_string(), self.order_id.to_string());
        if let Some(code) = &self.coupon_code {
            map.insert("couponCode".to_string(), code.clone());
        }
        map.insert("originalAmount".to_string(), self.original_amount.minor().to_string());
        map.insert("discountAmount".to_string(), self.discount_amount.minor().to_string());
        map.insert("finalAmount".to_string(), self.final_amount.minor().to_string());
        map
    }

    pub fn from_map(map: &Metadata) -> Result<Self> {
        match map.get("type").map(String::as_str) {
            Some(COURSE_PURCHASE) => {}
            other => {
                return Err(PaymentError::InvalidData(format!("unexpected metadata type {other:?}")));
            }
        }

        Ok(Self {
            user_id: parse_field(map, "userId")?,
            course_id: parse_field(map, "courseId")?,
            order_id: parse_field(map, "orderId")?,
            coupon_code: map.get("couponCode").filter(|c| !c.is_empty()).cloned(),
            original_amount: Money::from_minor(parse_field(map, "originalAmount")?),
            discount_amount: Money::from_minor(parse_field(map, "discountAmount")?),
            final_amount: Money::from_minor(parse_field(map, "finalAmount")?),
        })
    }
}

fn parse_field<T>(map: &Metadata, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = map
        .get(key)
        .ok_or_else(|| PaymentError::InvalidData(format!("missing metadata key {key}")))?;
    raw.parse()
        .map_err(|e| PaymentError::InvalidData(format!("invalid metadata value for {key}: {e}")))
}

/// Everything the provider needs to host a payment page for one order.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub order_id: OrderId,
    pub course_title: String,
    /// Amount to charge; always positive
    pub amount: Money,
    pub customer_email: String,
    /// May contain the provider's `{CHECKOUT_SESSION_ID}` placeholder
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: CheckoutMetadata,
}

/// A freshly created hosted checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub id: String,
    /// Where to send the learner to pay
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    #[serde(other)]
    Unknown,
}

/// A checkout session as reported by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub payment_status: SessionPaymentStatus,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub amount_total: Option<Money>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == SessionPaymentStatus::Paid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Provider status string, e.g. `succeeded` or `processing`
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Represents an authenticated webhook event from a payment provider
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    /// Type of event (e.g., "checkout.session.completed")
    pub event_type: String,
    /// The checkout session the event is about, for `checkout.session.*` events
    pub session: Option<CheckoutSession>,
}

/// Abstract payment provider interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Lowercase ISO currency code every charge is made in
    fn currency(&self) -> &str;

    /// Create a hosted checkout session. Retries for the same order are idempotent on the
    /// provider side.
    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Result<CreatedSession>;

    /// Fetch a checkout session by id
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession>;

    /// Fetch a payment intent by id
    async fn retrieve_payment_intent(&self, payment_intent_id: &str) -> Result<PaymentIntent>;

    /// Authenticate and parse a webhook delivery
    ///
    /// Returns None if this provider doesn't support webhooks.
    /// Returns Err if validation fails (invalid signature, malformed data, etc.)
    async fn verify_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<WebhookEvent>>;
}
