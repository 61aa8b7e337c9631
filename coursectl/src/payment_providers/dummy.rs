//! Dummy payment provider implementation
//!
//! Sessions live in process memory and are paid the moment they are created: the returned URL is
//! the success URL itself. Useful for local development and tests. There are no webhooks.

use async_trait::async_trait;
use axum::http::HeaderMap;
use dashmap::DashMap;

use crate::{
    config::DummyConfig,
    payment_providers::{
        CheckoutSession, CheckoutSessionRequest, CreatedSession, PaymentError, PaymentIntent, PaymentProvider, Result,
        SessionPaymentStatus, WebhookEvent,
    },
    types::OrderId,
};

const SESSION_PREFIX: &str = "dummy_session_";
const INTENT_PREFIX: &str = "dummy_pi_";

/// Dummy payment provider whose sessions are always paid
///
/// One session per order: session ids embed the order id, so lookups go straight to the entry.
pub struct DummyProvider {
    currency: String,
    sessions: DashMap<OrderId, CheckoutSession>,
}

impl From<DummyConfig> for DummyProvider {
    fn from(config: DummyConfig) -> Self {
        Self {
            currency: config.currency,
            sessions: DashMap::new(),
        }
    }
}

fn order_of(session_id: &str) -> Option<OrderId> {
    session_id.strip_prefix(SESSION_PREFIX)?.parse().ok()
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    fn currency(&self) -> &str {
        &self.currency
    }

    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Result<CreatedSession> {
        let order_key = request.order_id.simple();
        let session = self
            .sessions
            .entry(request.order_id)
            .or_insert_with(|| {
                tracing::info!(order_id = %request.order_id, "Dummy provider created checkout session");
                CheckoutSession {
                    id: format!("{SESSION_PREFIX}{order_key}"),
                    payment_status: SessionPaymentStatus::Paid,
                    payment_intent: Some(format!("{INTENT_PREFIX}{order_key}")),
                    metadata: request.metadata.to_map(),
                    amount_total: Some(request.amount),
                    currency: Some(self.currency.clone()),
                }
            })
            .id
            .clone();

        Ok(CreatedSession {
            url: request.success_url.replace("{CHECKOUT_SESSION_ID}", &session),
            id: session,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession> {
        order_of(session_id)
            .and_then(|order_id| self.sessions.get(&order_id).map(|session| session.clone()))
            .ok_or_else(|| PaymentError::SessionNotFound(session_id.to_string()))
    }

    async fn retrieve_payment_intent(&self, payment_intent_id: &str) -> Result<PaymentIntent> {
        if !payment_intent_id.starts_with(INTENT_PREFIX) {
            return Err(PaymentError::InvalidData("Invalid dummy payment intent ID format".to_string()));
        }

        Ok(PaymentIntent {
            id: payment_intent_id.to_string(),
            status: "succeeded".to_string(),
            client_secret: None,
        })
    }

    async fn verify_webhook(&self, _headers: &HeaderMap, _body: &str) -> Result<Option<WebhookEvent>> {
        Ok(None)
    }
}
