//! Stripe payment provider implementation
//!
//! Built on `async-stripe`. Every call is bounded by the configured timeout, and checkout session
//! creation is sent with an idempotency key derived from the order id so a retried checkout for
//! the same order never opens a second session.

use async_trait::async_trait;
use axum::http::HeaderMap;
use std::{future::Future, time::Duration};
use stripe::{
    CheckoutSessionId, CheckoutSessionMode, CheckoutSessionPaymentStatus, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionPaymentIntentData, Currency, EventObject, PaymentIntentId, RequestStrategy, StripeError, Webhook,
    WebhookError,
};

use crate::{
    config::StripeConfig,
    payment_providers::{
        CheckoutSession, CheckoutSessionRequest, CreatedSession, PaymentError, PaymentIntent, PaymentProvider, Result,
        SessionPaymentStatus, WebhookEvent,
    },
    types::Money,
};

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Stripe payment provider
pub struct StripeProvider {
    client: Client,
    webhook_secret: String,
    currency: String,
    stripe_currency: Currency,
    timeout: Duration,
}

impl TryFrom<StripeConfig> for StripeProvider {
    type Error = PaymentError;

    fn try_from(config: StripeConfig) -> Result<Self> {
        let stripe_currency: Currency = serde_json::from_value(serde_json::Value::String(config.currency.clone()))
            .map_err(|_| PaymentError::ProviderApi(format!("unsupported currency {:?}", config.currency)))?;

        let api_base = format!("{}/", config.api_base.trim_end_matches('/'));
        let client = Client::from_url(api_base.as_str(), config.api_key.as_str());

        Ok(Self {
            client,
            webhook_secret: config.webhook_secret,
            currency: config.currency,
            stripe_currency,
            timeout: config.timeout,
        })
    }
}

impl StripeProvider {
    /// Run a Stripe call under the configured timeout. A 404 maps to `SessionNotFound(id)` when
    /// `lookup_id` is given.
    async fn call<T>(
        &self,
        request: impl Future<Output = std::result::Result<T, StripeError>>,
        lookup_id: Option<&str>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(|e| classify(e, lookup_id)),
            Err(_) => Err(PaymentError::Transient(format!("no response from Stripe within {:?}", self.timeout))),
        }
    }

    /// `Stripe-Signature` header value for `body`, signed now with this provider's secret
    #[cfg(test)]
    pub(crate) fn sign_for_test(&self, body: &str) -> String {
        use hmac::{Hmac, Mac};

        let timestamp = chrono::Utc::now().timestamp();
        let mut mac = Hmac::<sha2::Sha256>::new_from_slice(self.webhook_secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{body}").as_bytes());
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }
}

fn classify(err: StripeError, lookup_id: Option<&str>) -> PaymentError {
    match err {
        StripeError::Stripe(request_error) => {
            let status = request_error.http_status;
            let detail = request_error.message.unwrap_or_default();
            match (status, lookup_id) {
                (404, Some(id)) => PaymentError::SessionNotFound(id.to_string()),
                (429, _) => PaymentError::Transient(format!("rate limited: {detail}")),
                (s, _) if s >= 500 => PaymentError::Transient(format!("{s}: {detail}")),
                (s, _) => PaymentError::ProviderApi(format!("{s}: {detail}")),
            }
        }
        e @ (StripeError::Timeout | StripeError::ClientError(_)) => PaymentError::Transient(e.to_string()),
        other => PaymentError::ProviderApi(other.to_string()),
    }
}

fn convert_session(session: stripe::CheckoutSession) -> CheckoutSession {
    CheckoutSession {
        id: session.id.to_string(),
        payment_status: match session.payment_status {
            CheckoutSessionPaymentStatus::Paid => SessionPaymentStatus::Paid,
            CheckoutSessionPaymentStatus::Unpaid => SessionPaymentStatus::Unpaid,
            CheckoutSessionPaymentStatus::NoPaymentRequired => SessionPaymentStatus::NoPaymentRequired,
        },
        payment_intent: session.payment_intent.as_ref().map(|pi| pi.id().to_string()),
        metadata: session.metadata.unwrap_or_default().into_iter().collect(),
        amount_total: session.amount_total.map(Money::from_minor),
        currency: session.currency.map(|c| c.to_string()),
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn currency(&self) -> &str {
        &self.currency
    }

    #[tracing::instrument(skip_all, fields(order_id = %request.order_id, amount = request.amount.minor()))]
    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Result<CreatedSession> {
        let order_ref = request.order_id.to_string();
        let metadata: stripe::Metadata = request.metadata.to_map().into_iter().collect();

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.client_reference_id = Some(&order_ref);
        params.customer_email = Some(&request.customer_email);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: self.stripe_currency,
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.course_title.clone(),
                    ..Default::default()
                }),
                unit_amount: Some(request.amount.minor()),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        }]);
        // Mirrored onto the payment intent
        params.payment_intent_data = Some(CreateCheckoutSessionPaymentIntentData {
            metadata: Some(metadata.clone()),
            ..Default::default()
        });
        params.metadata = Some(metadata);

        let client = self
            .client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(format!("checkout-{order_ref}")));
        let session = self.call(stripe::CheckoutSession::create(&client, params), None).await?;

        let id = session.id.to_string();
        let url = session
            .url
            .ok_or_else(|| PaymentError::ProviderApi(format!("checkout session {id} has no url")))?;

        tracing::info!(session_id = %id, "Created Stripe checkout session");

        Ok(CreatedSession { id, url })
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession> {
        let id = session_id
            .parse::<CheckoutSessionId>()
            .map_err(|_| PaymentError::InvalidData(format!("invalid checkout session id {session_id:?}")))?;

        let session = self
            .call(stripe::CheckoutSession::retrieve(&self.client, &id, &[]), Some(session_id))
            .await?;
        Ok(convert_session(session))
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_payment_intent(&self, payment_intent_id: &str) -> Result<PaymentIntent> {
        let id = payment_intent_id
            .parse::<PaymentIntentId>()
            .map_err(|_| PaymentError::InvalidData(format!("invalid payment intent id {payment_intent_id:?}")))?;

        let intent = self
            .call(stripe::PaymentIntent::retrieve(&self.client, &id, &[]), Some(payment_intent_id))
            .await?;

        Ok(PaymentIntent {
            id: intent.id.to_string(),
            status: intent.status.to_string(),
            client_secret: intent.client_secret,
        })
    }

    async fn verify_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<WebhookEvent>> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| PaymentError::InvalidSignature(format!("missing {SIGNATURE_HEADER} header")))?;

        let event = Webhook::construct_event(body, signature, &self.webhook_secret).map_err(|e| match e {
            WebhookError::BadParse(e) => PaymentError::InvalidData(format!("malformed webhook event: {e}")),
            other => PaymentError::InvalidSignature(other.to_string()),
        })?;

        let id = event.id.to_string();
        let event_type = event.type_.to_string();
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => Some(convert_session(session)),
            _ => None,
        };

        tracing::debug!(event_id = %id, event_type = %event_type, "Verified Stripe webhook");

        Ok(Some(WebhookEvent { id, event_type, session }))
    }
}
