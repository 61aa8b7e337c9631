//! Shared fixtures for unit and integration tests.

use crate::{
    AppState, BackgroundServices,
    api::models::users::{CurrentUser, Role},
    auth::session::create_session_token,
    config::{Config, DummyConfig, PaymentConfig, StripeConfig},
    db::{
        handlers::{Courses, DiscountCodes, Users},
        models::{
            courses::{CourseCreateDBRequest, CourseDBResponse},
            discounts::{DiscountCodeCreateDBRequest, DiscountCodeDBResponse, DiscountScope, DiscountValue},
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    payment_providers::{PaymentProvider, dummy::DummyProvider},
    types::Money,
};
use axum::http::{HeaderName, HeaderValue, header};
use axum_test::TestServer;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use sqlx::PgPool;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn create_test_config() -> Config {
    let mut config = Config {
        secret_key: Some("test-secret-key-for-session-tokens".to_string()),
        dashboard_url: "http://localhost:5173".to_string(),
        payment: Some(PaymentConfig::Dummy(DummyConfig::default())),
        enable_metrics: false,
        ..Default::default()
    };
    config.background_services.order_sweeper.enabled = false;
    config
}

pub fn stripe_test_config(api_base: &str) -> StripeConfig {
    StripeConfig {
        api_key: "sk_test_123".to_string(),
        webhook_secret: "whsec_test_secret".to_string(),
        api_base: api_base.to_string(),
        currency: "usd".to_string(),
        timeout: Duration::from_secs(2),
    }
}

/// A Stripe checkout session object as the API returns it. The payment intent id is
/// `pi_{session_id}`.
pub fn stripe_checkout_session_json(session_id: &str, metadata: &Value, payment_status: &str, amount: i64) -> Value {
    let status = if payment_status == "paid" { "complete" } else { "open" };
    json!({
        "id": session_id,
        "object": "checkout.session",
        "amount_subtotal": amount,
        "amount_total": amount,
        "automatic_tax": { "enabled": false, "liability": null, "status": null },
        "cancel_url": "http://localhost:5173/courses",
        "client_reference_id": null,
        "created": 1_767_225_600,
        "currency": "usd",
        "custom_fields": [],
        "custom_text": {
            "after_submit": null,
            "shipping_address": null,
            "submit": null,
            "terms_of_service_acceptance": null
        },
        "customer": null,
        "customer_email": "student@example.com",
        "expires_at": 1_767_312_000,
        "livemode": false,
        "metadata": metadata,
        "mode": "payment",
        "payment_intent": format!("pi_{session_id}"),
        "payment_method_types": ["card"],
        "payment_status": payment_status,
        "shipping_options": [],
        "status": status,
        "success_url": "http://localhost:5173/payment/success",
        "url": null
    })
}

/// A Stripe payment intent object
pub fn stripe_payment_intent_json(intent_id: &str, status: &str) -> Value {
    json!({
        "id": intent_id,
        "object": "payment_intent",
        "amount": 9000,
        "amount_capturable": 0,
        "amount_received": 9000,
        "capture_method": "automatic",
        "client_secret": null,
        "confirmation_method": "automatic",
        "created": 1_767_225_600,
        "currency": "usd",
        "livemode": false,
        "metadata": {},
        "payment_method_types": ["card"],
        "status": status
    })
}

/// A Stripe event envelope wrapping `object`
pub fn stripe_event_json(event_id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": event_id,
        "object": "event",
        "api_version": null,
        "created": 1_767_225_600,
        "data": { "object": object },
        "livemode": false,
        "pending_webhooks": 1,
        "request": null,
        "type": event_type
    })
}

pub fn create_test_state(pool: PgPool, payment_provider: Option<Arc<dyn PaymentProvider>>) -> AppState {
    AppState::builder()
        .db(pool)
        .config(create_test_config())
        .maybe_payment_provider(payment_provider)
        .build()
}

/// Full application with the dummy payment provider from the test config
pub async fn create_test_app(pool: PgPool) -> (TestServer, BackgroundServices) {
    let provider: Arc<dyn PaymentProvider> = Arc::new(DummyProvider::from(DummyConfig::default()));
    create_test_app_with_provider(pool, Some(provider)).await
}

pub async fn create_test_app_with_provider(
    pool: PgPool,
    payment_provider: Option<Arc<dyn PaymentProvider>>,
) -> (TestServer, BackgroundServices) {
    let state = create_test_state(pool.clone(), payment_provider);
    let router = crate::build_router(&state).expect("Failed to build router");
    let bg_services = crate::setup_background_services(pool, &state.config, CancellationToken::new());
    let server = TestServer::new(router.into_make_service()).expect("Failed to create test server");
    (server, bg_services)
}

pub async fn create_test_user(pool: &PgPool, role: Role) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email: format!("learner_{}@example.com", Uuid::new_v4().simple()),
            role,
        })
        .await
        .expect("Failed to create test user")
}

/// A course priced at `price` minor units. A price of zero makes a free course.
pub async fn create_test_course(pool: &PgPool, price: i64) -> CourseDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Courses::new(&mut conn)
        .create(&CourseCreateDBRequest {
            title: format!("Course {}", Uuid::new_v4().simple()),
            price: Money::from_minor(price),
            is_paid: price > 0,
            category_id: None,
        })
        .await
        .expect("Failed to create test course")
}

pub async fn create_test_discount(pool: &PgPool, request: DiscountCodeCreateDBRequest) -> DiscountCodeDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    DiscountCodes::new(&mut conn)
        .create(&request)
        .await
        .expect("Failed to create test discount code")
}

/// An always-active percentage code with the default limit of one redemption per learner
pub fn percentage_code(code: &str, percent: i64) -> DiscountCodeCreateDBRequest {
    DiscountCodeCreateDBRequest {
        code: code.to_string(),
        value: DiscountValue::Percentage(Decimal::from(percent)),
        max_uses: None,
        max_uses_per_user: Some(1),
        starts_at: None,
        expires_at: None,
        min_purchase_amount: None,
        max_discount_amount: None,
        applicable_to_type: DiscountScope::All,
        applicable_to_id: None,
        is_active: true,
    }
}

/// `Authorization` header carrying a session token for `user`
pub fn add_auth_headers(user: &UserDBResponse) -> (HeaderName, HeaderValue) {
    let current = CurrentUser {
        id: user.id,
        email: user.email.clone(),
        role: user.role,
    };
    let token = create_session_token(&current, &create_test_config()).expect("Failed to create session token");
    let value = HeaderValue::from_str(&format!("Bearer {token}")).expect("Invalid header value");
    (header::AUTHORIZATION, value)
}
