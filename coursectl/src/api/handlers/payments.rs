//! HTTP handlers for checkout, payment confirmation and payment webhooks.
//!
//! A learner buys a course in three steps:
//!
//! 1. [`checkout`] prices the course, creates a PENDING order and returns the hosted checkout URL
//!    (or enrolls immediately when there is nothing to pay).
//! 2. The learner pays on the provider's page and is redirected back to the dashboard, which
//!    calls [`verify_session`].
//! 3. Independently, the provider calls [`webhook`].
//!
//! Steps 2 and 3 both end in [`crate::reconciler::reconcile`], so either one alone is enough and
//! both together are harmless.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use std::sync::Arc;

use crate::{
    AppState,
    api::models::{
        orders::OrderResponse,
        payments::{CheckoutRequest, CheckoutResponse, VerifySessionRequest, VerifySessionResponse, WebhookAck},
        users::CurrentUser,
    },
    db::{
        handlers::{Courses, Enrollments, Orders},
        models::orders::OrderCreateDBRequest,
    },
    discounts::check_code,
    errors::{Error, Result},
    payment_providers::{CheckoutMetadata, CheckoutSession, CheckoutSessionRequest, PaymentProvider, WebhookEvent},
    pricing::compute_price,
    reconciler::{self, ConfirmationSource, EnrollmentOutcome, ExpectedIdentifiers},
    types::{Money, abbrev_uuid},
};

/// Events that mean a checkout session has been paid
const PAID_EVENTS: [&str; 2] = ["checkout.session.completed", "checkout.session.async_payment_succeeded"];
const EXPIRED_EVENT: &str = "checkout.session.expired";

fn provider(state: &AppState) -> Result<&Arc<dyn PaymentProvider>> {
    state.payment_provider.as_ref().ok_or_else(|| {
        tracing::warn!("Payment requested but no payment provider is configured");
        Error::PaymentNotConfigured
    })
}

/// Start a course purchase
#[utoipa::path(
    post,
    path = "/api/v1/payments/checkout",
    tag = "payments",
    summary = "Start a course checkout",
    description = "Prices the course (applying an optional discount code) and returns a hosted checkout URL. \
                   Free and fully discounted purchases are enrolled immediately and return a message instead.",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created, or enrolled without payment", body = CheckoutResponse),
        (status = 400, description = "Discount code rejected or invalid request", body = crate::errors::ErrorBody),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Course not found"),
        (status = 501, description = "No payment provider configured"),
        (status = 503, description = "Payment provider unavailable"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id), course_id = %abbrev_uuid(&request.course_id)))]
pub async fn checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let course = Courses::new(&mut conn)
        .get(request.course_id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Course".to_string(),
            id: request.course_id.to_string(),
        })?;

    if Enrollments::new(&mut conn).get(user.id, course.id).await?.is_some() {
        return Ok(Json(CheckoutResponse {
            success: true,
            message: Some("You are already enrolled in this course".to_string()),
            ..Default::default()
        }));
    }

    // A fresh checkout supersedes any earlier unpaid one for this course
    let superseded = Orders::new(&mut conn).cancel_pending_for(user.id, course.id).await?;
    if !superseded.is_empty() {
        tracing::info!(?superseded, "Canceled earlier pending orders for this course");
    }

    // Codes are ignored for free courses
    let coupon = request.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let discount = match coupon {
        Some(code) if !course.is_free() => Some(check_code(&mut conn, code, &course, user.id, Utc::now()).await?),
        _ => None,
    };

    let base = if course.is_free() { Money::ZERO } else { course.price };
    let price = compute_price(base, discount.as_ref());

    if price.is_free() {
        let summary = reconciler::fulfill_without_payment(&mut conn, user.id, &course, &price, discount.as_ref()).await?;
        let message = match (summary.enrollment, &discount) {
            (EnrollmentOutcome::AlreadyExisted, _) => "You are already enrolled in this course",
            (EnrollmentOutcome::Created, Some(_)) => "Discount covers the full price; you are now enrolled",
            (EnrollmentOutcome::Created, None) => "Enrolled in free course",
        };
        return Ok(Json(CheckoutResponse {
            success: true,
            order_id: summary.order_id,
            discount_applied: discount.as_ref().map(|_| price.discount_amount),
            message: Some(message.to_string()),
            ..Default::default()
        }));
    }

    let provider = provider(&state)?;

    let order = Orders::new(&mut conn)
        .create_pending(&OrderCreateDBRequest {
            user_id: user.id,
            course_id: course.id,
            subtotal_amount: price.original_amount,
            discount_amount: price.discount_amount,
            total_amount: price.final_amount,
            discount_code_id: discount.as_ref().map(|d| d.id),
        })
        .await?;

    let dashboard = state.config.dashboard_url.trim_end_matches('/');
    let session_request = CheckoutSessionRequest {
        order_id: order.id,
        course_title: course.title.clone(),
        amount: price.final_amount,
        customer_email: user.email.clone(),
        success_url: format!("{dashboard}/payment/success?session_id={{CHECKOUT_SESSION_ID}}"),
        cancel_url: format!("{dashboard}/courses/{}?payment=cancelled", course.id),
        metadata: CheckoutMetadata {
            user_id: user.id,
            course_id: course.id,
            order_id: order.id,
            coupon_code: discount.as_ref().map(|d| d.code.clone()),
            original_amount: price.original_amount,
            discount_amount: price.discount_amount,
            final_amount: price.final_amount,
        },
    };

    let session = match provider.create_checkout_session(&session_request).await {
        Ok(session) => session,
        Err(e) => {
            // The order can never be paid without a session
            if let Err(cancel_err) = Orders::new(&mut conn).cancel_if_pending(order.id).await {
                tracing::warn!(order_id = %order.id, error = %cancel_err, "Failed to cancel order after checkout failure");
            }
            return Err(e.into());
        }
    };

    Orders::new(&mut conn).attach_checkout_session(order.id, &session.id).await?;

    tracing::info!(
        order_id = %order.id,
        session_id = %session.id,
        total = %price.final_amount,
        discounted = discount.is_some(),
        "Created checkout session"
    );

    Ok(Json(CheckoutResponse {
        success: true,
        url: Some(session.url),
        session_id: Some(session.id),
        order_id: Some(order.id),
        discount_applied: discount.as_ref().map(|_| price.discount_amount),
        message: None,
    }))
}

/// Confirm a checkout session after the learner returns from the payment page
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify-session",
    tag = "payments",
    summary = "Verify a checkout session",
    description = "Checks with the payment provider that the session was paid and that it belongs to the caller, \
                   then enrolls the learner. Safe to call repeatedly.",
    request_body = VerifySessionRequest,
    responses(
        (status = 200, description = "Payment confirmed and enrollment in place", body = VerifySessionResponse),
        (status = 400, description = "Session unpaid or does not match the caller", body = crate::errors::ErrorBody),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Session or order not found"),
        (status = 501, description = "No payment provider configured"),
        (status = 503, description = "Payment provider unavailable"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id), session_id = %request.session_id))]
pub async fn verify_session(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<VerifySessionRequest>,
) -> Result<Json<VerifySessionResponse>> {
    let session_id = request.session_id.trim();
    if session_id.is_empty() {
        return Err(Error::BadRequest {
            message: "sessionId is required".to_string(),
        });
    }

    let provider = provider(&state)?;
    let session = provider.retrieve_session(session_id).await?;

    let expected = ExpectedIdentifiers {
        user_id: Some(user.id),
        course_id: request.course_id,
        order_id: request.order_id,
    };
    let confirmation = reconciler::confirmation_from_session(&session, ConfirmationSource::Verify, &expected)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let summary = reconciler::reconcile(&mut conn, &confirmation).await?;

    let order_id = confirmation.metadata.order_id;
    let mut orders = Orders::new(&mut conn);
    let order = orders.get(order_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Order".to_string(),
        id: order_id.to_string(),
    })?;
    let items = orders.get_items(order_id).await?;

    // Informational only; the session already proved payment
    let payment_status = match confirmation.payment_intent_id.as_deref() {
        Some(intent_id) => match provider.retrieve_payment_intent(intent_id).await {
            Ok(intent) => Some(intent.status),
            Err(e) => {
                tracing::warn!(payment_intent = %intent_id, error = %e, "Could not fetch payment intent status");
                None
            }
        },
        None => None,
    };

    Ok(Json(VerifySessionResponse {
        success: true,
        amount: confirmation.amount_total.unwrap_or(order.total_amount),
        order: OrderResponse::new(order, items),
        transaction_id: confirmation.payment_intent_id,
        currency: session.currency.unwrap_or_else(|| provider.currency().to_string()),
        payment_status,
        summary,
    }))
}

/// Receive payment provider webhook events
#[utoipa::path(
    post,
    path = "/webhooks/payments",
    tag = "payments",
    summary = "Payment provider webhook",
    description = "Authenticates the delivery with the provider's signature header. Paid sessions are reconciled \
                   and expired sessions cancel their pending order. Other events are acknowledged and ignored.",
    request_body(content = String, description = "Raw event payload as sent by the provider"),
    responses(
        (status = 200, description = "Event processed or ignored", body = WebhookAck),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorBody),
        (status = 501, description = "No payment provider configured"),
        (status = 503, description = "Transient failure; the provider should redeliver"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<(StatusCode, Json<WebhookAck>)> {
    let provider = provider(&state)?;

    let Some(event) = provider.verify_webhook(&headers, &body).await? else {
        tracing::debug!("Payment provider does not use webhooks, ignoring delivery");
        return Ok(ack());
    };

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Received payment webhook");
    metrics::counter!("coursectl_webhook_events_total", "event_type" => event.event_type.clone()).increment(1);

    let result = match event.event_type.as_str() {
        t if PAID_EVENTS.contains(&t) => handle_paid(&state, &event).await,
        EXPIRED_EVENT => handle_expired(&state, &event).await,
        other => {
            tracing::debug!(event_type = %other, "Ignoring webhook event type");
            Ok(())
        }
    };

    match result {
        Ok(()) => Ok(ack()),
        // Ask the provider to redeliver; reconciliation is idempotent
        Err(e) if e.is_retryable() => Err(e),
        Err(e) => {
            // Redelivering will not fix a bad payload, so acknowledge it
            tracing::error!(event_id = %event.id, error = %e, "Webhook event could not be applied");
            Ok(ack())
        }
    }
}

fn ack() -> (StatusCode, Json<WebhookAck>) {
    (StatusCode::OK, Json(WebhookAck { received: true }))
}

fn event_session(event: &WebhookEvent) -> Result<&CheckoutSession> {
    event.session.as_ref().ok_or_else(|| Error::BadRequest {
        message: format!("webhook event {} has no checkout session", event.id),
    })
}

async fn handle_paid(state: &AppState, event: &WebhookEvent) -> Result<()> {
    let session = event_session(event)?;

    // `completed` fires before the money moves for delayed payment methods
    if !session.is_paid() {
        tracing::info!(session_id = %session.id, status = ?session.payment_status, "Session not paid yet, waiting for a later event");
        return Ok(());
    }

    let confirmation =
        reconciler::confirmation_from_session(session, ConfirmationSource::Webhook, &ExpectedIdentifiers::default())?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let summary = reconciler::reconcile(&mut conn, &confirmation).await?;

    if summary.already_done() {
        tracing::debug!(session_id = %session.id, "Webhook delivery was already applied");
    }
    Ok(())
}

async fn handle_expired(state: &AppState, event: &WebhookEvent) -> Result<()> {
    let session = event_session(event)?;
    let metadata = CheckoutMetadata::from_map(&session.metadata).map_err(|e| Error::BadRequest {
        message: format!("expired session {} has unusable metadata: {e}", session.id),
    })?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Orders::new(&mut conn).cancel_if_pending(metadata.order_id).await? {
        tracing::info!(order_id = %metadata.order_id, session_id = %session.id, "Canceled order for expired checkout session");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        api::models::{
            payments::{CheckoutResponse, VerifySessionResponse},
            users::{CurrentUser, Role},
        },
        db::{
            handlers::{DiscountCodes, Enrollments, Orders},
            models::orders::OrderStatus,
        },
        payment_providers::{PaymentProvider, dummy::DummyProvider, stripe::StripeProvider},
        reconciler::{DiscountOutcome, EnrollmentOutcome, OrderOutcome},
        test_utils::{
            add_auth_headers, create_test_app, create_test_app_with_provider, create_test_config, create_test_course,
            create_test_discount, create_test_user, percentage_code, stripe_checkout_session_json, stripe_event_json,
            stripe_payment_intent_json, stripe_test_config,
        },
        types::Money,
    };
    use serde_json::{Value, json};
    use sqlx::PgPool;
    use std::sync::Arc;
    use uuid::Uuid;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    #[sqlx::test]
    #[test_log::test]
    async fn test_checkout_requires_login(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let course = create_test_course(&pool, 5000).await;

        let response = server
            .post("/api/v1/payments/checkout")
            .json(&json!({ "courseId": course.id }))
            .await;
        response.assert_status_unauthorized();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_checkout_unknown_course_is_404(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Student).await;
        let (name, value) = add_auth_headers(&user);

        let response = server
            .post("/api/v1/payments/checkout")
            .add_header(name, value)
            .json(&json!({ "courseId": Uuid::new_v4() }))
            .await;
        response.assert_status_not_found();
        assert_eq!(response.json::<Value>()["error"], "NOT_FOUND");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_free_course_enrolls_once(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Student).await;
        let course = create_test_course(&pool, 0).await;
        let (name, value) = add_auth_headers(&user);

        for _ in 0..2 {
            let response = server
                .post("/api/v1/payments/checkout")
                .add_header(name.clone(), value.clone())
                .json(&json!({ "courseId": course.id, "couponCode": "IGNORED" }))
                .await;
            response.assert_status_ok();
            let body: CheckoutResponse = response.json();
            assert!(body.success);
            assert!(body.url.is_none());
            assert!(body.message.is_some());
        }

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(Enrollments::new(&mut conn).list_for_user(user.id).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_fully_discounted_checkout_skips_provider(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Student).await;
        let course = create_test_course(&pool, 5000).await;
        let code = create_test_discount(&pool, percentage_code("FREEBIE", 100)).await;
        let (name, value) = add_auth_headers(&user);

        let response = server
            .post("/api/v1/payments/checkout")
            .add_header(name, value)
            .json(&json!({ "courseId": course.id, "couponCode": "freebie" }))
            .await;
        response.assert_status_ok();
        let body: CheckoutResponse = response.json();
        assert!(body.url.is_none());
        assert_eq!(body.discount_applied, Some(Money::from_minor(5000)));

        let mut conn = pool.acquire().await.unwrap();
        let order = Orders::new(&mut conn).get(body.order_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.total_amount, Money::ZERO);
        let code = DiscountCodes::new(&mut conn).get(code.id).await.unwrap().unwrap();
        assert_eq!(code.used_count, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_rejected_code_reports_reason(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Student).await;
        let course = create_test_course(&pool, 5000).await;
        let (name, value) = add_auth_headers(&user);

        let response = server
            .post("/api/v1/payments/checkout")
            .add_header(name, value)
            .json(&json!({ "courseId": course.id, "couponCode": "NOPE" }))
            .await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["error"], "DISCOUNT_REJECTED");
        assert_eq!(body["reason"], "INVALID_CODE");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_checkout_and_verify_with_dummy_provider(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Student).await;
        let course = create_test_course(&pool, 10000).await;
        create_test_discount(&pool, percentage_code("SAVE20", 20)).await;
        let (name, value) = add_auth_headers(&user);

        let response = server
            .post("/api/v1/payments/checkout")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "courseId": course.id, "couponCode": "save20" }))
            .await;
        response.assert_status_ok();
        let checkout: CheckoutResponse = response.json();
        let session_id = checkout.session_id.clone().unwrap();
        assert_eq!(checkout.discount_applied, Some(Money::from_minor(2000)));
        assert!(checkout.url.unwrap().contains(&session_id));

        // Enrollment waits for confirmation
        let mut conn = pool.acquire().await.unwrap();
        assert!(Enrollments::new(&mut conn).get(user.id, course.id).await.unwrap().is_none());

        for expected_enrollment in [EnrollmentOutcome::Created, EnrollmentOutcome::AlreadyExisted] {
            let response = server
                .post("/api/v1/payments/verify-session")
                .add_header(name.clone(), value.clone())
                .json(&json!({ "sessionId": session_id, "courseId": course.id }))
                .await;
            response.assert_status_ok();
            let verified: VerifySessionResponse = response.json();
            assert_eq!(verified.summary.enrollment, expected_enrollment);
            assert_eq!(verified.order.status, OrderStatus::Completed);
            assert_eq!(verified.amount, Money::from_minor(8000));
            assert_eq!(verified.payment_status.as_deref(), Some("succeeded"));
        }

        let enrollment = Enrollments::new(&mut conn).get(user.id, course.id).await.unwrap().unwrap();
        assert!(enrollment.payment_transaction_id.unwrap().starts_with("dummy_pi_"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_verify_session_of_another_user_is_integrity_error(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let buyer = create_test_user(&pool, Role::Student).await;
        let other = create_test_user(&pool, Role::Student).await;
        let course = create_test_course(&pool, 5000).await;

        let (name, value) = add_auth_headers(&buyer);
        let checkout: CheckoutResponse = server
            .post("/api/v1/payments/checkout")
            .add_header(name, value)
            .json(&json!({ "courseId": course.id }))
            .await
            .json();

        let (name, value) = add_auth_headers(&other);
        let response = server
            .post("/api/v1/payments/verify-session")
            .add_header(name, value)
            .json(&json!({ "sessionId": checkout.session_id.unwrap() }))
            .await;
        response.assert_status_bad_request();
        assert_eq!(response.json::<Value>()["error"], "INTEGRITY_ERROR");

        let mut conn = pool.acquire().await.unwrap();
        assert!(Enrollments::new(&mut conn).get(other.id, course.id).await.unwrap().is_none());
        assert!(Enrollments::new(&mut conn).get(buyer.id, course.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_checkout_without_provider_is_501(pool: PgPool) {
        let (server, _bg) = create_test_app_with_provider(pool.clone(), None).await;
        let user = create_test_user(&pool, Role::Student).await;
        let course = create_test_course(&pool, 5000).await;
        let (name, value) = add_auth_headers(&user);

        let response = server
            .post("/api/v1/payments/checkout")
            .add_header(name, value)
            .json(&json!({ "courseId": course.id }))
            .await;
        response.assert_status(axum::http::StatusCode::NOT_IMPLEMENTED);
        assert_eq!(response.json::<Value>()["error"], "PAYMENT_NOT_CONFIGURED");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_dummy_webhook_is_acknowledged(pool: PgPool) {
        let provider: Arc<dyn PaymentProvider> = Arc::new(DummyProvider::from(crate::config::DummyConfig::default()));
        let (server, _bg) = create_test_app_with_provider(pool, Some(provider)).await;

        let response = server.post("/webhooks/payments").text("{}").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>(), json!({ "received": true }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_repeat_checkout_cancels_earlier_pending_order(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Student).await;
        let course = create_test_course(&pool, 5000).await;
        create_test_discount(&pool, percentage_code("SAVE10", 10)).await;
        let (name, value) = add_auth_headers(&user);

        let mut orders = Vec::new();
        for _ in 0..2 {
            let response = server
                .post("/api/v1/payments/checkout")
                .add_header(name.clone(), value.clone())
                .json(&json!({ "courseId": course.id, "couponCode": "SAVE10" }))
                .await;
            response.assert_status_ok();
            orders.push(response.json::<CheckoutResponse>().order_id.unwrap());
        }
        assert_ne!(orders[0], orders[1]);

        let mut conn = pool.acquire().await.unwrap();
        let first = Orders::new(&mut conn).get(orders[0]).await.unwrap().unwrap();
        let second = Orders::new(&mut conn).get(orders[1]).await.unwrap().unwrap();
        assert_eq!(first.status, OrderStatus::Canceled);
        assert_eq!(second.status, OrderStatus::Pending);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_code_used_once_is_rejected_on_next_course(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Student).await;
        let first = create_test_course(&pool, 10000).await;
        let second = create_test_course(&pool, 8000).await;
        let code = create_test_discount(&pool, percentage_code("ONCE", 10)).await;
        assert_eq!(code.max_uses_per_user, Some(1));
        let (name, value) = add_auth_headers(&user);

        let checkout: CheckoutResponse = server
            .post("/api/v1/payments/checkout")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "courseId": first.id, "couponCode": "ONCE" }))
            .await
            .json();
        server
            .post("/api/v1/payments/verify-session")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "sessionId": checkout.session_id.unwrap(), "courseId": first.id }))
            .await
            .assert_status_ok();

        let response = server
            .post("/api/v1/payments/checkout")
            .add_header(name, value)
            .json(&json!({ "courseId": second.id, "couponCode": "once" }))
            .await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["error"], "DISCOUNT_REJECTED");
        assert_eq!(body["reason"], "PER_USER_LIMIT");

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(DiscountCodes::new(&mut conn).count_user_usages(code.id, user.id).await.unwrap(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_code_held_by_unpaid_checkout_is_rejected_on_next_course(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Student).await;
        let first = create_test_course(&pool, 10000).await;
        let second = create_test_course(&pool, 8000).await;
        create_test_discount(&pool, percentage_code("ONCE", 10)).await;
        let (name, value) = add_auth_headers(&user);

        server
            .post("/api/v1/payments/checkout")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "courseId": first.id, "couponCode": "ONCE" }))
            .await
            .assert_status_ok();

        let response = server
            .post("/api/v1/payments/checkout")
            .add_header(name, value)
            .json(&json!({ "courseId": second.id, "couponCode": "ONCE" }))
            .await;
        response.assert_status_bad_request();
        assert_eq!(response.json::<Value>()["reason"], "PER_USER_LIMIT");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_first_checkout_by_unprovisioned_user_enrolls(pool: PgPool) {
        let (server, _bg) = create_test_app(pool.clone()).await;
        let course = create_test_course(&pool, 0).await;
        let user = CurrentUser {
            id: Uuid::new_v4(),
            email: "fresh.learner@example.com".to_string(),
            role: Role::Student,
        };
        let token = crate::auth::session::create_session_token(&user, &create_test_config()).unwrap();

        let response = server
            .post("/api/v1/payments/checkout")
            .add_header("authorization", format!("Bearer {token}"))
            .json(&json!({ "courseId": course.id }))
            .await;
        response.assert_status_ok();
        assert!(response.json::<CheckoutResponse>().success);

        let mut conn = pool.acquire().await.unwrap();
        assert!(Enrollments::new(&mut conn).get(user.id, course.id).await.unwrap().is_some());
    }

    fn stripe_session(session_id: &str, metadata: &Value, status: &str, amount: i64) -> Value {
        stripe_checkout_session_json(session_id, metadata, status, amount)
    }

    /// A created session as returned by `POST /v1/checkout/sessions`
    fn created_session(session_id: &str) -> Value {
        let mut session = stripe_checkout_session_json(session_id, &json!({}), "unpaid", 0);
        session["url"] = json!(format!("https://checkout.stripe.com/c/pay/{session_id}"));
        session
    }

    /// Sign `payload` the way the provider does and POST it to the webhook endpoint
    async fn deliver(server: &axum_test::TestServer, provider: &StripeProvider, payload: &Value) -> axum_test::TestResponse {
        let body = payload.to_string();
        let signature = provider.sign_for_test(&body);
        server
            .post("/webhooks/payments")
            .add_header(crate::payment_providers::stripe::SIGNATURE_HEADER, signature)
            .text(body)
            .await
    }

    /// The SAVE10 scenario: a 100.00 course bought with a 10% code, confirmed by the browser and
    /// by a webhook that the provider delivers twice.
    #[sqlx::test]
    #[test_log::test]
    async fn test_save10_end_to_end_with_duplicate_webhook(pool: PgPool) {
        let mock = MockServer::start().await;
        let config = stripe_test_config(&mock.uri());
        let provider = Arc::new(StripeProvider::try_from(config.clone()).unwrap());
        let verifier = StripeProvider::try_from(config).unwrap();
        let (server, _bg) = create_test_app_with_provider(pool.clone(), Some(provider as Arc<dyn PaymentProvider>)).await;

        let user = create_test_user(&pool, Role::Student).await;
        let course = create_test_course(&pool, 10000).await;
        let code = create_test_discount(&pool, percentage_code("SAVE10", 10)).await;
        let (name, value) = add_auth_headers(&user);

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(created_session("cs_test_save10")))
            .expect(1)
            .mount(&mock)
            .await;

        let checkout: CheckoutResponse = server
            .post("/api/v1/payments/checkout")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "courseId": course.id, "couponCode": "SAVE10" }))
            .await
            .json();
        assert_eq!(checkout.session_id.as_deref(), Some("cs_test_save10"));
        assert_eq!(checkout.discount_applied, Some(Money::from_minor(1000)));
        let order_id = checkout.order_id.unwrap();

        let metadata = json!({
            "type": "course_purchase",
            "userId": user.id,
            "courseId": course.id,
            "orderId": order_id,
            "couponCode": "SAVE10",
            "originalAmount": "10000",
            "discountAmount": "1000",
            "finalAmount": "9000",
        });
        let session = stripe_session("cs_test_save10", &metadata, "paid", 9000);

        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_test_save10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session.clone()))
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_cs_test_save10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stripe_payment_intent_json("pi_cs_test_save10", "succeeded")))
            .mount(&mock)
            .await;

        // Browser returns first
        let verified: VerifySessionResponse = server
            .post("/api/v1/payments/verify-session")
            .add_header(name, value)
            .json(&json!({ "sessionId": "cs_test_save10", "orderId": order_id }))
            .await
            .json();
        assert_eq!(verified.summary.enrollment, EnrollmentOutcome::Created);
        assert_eq!(verified.summary.order, OrderOutcome::Completed);
        assert_eq!(verified.summary.discount, DiscountOutcome::Recorded);
        assert_eq!(verified.transaction_id.as_deref(), Some("pi_cs_test_save10"));
        assert_eq!(verified.currency, "usd");

        // Then the same event arrives twice
        let event = stripe_event_json("evt_save10", "checkout.session.completed", session);
        for _ in 0..2 {
            let response = deliver(&server, &verifier, &event).await;
            response.assert_status_ok();
            assert_eq!(response.json::<Value>(), json!({ "received": true }));
        }

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(Enrollments::new(&mut conn).list_for_user(user.id).await.unwrap().len(), 1);
        let order = Orders::new(&mut conn).get(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.total_amount, Money::from_minor(9000));
        let code = DiscountCodes::new(&mut conn).get(code.id).await.unwrap().unwrap();
        assert_eq!(code.used_count, 1);
        assert!(DiscountCodes::new(&mut conn).get_usage_for_order(order_id).await.unwrap().is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_webhook_rejects_bad_signature(pool: PgPool) {
        let mock = MockServer::start().await;
        let provider = Arc::new(StripeProvider::try_from(stripe_test_config(&mock.uri())).unwrap());
        let (server, _bg) = create_test_app_with_provider(pool, Some(provider as Arc<dyn PaymentProvider>)).await;

        let response = server
            .post("/webhooks/payments")
            .add_header(crate::payment_providers::stripe::SIGNATURE_HEADER, "t=1,v1=deadbeef")
            .text(json!({ "id": "evt_1", "type": "checkout.session.completed" }).to_string())
            .await;
        response.assert_status_bad_request();
        assert_eq!(response.json::<Value>()["error"], "AUTH_FAILED");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_webhook_for_unknown_order_is_acknowledged(pool: PgPool) {
        let mock = MockServer::start().await;
        let config = stripe_test_config(&mock.uri());
        let provider = Arc::new(StripeProvider::try_from(config.clone()).unwrap());
        let verifier = StripeProvider::try_from(config).unwrap();
        let (server, _bg) = create_test_app_with_provider(pool, Some(provider as Arc<dyn PaymentProvider>)).await;

        let metadata = json!({
            "type": "course_purchase",
            "userId": Uuid::new_v4(),
            "courseId": Uuid::new_v4(),
            "orderId": Uuid::new_v4(),
            "originalAmount": "5000",
            "discountAmount": "0",
            "finalAmount": "5000",
        });
        let event = stripe_event_json(
            "evt_orphan",
            "checkout.session.completed",
            stripe_session("cs_orphan", &metadata, "paid", 5000),
        );

        deliver(&server, &verifier, &event).await.assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_expired_session_cancels_pending_order(pool: PgPool) {
        let mock = MockServer::start().await;
        let config = stripe_test_config(&mock.uri());
        let provider = Arc::new(StripeProvider::try_from(config.clone()).unwrap());
        let verifier = StripeProvider::try_from(config).unwrap();
        let (server, _bg) = create_test_app_with_provider(pool.clone(), Some(provider as Arc<dyn PaymentProvider>)).await;

        let user = create_test_user(&pool, Role::Student).await;
        let course = create_test_course(&pool, 5000).await;
        let (name, value) = add_auth_headers(&user);

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(created_session("cs_expiring")))
            .mount(&mock)
            .await;

        let checkout: CheckoutResponse = server
            .post("/api/v1/payments/checkout")
            .add_header(name, value)
            .json(&json!({ "courseId": course.id }))
            .await
            .json();
        let order_id = checkout.order_id.unwrap();

        let metadata = json!({
            "type": "course_purchase",
            "userId": user.id,
            "courseId": course.id,
            "orderId": order_id,
            "originalAmount": "5000",
            "discountAmount": "0",
            "finalAmount": "5000",
        });
        let event = stripe_event_json(
            "evt_expired",
            "checkout.session.expired",
            stripe_session("cs_expiring", &metadata, "unpaid", 5000),
        );
        deliver(&server, &verifier, &event).await.assert_status_ok();

        let mut conn = pool.acquire().await.unwrap();
        let order = Orders::new(&mut conn).get(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
        assert!(Enrollments::new(&mut conn).get(user.id, course.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_gateway_outage_surfaces_as_503(pool: PgPool) {
        let mock = MockServer::start().await;
        let provider = Arc::new(StripeProvider::try_from(stripe_test_config(&mock.uri())).unwrap());
        let (server, _bg) = create_test_app_with_provider(pool.clone(), Some(provider as Arc<dyn PaymentProvider>)).await;
        let user = create_test_user(&pool, Role::Student).await;
        let course = create_test_course(&pool, 5000).await;
        let (name, value) = add_auth_headers(&user);

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": { "message": "Service unavailable", "type": "api_error" }
            })))
            .mount(&mock)
            .await;

        let response = server
            .post("/api/v1/payments/checkout")
            .add_header(name, value)
            .json(&json!({ "courseId": course.id }))
            .await;
        response.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.json::<Value>()["error"], "GATEWAY_UNAVAILABLE");

        // The unpayable order is not left pending
        let status: String = sqlx::query_scalar("SELECT status FROM orders WHERE user_id = $1")
            .bind(user.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "CANCELED");
    }
}
