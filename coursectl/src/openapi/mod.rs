//! OpenAPI documentation for the course-sales API.
//!
//! Served as JSON at `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, errors, reconciler};

/// Session JWT as a bearer token or as the dashboard's session cookie.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Session token issued at login. Include it in the `Authorization` header:\n\n\
                            ```\nAuthorization: Bearer YOUR_SESSION_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
            components.security_schemes.insert(
                "CookieAuth".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "coursectl_session",
                    "The same session token, sent by the dashboard as a cookie",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "coursectl",
        description = "Course checkout, payment confirmation and enrollment API"
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::payments::checkout,
        api::handlers::payments::verify_session,
        api::handlers::payments::webhook,
        api::handlers::discounts::create_discount_code,
        api::handlers::discounts::validate_discount_code,
        api::handlers::orders::get_order,
        api::handlers::enrollments::list_my_enrollments,
    ),
    components(
        schemas(
            api::models::payments::CheckoutRequest,
            api::models::payments::CheckoutResponse,
            api::models::payments::VerifySessionRequest,
            api::models::payments::VerifySessionResponse,
            api::models::payments::WebhookAck,
            api::models::discounts::DiscountCodeCreate,
            api::models::discounts::DiscountCodeResponse,
            api::models::discounts::DiscountValidateRequest,
            api::models::discounts::DiscountValidateResponse,
            api::models::orders::OrderResponse,
            api::models::orders::OrderItemResponse,
            api::models::enrollments::EnrollmentResponse,
            reconciler::ReconcileSummary,
            reconciler::EnrollmentOutcome,
            reconciler::OrderOutcome,
            reconciler::DiscountOutcome,
            errors::ErrorBody,
            crate::discounts::DiscountRejection,
            crate::types::Money,
        )
    ),
    tags(
        (name = "payments", description = "Checkout and payment confirmation"),
        (name = "discounts", description = "Discount codes"),
        (name = "orders", description = "Purchase orders"),
        (name = "enrollments", description = "Course enrollments"),
    )
)]
pub struct ApiDoc;
