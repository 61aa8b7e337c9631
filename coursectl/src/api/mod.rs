//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Payments** (`/api/v1/payments/*`): Checkout and checkout-session verification
//! - **Discounts** (`/api/v1/discounts/*`): Code administration and price previews
//! - **Orders** (`/api/v1/orders/*`): The caller's orders
//! - **Enrollments** (`/api/v1/enrollments`): The caller's enrollments
//! - **Webhooks** (`/webhooks/payments`): Payment provider callbacks, authenticated by signature
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa`. The document is served at
//! `/api-docs/openapi.json` and rendered at `/docs`.

pub mod handlers;
pub mod models;
