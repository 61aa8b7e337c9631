//! HTTP request handlers for all API endpoints.
//!
//! Each handler is responsible for request deserialization, authentication via the
//! [`CurrentUser`](crate::api::models::users::CurrentUser) extractor, calling into the
//! domain modules and serializing the response.
//!
//! # Handler Modules
//!
//! - [`payments`]: Checkout, session verification and the payment provider webhook
//! - [`discounts`]: Discount code creation and price previews
//! - [`orders`]: Order lookup
//! - [`enrollments`]: The caller's enrollments
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`] which converts to the appropriate HTTP status
//! code and a JSON error body with a stable `error` code.

pub mod discounts;
pub mod enrollments;
pub mod orders;
pub mod payments;
