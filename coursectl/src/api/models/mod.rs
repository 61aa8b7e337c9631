//! API request and response data models.
//!
//! This module contains the data structures used for HTTP request deserialization
//! and response serialization. These models define the public API contract and are
//! kept separate from the database models so the two can evolve independently.
//! Field names are camelCase on the wire.
//!
//! - [`users`]: Roles and the authenticated caller
//! - [`payments`]: Checkout, session verification and webhook acknowledgement
//! - [`discounts`]: Discount code administration and price previews
//! - [`orders`]: Orders and their line items
//! - [`enrollments`]: A learner's enrollments

pub mod discounts;
pub mod enrollments;
pub mod orders;
pub mod payments;
pub mod users;
