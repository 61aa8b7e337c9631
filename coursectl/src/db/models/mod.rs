//! Database record models matching table schemas.
//!
//! These models are returned by the repositories in [`crate::db::handlers`] and are kept
//! separate from the API models in [`crate::api::models`] so storage and wire formats can evolve
//! independently.
//!
//! Naming follows a request/response convention:
//!
//! - `*CreateDBRequest`: data needed to insert a row
//! - `*DBResponse`: a row as read back from the database
//!
//! All amounts are [`crate::types::Money`] (integer minor units).

pub mod courses;
pub mod discounts;
pub mod enrollments;
pub mod orders;
pub mod users;
