//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection` (a pooled connection or an open transaction) and
//! exposes strongly-typed operations returning models from [`crate::db::models`].
//!
//! ```ignore
//! use coursectl::db::handlers::{Enrollments, Orders};
//!
//! let mut tx = pool.begin().await?;
//! let created = Enrollments::new(&mut tx).enroll_if_absent(user_id, course_id, Some("pi_123")).await?;
//! let completed = Orders::new(&mut tx).complete_if_pending(order_id, Some("pi_123")).await?;
//! tx.commit().await?;
//! ```
//!
//! Repositories never commit the caller's transaction. Multi-statement operations that must be
//! atomic on their own (order + item insert, usage + counter increment) open a nested
//! transaction, which becomes a savepoint when the caller already has one open.

pub mod courses;
pub mod discounts;
pub mod enrollments;
pub mod orders;
pub mod users;

pub use courses::Courses;
pub use discounts::DiscountCodes;
pub use enrollments::Enrollments;
pub use orders::Orders;
pub use users::Users;
