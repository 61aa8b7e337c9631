//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with PostgreSQL.
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers, reconciler, sweeper)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries & conditional updates)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Idempotency
//!
//! Correctness under duplicate and concurrent payment confirmations comes from the schema, not
//! from in-process locking:
//!
//! - `enrollments_user_course_unique` on `(user_id, course_id)`
//! - `discount_usages_order_id_unique` on `order_id`
//! - status transitions expressed as `UPDATE orders ... WHERE status = 'PENDING'`
//!
//! # Migrations
//!
//! Migrations live in `migrations/` and are embedded via [`crate::migrator`]:
//!
//! ```ignore
//! coursectl::migrator().run(&pool).await?;
//! ```

pub mod errors;
pub mod handlers;
pub mod models;
