//! Common type definitions.
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`CourseId`]: Course identifier
//! - [`CategoryId`]: Course category identifier
//! - [`OrderId`]: Purchase order identifier
//! - [`DiscountCodeId`]: Discount code identifier
//! - [`EnrollmentId`]: Enrollment identifier
//!
//! # Money
//!
//! [`Money`] is the only representation of an amount anywhere in the crate: a signed count of
//! minor currency units (cents). Payment providers that need a different representation convert
//! at their own boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type CourseId = Uuid;
pub type CategoryId = Uuid;
pub type OrderId = Uuid;
pub type DiscountCodeId = Uuid;
pub type EnrollmentId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// An amount of money in minor units (e.g. cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(transparent)]
#[serde(transparent)]
#[schema(value_type = i64, example = 4500)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Subtraction floored at zero.
    pub fn saturating_sub(self, rhs: Money) -> Money {
        Money((self.0 - rhs.0).max(0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_minor(4500).to_string(), "45.00");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-1999).to_string(), "-19.99");
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        assert_eq!(Money::from_minor(100).saturating_sub(Money::from_minor(250)), Money::ZERO);
        assert_eq!(Money::from_minor(100).saturating_sub(Money::from_minor(25)), Money::from_minor(75));
    }

    #[test]
    fn test_money_serializes_as_integer() {
        let json = serde_json::to_string(&Money::from_minor(4500)).unwrap();
        assert_eq!(json, "4500");
    }

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }
}
