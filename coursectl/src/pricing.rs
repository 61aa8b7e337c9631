//! Price computation for a single-course purchase.
//!
//! Pure functions only: callers load the course and (already validated) discount code and persist
//! the resulting [`PriceBreakdown`] on the order.

use crate::{
    db::models::discounts::{DiscountCodeDBResponse, DiscountValue},
    types::Money,
};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::Serialize;
use utoipa::ToSchema;

/// What the learner is charged, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub original_amount: Money,
    pub discount_amount: Money,
    pub final_amount: Money,
}

impl PriceBreakdown {
    /// Nothing to collect from the payment provider.
    pub fn is_free(&self) -> bool {
        self.final_amount.is_zero()
    }
}

/// Compute the discount and final amount for `base`.
///
/// Invariants: `0 <= discount_amount <= original_amount` and
/// `final_amount == original_amount - discount_amount`.
pub fn compute_price(base: Money, code: Option<&DiscountCodeDBResponse>) -> PriceBreakdown {
    let base = base.max(Money::ZERO);

    let discount = match code {
        None => Money::ZERO,
        Some(code) => {
            let raw = match code.value {
                DiscountValue::Percentage(percent) => percent_of(base, percent),
                DiscountValue::FixedAmount(amount) => amount.max(Money::ZERO),
            };
            let capped = match code.max_discount_amount {
                Some(cap) => raw.min(cap.max(Money::ZERO)),
                None => raw,
            };
            capped.min(base)
        }
    };

    PriceBreakdown {
        original_amount: base,
        discount_amount: discount,
        final_amount: base.saturating_sub(discount),
    }
}

/// `base * percent / 100`, rounded half away from zero to a whole minor unit.
fn percent_of(base: Money, percent: Decimal) -> Money {
    let percent = percent.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
    let exact = Decimal::from(base.minor()) * percent / Decimal::ONE_HUNDRED;
    let rounded = exact.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    // In range by construction: 0 <= rounded <= base
    Money::from_minor(rounded.to_i64().unwrap_or(base.minor()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::discounts::DiscountScope;
    use chrono::Utc;
    use uuid::Uuid;

    fn code(value: DiscountValue, max_discount_amount: Option<i64>) -> DiscountCodeDBResponse {
        DiscountCodeDBResponse {
            id: Uuid::new_v4(),
            code: "TEST".to_string(),
            value,
            max_uses: None,
            max_uses_per_user: Some(1),
            used_count: 0,
            starts_at: None,
            expires_at: None,
            min_purchase_amount: None,
            max_discount_amount: max_discount_amount.map(Money::from_minor),
            applicable_to_type: DiscountScope::All,
            applicable_to_id: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn breakdown(original: i64, discount: i64, final_amount: i64) -> PriceBreakdown {
        PriceBreakdown {
            original_amount: Money::from_minor(original),
            discount_amount: Money::from_minor(discount),
            final_amount: Money::from_minor(final_amount),
        }
    }

    #[test]
    fn test_no_code_charges_full_price() {
        assert_eq!(compute_price(Money::from_minor(4500), None), breakdown(4500, 0, 4500));
    }

    #[test]
    fn test_percentage_discount() {
        let twenty = code(DiscountValue::Percentage(Decimal::from(20)), None);
        assert_eq!(compute_price(Money::from_minor(10000), Some(&twenty)), breakdown(10000, 2000, 8000));
    }

    #[test]
    fn test_percentage_discount_respects_cap() {
        let capped = code(DiscountValue::Percentage(Decimal::from(20)), Some(1000));
        assert_eq!(compute_price(Money::from_minor(10000), Some(&capped)), breakdown(10000, 1000, 9000));
    }

    #[test]
    fn test_percentage_rounds_half_away_from_zero() {
        // 12.5% of 1.00 = 12.5 cents
        let odd = code(DiscountValue::Percentage(Decimal::new(125, 1)), None);
        assert_eq!(compute_price(Money::from_minor(100), Some(&odd)), breakdown(100, 13, 87));

        // 33.33% of 0.10 = 3.333 cents
        let third = code(DiscountValue::Percentage(Decimal::new(3333, 2)), None);
        assert_eq!(compute_price(Money::from_minor(10), Some(&third)), breakdown(10, 3, 7));
    }

    #[test]
    fn test_fixed_amount_never_goes_negative() {
        let fifty_off = code(DiscountValue::FixedAmount(Money::from_minor(5000)), None);
        let price = compute_price(Money::from_minor(3000), Some(&fifty_off));

        assert_eq!(price, breakdown(3000, 3000, 0));
        assert!(price.is_free());
    }

    #[test]
    fn test_fixed_amount_respects_cap() {
        let ten_off = code(DiscountValue::FixedAmount(Money::from_minor(1000)), Some(400));
        assert_eq!(compute_price(Money::from_minor(3000), Some(&ten_off)), breakdown(3000, 400, 2600));
    }

    #[test]
    fn test_full_percentage_is_free() {
        let full = code(DiscountValue::Percentage(Decimal::ONE_HUNDRED), None);
        assert!(compute_price(Money::from_minor(4999), Some(&full)).is_free());
    }
}
