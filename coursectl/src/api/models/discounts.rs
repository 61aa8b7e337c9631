//! API request/response models for discount codes.

use crate::{
    db::models::discounts::{DiscountCodeCreateDBRequest, DiscountCodeDBResponse, DiscountScope, DiscountType, DiscountValue},
    errors::Error,
    pricing::PriceBreakdown,
    types::{CourseId, DiscountCodeId, Money},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscountCodeCreate {
    /// Code learners type at checkout; stored upper-cased
    pub code: String,
    pub discount_type: DiscountType,
    /// Percent off (0 < value <= 100) for `PERCENTAGE`, or a whole number of minor units for
    /// `FIXED_AMOUNT`. Sent as a string to preserve precision.
    #[schema(value_type = String)]
    pub discount_value: Decimal,
    pub max_uses: Option<i32>,
    /// Redemptions allowed per learner. Defaults to 1 when omitted; an explicit `null` removes
    /// the limit.
    #[serde(default = "default_max_uses_per_user")]
    pub max_uses_per_user: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub min_purchase_amount: Option<Money>,
    pub max_discount_amount: Option<Money>,
    #[serde(default = "default_scope")]
    pub applicable_to_type: DiscountScope,
    /// Course or category id; required unless `applicableToType` is `ALL`
    #[schema(value_type = Option<String>, format = "uuid")]
    pub applicable_to_id: Option<Uuid>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_max_uses_per_user() -> Option<i32> {
    Some(1)
}

fn default_scope() -> DiscountScope {
    DiscountScope::All
}

fn default_active() -> bool {
    true
}

impl TryFrom<DiscountCodeCreate> for DiscountCodeCreateDBRequest {
    type Error = Error;

    fn try_from(req: DiscountCodeCreate) -> Result<Self, Error> {
        let bad = |message: &str| Error::BadRequest {
            message: message.to_string(),
        };

        let code = req.code.trim();
        if code.is_empty() || code.len() > 64 {
            return Err(bad("Discount code must be between 1 and 64 characters"));
        }
        if code.chars().any(char::is_whitespace) {
            return Err(bad("Discount code must not contain whitespace"));
        }

        let value = match req.discount_type {
            DiscountType::Percentage => {
                if req.discount_value <= Decimal::ZERO || req.discount_value > Decimal::ONE_HUNDRED {
                    return Err(bad("Percentage discount must be greater than 0 and at most 100"));
                }
                DiscountValue::Percentage(req.discount_value)
            }
            DiscountType::FixedAmount => {
                if !req.discount_value.fract().is_zero() || req.discount_value <= Decimal::ZERO {
                    return Err(bad("Fixed discount must be a positive whole number of minor units"));
                }
                let minor = i64::try_from(req.discount_value).map_err(|_| bad("Fixed discount is out of range"))?;
                DiscountValue::FixedAmount(Money::from_minor(minor))
            }
        };

        if req.max_uses.is_some_and(|n| n < 1) || req.max_uses_per_user.is_some_and(|n| n < 1) {
            return Err(bad("Usage limits must be at least 1"));
        }
        if let (Some(starts), Some(expires)) = (req.starts_at, req.expires_at)
            && expires <= starts
        {
            return Err(bad("expiresAt must be after startsAt"));
        }
        if req.min_purchase_amount.is_some_and(|m| m.minor() < 0) || req.max_discount_amount.is_some_and(|m| m.minor() <= 0) {
            return Err(bad("Purchase and discount limits must be positive"));
        }
        match (req.applicable_to_type, req.applicable_to_id) {
            (DiscountScope::All, Some(_)) => return Err(bad("applicableToId must be omitted for ALL")),
            (DiscountScope::Course | DiscountScope::Category, None) => {
                return Err(bad("applicableToId is required for COURSE and CATEGORY codes"));
            }
            _ => {}
        }

        Ok(DiscountCodeCreateDBRequest {
            code: code.to_string(),
            value,
            max_uses: req.max_uses,
            max_uses_per_user: req.max_uses_per_user,
            starts_at: req.starts_at,
            expires_at: req.expires_at,
            min_purchase_amount: req.min_purchase_amount,
            max_discount_amount: req.max_discount_amount,
            applicable_to_type: req.applicable_to_type,
            applicable_to_id: req.applicable_to_id,
            is_active: req.is_active,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscountValidateRequest {
    pub code: String,
    #[schema(value_type = String, format = "uuid")]
    pub course_id: CourseId,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscountCodeResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: DiscountCodeId,
    pub code: String,
    pub discount_type: DiscountType,
    #[schema(value_type = String)]
    pub discount_value: Decimal,
    pub max_uses: Option<i32>,
    pub max_uses_per_user: Option<i32>,
    pub used_count: i32,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub min_purchase_amount: Option<Money>,
    pub max_discount_amount: Option<Money>,
    pub applicable_to_type: DiscountScope,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub applicable_to_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<DiscountCodeDBResponse> for DiscountCodeResponse {
    fn from(db: DiscountCodeDBResponse) -> Self {
        let discount_value = match db.value {
            DiscountValue::Percentage(p) => p,
            DiscountValue::FixedAmount(m) => Decimal::from(m.minor()),
        };
        Self {
            id: db.id,
            code: db.code,
            discount_type: db.value.discount_type(),
            discount_value,
            max_uses: db.max_uses,
            max_uses_per_user: db.max_uses_per_user,
            used_count: db.used_count,
            starts_at: db.starts_at,
            expires_at: db.expires_at,
            min_purchase_amount: db.min_purchase_amount,
            max_discount_amount: db.max_discount_amount,
            applicable_to_type: db.applicable_to_type,
            applicable_to_id: db.applicable_to_id,
            is_active: db.is_active,
            created_at: db.created_at,
        }
    }
}

/// Price preview for a code that passed validation. Nothing is reserved or recorded.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscountValidateResponse {
    pub valid: bool,
    pub code: String,
    pub discount_type: DiscountType,
    pub original_amount: Money,
    pub discount_amount: Money,
    pub final_amount: Money,
}

impl DiscountValidateResponse {
    pub fn new(code: &DiscountCodeDBResponse, price: PriceBreakdown) -> Self {
        Self {
            valid: true,
            code: code.code.clone(),
            discount_type: code.value.discount_type(),
            original_amount: price.original_amount,
            discount_amount: price.discount_amount,
            final_amount: price.final_amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(discount_type: DiscountType, value: Decimal) -> DiscountCodeCreate {
        DiscountCodeCreate {
            code: " save10 ".to_string(),
            discount_type,
            discount_value: value,
            max_uses: None,
            max_uses_per_user: Some(1),
            starts_at: None,
            expires_at: None,
            min_purchase_amount: None,
            max_discount_amount: None,
            applicable_to_type: DiscountScope::All,
            applicable_to_id: None,
            is_active: true,
        }
    }

    #[test]
    fn test_create_request_converts_to_db_request() {
        let db = DiscountCodeCreateDBRequest::try_from(request(DiscountType::Percentage, Decimal::from(10))).unwrap();
        assert_eq!(db.code, "save10");
        assert_eq!(db.value, DiscountValue::Percentage(Decimal::from(10)));

        let db = DiscountCodeCreateDBRequest::try_from(request(DiscountType::FixedAmount, Decimal::from(500))).unwrap();
        assert_eq!(db.value, DiscountValue::FixedAmount(Money::from_minor(500)));
    }

    #[test]
    fn test_create_request_rejects_bad_values() {
        for (kind, value) in [
            (DiscountType::Percentage, Decimal::ZERO),
            (DiscountType::Percentage, Decimal::from(101)),
            (DiscountType::FixedAmount, Decimal::new(105, 1)),
            (DiscountType::FixedAmount, Decimal::from(-5)),
        ] {
            let result = DiscountCodeCreateDBRequest::try_from(request(kind, value));
            assert!(matches!(result, Err(Error::BadRequest { .. })), "{kind:?} {value} should be rejected");
        }
    }

    #[test]
    fn test_scoped_codes_need_a_target() {
        let mut req = request(DiscountType::Percentage, Decimal::from(10));
        req.applicable_to_type = DiscountScope::Course;
        assert!(DiscountCodeCreateDBRequest::try_from(req.clone()).is_err());

        req.applicable_to_id = Some(Uuid::new_v4());
        assert!(DiscountCodeCreateDBRequest::try_from(req).is_ok());
    }

    #[test]
    fn test_expiry_must_follow_start() {
        let mut req = request(DiscountType::Percentage, Decimal::from(10));
        let now = Utc::now();
        req.starts_at = Some(now);
        req.expires_at = Some(now - chrono::Duration::hours(1));
        assert!(DiscountCodeCreateDBRequest::try_from(req).is_err());
    }

    #[test]
    fn test_per_user_limit_defaults_to_one() {
        let omitted: DiscountCodeCreate =
            serde_json::from_str(r#"{"code":"SAVE10","discountType":"PERCENTAGE","discountValue":"10"}"#).unwrap();
        assert_eq!(omitted.max_uses_per_user, Some(1));
        let db = DiscountCodeCreateDBRequest::try_from(omitted).unwrap();
        assert_eq!(db.max_uses_per_user, Some(1));

        let unlimited: DiscountCodeCreate = serde_json::from_str(
            r#"{"code":"SAVE10","discountType":"PERCENTAGE","discountValue":"10","maxUsesPerUser":null}"#,
        )
        .unwrap();
        assert_eq!(unlimited.max_uses_per_user, None);
    }
}
