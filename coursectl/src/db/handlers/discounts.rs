use crate::{
    db::{
        errors::{DbError, Result},
        models::discounts::{
            DiscountCodeCreateDBRequest, DiscountCodeDBResponse, DiscountScope, DiscountType, DiscountUsageCreateDBRequest,
            DiscountUsageDBResponse, DiscountValue, UsageRecord,
        },
    },
    types::{DiscountCodeId, Money, OrderId, UserId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Connection, FromRow, PgConnection};
use uuid::Uuid;

const CODE_COLUMNS: &str = "id, code, discount_type, percent_off, amount_off, max_uses, max_uses_per_user, used_count, \
     starts_at, expires_at, min_purchase_amount, max_discount_amount, applicable_to_type, applicable_to_id, is_active, created_at";

// Database entity model for a discount code row
#[derive(Debug, Clone, FromRow)]
struct DiscountCode {
    id: DiscountCodeId,
    code: String,
    discount_type: DiscountType,
    percent_off: Option<Decimal>,
    amount_off: Option<Money>,
    max_uses: Option<i32>,
    max_uses_per_user: Option<i32>,
    used_count: i32,
    starts_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    min_purchase_amount: Option<Money>,
    max_discount_amount: Option<Money>,
    applicable_to_type: DiscountScope,
    applicable_to_id: Option<Uuid>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<DiscountCode> for DiscountCodeDBResponse {
    type Error = DbError;

    fn try_from(row: DiscountCode) -> Result<Self> {
        let value = match (row.discount_type, row.percent_off, row.amount_off) {
            (DiscountType::Percentage, Some(percent), _) => DiscountValue::Percentage(percent),
            (DiscountType::FixedAmount, _, Some(amount)) => DiscountValue::FixedAmount(amount),
            (kind, _, _) => {
                return Err(DbError::Other(anyhow::anyhow!(
                    "discount code {} of type {kind:?} is missing its value",
                    row.id
                )));
            }
        };

        Ok(Self {
            id: row.id,
            code: row.code,
            value,
            max_uses: row.max_uses,
            max_uses_per_user: row.max_uses_per_user,
            used_count: row.used_count,
            starts_at: row.starts_at,
            expires_at: row.expires_at,
            min_purchase_amount: row.min_purchase_amount,
            max_discount_amount: row.max_discount_amount,
            applicable_to_type: row.applicable_to_type,
            applicable_to_id: row.applicable_to_id,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

/// Repository for discount codes and the usage ledger.
pub struct DiscountCodes<'c> {
    db: &'c mut PgConnection,
}

impl<'c> DiscountCodes<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create(&mut self, request: &DiscountCodeCreateDBRequest) -> Result<DiscountCodeDBResponse> {
        let row = sqlx::query_as::<_, DiscountCode>(&format!(
            r#"
            INSERT INTO discount_codes (
                code, discount_type, percent_off, amount_off, max_uses, max_uses_per_user,
                starts_at, expires_at, min_purchase_amount, max_discount_amount,
                applicable_to_type, applicable_to_id, is_active
            )
            VALUES (UPPER($1), $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {CODE_COLUMNS}
            "#
        ))
        .bind(request.code.trim())
        .bind(request.value.discount_type())
        .bind(request.value.percent_off())
        .bind(request.value.amount_off())
        .bind(request.max_uses)
        .bind(request.max_uses_per_user)
        .bind(request.starts_at)
        .bind(request.expires_at)
        .bind(request.min_purchase_amount)
        .bind(request.max_discount_amount)
        .bind(request.applicable_to_type)
        .bind(request.applicable_to_id)
        .bind(request.is_active)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    pub async fn get(&mut self, id: DiscountCodeId) -> Result<Option<DiscountCodeDBResponse>> {
        let row = sqlx::query_as::<_, DiscountCode>(&format!("SELECT {CODE_COLUMNS} FROM discount_codes WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    /// Look up a code case-insensitively. Codes are stored upper-cased.
    pub async fn get_by_code(&mut self, code: &str) -> Result<Option<DiscountCodeDBResponse>> {
        let row = sqlx::query_as::<_, DiscountCode>(&format!("SELECT {CODE_COLUMNS} FROM discount_codes WHERE code = UPPER($1)"))
            .bind(code.trim())
            .fetch_optional(&mut *self.db)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    /// Number of times `user_id` has already redeemed the code.
    pub async fn count_user_usages(&mut self, code_id: DiscountCodeId, user_id: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM discount_usages WHERE discount_code_id = $1 AND user_id = $2")
            .bind(code_id)
            .bind(user_id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }

    /// Number of the user's PENDING orders carrying the code. Each one may still be paid, so
    /// checkout counts them against the per-user limit.
    pub async fn count_user_pending_orders(&mut self, code_id: DiscountCodeId, user_id: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE discount_code_id = $1 AND user_id = $2 AND status = 'PENDING'",
        )
        .bind(code_id)
        .bind(user_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(count)
    }

    pub async fn get_usage_for_order(&mut self, order_id: OrderId) -> Result<Option<DiscountUsageDBResponse>> {
        let usage = sqlx::query_as::<_, DiscountUsageDBResponse>(
            r#"
            SELECT id, discount_code_id, user_id, order_id, original_amount, discount_amount, final_amount, created_at
            FROM discount_usages
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(usage)
    }

    /// Insert a usage row and bump the code's `used_count`, atomically.
    ///
    /// The unique constraint on `discount_usages.order_id` makes this safe to call repeatedly or
    /// concurrently for the same order: only the caller whose insert lands increments the counter.
    pub async fn record_usage(&mut self, request: &DiscountUsageCreateDBRequest) -> Result<UsageRecord> {
        let mut tx = self.db.begin().await?;

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO discount_usages (discount_code_id, user_id, order_id, original_amount, discount_amount, final_amount)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(request.discount_code_id)
        .bind(request.user_id)
        .bind(request.order_id)
        .bind(request.original_amount)
        .bind(request.discount_amount)
        .bind(request.final_amount)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            return Ok(UsageRecord::AlreadyRecorded);
        }

        let (used_count, max_uses): (i32, Option<i32>) = sqlx::query_as(
            "UPDATE discount_codes SET used_count = used_count + 1 WHERE id = $1 RETURNING used_count, max_uses",
        )
        .bind(request.discount_code_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if let Some(max) = max_uses
            && used_count > max
        {
            // Usage lands after payment, so concurrent checkouts can overshoot the cap
            tracing::warn!(
                discount_code_id = %request.discount_code_id,
                used_count,
                max_uses = max,
                "Discount code redeemed beyond its max_uses"
            );
        }

        Ok(UsageRecord::Recorded)
    }
}
