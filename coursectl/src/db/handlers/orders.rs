use crate::{
    db::{
        errors::Result,
        models::orders::{OrderCreateDBRequest, OrderDBResponse, OrderItemDBResponse, OrderStatus},
    },
    types::{CourseId, OrderId, UserId},
};
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};

const ORDER_COLUMNS: &str = "id, user_id, status, subtotal_amount, discount_amount, total_amount, discount_code_id, \
     checkout_session_id, payment_intent_id, created_at, updated_at, completed_at, canceled_at";

/// Repository for orders and their line items.
///
/// Every status transition is a single conditional `UPDATE ... WHERE status = 'PENDING'`, so
/// concurrent callers (verify, webhook, sweeper) race safely: the first transition wins and the
/// rest observe zero affected rows.
pub struct Orders<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Orders<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Create a PENDING order with a single item snapshotting the course price.
    pub async fn create_pending(&mut self, request: &OrderCreateDBRequest) -> Result<OrderDBResponse> {
        self.insert(request, OrderStatus::Pending).await
    }

    /// Create an order that is already COMPLETED (nothing left to pay).
    pub async fn create_completed(&mut self, request: &OrderCreateDBRequest) -> Result<OrderDBResponse> {
        self.insert(request, OrderStatus::Completed).await
    }

    async fn insert(&mut self, request: &OrderCreateDBRequest, status: OrderStatus) -> Result<OrderDBResponse> {
        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, OrderDBResponse>(&format!(
            r#"
            INSERT INTO orders (user_id, status, subtotal_amount, discount_amount, total_amount, discount_code_id, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $2 = 'COMPLETED' THEN NOW() END)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(request.user_id)
        .bind(status)
        .bind(request.subtotal_amount)
        .bind(request.discount_amount)
        .bind(request.total_amount)
        .bind(request.discount_code_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO order_items (order_id, course_id, price) VALUES ($1, $2, $3)")
            .bind(order.id)
            .bind(request.course_id)
            .bind(request.subtotal_amount)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(order)
    }

    pub async fn get(&mut self, id: OrderId) -> Result<Option<OrderDBResponse>> {
        let order = sqlx::query_as::<_, OrderDBResponse>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(order)
    }

    pub async fn get_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItemDBResponse>> {
        let items = sqlx::query_as::<_, OrderItemDBResponse>(
            "SELECT id, order_id, course_id, price, created_at FROM order_items WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(items)
    }

    /// Record the gateway session created for a pending order.
    pub async fn attach_checkout_session(&mut self, id: OrderId, session_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET checkout_session_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(session_id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition PENDING -> COMPLETED. Returns false if the order was not PENDING.
    pub async fn complete_if_pending(&mut self, id: OrderId, payment_intent_id: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'COMPLETED',
                payment_intent_id = COALESCE($2, payment_intent_id),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(payment_intent_id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition PENDING -> CANCELED. Returns false if the order was not PENDING.
    pub async fn cancel_if_pending(&mut self, id: OrderId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'CANCELED', canceled_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancel the learner's PENDING orders for `course_id`, returning the ids that changed.
    pub async fn cancel_pending_for(&mut self, user_id: UserId, course_id: CourseId) -> Result<Vec<OrderId>> {
        let ids = sqlx::query_scalar::<_, OrderId>(
            r#"
            UPDATE orders
            SET status = 'CANCELED', canceled_at = NOW(), updated_at = NOW()
            WHERE status = 'PENDING'
              AND user_id = $1
              AND id IN (SELECT order_id FROM order_items WHERE course_id = $2)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(ids)
    }

    /// Cancel every PENDING order created before `cutoff`, returning the ids that changed.
    pub async fn cancel_stale(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<OrderId>> {
        let ids = sqlx::query_scalar::<_, OrderId>(
            r#"
            UPDATE orders
            SET status = 'CANCELED', canceled_at = NOW(), updated_at = NOW()
            WHERE status = 'PENDING' AND created_at < $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(ids)
    }
}
