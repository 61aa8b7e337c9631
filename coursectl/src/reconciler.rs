//! Turning confirmed payments into enrollments.
//!
//! Both confirmation paths, the learner's browser returning from checkout (verify) and the
//! provider's webhook, funnel into [`reconcile`]. It is safe to call any number of times, from
//! either path, concurrently and in any order:
//!
//! ```text
//!            verify-session ─┐
//!                            ├─> PaymentConfirmation ─> reconcile() ─┬─> enrollment   (ON CONFLICT DO NOTHING)
//!  webhook (signature ok) ───┘                                       ├─> order        (UPDATE ... WHERE PENDING)
//!                                                                    └─> discount use (ON CONFLICT DO NOTHING)
//! ```
//!
//! All three writes happen in one transaction, so a failure anywhere leaves nothing behind and the
//! confirmation can simply be retried.
//!
//! Purchases with nothing to pay skip the provider entirely and go through [`fulfill_without_payment`].

use crate::{
    db::{
        errors::DbError,
        handlers::{DiscountCodes, Enrollments, Orders},
        models::{
            courses::CourseDBResponse,
            discounts::{DiscountCodeDBResponse, DiscountUsageCreateDBRequest, UsageRecord},
            orders::{OrderCreateDBRequest, OrderStatus},
        },
    },
    errors::{Error, Result},
    payment_providers::{CheckoutMetadata, CheckoutSession, PaymentError},
    pricing::PriceBreakdown,
    types::{CourseId, DiscountCodeId, Money, OrderId, UserId},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgConnection};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

/// Which path delivered a confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationSource {
    Verify,
    Webhook,
}

impl ConfirmationSource {
    fn as_str(&self) -> &'static str {
        match self {
            ConfirmationSource::Verify => "verify",
            ConfirmationSource::Webhook => "webhook",
        }
    }
}

/// An authenticated statement from the payment provider that a checkout session was paid.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub source: ConfirmationSource,
    pub session_id: String,
    pub payment_intent_id: Option<String>,
    pub amount_total: Option<Money>,
    pub metadata: CheckoutMetadata,
}

/// Identifiers the caller claims the session belongs to. `None` fields are not checked.
#[derive(Debug, Clone, Default)]
pub struct ExpectedIdentifiers {
    pub user_id: Option<UserId>,
    pub course_id: Option<CourseId>,
    pub order_id: Option<OrderId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentOutcome {
    Created,
    AlreadyExisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderOutcome {
    Completed,
    AlreadyCompleted,
    /// The order was canceled (e.g. swept as stale) before the payment landed
    Canceled,
    /// Free course: no order is created
    NotRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountOutcome {
    Recorded,
    AlreadyRecorded,
    NotApplicable,
}

impl From<UsageRecord> for DiscountOutcome {
    fn from(record: UsageRecord) -> Self {
        match record {
            UsageRecord::Recorded => DiscountOutcome::Recorded,
            UsageRecord::AlreadyRecorded => DiscountOutcome::AlreadyRecorded,
        }
    }
}

/// What a reconciliation created versus found already in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    #[schema(value_type = Option<String>, format = "uuid")]
    pub order_id: Option<OrderId>,
    pub enrollment: EnrollmentOutcome,
    pub order: OrderOutcome,
    pub discount: DiscountOutcome,
}

impl ReconcileSummary {
    /// Nothing was written by this call
    pub fn already_done(&self) -> bool {
        self.enrollment == EnrollmentOutcome::AlreadyExisted
            && self.order != OrderOutcome::Completed
            && self.discount != DiscountOutcome::Recorded
    }
}

/// Build a confirmation from a session fetched from the provider.
///
/// Fails closed: the session must be paid, carry course-purchase metadata, and agree with every
/// identifier in `expected`.
pub fn confirmation_from_session(
    session: &CheckoutSession,
    source: ConfirmationSource,
    expected: &ExpectedIdentifiers,
) -> Result<PaymentConfirmation> {
    if !session.is_paid() {
        return Err(PaymentError::PaymentNotCompleted(format!("checkout session {} is not paid", session.id)).into());
    }

    let metadata = CheckoutMetadata::from_map(&session.metadata).map_err(|e| Error::Integrity {
        message: format!("checkout session {} has unusable metadata: {e}", session.id),
    })?;

    let mismatches = [
        ("userId", expected.user_id.is_some_and(|id| id != metadata.user_id)),
        ("courseId", expected.course_id.is_some_and(|id| id != metadata.course_id)),
        ("orderId", expected.order_id.is_some_and(|id| id != metadata.order_id)),
    ];
    if let Some((field, _)) = mismatches.iter().find(|(_, mismatch)| *mismatch) {
        return Err(Error::Integrity {
            message: format!("checkout session {} {field} does not match the request", session.id),
        });
    }

    Ok(PaymentConfirmation {
        source,
        session_id: session.id.clone(),
        payment_intent_id: session.payment_intent.clone(),
        amount_total: session.amount_total,
        metadata,
    })
}

fn db_err(e: impl Into<DbError>) -> Error {
    Error::Database(e.into())
}

/// Idempotently finalize a paid order: enroll the learner, complete the order, record discount usage.
#[instrument(skip_all, fields(
    source = confirmation.source.as_str(),
    session_id = %confirmation.session_id,
    order_id = %confirmation.metadata.order_id,
    user_id = %confirmation.metadata.user_id,
    course_id = %confirmation.metadata.course_id,
), err)]
pub async fn reconcile(conn: &mut PgConnection, confirmation: &PaymentConfirmation) -> Result<ReconcileSummary> {
    let meta = &confirmation.metadata;
    let payment_intent = confirmation.payment_intent_id.as_deref();

    let mut tx = conn.begin().await.map_err(db_err)?;

    let order = Orders::new(&mut tx)
        .get(meta.order_id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Order".to_string(),
            id: meta.order_id.to_string(),
        })?;

    if order.user_id != meta.user_id {
        return Err(Error::Integrity {
            message: format!("order {} does not belong to user {}", order.id, meta.user_id),
        });
    }

    let items = Orders::new(&mut tx).get_items(order.id).await?;
    if !items.iter().any(|item| item.course_id == meta.course_id) {
        return Err(Error::Integrity {
            message: format!("order {} does not contain course {}", order.id, meta.course_id),
        });
    }

    if let Some(paid) = confirmation.amount_total
        && paid != order.total_amount
    {
        return Err(Error::Integrity {
            message: format!("order {} total {} does not match amount paid {}", order.id, order.total_amount, paid),
        });
    }

    let enrollment = match Enrollments::new(&mut tx)
        .enroll_if_absent(meta.user_id, meta.course_id, payment_intent)
        .await?
    {
        Some(_) => EnrollmentOutcome::Created,
        None => EnrollmentOutcome::AlreadyExisted,
    };

    let order_outcome = if Orders::new(&mut tx).complete_if_pending(order.id, payment_intent).await? {
        OrderOutcome::Completed
    } else {
        let current = Orders::new(&mut tx).get(order.id).await?.map(|o| o.status);
        match current {
            Some(OrderStatus::Completed) => OrderOutcome::AlreadyCompleted,
            Some(OrderStatus::Canceled) => {
                warn!(order_id = %order.id, "Payment confirmed for a canceled order; enrolling anyway");
                OrderOutcome::Canceled
            }
            // Only reachable if the row vanished mid-transaction
            Some(OrderStatus::Pending) | None => {
                return Err(Error::Internal {
                    operation: format!("complete order {}: unexpected state {current:?}", order.id),
                });
            }
        }
    };

    let discount = match order.discount_code_id {
        Some(discount_code_id) => {
            let mut codes = DiscountCodes::new(&mut tx);
            let record = codes
                .record_usage(&DiscountUsageCreateDBRequest {
                    discount_code_id,
                    user_id: order.user_id,
                    order_id: Some(order.id),
                    original_amount: order.subtotal_amount,
                    discount_amount: order.discount_amount,
                    final_amount: order.total_amount,
                })
                .await?;
            if record == UsageRecord::Recorded {
                check_per_user_limit(&mut codes, discount_code_id, order.user_id).await?;
            }
            record.into()
        }
        None => DiscountOutcome::NotApplicable,
    };

    tx.commit().await.map_err(db_err)?;

    let summary = ReconcileSummary {
        order_id: Some(order.id),
        enrollment,
        order: order_outcome,
        discount,
    };

    metrics::counter!(
        "coursectl_reconcile_total",
        "source" => confirmation.source.as_str(),
        "outcome" => if summary.already_done() { "already_done" } else { "applied" },
    )
    .increment(1);

    info!(?summary, "Reconciled payment");

    Ok(summary)
}

/// The payment already went through at the discounted price, so a redemption past the per-user
/// limit is kept and reported rather than refused.
async fn check_per_user_limit(codes: &mut DiscountCodes<'_>, code_id: DiscountCodeId, user_id: UserId) -> Result<()> {
    let Some(code) = codes.get(code_id).await? else {
        return Ok(());
    };
    let Some(max) = code.max_uses_per_user else {
        return Ok(());
    };

    let usages = codes.count_user_usages(code_id, user_id).await?;
    if usages > i64::from(max) {
        warn!(code = %code.code, usages, max, "Paid order pushed learner past the per-user discount limit");
        metrics::counter!("coursectl_discount_per_user_overrun_total").increment(1);
    }
    Ok(())
}

/// Enroll a learner in a purchase that costs nothing, either a free course or one fully covered
/// by `discount`.
///
/// The enrollment is inserted first; if it already exists nothing else is written, so repeated
/// or concurrent calls create at most one enrollment, order and discount usage.
#[instrument(skip_all, fields(user_id = %user_id, course_id = %course.id), err)]
pub async fn fulfill_without_payment(
    conn: &mut PgConnection,
    user_id: UserId,
    course: &CourseDBResponse,
    price: &PriceBreakdown,
    discount: Option<&DiscountCodeDBResponse>,
) -> Result<ReconcileSummary> {
    if !price.is_free() {
        return Err(Error::Internal {
            operation: format!("fulfill course {} without payment: {} is still due", course.id, price.final_amount),
        });
    }

    let mut tx = conn.begin().await.map_err(db_err)?;

    if Enrollments::new(&mut tx).enroll_if_absent(user_id, course.id, None).await?.is_none() {
        tx.rollback().await.map_err(db_err)?;
        return Ok(ReconcileSummary {
            order_id: None,
            enrollment: EnrollmentOutcome::AlreadyExisted,
            order: OrderOutcome::NotRequired,
            discount: DiscountOutcome::NotApplicable,
        });
    }

    let summary = match discount {
        None => ReconcileSummary {
            order_id: None,
            enrollment: EnrollmentOutcome::Created,
            order: OrderOutcome::NotRequired,
            discount: DiscountOutcome::NotApplicable,
        },
        Some(code) => {
            let order = Orders::new(&mut tx)
                .create_completed(&OrderCreateDBRequest {
                    user_id,
                    course_id: course.id,
                    subtotal_amount: price.original_amount,
                    discount_amount: price.discount_amount,
                    total_amount: price.final_amount,
                    discount_code_id: Some(code.id),
                })
                .await?;

            let usage = DiscountCodes::new(&mut tx)
                .record_usage(&DiscountUsageCreateDBRequest {
                    discount_code_id: code.id,
                    user_id,
                    order_id: Some(order.id),
                    original_amount: price.original_amount,
                    discount_amount: price.discount_amount,
                    final_amount: price.final_amount,
                })
                .await?;

            ReconcileSummary {
                order_id: Some(order.id),
                enrollment: EnrollmentOutcome::Created,
                order: OrderOutcome::Completed,
                discount: usage.into(),
            }
        }
    };

    tx.commit().await.map_err(db_err)?;

    info!(?summary, "Enrolled without payment");

    Ok(summary)
}
