//! Stale pending order sweeper.
//!
//! Learners who open a checkout and never pay leave PENDING orders behind. Every `interval` the
//! sweeper cancels those older than `stale_after` with a single conditional update, so every
//! replica can run it without coordination and a payment that lands concurrently simply wins or
//! loses the row lock.

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::{
    config::OrderSweeperConfig,
    db::{errors::DbError, handlers::Orders},
    errors::{Error, Result},
    types::{OrderId, abbrev_uuid},
};

pub struct OrderSweeper {
    pool: PgPool,
    config: OrderSweeperConfig,
}

impl OrderSweeper {
    pub fn new(pool: PgPool, config: OrderSweeperConfig) -> Self {
        Self { pool, config }
    }

    /// Cancel PENDING orders created more than `stale_after` before `now`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<Vec<OrderId>> {
        let stale_after = TimeDelta::from_std(self.config.stale_after).map_err(|e| Error::Internal {
            operation: format!("convert stale_after: {e}"),
        })?;
        let cutoff = now - stale_after;

        let mut conn = self.pool.acquire().await.map_err(|e| Error::Database(DbError::from(e)))?;
        let canceled = Orders::new(&mut conn).cancel_stale(cutoff).await?;

        if !canceled.is_empty() {
            metrics::counter!("coursectl_orders_swept_total").increment(canceled.len() as u64);
            tracing::info!(
                count = canceled.len(),
                orders = ?canceled.iter().map(abbrev_uuid).collect::<Vec<_>>(),
                %cutoff,
                "Canceled stale pending orders"
            );
        }

        Ok(canceled)
    }

    /// Sweep every `interval` until `shutdown` fires. Failures are logged and retried on the next tick.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            interval = ?self.config.interval,
            stale_after = ?self.config.stale_after,
            "Starting stale order sweeper"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("Stale order sweeper shutting down");
                    return;
                }
            }

            if let Err(e) = self.sweep_once(Utc::now()).await {
                tracing::warn!(error = %e, "Stale order sweep failed, will retry next tick");
            }
        }
    }
}
