//! HTTP handlers for order lookup.

use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    AppState,
    api::models::{orders::OrderResponse, users::CurrentUser},
    db::handlers::Orders,
    errors::{Error, Result},
    types::OrderId,
};

/// Get one of the caller's orders
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    tag = "orders",
    summary = "Get an order",
    description = "Get one of the caller's orders with its items. Other users' orders are reported as not found.",
    params(
        ("id" = uuid::Uuid, Path, description = "Order ID"),
    ),
    responses(
        (status = 200, description = "Order details", body = OrderResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Order not found"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    current_user: CurrentUser,
) -> Result<Json<OrderResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Orders::new(&mut pool_conn);

    let order = match repo.get(id).await? {
        Some(order) if order.user_id == current_user.id => order,
        _ => {
            return Err(Error::NotFound {
                resource: "Order".to_string(),
                id: id.to_string(),
            });
        }
    };
    let items = repo.get_items(id).await?;

    Ok(Json(OrderResponse::new(order, items)))
}
