//! Order rows and the order endpoints.
//!
//! Money is stored in minor units. Reads are scoped to the owner: an order placed by a
//! signed-in user answers 404 to anyone else.

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{PgConnection, PgExecutor, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use super::{publish, ApiError, AppState};
use crate::boundary::OrderDetails;
use crate::domain::aggregates::{Order, OrderItem, OrderStatus, PaymentStatus, TrackingEvent};
use crate::domain::value_objects::{Money, ProductId};

const ORDER_COLUMNS: &str = "id, order_number, user_id, customer_email, status, payment_status, subtotal, discount, tax, \
     total, currency, shipping_address, discount_code_id, payment_session_id, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Option<Uuid>,
    customer_email: String,
    status: String,
    payment_status: String,
    subtotal: i64,
    discount: i64,
    tax: i64,
    total: i64,
    currency: String,
    shipping_address: serde_json::Value,
    discount_code_id: Option<String>,
    payment_session_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(r: OrderRow) -> Self {
        Order {
            id: r.id,
            order_number: r.order_number,
            user_id: r.user_id,
            customer_email: r.customer_email,
            status: OrderStatus::parse_lenient(&r.status),
            payment_status: PaymentStatus::parse_lenient(&r.payment_status),
            subtotal: Money::from_minor(r.subtotal, &r.currency),
            discount: Money::from_minor(r.discount, &r.currency),
            tax: Money::from_minor(r.tax, &r.currency),
            total: Money::from_minor(r.total, &r.currency),
            shipping_address: r.shipping_address,
            discount_code_id: r.discount_code_id,
            payment_session_id: r.payment_session_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: String,
    name: String,
    quantity: i32,
    unit_price: i64,
    total: i64,
}

impl OrderItemRow {
    fn into_item(self, currency: &str) -> Result<OrderItem, ApiError> {
        let product_id = ProductId::new(self.product_id).map_err(|e| ApiError::Internal(format!("stored product id: {e}")))?;
        let quantity = u32::try_from(self.quantity).map_err(|_| ApiError::Internal(format!("stored quantity {}", self.quantity)))?;
        Ok(OrderItem {
            id: self.id,
            order_id: self.order_id,
            product_id,
            name: self.name,
            quantity,
            unit_price: Money::from_minor(self.unit_price, currency),
            total: Money::from_minor(self.total, currency),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TrackingRow {
    id: Uuid,
    order_id: Uuid,
    status: String,
    location: Option<String>,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<TrackingRow> for TrackingEvent {
    fn from(r: TrackingRow) -> Self {
        TrackingEvent { id: r.id, order_id: r.order_id, status: r.status, location: r.location, description: r.description, created_at: r.created_at }
    }
}

fn cents(money: &Money) -> Result<i64, ApiError> { money.to_minor().map_err(|e| ApiError::Internal(e.to_string())) }

#[derive(Clone, Copy, Debug)]
pub(crate) enum OrderKey<'a> {
    Id(Uuid),
    Session(&'a str),
}

/// Loads one order. `lock` takes a row lock for the rest of the transaction.
pub(crate) async fn fetch_order<'e>(db: impl PgExecutor<'e>, key: OrderKey<'_>, lock: bool) -> Result<Option<Order>, ApiError> {
    let column = match key { OrderKey::Id(_) => "id", OrderKey::Session(_) => "payment_session_id" };
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE {column} = $1{}", if lock { " FOR UPDATE" } else { "" });
    let query = sqlx::query_as::<_, OrderRow>(&sql);
    let query = match key {
        OrderKey::Id(id) => query.bind(id),
        OrderKey::Session(session_id) => query.bind(session_id),
    };
    Ok(query.fetch_optional(db).await?.map(Order::from))
}

pub(crate) async fn fetch_items<'e>(db: impl PgExecutor<'e>, order: &Order) -> Result<Vec<OrderItem>, ApiError> {
    let rows = sqlx::query_as::<_, OrderItemRow>(
        "SELECT id, order_id, product_id, name, quantity, unit_price, total FROM order_items WHERE order_id = $1 ORDER BY position",
    )
    .bind(order.id)
    .fetch_all(db)
    .await?;
    rows.into_iter().map(|r| r.into_item(order.total.currency())).collect()
}

pub(crate) async fn fetch_tracking<'e>(db: impl PgExecutor<'e>, order_id: Uuid) -> Result<Vec<TrackingEvent>, ApiError> {
    let rows = sqlx::query_as::<_, TrackingRow>(
        "SELECT id, order_id, status, location, description, created_at FROM tracking_events WHERE order_id = $1 ORDER BY created_at DESC",
    )
    .bind(order_id)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(TrackingEvent::from).collect())
}

pub(crate) async fn insert_order(conn: &mut PgConnection, order: &Order, items: &[OrderItem]) -> Result<(), ApiError> {
    sqlx::query(
        "INSERT INTO orders (id, order_number, user_id, customer_email, status, payment_status, subtotal, discount, tax, total, \
         currency, shipping_address, discount_code_id, payment_session_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(order.id)
    .bind(&order.order_number)
    .bind(order.user_id)
    .bind(&order.customer_email)
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(cents(&order.subtotal)?)
    .bind(cents(&order.discount)?)
    .bind(cents(&order.tax)?)
    .bind(cents(&order.total)?)
    .bind(order.total.currency())
    .bind(&order.shipping_address)
    .bind(&order.discount_code_id)
    .bind(&order.payment_session_id)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;

    for (position, item) in items.iter().enumerate() {
        let quantity = i32::try_from(item.quantity).map_err(|_| ApiError::BadRequest(format!("Quantity too large for {}", item.name)))?;
        sqlx::query(
            "INSERT INTO order_items (id, order_id, position, product_id, name, quantity, unit_price, total) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(item.id)
        .bind(item.order_id)
        .bind(position as i32)
        .bind(item.product_id.as_str())
        .bind(&item.name)
        .bind(quantity)
        .bind(cents(&item.unit_price)?)
        .bind(cents(&item.total)?)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn attach_session<'e>(db: impl PgExecutor<'e>, order_id: Uuid, session_id: &str) -> Result<(), ApiError> {
    sqlx::query("UPDATE orders SET payment_session_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(order_id)
        .bind(session_id)
        .execute(db)
        .await?;
    Ok(())
}

pub(crate) async fn save_status<'e>(db: impl PgExecutor<'e>, order: &Order) -> Result<(), ApiError> {
    sqlx::query("UPDATE orders SET status = $2, payment_status = $3, updated_at = $4 WHERE id = $1")
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.updated_at)
        .execute(db)
        .await?;
    Ok(())
}

pub(crate) async fn insert_tracking<'e>(db: impl PgExecutor<'e>, event: &TrackingEvent) -> Result<(), ApiError> {
    sqlx::query(
        "INSERT INTO tracking_events (id, order_id, status, location, description, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(event.id)
    .bind(event.order_id)
    .bind(&event.status)
    .bind(&event.location)
    .bind(&event.description)
    .bind(event.created_at)
    .execute(db)
    .await?;
    Ok(())
}

/// Order writes made while a payment session is opened. Each call commits on its own so
/// no connection is held across processor calls.
#[async_trait]
pub(crate) trait PendingOrders: Send + Sync {
    async fn record_pending(&self, order: &Order, items: &[OrderItem]) -> Result<(), ApiError>;
    async fn link_session(&self, order_id: Uuid, session_id: &str) -> Result<(), ApiError>;
    /// Cancels an order whose session could not be created.
    async fn abandon(&self, order: &Order) -> Result<(), ApiError>;
}

#[async_trait]
impl PendingOrders for PgPool {
    async fn record_pending(&self, order: &Order, items: &[OrderItem]) -> Result<(), ApiError> {
        let mut tx = self.begin().await?;
        insert_order(&mut *tx, order, items).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn link_session(&self, order_id: Uuid, session_id: &str) -> Result<(), ApiError> { attach_session(self, order_id, session_id).await }

    async fn abandon(&self, order: &Order) -> Result<(), ApiError> {
        let mut order = order.clone();
        order.mark_payment_failed();
        if let Err(e) = order.transition(OrderStatus::Cancelled) {
            warn!(order_number = %order.order_number, error = %e, "abandoned order left in its current status");
        }
        save_status(self, &order).await
    }
}

/// Hides orders that belong to someone other than the caller.
async fn visible(s: &AppState, headers: &HeaderMap, order: Option<Order>) -> Result<Order, ApiError> {
    let order = order.ok_or(ApiError::NotFound)?;
    let Some(owner) = order.user_id else { return Ok(order) };
    let caller = s.caller(headers).await?;
    if caller.map(|u| u.id) != Some(owner) {
        return Err(ApiError::NotFound);
    }
    Ok(order)
}

async fn details(s: &AppState, order: Order) -> Result<Json<OrderDetails>, ApiError> {
    let items = fetch_items(&s.db, &order).await?;
    Ok(Json(OrderDetails { order, items }))
}

pub async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>, headers: HeaderMap) -> Result<Json<OrderDetails>, ApiError> {
    let order = fetch_order(&s.db, OrderKey::Id(id), false).await?;
    let order = visible(&s, &headers, order).await?;
    details(&s, order).await
}

pub async fn get_order_by_session(
    State(s): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OrderDetails>, ApiError> {
    let order = fetch_order(&s.db, OrderKey::Session(&session_id), false).await?;
    let order = visible(&s, &headers, order).await?;
    details(&s, order).await
}

pub async fn get_tracking(State(s): State<AppState>, Path(id): Path<Uuid>, headers: HeaderMap) -> Result<Json<Vec<TrackingEvent>>, ApiError> {
    let order = fetch_order(&s.db, OrderKey::Id(id), false).await?;
    let order = visible(&s, &headers, order).await?;
    Ok(Json(fetch_tracking(&s.db, order.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    pub location: Option<String>,
    pub description: Option<String>,
}

fn require_admin(s: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers.get("x-admin-key").and_then(|v| v.to_str().ok());
    match (s.admin_key.as_deref(), presented) {
        (Some(expected), Some(given)) if expected == given => Ok(()),
        _ => Err(ApiError::Forbidden),
    }
}

/// Staff endpoint: moves an order one legal step and records it on the timeline.
pub async fn update_status(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(r): Json<StatusUpdate>,
) -> Result<Json<Order>, ApiError> {
    require_admin(&s, &headers)?;
    let target: OrderStatus = r.status.parse()?;

    let mut tx = s.db.begin().await?;
    let mut order = fetch_order(&mut *tx, OrderKey::Id(id), true).await?.ok_or(ApiError::NotFound)?;
    let event = order.transition(target)?;
    save_status(&mut *tx, &order).await?;
    insert_tracking(&mut *tx, &TrackingEvent::new(order.id, target, r.location, r.description)).await?;
    tx.commit().await?;

    info!(order_number = %order.order_number, status = %target, "order status updated");
    publish(&s.nats, &event).await;
    Ok(Json(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::{call, state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    fn status_request(key: Option<&str>) -> Request<Body> {
        let mut builder = Request::put(format!("/functions/v1/orders/{}/status", Uuid::now_v7())).header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("x-admin-key", key);
        }
        builder.body(Body::from(r#"{"status":"shipped"}"#)).unwrap()
    }

    #[tokio::test]
    async fn status_update_refused_without_configured_key() {
        let (status, body) = call(state(), status_request(Some("anything"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Forbidden");
    }

    #[tokio::test]
    async fn status_update_refused_with_wrong_key() {
        let mut s = state();
        s.admin_key = Some("staff-key".into());
        let (status, _) = call(s.clone(), status_request(Some("guess"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(s, status_request(None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn rows_convert_to_domain() {
        let now = Utc::now();
        let row = OrderRow {
            id: Uuid::nil(),
            order_number: "ORD-1".into(),
            user_id: None,
            customer_email: "ada@example.com".into(),
            status: "on_hold".into(),
            payment_status: "paid".into(),
            subtotal: 10000,
            discount: 1000,
            tax: 720,
            total: 9720,
            currency: "usd".into(),
            shipping_address: serde_json::json!({"city": "Portland"}),
            discount_code_id: None,
            payment_session_id: Some("cs_1".into()),
            created_at: now,
            updated_at: now,
        };
        let order = Order::from(row);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.total.to_string(), "$97.20");

        let item = OrderItemRow { id: Uuid::nil(), order_id: Uuid::nil(), product_id: "42".into(), name: "Serum".into(), quantity: -1, unit_price: 100, total: 100 };
        assert!(matches!(item.into_item("usd"), Err(ApiError::Internal(_))));
    }
}
