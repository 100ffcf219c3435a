//! A trading client backed by an in-memory order book instead of the Anboto API.
//!
//! Orders are validated and recorded, but never executed: an accepted order stays `ACCEPTED`
//! until it is cancelled. This is useful for testing in isolation from the real service, and it
//! is the book served by the sandbox server.

use super::Trading;
use crate::sign::now_millis;
use crate::types::{
    ApiError, ApiErrorCode, CancelManyOrders, CancelOrder, CreateManyOrders, CreateOrder,
    FindOrders, Order, OrderQuery, OrderStatus,
};
use anyhow::Error;
use async_std::sync::{Arc, RwLock};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// A trading client which keeps its orders in memory.
///
/// Clones share the same book.
#[derive(Clone)]
pub struct LocalClient {
    book: Arc<RwLock<Book>>,
    clock: Clock,
}

impl Default for LocalClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalClient {
    /// Create a client with a fresh, empty book.
    pub fn new() -> Self {
        Self::with_clock(now_millis)
    }

    /// Create a client which stamps orders using `clock`, in milliseconds since the epoch.
    pub fn with_clock(clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            book: Default::default(),
            clock: Arc::new(clock),
        }
    }

    /// Force an order into a new status, as if the venue had reported it.
    #[cfg(any(test, feature = "testing"))]
    pub async fn set_status(&self, order_id: &str, status: OrderStatus) -> Result<(), Error> {
        let mut book = self.book.write().await;
        let index = book
            .find(&CancelOrder::OrderId(order_id.into()))
            .ok_or_else(|| Error::msg(format!("unknown order {order_id}")))?;
        book.orders[index].status = status;
        Ok(())
    }
}

#[async_trait]
impl Trading for LocalClient {
    async fn create_order(&self, order: &CreateOrder) -> Result<Value, Error> {
        let mut book = self.book.write().await;
        book.validate(order)?;
        let order = book.insert(order.clone(), (self.clock)());
        tracing::info!(
            order_id = %order.order_id,
            client_order_id = %order.request.client_order_id,
            "order accepted"
        );
        Ok(serde_json::to_value(order)?)
    }

    async fn create_many_orders(&self, batch: &CreateManyOrders) -> Result<Value, Error> {
        let mut book = self.book.write().await;
        let now = (self.clock)();

        if batch.all_or_none {
            // Validate the whole batch before touching the book, so a failure leaves no trace.
            let mut seen = HashSet::new();
            for (i, order) in batch.orders.iter().enumerate() {
                book.validate(order).map_err(|err| {
                    ApiError::new(err.code, format!("order {i}: {}", err.message))
                })?;
                if !seen.insert(order.client_order_id.as_str()) {
                    return Err(ApiError::new(
                        ApiErrorCode::InvalidRequest,
                        format!(
                            "order {i}: duplicate client order ID {}",
                            order.client_order_id
                        ),
                    )
                    .into());
                }
            }
            let orders = batch
                .orders
                .iter()
                .map(|order| book.insert(order.clone(), now))
                .collect::<Vec<_>>();
            tracing::info!("accepted batch of {} orders", orders.len());
            return Ok(json!({ "orders": orders }));
        }

        let results = batch
            .orders
            .iter()
            .map(|order| match book.validate(order) {
                Ok(()) => serde_json::to_value(book.insert(order.clone(), now)),
                Err(err) => {
                    tracing::warn!(
                        client_order_id = %order.client_order_id,
                        "order rejected: {err}"
                    );
                    Ok(json!({ "clientOrderId": order.client_order_id, "error": err }))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "orders": results }))
    }

    async fn cancel_order(&self, cancel: &CancelOrder) -> Result<Value, Error> {
        let mut book = self.book.write().await;
        Ok(serde_json::to_value(book.cancel(cancel)?)?)
    }

    async fn cancel_many_orders(&self, cancel: &CancelManyOrders) -> Result<Value, Error> {
        let mut book = self.book.write().await;
        let targets = match cancel {
            CancelManyOrders::OrderIds(ids) => {
                ids.iter().cloned().map(CancelOrder::OrderId).collect::<Vec<_>>()
            }
            CancelManyOrders::ClientOrderIds(ids) => {
                ids.iter().cloned().map(CancelOrder::ClientOrderId).collect()
            }
        };
        let results = targets
            .iter()
            .map(|target| match book.cancel(target) {
                Ok(order) => serde_json::to_value(order),
                Err(err) => {
                    let mut entry = serde_json::to_value(target)?;
                    entry["error"] = serde_json::to_value(err)?;
                    Ok(entry)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "orders": results }))
    }

    async fn get_orders(&self, query: &OrderQuery) -> Result<Value, Error> {
        let book = self.book.read().await;
        let orders = book
            .orders
            .iter()
            .filter(|order| {
                query.order_ids.contains(&order.order_id)
                    || query.client_order_ids.contains(&order.request.client_order_id)
            })
            .collect::<Vec<_>>();
        Ok(json!({ "orders": orders }))
    }

    async fn find_orders(&self, query: &FindOrders) -> Result<Value, Error> {
        let book = self.book.read().await;
        // The book is already in creation order, which the clock may not agree with.
        let mut orders = book
            .orders
            .iter()
            .filter(|order| {
                query.start_ms.map_or(true, |start| order.created_ms >= start)
                    && query.end_ms.map_or(true, |end| order.created_ms <= end)
            })
            .collect::<Vec<_>>();
        if let Some(limit) = query.limit {
            orders.truncate(limit);
        }
        Ok(json!({ "orders": orders }))
    }

    async fn open_orders(&self) -> Result<Value, Error> {
        let book = self.book.read().await;
        let orders = book
            .orders
            .iter()
            .filter(|order| !order.status.is_terminal())
            .collect::<Vec<_>>();
        Ok(json!({ "orders": orders }))
    }
}

/// The in-memory order book.
#[derive(Debug, Default)]
struct Book {
    /// All orders ever accepted, in creation order.
    orders: Vec<Order>,
    by_order_id: HashMap<String, usize>,
    by_client_id: HashMap<String, usize>,
    next_id: u64,
}

impl Book {
    /// Check that `order` could be accepted into the book.
    fn validate(&self, order: &CreateOrder) -> Result<(), ApiError> {
        let reject = |code, message: String| Err(ApiError::new(code, message));

        if order.client_order_id.is_empty() {
            return reject(
                ApiErrorCode::InvalidRequest,
                "client_order_id must not be empty".into(),
            );
        }
        if self.by_client_id.contains_key(&order.client_order_id) {
            return reject(
                ApiErrorCode::InvalidRequest,
                format!("duplicate client order ID {}", order.client_order_id),
            );
        }
        if order.symbol.is_empty() {
            return reject(ApiErrorCode::InvalidOrder, "symbol must not be empty".into());
        }
        if !order.quantity.is_finite() || order.quantity <= 0.0 {
            return reject(
                ApiErrorCode::InvalidOrder,
                format!("quantity must be positive, got {}", order.quantity),
            );
        }
        if order.strategy.requires_limit_price() && order.limit_price.is_none() {
            return reject(
                ApiErrorCode::InvalidOrder,
                format!("{} orders require limitPrice", order.strategy),
            );
        }
        if let (Some(start), Some(end)) = (order.start_time, order.end_time) {
            if start >= end {
                return reject(
                    ApiErrorCode::InvalidOrder,
                    format!("startTime {start} is not before endTime {end}"),
                );
            }
        }
        Ok(())
    }

    /// Record a validated order.
    fn insert(&mut self, request: CreateOrder, now: u64) -> Order {
        self.next_id += 1;
        let order = Order {
            order_id: self.next_id.to_string(),
            status: OrderStatus::Accepted,
            created_ms: now,
            request,
        };
        let index = self.orders.len();
        self.by_order_id.insert(order.order_id.clone(), index);
        self.by_client_id
            .insert(order.request.client_order_id.clone(), index);
        self.orders.push(order.clone());
        order
    }

    fn find(&self, target: &CancelOrder) -> Option<usize> {
        let index = match target {
            CancelOrder::OrderId(id) => self.by_order_id.get(id),
            CancelOrder::ClientOrderId(id) => self.by_client_id.get(id),
        };
        index.copied()
    }

    fn cancel(&mut self, target: &CancelOrder) -> Result<Order, ApiError> {
        let index = self.find(target).ok_or_else(|| {
            ApiError::new(
                ApiErrorCode::InvalidRequest,
                format!("unknown order {target:?}"),
            )
        })?;
        let order = &mut self.orders[index];
        if order.status.is_terminal() {
            return Err(ApiError::new(
                ApiErrorCode::InvalidRequest,
                format!("order {} is already {}", order.order_id, order.status),
            ));
        }
        order.status = OrderStatus::Cancelled;
        tracing::info!(order_id = %order.order_id, "order cancelled");
        Ok(order.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{AssetCategory, Exchange, ExecutionStrategy, Side};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn order(id: &str) -> CreateOrder {
        CreateOrder::new(
            id,
            Exchange::Binance,
            "ETH/USDT",
            AssetCategory::Spot,
            Side::Buy,
            1.0,
            ExecutionStrategy::Twap,
        )
        .with_param("duration_seconds", 300)
    }

    fn api_error(err: Error) -> ApiError {
        err.downcast::<ApiError>().unwrap()
    }

    fn ids(res: &Value, field: &str) -> Vec<String> {
        res["orders"]
            .as_array()
            .unwrap()
            .iter()
            .map(|order| order[field].as_str().unwrap().to_string())
            .collect()
    }

    /// A client whose clock advances by one second each time it is read.
    fn ticking_client() -> LocalClient {
        let now = Arc::new(AtomicU64::new(0));
        LocalClient::with_clock(move || now.fetch_add(1000, Ordering::SeqCst) + 1000)
    }

    #[async_std::test]
    async fn test_create_and_get() {
        let client = LocalClient::new();
        let res = client.create_order(&order("a")).await.unwrap();
        assert_eq!(res["orderId"], "1");
        assert_eq!(res["status"], "ACCEPTED");
        assert_eq!(res["client_order_id"], "a");
        assert_eq!(res["params"]["duration_seconds"], 300);

        client.create_order(&order("b")).await.unwrap();
        let res = client
            .get_orders(&OrderQuery {
                order_ids: vec!["2".into()],
                client_order_ids: vec!["a".into()],
            })
            .await
            .unwrap();
        assert_eq!(ids(&res, "client_order_id"), ["a", "b"]);

        let res = client.get_orders(&OrderQuery::default()).await.unwrap();
        assert!(res["orders"].as_array().unwrap().is_empty());
    }

    #[async_std::test]
    async fn test_validation() {
        let client = LocalClient::new();
        client.create_order(&order("a")).await.unwrap();

        let cases = [
            (order("a"), ApiErrorCode::InvalidRequest),
            (order(""), ApiErrorCode::InvalidRequest),
            (
                CreateOrder {
                    symbol: "".into(),
                    ..order("b")
                },
                ApiErrorCode::InvalidOrder,
            ),
            (
                CreateOrder {
                    quantity: 0.0,
                    ..order("b")
                },
                ApiErrorCode::InvalidOrder,
            ),
            (
                CreateOrder {
                    quantity: f64::NAN,
                    ..order("b")
                },
                ApiErrorCode::InvalidOrder,
            ),
            (
                CreateOrder {
                    strategy: ExecutionStrategy::Limit,
                    ..order("b")
                },
                ApiErrorCode::InvalidOrder,
            ),
            (
                order("b").with_start_time(2000).with_end_time(1000),
                ApiErrorCode::InvalidOrder,
            ),
        ];
        for (order, code) in cases {
            let err = api_error(client.create_order(&order).await.unwrap_err());
            assert_eq!(err.code, code, "{err}");
        }

        let limit = CreateOrder {
            strategy: ExecutionStrategy::Limit,
            ..order("b")
        }
        .with_limit_price(1500.0);
        client.create_order(&limit).await.unwrap();
    }

    #[async_std::test]
    async fn test_create_many_all_or_none() {
        let client = LocalClient::new();
        client.create_order(&order("taken")).await.unwrap();

        let batch = CreateManyOrders::new(vec![order("a"), order("taken")], true);
        let err = api_error(client.create_many_orders(&batch).await.unwrap_err());
        assert_eq!(err.code, ApiErrorCode::InvalidRequest);
        assert!(err.message.starts_with("order 1:"), "{err}");

        let batch = CreateManyOrders::new(vec![order("a"), order("a")], true);
        let err = api_error(client.create_many_orders(&batch).await.unwrap_err());
        assert!(err.message.contains("duplicate"), "{err}");

        // Nothing from the failed batches made it into the book.
        let res = client.open_orders().await.unwrap();
        assert_eq!(ids(&res, "client_order_id"), ["taken"]);

        let batch = CreateManyOrders::new(vec![order("a"), order("b")], true);
        let res = client.create_many_orders(&batch).await.unwrap();
        assert_eq!(ids(&res, "client_order_id"), ["a", "b"]);
    }

    #[async_std::test]
    async fn test_create_many_partial() {
        let client = LocalClient::new();
        let batch = CreateManyOrders::new(vec![order("a"), order("a"), order("b")], false);
        let res = client.create_many_orders(&batch).await.unwrap();
        let results = res["orders"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["status"], "ACCEPTED");
        assert_eq!(results[1]["clientOrderId"], "a");
        assert_eq!(results[1]["error"]["code"], "INVALID_REQUEST");
        assert_eq!(results[2]["status"], "ACCEPTED");
    }

    #[async_std::test]
    async fn test_cancel() {
        let client = LocalClient::new();
        client.create_order(&order("a")).await.unwrap();
        client.create_order(&order("b")).await.unwrap();

        let res = client
            .cancel_order(&CancelOrder::ClientOrderId("a".into()))
            .await
            .unwrap();
        assert_eq!(res["status"], "CANCELLED");

        // Cancelling again is rejected, as is cancelling an order that doesn't exist.
        let err = api_error(
            client
                .cancel_order(&CancelOrder::OrderId("1".into()))
                .await
                .unwrap_err(),
        );
        assert_eq!(err.code, ApiErrorCode::InvalidRequest);
        assert!(err.message.contains("CANCELLED"), "{err}");
        let err = api_error(
            client
                .cancel_order(&CancelOrder::OrderId("99".into()))
                .await
                .unwrap_err(),
        );
        assert_eq!(err.code, ApiErrorCode::InvalidRequest);

        // Filled orders cannot be cancelled.
        client.set_status("2", OrderStatus::Filled).await.unwrap();
        assert!(client
            .cancel_order(&CancelOrder::OrderId("2".into()))
            .await
            .is_err());
        let res = client.open_orders().await.unwrap();
        assert!(res["orders"].as_array().unwrap().is_empty());
    }

    #[async_std::test]
    async fn test_cancel_many() {
        let client = LocalClient::new();
        for id in ["a", "b", "c"] {
            client.create_order(&order(id)).await.unwrap();
        }
        let res = client
            .cancel_many_orders(&CancelManyOrders::ClientOrderIds(vec![
                "a".into(),
                "nope".into(),
                "c".into(),
            ]))
            .await
            .unwrap();
        let results = res["orders"].as_array().unwrap();
        assert_eq!(results[0]["status"], "CANCELLED");
        assert_eq!(results[1]["clientOrderId"], "nope");
        assert_eq!(results[1]["error"]["code"], "INVALID_REQUEST");
        assert_eq!(results[2]["status"], "CANCELLED");

        let res = client.open_orders().await.unwrap();
        assert_eq!(ids(&res, "client_order_id"), ["b"]);
    }

    #[async_std::test]
    async fn test_find() {
        let client = ticking_client();
        for id in ["a", "b", "c", "d"] {
            client.create_order(&order(id)).await.unwrap();
        }
        // Orders were created at 1000, 2000, 3000 and 4000.
        let res = client
            .find_orders(&FindOrders {
                start_ms: Some(2000),
                end_ms: Some(3000),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(ids(&res, "client_order_id"), ["b", "c"]);

        let res = client
            .find_orders(&FindOrders {
                start_ms: Some(2000),
                end_ms: None,
                limit: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(ids(&res, "client_order_id"), ["b", "c"]);

        let res = client.find_orders(&FindOrders::default()).await.unwrap();
        assert_eq!(res["orders"].as_array().unwrap().len(), 4);
    }

    #[async_std::test]
    async fn test_find_clock_steps_back() {
        let times = Arc::new(std::sync::Mutex::new(vec![4000, 5000]));
        let client = LocalClient::with_clock(move || times.lock().unwrap().pop().unwrap_or(0));
        client.create_order(&order("first")).await.unwrap();
        client.create_order(&order("second")).await.unwrap();

        let res = client
            .find_orders(&FindOrders {
                start_ms: None,
                end_ms: None,
                limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(ids(&res, "client_order_id"), ["first"]);

        let res = client.find_orders(&FindOrders::default()).await.unwrap();
        assert_eq!(ids(&res, "client_order_id"), ["first", "second"]);
        let res = client.open_orders().await.unwrap();
        assert_eq!(ids(&res, "client_order_id"), ["first", "second"]);
    }
}
