#![cfg(test)]

//! End-to-end tests of the sandbox, driven by the real signing client.
//!
//! Each test starts a server on an unused port, backed by a fresh [`LocalClient`], and talks to it
//! over HTTP using [`anboto::trading::Client`], exactly as a program using the real API would.
//! Tests which need to send requests the client would never produce use a bare `surf` client.

use super::Options;
use anboto::{
    init_logging,
    sign::{self, Credentials},
    trading::{Client, Endpoint, LocalClient, Trading},
    types::{
        ApiError, ApiErrorCode, AssetCategory, CancelManyOrders, CancelOrder, CreateManyOrders,
        CreateOrder, Exchange, ExecutionStrategy, FindOrders, OrderQuery, OrderStatus, Side,
    },
};
use anyhow::Error;
use async_std::task::{sleep, spawn};
use futures::future::join_all;
use portpicker::pick_unused_port;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use surf::{http::mime, StatusCode, Url};

const API_KEY: &str = "test-key";
/// `base64("secret")`
const API_SECRET: &str = "c2VjcmV0";

struct Sandbox {
    url: Url,
    book: LocalClient,
}

impl Sandbox {
    async fn start() -> Self {
        init_logging();

        let port = pick_unused_port().unwrap();
        let opt = Options {
            port,
            api_key: API_KEY.into(),
            api_secret: API_SECRET.into(),
        };
        let book = LocalClient::new();
        let server_book = book.clone();
        spawn(async move {
            if let Err(err) = opt.serve(server_book).await {
                tracing::error!("server exited: {err}");
            }
        });

        let url: Url = format!("http://127.0.0.1:{port}").parse().unwrap();
        wait_for_server(&raw_client(&url)).await.unwrap();
        Self { url, book }
    }

    fn client(&self) -> Client {
        self.client_with(Credentials::new(API_KEY, API_SECRET).unwrap())
    }

    fn client_with(&self, credentials: Credentials) -> Client {
        Client::new(self.url.clone(), credentials).unwrap()
    }
}

fn raw_client(url: &Url) -> surf::Client {
    surf::Config::default()
        .set_base_url(url.clone())
        .try_into()
        .unwrap()
}

async fn wait_for_server(client: &surf::Client) -> Result<(), Error> {
    const MAX_CONNECT_RETRIES: usize = 60;

    for _ in 0..MAX_CONNECT_RETRIES {
        // Any response at all, even a 404, means the server is up.
        match client.get("/").await {
            Ok(_) => return Ok(()),
            Err(err) => {
                tracing::warn!("waiting for server to start: {err}");
                sleep(Duration::from_millis(100)).await;
            }
        }
    }

    Err(Error::msg("timed out waiting for server"))
}

fn twap(id: &str, symbol: &str, quantity: f64) -> CreateOrder {
    CreateOrder::new(
        id,
        Exchange::Binance,
        symbol,
        AssetCategory::Spot,
        Side::Buy,
        quantity,
        ExecutionStrategy::Twap,
    )
    .with_param("duration_seconds", 300)
}

fn api_error(err: Error) -> ApiError {
    err.downcast::<ApiError>().unwrap()
}

fn client_ids(res: &Value) -> Vec<String> {
    let mut ids = res["orders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|order| order["client_order_id"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    ids.sort();
    ids
}

#[async_std::test]
async fn test_order_lifecycle() {
    let sandbox = Sandbox::start().await;
    let client = sandbox.client();

    // Create one order on its own and two more in a batch.
    let res = client
        .create_order(&twap("a", "BTC/USDT", 0.1))
        .await
        .unwrap();
    assert_eq!(res["status"], "ACCEPTED");
    assert_eq!(res["symbol"], "BTC/USDT");
    let order_id = res["orderId"].as_str().unwrap().to_string();

    let batch = CreateManyOrders::new(
        vec![twap("b", "ETH/USDT", 1.0), twap("c", "ETH/USDT", 2.0)],
        true,
    );
    let res = client.create_many_orders(&batch).await.unwrap();
    assert_eq!(client_ids(&res), ["b", "c"]);

    // Look the orders up in every supported way.
    let res = client
        .get_orders(&OrderQuery {
            order_ids: vec![order_id.clone()],
            client_order_ids: vec!["c".into()],
        })
        .await
        .unwrap();
    assert_eq!(client_ids(&res), ["a", "c"]);

    let res = client.open_orders().await.unwrap();
    assert_eq!(client_ids(&res), ["a", "b", "c"]);

    let res = client
        .find_orders(&FindOrders {
            start_ms: Some(0),
            end_ms: Some(sign::now_millis()),
            limit: Some(2),
        })
        .await
        .unwrap();
    assert_eq!(res["orders"].as_array().unwrap().len(), 2);

    // Cancel everything.
    let res = client
        .cancel_order(&CancelOrder::OrderId(order_id))
        .await
        .unwrap();
    assert_eq!(res["status"], "CANCELLED");
    let res = client
        .cancel_many_orders(&CancelManyOrders::ClientOrderIds(vec![
            "b".into(),
            "c".into(),
        ]))
        .await
        .unwrap();
    for order in res["orders"].as_array().unwrap() {
        assert_eq!(order["status"], "CANCELLED");
    }

    let res = client.open_orders().await.unwrap();
    assert!(res["orders"].as_array().unwrap().is_empty());
}

#[async_std::test]
async fn test_order_errors() {
    let sandbox = Sandbox::start().await;
    let client = sandbox.client();

    let limit = CreateOrder::new(
        "limit",
        Exchange::Kraken,
        "BTC/USD",
        AssetCategory::Spot,
        Side::Sell,
        1.0,
        ExecutionStrategy::Limit,
    );
    let err = api_error(client.create_order(&limit).await.unwrap_err());
    assert_eq!(err.code, ApiErrorCode::InvalidOrder);

    let res = client
        .create_order(&limit.with_limit_price(50_000.0))
        .await
        .unwrap();
    let order_id = res["orderId"].as_str().unwrap().to_string();

    // Orders that have been filled can no longer be cancelled.
    sandbox
        .book
        .set_status(&order_id, OrderStatus::Filled)
        .await
        .unwrap();
    let err = api_error(
        client
            .cancel_order(&CancelOrder::ClientOrderId("limit".into()))
            .await
            .unwrap_err(),
    );
    assert_eq!(err.code, ApiErrorCode::InvalidRequest);
    assert!(err.message.contains("FILLED"), "{err}");

    // A batch containing a duplicate is rejected as a whole.
    let batch = CreateManyOrders::new(
        vec![twap("x", "BTC/USDT", 1.0), twap("limit", "BTC/USDT", 1.0)],
        true,
    );
    let err = api_error(client.create_many_orders(&batch).await.unwrap_err());
    assert_eq!(err.code, ApiErrorCode::InvalidRequest);
    assert!(err.message.starts_with("order 1:"), "{err}");
    let res = client
        .get_orders(&OrderQuery {
            order_ids: vec![],
            client_order_ids: vec!["x".into()],
        })
        .await
        .unwrap();
    assert!(res["orders"].as_array().unwrap().is_empty());
}

#[async_std::test]
async fn test_authentication() {
    let sandbox = Sandbox::start().await;

    let wrong_secret =
        sandbox.client_with(Credentials::from_secret_bytes(API_KEY, b"nope").unwrap());
    let err = api_error(wrong_secret.open_orders().await.unwrap_err());
    assert_eq!(err.code, ApiErrorCode::InvalidSignature);

    let wrong_key = sandbox.client_with(Credentials::new("other-key", API_SECRET).unwrap());
    let err = api_error(wrong_key.open_orders().await.unwrap_err());
    assert_eq!(err.code, ApiErrorCode::InvalidApiKey);

    // Query parameters are covered by the signature, including comma-separated lists.
    let res = sandbox
        .client()
        .get_orders(&OrderQuery {
            order_ids: vec!["1".into(), "2".into()],
            client_order_ids: vec!["a".into()],
        })
        .await
        .unwrap();
    assert!(res["orders"].as_array().unwrap().is_empty());

    let raw = raw_client(&sandbox.url);

    // No credentials at all.
    let mut res = raw.get(Endpoint::Open.full_path()).await.unwrap();
    assert_eq!(res.status(), StatusCode::Unauthorized);
    let err: ApiError = res.body_json().await.unwrap();
    assert_eq!(err.code, ApiErrorCode::AuthenticationError);

    // Correctly signed requests that are too old or too far in the future.
    let credentials = Credentials::new(API_KEY, API_SECRET).unwrap();
    let now = sign::now_millis();
    for timestamp in [now - 60_000, now + 60_000] {
        let err = rejected_open(&raw, credentials.headers(timestamp, 5000, "", "")).await;
        assert_eq!(err.code, ApiErrorCode::InvalidTimestamp, "{timestamp}: {err}");
    }

    // A huge receive window would switch off the staleness check.
    let headers = credentials.headers(now - 60_000, 99_999_999_999, "", "");
    let err = rejected_open(&raw, headers).await;
    assert_eq!(err.code, ApiErrorCode::InvalidTimestamp);

    // Headers which are not numbers.
    let mut headers = credentials.headers(sign::now_millis(), 5000, "", "");
    headers[2].1 = "soon".into();
    let err = rejected_open(&raw, headers).await;
    assert_eq!(err.code, ApiErrorCode::InvalidTimestamp);

    let mut headers = credentials.headers(sign::now_millis(), 5000, "", "");
    headers[3].1 = "forever".into();
    let err = rejected_open(&raw, headers).await;
    assert_eq!(err.code, ApiErrorCode::AuthenticationError);
}

/// Send `headers` with a request for open orders, expecting it to be refused as unauthorized.
async fn rejected_open(raw: &surf::Client, headers: [(&'static str, String); 4]) -> ApiError {
    let mut req = raw.get(Endpoint::Open.full_path());
    for (name, value) in headers {
        req = req.header(name, value);
    }
    let mut res = req.await.unwrap();
    assert_eq!(res.status(), StatusCode::Unauthorized);
    res.body_json().await.unwrap()
}

#[async_std::test]
async fn test_malformed_body() {
    let sandbox = Sandbox::start().await;
    let raw = raw_client(&sandbox.url);
    let credentials = Credentials::new(API_KEY, API_SECRET).unwrap();

    let body = r#"{"orderId":"#;
    let mut req = raw
        .post(Endpoint::Cancel.full_path())
        .body_string(body.into())
        .content_type(mime::JSON);
    for (name, value) in credentials.headers(sign::now_millis(), 5000, "", body) {
        req = req.header(name, value);
    }
    let mut res = req.await.unwrap();
    assert_eq!(res.status(), StatusCode::BadRequest);
    let err: ApiError = res.body_json().await.unwrap();
    assert_eq!(err.code, ApiErrorCode::InvalidRequest);
}

#[async_std::test]
async fn test_concurrent_orders() {
    let sandbox = Sandbox::start().await;
    let client = sandbox.client();

    let orders = (0..10)
        .map(|i| twap(&format!("order-{i}"), "BTC/USDT", 0.01))
        .collect::<Vec<_>>();
    let results = join_all(orders.iter().map(|order| client.create_order(order))).await;

    let order_ids = results
        .into_iter()
        .map(|res| res.unwrap()["orderId"].as_str().unwrap().to_string())
        .collect::<HashSet<_>>();
    assert_eq!(order_ids.len(), 10);

    let res = client.open_orders().await.unwrap();
    assert_eq!(res["orders"].as_array().unwrap().len(), 10);
}
