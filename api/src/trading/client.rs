//! A client for the remote Anboto API.

use super::{Endpoint, Method, Trading};
use crate::sign::{self, Credentials, DEFAULT_RECV_WINDOW};
use crate::types::{
    ApiError, ApiErrorCode, CancelManyOrders, CancelOrder, CreateManyOrders, CreateOrder,
    FindOrders, OrderQuery, Params,
};
use anyhow::Error;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use surf::{
    http::{mime, StatusCode},
    Url,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A signing client for the Anboto trading API.
pub struct Client {
    client: surf::Client,
    credentials: Credentials,
    recv_window: u64,
}

impl Client {
    /// Connect to the Anboto API rooted at `base_url`.
    pub fn new(base_url: Url, credentials: Credentials) -> Result<Self, Error> {
        let client: surf::Client = surf::Config::default()
            .set_base_url(base_url)
            .set_timeout(Some(REQUEST_TIMEOUT))
            .try_into()
            .map_err(|err| Error::msg(format!("unable to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            credentials,
            recv_window: DEFAULT_RECV_WINDOW,
        })
    }

    /// Use a different receive window for subsequent requests.
    pub fn with_recv_window(mut self, recv_window: u64) -> Self {
        self.recv_window = recv_window;
        self
    }

    fn request(&self, endpoint: Endpoint) -> Request<'_> {
        Request {
            client: self,
            endpoint,
            params: Params::new(),
            body: String::new(),
        }
    }
}

#[async_trait]
impl Trading for Client {
    async fn create_order(&self, order: &CreateOrder) -> Result<Value, Error> {
        self.request(Endpoint::Create).json(order)?.send().await
    }

    async fn create_many_orders(&self, batch: &CreateManyOrders) -> Result<Value, Error> {
        self.request(Endpoint::CreateMany).json(batch)?.send().await
    }

    async fn cancel_order(&self, cancel: &CancelOrder) -> Result<Value, Error> {
        self.request(Endpoint::Cancel).json(cancel)?.send().await
    }

    async fn cancel_many_orders(&self, cancel: &CancelManyOrders) -> Result<Value, Error> {
        self.request(Endpoint::CancelMany).json(cancel)?.send().await
    }

    async fn get_orders(&self, query: &OrderQuery) -> Result<Value, Error> {
        self.request(Endpoint::ById)
            .params(query.to_params())
            .send()
            .await
    }

    async fn find_orders(&self, query: &FindOrders) -> Result<Value, Error> {
        self.request(Endpoint::Find)
            .params(query.to_params())
            .send()
            .await
    }

    async fn open_orders(&self) -> Result<Value, Error> {
        self.request(Endpoint::Open).send().await
    }
}

/// A request under construction.
struct Request<'a> {
    client: &'a Client,
    endpoint: Endpoint,
    params: Params,
    body: String,
}

impl Request<'_> {
    fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Attach a JSON body.
    ///
    /// The body is serialized exactly once, so the bytes which are signed are the bytes which are
    /// sent.
    fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, Error> {
        self.body = serde_json::to_string(body)?;
        Ok(self)
    }

    async fn send(self) -> Result<Value, Error> {
        let path = self.endpoint.full_path();
        tracing::info!(method = ?self.endpoint.method(), %path, ?self.params, "Anboto request");

        let query = sign::query_string(&self.params);
        let headers = self.client.credentials.headers(
            sign::now_millis(),
            self.client.recv_window,
            &query,
            &self.body,
        );

        let mut builder = match self.endpoint.method() {
            Method::Get => self.client.client.get(&path),
            Method::Post => self
                .client
                .client
                .post(&path)
                .body_string(self.body)
                .content_type(mime::JSON),
        };
        if !self.params.is_empty() {
            builder = builder.query(&self.params).map_err(Error::msg)?;
        }
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        let mut res = builder.send().await.map_err(Error::msg)?;
        let body = res.body_string().await.map_err(Error::msg)?;
        parse_response(res.status(), &body)
    }
}

/// Interpret the status and body of a response.
fn parse_response(status: StatusCode, body: &str) -> Result<Value, Error> {
    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(body)
            .map_err(|err| Error::msg(format!("cannot parse response body as JSON: {err}")));
    }

    let status = u16::from(status);
    let err = serde_json::from_str::<ApiError>(body)
        .unwrap_or_else(|_| ApiError::new(ApiErrorCode::Other, format!("HTTP {status}: {body}")));
    tracing::warn!(status, "Anboto request failed: {err}");
    Err(err.into())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn api_error(res: Result<Value, Error>) -> ApiError {
        res.unwrap_err().downcast::<ApiError>().unwrap()
    }

    #[test]
    fn test_success_body() {
        assert_eq!(
            parse_response(StatusCode::Ok, r#"{"orders":[]}"#).unwrap(),
            json!({ "orders": [] })
        );
        assert_eq!(parse_response(StatusCode::Ok, "").unwrap(), Value::Null);
        assert!(parse_response(StatusCode::Ok, "not json").is_err());
    }

    #[test]
    fn test_error_body() {
        let err = api_error(parse_response(
            StatusCode::Unauthorized,
            r#"{"code":"INVALID_SIGNATURE","message":"bad signature"}"#,
        ));
        assert_eq!(
            err,
            ApiError::new(ApiErrorCode::InvalidSignature, "bad signature")
        );
    }

    #[test]
    fn test_unstructured_error_body() {
        let err = api_error(parse_response(StatusCode::BadGateway, "upstream down"));
        assert_eq!(err.code, ApiErrorCode::Other);
        assert_eq!(err.message, "HTTP 502: upstream down");
    }

    #[test]
    fn test_build_client() {
        let credentials = Credentials::from_secret_bytes("key", b"secret").unwrap();
        let client = Client::new(crate::trading::TESTNET_URL.parse().unwrap(), credentials)
            .unwrap()
            .with_recv_window(10_000);
        assert_eq!(client.recv_window, 10_000);

        let req = client.request(Endpoint::Create).json(&json!({ "a": 1 })).unwrap();
        assert_eq!(req.body, r#"{"a":1}"#);
        assert!(req.params.is_empty());
    }
}
