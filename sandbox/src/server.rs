//! HTTP front end for an in-memory order book.
//!
//! Requests are authenticated exactly as the Anboto API does it: the signature is recomputed over
//! the timestamp, API key, receive window, sorted query parameters and raw body, and compared
//! against the `X-SIGN` header.

use anboto::{
    sign::{self, Credentials, X_API_KEY, X_RECV_WINDOW, X_SIGN, X_TIMESTAMP},
    trading::{Endpoint, LocalClient, Method, Trading},
    types::{ApiError, ApiErrorCode, FindOrders, OrderQuery, Params},
};
use anyhow::Error;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tide::{Body, Request, Response, StatusCode};

/// The largest receive window a client may ask for, in milliseconds.
const MAX_RECV_WINDOW: u64 = 60_000;

const ENDPOINTS: [Endpoint; 7] = [
    Endpoint::Create,
    Endpoint::CreateMany,
    Endpoint::Cancel,
    Endpoint::CancelMany,
    Endpoint::ById,
    Endpoint::Find,
    Endpoint::Open,
];

/// Shared state of the server.
#[derive(Clone)]
pub struct State {
    book: LocalClient,
    credentials: Credentials,
}

/// Build the server, serving `book` to clients holding `credentials`.
pub fn app(book: LocalClient, credentials: Credentials) -> tide::Server<State> {
    let mut app = tide::with_state(State { book, credentials });
    for endpoint in ENDPOINTS {
        let mut route = app.at(&endpoint.full_path());
        match endpoint.method() {
            Method::Get => route.get(move |req| handle(req, endpoint)),
            Method::Post => route.post(move |req| handle(req, endpoint)),
        };
    }
    app
}

async fn handle(mut req: Request<State>, endpoint: Endpoint) -> tide::Result {
    let body = req.body_string().await?;
    let params: Params = match req.query() {
        Ok(params) => params,
        Err(err) => {
            return error_response(ApiError::new(
                ApiErrorCode::InvalidRequest,
                format!("malformed query string: {err}"),
            ))
        }
    };
    tracing::info!(path = req.url().path(), ?params, "sandbox request");

    if let Err(err) = authenticate(&req, &params, &body) {
        tracing::warn!("rejecting unauthenticated request: {err}");
        return error_response(err);
    }

    match dispatch(&req.state().book, endpoint, &params, &body).await {
        Ok(res) => Ok(Response::builder(StatusCode::Ok)
            .body(Body::from_json(&res)?)
            .build()),
        Err(err) => error_response(err.downcast::<ApiError>().unwrap_or_else(|err| {
            tracing::error!("internal error: {err}");
            ApiError::new(ApiErrorCode::SystemError, err.to_string())
        })),
    }
}

/// Check the authentication headers of a request.
fn authenticate(req: &Request<State>, params: &Params, body: &str) -> Result<(), ApiError> {
    let header = |name: &'static str| {
        req.header(name)
            .map(|values| values.last().as_str())
            .ok_or_else(|| {
                ApiError::new(
                    ApiErrorCode::AuthenticationError,
                    format!("missing {name} header"),
                )
            })
    };
    let api_key = header(X_API_KEY)?;
    let signature = header(X_SIGN)?;
    let timestamp = header(X_TIMESTAMP)?;
    let recv_window = header(X_RECV_WINDOW)?;

    let credentials = &req.state().credentials;
    if api_key != credentials.api_key() {
        return Err(ApiError::new(
            ApiErrorCode::InvalidApiKey,
            format!("unknown API key {api_key}"),
        ));
    }

    let timestamp: u64 = timestamp.parse().map_err(|_| {
        ApiError::new(
            ApiErrorCode::InvalidTimestamp,
            format!("malformed timestamp {timestamp:?}"),
        )
    })?;
    let recv_window: u64 = recv_window.parse().map_err(|_| {
        ApiError::new(
            ApiErrorCode::AuthenticationError,
            format!("malformed receive window {recv_window:?}"),
        )
    })?;
    if recv_window > MAX_RECV_WINDOW {
        return Err(ApiError::new(
            ApiErrorCode::InvalidTimestamp,
            format!("receive window {recv_window}ms exceeds the maximum of {MAX_RECV_WINDOW}ms"),
        ));
    }
    let now = sign::now_millis();
    if !sign::check_timestamp(timestamp, recv_window, now) {
        return Err(ApiError::new(
            ApiErrorCode::InvalidTimestamp,
            format!("timestamp {timestamp} is outside the {recv_window}ms window around {now}"),
        ));
    }

    let query = sign::query_string(params);
    if !credentials.verify(timestamp, recv_window, &query, body, signature) {
        return Err(ApiError::new(
            ApiErrorCode::InvalidSignature,
            "signature does not match request",
        ));
    }
    Ok(())
}

async fn dispatch(
    book: &LocalClient,
    endpoint: Endpoint,
    params: &Params,
    body: &str,
) -> Result<Value, Error> {
    match endpoint {
        Endpoint::Create => book.create_order(&parse_body(body)?).await,
        Endpoint::CreateMany => book.create_many_orders(&parse_body(body)?).await,
        Endpoint::Cancel => book.cancel_order(&parse_body(body)?).await,
        Endpoint::CancelMany => book.cancel_many_orders(&parse_body(body)?).await,
        Endpoint::ById => book.get_orders(&OrderQuery::from_params(params)).await,
        Endpoint::Find => book.find_orders(&FindOrders::from_params(params)?).await,
        Endpoint::Open => book.open_orders().await,
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|err| {
        ApiError::new(
            ApiErrorCode::InvalidRequest,
            format!("malformed request body: {err}"),
        )
    })
}

/// The HTTP status used to report an error with the given code.
fn status(code: ApiErrorCode) -> StatusCode {
    use ApiErrorCode::*;
    match code {
        InvalidRequest | InvalidOrder | QuantityExceed => StatusCode::BadRequest,
        AuthenticationError | InvalidApiKey | InvalidSignature | InvalidTimestamp => {
            StatusCode::Unauthorized
        }
        RateLimitExceeded => StatusCode::TooManyRequests,
        _ => StatusCode::InternalServerError,
    }
}

fn error_response(err: ApiError) -> tide::Result {
    Ok(Response::builder(status(err.code))
        .body(Body::from_json(&err)?)
        .build())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status(ApiErrorCode::InvalidOrder), StatusCode::BadRequest);
        assert_eq!(status(ApiErrorCode::InvalidSignature), StatusCode::Unauthorized);
        assert_eq!(status(ApiErrorCode::InvalidTimestamp), StatusCode::Unauthorized);
        assert_eq!(
            status(ApiErrorCode::RateLimitExceeded),
            StatusCode::TooManyRequests
        );
        assert_eq!(
            status(ApiErrorCode::ExchangeError),
            StatusCode::InternalServerError
        );
    }

    #[test]
    fn test_parse_body() {
        let err = parse_body::<anboto::types::CancelOrder>("{").unwrap_err();
        assert_eq!(err.code, ApiErrorCode::InvalidRequest);
        let cancel: anboto::types::CancelOrder = parse_body(r#"{"orderId":"1"}"#).unwrap();
        assert_eq!(cancel, anboto::types::CancelOrder::OrderId("1".into()));
    }
}
