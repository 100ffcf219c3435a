//! Vocabulary of the Anboto trading API: enumerations, request payloads, and response records.

use anyhow::Error;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use strum::{EnumIter, EnumString};

/// Query parameters of a request, kept sorted by key.
///
/// The sort order matters: the signature covers the parameters in key order.
pub type Params = BTreeMap<String, String>;

/// Machine-readable error codes returned by the API.
#[derive(
    Clone,
    Copy,
    Debug,
    strum::Display,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    Other,
    QuantityExceed,
    AuthenticationError,
    InsufficientFunds,
    RateLimitExceeded,
    DdosProtection,
    ExchangeNotAvailable,
    NetworkError,
    InvalidOrder,
    ExchangeError,
    EmsInstancesDown,
    SlippageExceeded,
    ExpiryReached,
    MaxFeePerGasIsTooLow,
    ParentOrderWasTerminated,
    MaxPriorityFeePerGasIsTooLow,
    InvalidSignature,
    InvalidApiKey,
    InvalidTimestamp,
    SystemError,
    InvalidRequest,
}

impl From<String> for ApiErrorCode {
    fn from(code: String) -> Self {
        code.parse().unwrap_or_else(|_| {
            tracing::warn!("unknown API error code {code}");
            Self::Other
        })
    }
}

/// The kind of instrument being traded.
#[derive(
    Clone,
    Copy,
    Debug,
    strum::Display,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AssetCategory {
    Spot,
    Future,
    Option,
}

/// A venue on which orders are executed.
///
/// Parsing ignores case, since callers commonly write venue names in lowercase.
#[derive(
    Clone,
    Copy,
    Debug,
    strum::Display,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Exchange {
    Binance,
    Huobi,
    Gateio,
    Kraken,
    Kucoin,
    Okx,
    Bybit,
    Bitget,
}

impl TryFrom<String> for Exchange {
    type Error = strum::ParseError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// The algorithm used to work an order.
#[derive(
    Clone,
    Copy,
    Debug,
    strum::Display,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ExecutionStrategy {
    Twap,
    Vwap,
    Iceberg,
    Market,
    Limit,
    StopLoss,
}

impl ExecutionStrategy {
    /// Whether orders using this strategy must carry a limit price.
    pub fn requires_limit_price(&self) -> bool {
        matches!(self, Self::Limit | Self::StopLoss)
    }
}

/// The lifecycle state of an order.
#[derive(
    Clone,
    Copy,
    Debug,
    strum::Display,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingNew,
    Accepted,
    Rejected,
    PartiallyFilled,
    Filled,
    PendingCancel,
    Cancelled,
    PendingPause,
    Paused,
    PendingUnpause,
    Expired,
    CancelRejected,
}

impl OrderStatus {
    /// Whether an order in this state is finished and can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Filled | Self::Cancelled | Self::Expired
        )
    }
}

/// The direction of an order.
#[derive(
    Clone,
    Copy,
    Debug,
    strum::Display,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Side {
    Buy,
    Sell,
    ShortSell,
}

/// Body of the `order/create` endpoint.
///
/// The required fields are snake_case on the wire while the optional ones are camelCase. Optional
/// fields are left out of the body entirely when unset.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CreateOrder {
    pub client_order_id: String,
    pub exchange: Exchange,
    pub symbol: String,
    pub asset_category: AssetCategory,
    pub side: Side,
    pub quantity: f64,
    pub strategy: ExecutionStrategy,
    #[serde(rename = "limitPrice", default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    /// Start of the execution window, in milliseconds since the epoch.
    #[serde(rename = "startTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    /// End of the execution window, in milliseconds since the epoch.
    #[serde(rename = "endTime", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(rename = "clipSizeType", default, skip_serializing_if = "Option::is_none")]
    pub clip_size_type: Option<String>,
    #[serde(rename = "clipSizeVal", default, skip_serializing_if = "Option::is_none")]
    pub clip_size_val: Option<f64>,
    /// Strategy-specific parameters, e.g. `{"duration_seconds": 300}` for TWAP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl CreateOrder {
    /// An order with only the required fields set.
    pub fn new(
        client_order_id: impl Into<String>,
        exchange: Exchange,
        symbol: impl Into<String>,
        asset_category: AssetCategory,
        side: Side,
        quantity: f64,
        strategy: ExecutionStrategy,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            exchange,
            symbol: symbol.into(),
            asset_category,
            side,
            quantity,
            strategy,
            limit_price: None,
            start_time: None,
            end_time: None,
            clip_size_type: None,
            clip_size_val: None,
            params: None,
        }
    }

    pub fn with_limit_price(mut self, price: f64) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_start_time(mut self, ms: u64) -> Self {
        self.start_time = Some(ms);
        self
    }

    pub fn with_end_time(mut self, ms: u64) -> Self {
        self.end_time = Some(ms);
        self
    }

    pub fn with_clip_size(mut self, kind: impl Into<String>, value: f64) -> Self {
        self.clip_size_type = Some(kind.into());
        self.clip_size_val = Some(value);
        self
    }

    /// Set a single strategy parameter, creating the parameter object if necessary.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

fn default_all_or_none() -> bool {
    true
}

/// Body of the `order/createMany` endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CreateManyOrders {
    pub orders: Vec<CreateOrder>,
    /// If set, the batch is accepted only if every order in it is accepted.
    #[serde(rename = "allOrNone", default = "default_all_or_none")]
    pub all_or_none: bool,
}

impl CreateManyOrders {
    pub fn new(orders: Vec<CreateOrder>, all_or_none: bool) -> Self {
        Self {
            orders,
            all_or_none,
        }
    }
}

/// Body of the `order/cancel` endpoint: identifies a single order.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum CancelOrder {
    #[serde(rename = "orderId")]
    OrderId(String),
    #[serde(rename = "clientOrderId")]
    ClientOrderId(String),
}

impl CancelOrder {
    /// Identify the order to cancel, preferring the exchange-assigned `order_id` if both are given.
    pub fn from_ids(order_id: Option<String>, client_order_id: Option<String>) -> Result<Self, Error> {
        match (order_id, client_order_id) {
            (Some(id), _) => Ok(Self::OrderId(id)),
            (None, Some(id)) => Ok(Self::ClientOrderId(id)),
            (None, None) => Err(Error::msg(
                "Either order_id or client_order_id must be provided.",
            )),
        }
    }
}

/// Body of the `order/cancelMany` endpoint: identifies a set of orders.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum CancelManyOrders {
    #[serde(rename = "orderIds")]
    OrderIds(Vec<String>),
    #[serde(rename = "clientOrderIds")]
    ClientOrderIds(Vec<String>),
}

impl CancelManyOrders {
    /// Identify the orders to cancel, preferring `order_ids` if both are given.
    pub fn from_ids(
        order_ids: Option<Vec<String>>,
        client_order_ids: Option<Vec<String>>,
    ) -> Result<Self, Error> {
        match (order_ids, client_order_ids) {
            (Some(ids), _) => Ok(Self::OrderIds(ids)),
            (None, Some(ids)) => Ok(Self::ClientOrderIds(ids)),
            (None, None) => Err(Error::msg(
                "Either order_ids or client_order_ids must be provided.",
            )),
        }
    }
}

/// Query of the `order/byId` endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderQuery {
    pub order_ids: Vec<String>,
    pub client_order_ids: Vec<String>,
}

impl OrderQuery {
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        if !self.order_ids.is_empty() {
            params.insert("orderIds".into(), self.order_ids.join(","));
        }
        if !self.client_order_ids.is_empty() {
            params.insert("clientOrderIds".into(), self.client_order_ids.join(","));
        }
        params
    }

    pub fn from_params(params: &Params) -> Self {
        let split = |key: &str| {
            params
                .get(key)
                .map(|ids| {
                    ids.split(',')
                        .filter(|id| !id.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default()
        };
        Self {
            order_ids: split("orderIds"),
            client_order_ids: split("clientOrderIds"),
        }
    }
}

/// Query of the `order/find` endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FindOrders {
    /// Earliest creation time to include, in milliseconds since the epoch.
    pub start_ms: Option<u64>,
    /// Latest creation time to include, in milliseconds since the epoch.
    pub end_ms: Option<u64>,
    /// Maximum number of orders to return.
    pub limit: Option<usize>,
}

impl FindOrders {
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        if let Some(start) = self.start_ms {
            params.insert("startMs".into(), start.to_string());
        }
        if let Some(end) = self.end_ms {
            params.insert("endMs".into(), end.to_string());
        }
        if let Some(limit) = self.limit {
            params.insert("limit".into(), limit.to_string());
        }
        params
    }

    pub fn from_params(params: &Params) -> Result<Self, ApiError> {
        fn parse<T: std::str::FromStr>(params: &Params, key: &str) -> Result<Option<T>, ApiError>
        where
            T::Err: std::fmt::Display,
        {
            params
                .get(key)
                .map(|value| {
                    value.parse().map_err(|err| {
                        ApiError::new(
                            ApiErrorCode::InvalidRequest,
                            format!("invalid {key} {value:?}: {err}"),
                        )
                    })
                })
                .transpose()
        }

        Ok(Self {
            start_ms: parse(params, "startMs")?,
            end_ms: parse(params, "endMs")?,
            limit: parse(params, "limit")?,
        })
    }
}

/// An order as recorded by the order book.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Order {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub status: OrderStatus,
    /// Creation time, in milliseconds since the epoch.
    #[serde(rename = "createdMs")]
    pub created_ms: u64,
    #[serde(flatten)]
    pub request: CreateOrder,
}

/// An error reported by the API.
///
/// This is both the JSON body of a failed response and a Rust error, so callers holding an
/// [`anyhow::Error`] can recover it with [`downcast_ref`](anyhow::Error::downcast_ref).
#[derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize)]
#[display(fmt = "Anboto API error {}: {}", code, message)]
pub struct ApiError {
    #[serde(alias = "errorCode", alias = "error_code")]
    pub code: ApiErrorCode,
    #[serde(default)]
    pub message: String,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::error::Error for ApiError {}
