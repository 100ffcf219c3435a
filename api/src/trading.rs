//! Facilities for trading through the Anboto API.

use crate::sign::{Credentials, DEFAULT_RECV_WINDOW};
use crate::types::{CancelManyOrders, CancelOrder, CreateManyOrders, CreateOrder, FindOrders, OrderQuery};
use anyhow::Error;
use async_trait::async_trait;
use clap::Args;
use serde_json::Value;
use surf::Url;

mod client;
mod local;

pub use client::Client;
pub use local::LocalClient;

/// Prefix shared by every trading endpoint.
pub const API_PREFIX: &str = "/api/v2/trading";

/// Base URL of the public test network.
pub const TESTNET_URL: &str = "https://api.testnet.anboto.xyz";

/// An Anboto trading client.
///
/// Each operation returns the decoded JSON body of the response. Failures reported by the API
/// are returned as [`ApiError`](crate::types::ApiError), wrapped in an [`Error`].
#[async_trait]
pub trait Trading {
    /// Submit a single order.
    async fn create_order(&self, order: &CreateOrder) -> Result<Value, Error>;

    /// Submit a batch of orders.
    async fn create_many_orders(&self, batch: &CreateManyOrders) -> Result<Value, Error>;

    /// Cancel a single order.
    async fn cancel_order(&self, cancel: &CancelOrder) -> Result<Value, Error>;

    /// Cancel a set of orders.
    async fn cancel_many_orders(&self, cancel: &CancelManyOrders) -> Result<Value, Error>;

    /// Look up orders by exchange-assigned or client-assigned ID.
    async fn get_orders(&self, query: &OrderQuery) -> Result<Value, Error>;

    /// Search orders by creation time.
    async fn find_orders(&self, query: &FindOrders) -> Result<Value, Error>;

    /// List all orders which have not yet reached a terminal status.
    async fn open_orders(&self) -> Result<Value, Error>;
}

/// HTTP method of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// The endpoints of the trading API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Create,
    CreateMany,
    Cancel,
    CancelMany,
    ById,
    Find,
    Open,
}

impl Endpoint {
    /// The path of this endpoint, relative to [`API_PREFIX`].
    pub fn path(&self) -> &'static str {
        match self {
            Self::Create => "/order/create",
            Self::CreateMany => "/order/createMany",
            Self::Cancel => "/order/cancel",
            Self::CancelMany => "/order/cancelMany",
            Self::ById => "/order/byId",
            Self::Find => "/order/find",
            Self::Open => "/order/open",
        }
    }

    /// The absolute path of this endpoint.
    pub fn full_path(&self) -> String {
        format!("{API_PREFIX}{}", self.path())
    }

    /// The HTTP method this endpoint is called with.
    pub fn method(&self) -> Method {
        match self {
            Self::ById | Self::Find | Self::Open => Method::Get,
            _ => Method::Post,
        }
    }
}

/// Options for connecting to the Anboto API.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Root URL of the Anboto API.
    #[clap(long, env = "ANBOTO_BASE_URL", default_value = TESTNET_URL)]
    pub base_url: Url,

    /// The API key to authenticate with.
    #[clap(short = 'k', long, env = "ANBOTO_API_KEY")]
    pub api_key: String,

    /// The base64-encoded secret issued with the API key.
    #[clap(long, env = "ANBOTO_API_SECRET", hide_env_values = true)]
    pub api_secret: String,

    /// How long, in milliseconds, a signed request remains valid.
    #[clap(long, env = "ANBOTO_RECV_WINDOW", default_value_t = DEFAULT_RECV_WINDOW)]
    pub recv_window: u64,
}

impl Options {
    /// Build a client for the configured API.
    pub fn connect(&self) -> Result<Client, Error> {
        let credentials = Credentials::new(self.api_key.clone(), &self.api_secret)?;
        Ok(Client::new(self.base_url.clone(), credentials)?.with_recv_window(self.recv_window))
    }
}
