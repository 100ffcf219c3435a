use anboto::{
    init_logging,
    trading::{self, Trading},
    types::{
        AssetCategory, CancelManyOrders, CancelOrder, CreateManyOrders, CreateOrder, Exchange,
        ExecutionStrategy, FindOrders, OrderQuery, Side,
    },
};
use anyhow::Error;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::fs::File;
use std::path::PathBuf;

/// Place, cancel and inspect orders through the Anboto trading API.
#[derive(Parser)]
#[group(skip)]
struct Options {
    #[clap(flatten)]
    api: trading::Options,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a single order.
    Create(CreateArgs),
    /// Submit a batch of orders read from a JSON file.
    CreateMany {
        /// A file containing a JSON array of orders.
        #[clap(short, long, value_name = "FILE")]
        file: PathBuf,

        /// Accept whichever orders are valid instead of rejecting the whole batch.
        #[clap(long)]
        partial: bool,
    },
    /// Cancel a single order.
    Cancel {
        #[clap(long, required_unless_present = "client_order_id")]
        order_id: Option<String>,

        #[clap(long)]
        client_order_id: Option<String>,
    },
    /// Cancel several orders.
    CancelMany {
        #[clap(
            long,
            value_delimiter = ',',
            required_unless_present = "client_order_ids"
        )]
        order_ids: Option<Vec<String>>,

        #[clap(long, value_delimiter = ',')]
        client_order_ids: Option<Vec<String>>,
    },
    /// Look up orders by ID.
    Get {
        #[clap(long, value_delimiter = ',')]
        order_ids: Vec<String>,

        #[clap(long, value_delimiter = ',')]
        client_order_ids: Vec<String>,
    },
    /// Search orders by creation time.
    Find {
        #[clap(long)]
        start_ms: Option<u64>,

        #[clap(long)]
        end_ms: Option<u64>,

        #[clap(short, long)]
        limit: Option<usize>,
    },
    /// List orders which are still open.
    Open,
}

#[derive(Args)]
struct CreateArgs {
    /// Unique ID for the new order. A random UUID is used if not given.
    #[clap(long)]
    client_order_id: Option<String>,

    #[clap(short, long)]
    exchange: Exchange,

    /// The instrument to trade, e.g. BTC/USDT.
    #[clap(short = 'y', long)]
    symbol: String,

    #[clap(short, long, default_value = "SPOT")]
    asset_category: AssetCategory,

    #[clap(long)]
    side: Side,

    #[clap(short, long)]
    quantity: f64,

    #[clap(long, default_value = "TWAP")]
    strategy: ExecutionStrategy,

    /// Required for LIMIT and STOP_LOSS orders.
    #[clap(long)]
    limit_price: Option<f64>,

    /// Start of the execution window, in milliseconds since the epoch.
    #[clap(long)]
    start_time: Option<u64>,

    /// End of the execution window, in milliseconds since the epoch.
    #[clap(long)]
    end_time: Option<u64>,

    #[clap(long, requires = "clip_size_val")]
    clip_size_type: Option<String>,

    #[clap(long, requires = "clip_size_type")]
    clip_size_val: Option<f64>,

    /// A strategy parameter, as KEY=VALUE. VALUE is read as JSON if possible, otherwise as a
    /// string. May be repeated.
    #[clap(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, Value)>,
}

impl CreateArgs {
    fn into_order(self) -> CreateOrder {
        let client_order_id = self
            .client_order_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut order = CreateOrder::new(
            client_order_id,
            self.exchange,
            self.symbol,
            self.asset_category,
            self.side,
            self.quantity,
            self.strategy,
        );
        order.limit_price = self.limit_price;
        order.start_time = self.start_time;
        order.end_time = self.end_time;
        if let (Some(kind), Some(value)) = (self.clip_size_type, self.clip_size_val) {
            order = order.with_clip_size(kind, value);
        }
        for (key, value) in self.params {
            order = order.with_param(key, value);
        }
        order
    }
}

fn parse_param(arg: &str) -> Result<(String, Value), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {arg:?}"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
    Ok((key.into(), value))
}

#[async_std::main]
async fn main() -> Result<(), Error> {
    init_logging();

    let opt = Options::parse();
    let client = opt.api.connect()?;

    let res = match opt.command {
        Command::Create(args) => {
            let order = args.into_order();
            tracing::info!("creating order {}", order.client_order_id);
            client.create_order(&order).await?
        }
        Command::CreateMany { file, partial } => {
            let orders: Vec<CreateOrder> = serde_json::from_reader(File::open(&file)?)
                .map_err(|err| Error::msg(format!("{} is malformed: {err}", file.display())))?;
            tracing::info!("creating {} orders", orders.len());
            client
                .create_many_orders(&CreateManyOrders::new(orders, !partial))
                .await?
        }
        Command::Cancel {
            order_id,
            client_order_id,
        } => {
            client
                .cancel_order(&CancelOrder::from_ids(order_id, client_order_id)?)
                .await?
        }
        Command::CancelMany {
            order_ids,
            client_order_ids,
        } => {
            client
                .cancel_many_orders(&CancelManyOrders::from_ids(order_ids, client_order_ids)?)
                .await?
        }
        Command::Get {
            order_ids,
            client_order_ids,
        } => {
            client
                .get_orders(&OrderQuery {
                    order_ids,
                    client_order_ids,
                })
                .await?
        }
        Command::Find {
            start_ms,
            end_ms,
            limit,
        } => {
            client
                .find_orders(&FindOrders {
                    start_ms,
                    end_ms,
                    limit,
                })
                .await?
        }
        Command::Open => client.open_orders().await?,
    };

    println!("{}", serde_json::to_string_pretty(&res)?);
    Ok(())
}
