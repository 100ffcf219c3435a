use anboto::{init_logging, sign::Credentials, trading::LocalClient};
use anyhow::Error;
use clap::Parser;

mod server;
mod test_runner;

/// Start a local server speaking the Anboto trading API.
///
/// Orders are kept in memory and never executed. Requests must be signed with the configured key
/// and secret, just as they would be for the real API.
#[derive(Clone, Debug, Parser)]
struct Options {
    /// The port where the server should listen.
    #[clap(short, long, env = "SANDBOX_PORT", default_value = "8080")]
    port: u16,

    /// The only API key the server will accept.
    #[clap(short = 'k', long, env = "ANBOTO_API_KEY")]
    api_key: String,

    /// The base64-encoded secret for the API key.
    #[clap(long, env = "ANBOTO_API_SECRET", hide_env_values = true)]
    api_secret: String,
}

impl Options {
    /// Serve `book` until the server fails.
    async fn serve(self, book: LocalClient) -> Result<(), Error> {
        let credentials = Credentials::new(self.api_key, &self.api_secret)?;
        let app = server::app(book, credentials);
        tracing::info!("sandbox listening on port {}", self.port);
        app.listen(format!("0.0.0.0:{}", self.port)).await?;
        Ok(())
    }
}

#[async_std::main]
async fn main() -> Result<(), Error> {
    init_logging();
    Options::parse().serve(LocalClient::new()).await
}
