mod error;
mod openai_compatible;
pub mod parse;

use std::time::Duration;

use reqwest::Client;

pub use error::{OracleError, OracleErrorKind};
pub use openai_compatible::OpenAiCompatibleOracle;

/// Build an HTTP client with an explicit timeout. Proxy discovery is skipped
/// under test to keep the suite hermetic.
pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, String> {
    let builder = Client::builder().timeout(timeout);
    let builder = if cfg!(test) { builder.no_proxy() } else { builder };
    builder
        .build()
        .map_err(|e| format!("failed to build HTTP client: {}", e))
}
