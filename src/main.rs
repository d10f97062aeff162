//! asserts-processor entry point.

use asserts_processor::cli::{self, Cli};
use asserts_processor::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
