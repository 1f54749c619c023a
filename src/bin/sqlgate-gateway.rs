use clap::Parser;
use sqlgate::cmd::{run_server, Cli};
use sqlgate::log::init_tracing_with;

#[tokio::main]
async fn main() -> sqlgate::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing_with(cli.log_level.as_deref(), cli.log_json);
    run_server(&cli).await
}
