use clap::Parser;
use vote_service::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
