use clap::{Parser, Subcommand};

pub mod config;
pub mod run;

#[derive(Parser)]
#[command(name = "vote-service")]
#[command(author, version, about = "Conferencing platform vote service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the vote service
    Run {
        /// Path to a TOML config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Print the effective configuration and exit
    Config {
        /// Path to a TOML config file
        #[arg(long)]
        config: Option<String>,
    },
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { config: config_path } => run::execute(config_path).await,
        Commands::Config { config: config_path } => config::execute(config_path).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_config_path() {
        let cli = Cli::parse_from(["vote-service", "run", "--config", "/etc/vote/config.toml"]);
        match cli.command {
            Commands::Run { config } => assert_eq!(config, Some("/etc/vote/config.toml".to_string())),
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn parses_config_with_no_path() {
        let cli = Cli::parse_from(["vote-service", "config"]);
        matches!(cli.command, Commands::Config { config: None });
    }
}
