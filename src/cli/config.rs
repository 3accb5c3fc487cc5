//! `config` subcommand: loads the effective configuration and prints it.

use crate::config::ServiceConfig;
use std::path::PathBuf;

pub async fn execute(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.map(PathBuf::from);
    let config = ServiceConfig::load(path.as_deref())?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prints_defaults_with_no_config_file() {
        let result = execute(None).await;
        assert!(result.is_ok());
    }
}
