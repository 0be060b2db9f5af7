//! Configuration management commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use crate::cli::output::{OutputFormat, print_formatted, print_success};
use crate::config::Config;
use crate::session::Environment;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Show config file path
    Path,

    /// Select the publishing service environment
    SetEnv {
        /// production, staging or dev
        env: Environment,
    },

    /// Store an access token (an empty value signs out)
    SetToken {
        token: String,
    },
}

#[derive(Serialize)]
struct ConfigPathResult {
    path: String,
    exists: bool,
}

pub async fn run(command: ConfigCommands, format: OutputFormat, quiet: bool) -> Result<()> {
    match command {
        ConfigCommands::Show => show(format).await,
        ConfigCommands::Path => path(format).await,
        ConfigCommands::SetEnv { env } => set_env(env, quiet).await,
        ConfigCommands::SetToken { token } => set_token(&token, quiet).await,
    }
}

/// Copy of `config` safe to print
fn redacted(config: &Config) -> Config {
    let mut shown = config.clone();
    if let Some(token) = shown.session.access_token.as_mut() {
        *token = mask_token(token);
    }
    shown
}

fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    if token.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

async fn show(format: OutputFormat) -> Result<()> {
    let config = redacted(&Config::load()?);

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
    }

    Ok(())
}

async fn path(format: OutputFormat) -> Result<()> {
    let path = Config::config_path()?;
    let result = ConfigPathResult {
        path: path.display().to_string(),
        exists: path.exists(),
    };

    print_formatted(&result, format, |r| {
        if r.exists {
            r.path.clone()
        } else {
            format!("{} (not created yet)", r.path)
        }
    });
    Ok(())
}

async fn set_env(env: Environment, quiet: bool) -> Result<()> {
    let mut config = Config::load()?;
    config.session.environment = env;
    config.save()?;

    print_success(&format!("Environment set to {} ({})", env, env.base_url()), quiet);
    Ok(())
}

async fn set_token(token: &str, quiet: bool) -> Result<()> {
    let mut config = Config::load()?;
    let token = token.trim();
    config.session.access_token = (!token.is_empty()).then(|| token.to_string());
    config.save()?;

    if token.is_empty() {
        print_success("Access token cleared", quiet);
    } else {
        print_success("Access token saved", quiet);
    }
    Ok(())
}
