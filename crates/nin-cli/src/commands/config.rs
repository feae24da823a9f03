//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result};

use nin_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let path = Config::config_path();
    match args.action {
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            println!("# {}", path.display());
            print!("{}", render(&path)?);
        }
        ConfigAction::Init => {
            init(&path)?;
            println!("  Wrote {}", path.display());
        }
    }
    Ok(())
}

/// Load the file at `path`, falling back to defaults when it is unusable.
pub fn load_or_default(path: &Path) -> Config {
    Config::load_from(path).unwrap_or_else(|e| {
        tracing::warn!("Ignoring configuration file: {}", e);
        Config::default()
    })
}

/// The effective configuration as TOML.
fn render(path: &Path) -> Result<String> {
    toml::to_string_pretty(&load_or_default(path)).context("serialize configuration")
}

/// Write the effective configuration back, filling in every default.
fn init(path: &Path) -> Result<()> {
    load_or_default(path)
        .save_to(path)
        .with_context(|| format!("write {}", path.display()))
}
