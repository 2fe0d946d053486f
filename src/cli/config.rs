//! Config command handlers.

use anyhow::{bail, Context, Result};

use watchcaller::config::validate::{validate_config, validate_semantics, DiagnosticLevel};
use watchcaller::config::Config;

use super::ConfigAction;

/// File plus environment, without the semantic checks `Config::load` applies.
pub(crate) fn load_unvalidated() -> Result<Config> {
    let mut config = Config::read_file(&Config::path()).context("Failed to read config file")?;
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    Ok(config)
}

pub(crate) async fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_unvalidated()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Check => {
            let config_path = Config::path();
            println!("Config file: {}", config_path.display());

            let mut diagnostics = Vec::new();
            if config_path.exists() {
                let content =
                    std::fs::read_to_string(&config_path).context("Failed to read config file")?;
                let raw: serde_json::Value = match serde_json::from_str(&content) {
                    Ok(v) => v,
                    Err(e) => bail!("[ERROR] Invalid JSON: {}", e),
                };
                diagnostics.extend(validate_config(&raw));
            } else {
                println!("[OK] No config file found (using defaults)");
            }

            let config = load_unvalidated()?;
            diagnostics.extend(validate_semantics(&config));

            for diag in &diagnostics {
                println!("{}", diag);
            }

            let errors = diagnostics
                .iter()
                .filter(|d| d.level == DiagnosticLevel::Error)
                .count();
            let warnings = diagnostics
                .iter()
                .filter(|d| d.level == DiagnosticLevel::Warn)
                .count();

            if errors > 0 {
                bail!("Found {} error(s), {} warning(s)", errors, warnings);
            }
            if warnings == 0 {
                println!("\nConfiguration looks good!");
            } else {
                println!("\nFound {} warning(s)", warnings);
            }
        }
    }
    Ok(())
}
