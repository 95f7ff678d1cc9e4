//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::{Context, Result};

/// Run the config command.
pub fn run_config(action: &ConfigAction, settings: Settings) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&settings)
                .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Set { key, value } => {
            let updated = set_value(&settings, key, value)?;
            let config_path = Settings::default_config_path();
            updated.save_to(&config_path)?;
            Output::success(&format!("Set {} = {} in {:?}", key, value, config_path));
        }

        ConfigAction::Edit => {
            let config_path = Settings::default_config_path();

            // Create default config if it doesn't exist
            if !config_path.exists() {
                settings.save()?;
                Output::info(&format!("Created default config at {:?}", config_path));
            }

            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());

            Output::info(&format!("Opening config in {}...", editor));

            let status = std::process::Command::new(&editor)
                .arg(&config_path)
                .status();

            match status {
                Ok(s) if s.success() => {
                    Output::success("Config saved.");
                }
                Ok(_) => {
                    Output::warning("Editor exited with non-zero status.");
                }
                Err(e) => {
                    Output::error(&format!("Failed to open editor: {}", e));
                    Output::info(&format!("Config file is at: {:?}", config_path));
                }
            }
        }

        ConfigAction::Path => {
            let config_path = Settings::default_config_path();
            println!("{}", config_path.display());
        }
    }

    Ok(())
}

/// Keys left out of the serialized config while unset.
const OPTIONAL_KEYS: &[&str] = &["judge_model", "api_base", "custom_dir"];

/// Apply a dotted `section.key = value` assignment and validate the result.
///
/// The value is read as a TOML literal when it parses as one (numbers,
/// booleans, arrays), otherwise as a string.
fn set_value(settings: &Settings, key: &str, value: &str) -> Result<Settings> {
    let mut root = toml::Value::try_from(settings).context("Failed to serialize config")?;

    let parts: Vec<&str> = key.split('.').collect();
    let (last, path) = parts
        .split_last()
        .filter(|(last, _)| !last.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Empty configuration key"))?;

    let mut table = root
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("Configuration root is not a table"))?;
    for part in path {
        table = table
            .get_mut(*part)
            .and_then(toml::Value::as_table_mut)
            .ok_or_else(|| anyhow::anyhow!("Unknown configuration section: {}", part))?;
    }
    let optional = OPTIONAL_KEYS.contains(last) || path.first() == Some(&"prompts");
    if !table.contains_key(*last) && !optional {
        anyhow::bail!("Unknown configuration key: {}", key);
    }

    let parsed = toml::from_str::<toml::Table>(&format!("v = {}", value))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(value.to_string()));
    table.insert(last.to_string(), parsed);

    let updated: Settings = root.try_into().context("Invalid value")?;
    updated.validate()?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::RewriteStrategy;

    #[test]
    fn test_set_number_and_enum() {
        let settings = Settings::default();
        let updated = set_value(&settings, "retrieval.top_k", "12").unwrap();
        assert_eq!(updated.retrieval.top_k, 12);

        let updated = set_value(&updated, "retrieval.rewrite_strategy", "expand").unwrap();
        assert_eq!(updated.retrieval.rewrite_strategy, RewriteStrategy::Expand);
        assert_eq!(updated.retrieval.top_k, 12);
    }

    #[test]
    fn test_set_unset_optional_key() {
        let updated = set_value(&Settings::default(), "generation.judge_model", "gpt-4o").unwrap();
        assert_eq!(updated.generation.judge_model(), "gpt-4o");
    }

    #[test]
    fn test_set_rejects_unknown_and_invalid() {
        let settings = Settings::default();
        assert!(set_value(&settings, "retrieval.nope", "1").is_err());
        assert!(set_value(&settings, "nosuch.key", "1").is_err());
        assert!(set_value(&settings, "retrieval.top_k", "0").is_err());
        assert!(set_value(&settings, "retrieval.top_k", "many").is_err());
    }
}
