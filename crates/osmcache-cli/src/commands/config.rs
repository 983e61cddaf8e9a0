//! Config command handlers

use anyhow::{bail, Context, Result};

use osmcache_core::Config;

use crate::output::{Output, OutputFormat};

const KEYS: &str = "data_dir, table_prefix, max_age_secs, online, overpass_url, \
                    recursive_refresh, fetch_timeout_secs";

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:           {}", config.data_dir.display());
            println!("  table_prefix:       {}", config.table_prefix);
            println!("  max_age_secs:       {}", config.max_age_secs);
            println!("  online:             {}", config.online);
            println!(
                "  overpass_url:       {}",
                config.overpass_url.as_deref().unwrap_or("(default)")
            );
            println!("  recursive_refresh:  {}", config.recursive_refresh);
            println!("  fetch_timeout_secs: {}", config.fetch_timeout_secs);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "table_prefix" => {
            if value.is_empty()
                || !value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                bail!("Invalid table_prefix '{}': use letters, digits and '_'", value);
            }
            config.table_prefix = value.to_string();
        }
        "max_age_secs" => {
            config.max_age_secs = value
                .parse()
                .context("Invalid value for max_age_secs. Use a number of seconds.")?;
        }
        "online" => {
            config.online = value
                .parse()
                .context("Invalid value for online. Use 'true' or 'false'.")?;
        }
        "overpass_url" => {
            config.overpass_url = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.to_string())
            };
        }
        "recursive_refresh" => {
            config.recursive_refresh = value
                .parse()
                .context("Invalid value for recursive_refresh. Use 'true' or 'false'.")?;
        }
        "fetch_timeout_secs" => {
            config.fetch_timeout_secs = value
                .parse()
                .context("Invalid value for fetch_timeout_secs. Use a number of seconds.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();
        apply(&mut config, "max_age_secs", "3600").unwrap();
        apply(&mut config, "online", "false").unwrap();
        apply(&mut config, "overpass_url", "http://localhost/api").unwrap();
        apply(&mut config, "table_prefix", "bonn_").unwrap();

        assert_eq!(config.max_age_secs, 3600);
        assert!(!config.online);
        assert_eq!(config.overpass_endpoint(), "http://localhost/api");
        assert_eq!(config.table_prefix, "bonn_");

        apply(&mut config, "overpass_url", "none").unwrap();
        assert!(config.overpass_url.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply(&mut config, "max_age_secs", "a day").is_err());
        assert!(apply(&mut config, "online", "maybe").is_err());
        assert!(apply(&mut config, "table_prefix", "osm-").is_err());

        let err = apply(&mut config, "sync_url", "x").unwrap_err();
        assert!(err.to_string().contains("Valid keys"));
    }
}
