//! Status command handler

use anyhow::Result;

use osmcache_core::Mirror;

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(mirror: &Mirror, output: &Output) -> Result<()> {
    let counts = mirror.counts()?;
    let stale = mirror.stale_count()?;
    let config = mirror.config();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "database": config.sqlite_path(),
                    "table_prefix": config.table_prefix,
                    "online": mirror.is_online(),
                    "overpass_url": config.overpass_endpoint(),
                    "max_age_secs": config.max_age_secs,
                    "counts": counts,
                    "stale": stale
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", counts.total());
        }
        OutputFormat::Human => {
            println!("osmcache Status");
            println!("===============");
            println!();
            println!("Storage:");
            println!("  Database: {}", config.sqlite_path().display());
            println!("  Prefix:   {}", config.table_prefix);
            println!();
            println!("Remote:");
            println!(
                "  Status:   {}",
                if mirror.is_online() { "online" } else { "offline" }
            );
            println!("  Endpoint: {}", config.overpass_endpoint());
            println!("  Max age:  {}s", config.max_age_secs);
            println!();
            println!("Contents:");
            println!("  Nodes:     {}", counts.nodes);
            println!("  Ways:      {}", counts.ways);
            println!("  Relations: {}", counts.relations);
            println!("  Stale:     {}", stale);
        }
    }

    Ok(())
}
