//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::Result;
use serde::Serialize;

use osmcache_core::{Element, ImportStats};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a single element with its tags
    pub fn print_element(&self, element: &Element) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                let meta = element.meta();
                println!("Element:   {}", element.key());
                if element.is_stub() {
                    println!("           (stub, not yet fetched)");
                    return Ok(());
                }
                if let Element::Node(node) = element {
                    if let (Some(lat), Some(lon)) = (node.latitude, node.longitude) {
                        println!("Location:  {:.7}, {:.7}", lat, lon);
                    }
                }
                if let Some(version) = meta.version {
                    println!("Version:   {}", version);
                }
                if let Some(ref user) = meta.user {
                    println!("User:      {}", user);
                }
                if let Some(timestamp) = meta.timestamp {
                    println!("Edited:    {}", timestamp.format("%Y-%m-%d %H:%M"));
                }
                match meta.last_synced_at {
                    Some(synced) => println!("Synced:    {}", synced.format("%Y-%m-%d %H:%M")),
                    None => println!("Synced:    never"),
                }
                if meta.visible == Some(false) {
                    println!("Visible:   no (deleted)");
                }
                if !meta.tags.is_empty() {
                    println!();
                    println!("── Tags ({}) ──", meta.tags.len());
                    for (key, value) in &meta.tags {
                        println!("{} = {}", key, value);
                    }
                }
            }
            OutputFormat::Json => print_json(element)?,
            OutputFormat::Quiet => println!("{}", element.key()),
        }
        Ok(())
    }

    /// Print a list of elements
    pub fn print_elements(&self, elements: &[Element]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if elements.is_empty() {
                    println!("No elements found.");
                    return Ok(());
                }
                for element in elements {
                    println!("{}", summary_line(element));
                }
                println!("\n{} element(s)", elements.len());
            }
            OutputFormat::Json => print_json(elements)?,
            OutputFormat::Quiet => {
                for element in elements {
                    println!("{}", element.key());
                }
            }
        }
        Ok(())
    }

    /// Print the result of an import
    pub fn print_import(&self, stats: &ImportStats) -> Result<()> {
        match self.format {
            OutputFormat::Human => println!("✓ Imported {}", stats),
            OutputFormat::Json => print_json(stats)?,
            OutputFormat::Quiet => println!("{}", stats.total()),
        }
        Ok(())
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One line per element: key, name or stub marker, and location for nodes
fn summary_line(element: &Element) -> String {
    let mut line = format!("{:<20}", element.key().to_string());
    if element.is_stub() {
        line.push_str(" (stub)");
        return line;
    }
    if let Element::Node(node) = element {
        if let (Some(lat), Some(lon)) = (node.latitude, node.longitude) {
            line.push_str(&format!(" {:>11.7} {:>12.7}", lat, lon));
        }
    }
    if let Some(name) = element.tags().get("name") {
        line.push_str(&format!(" | {}", truncate(name, 40)));
    }
    line
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
