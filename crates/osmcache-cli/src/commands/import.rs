//! Import command handler

use std::path::Path;

use anyhow::{Context, Result};

use osmcache_core::Mirror;

use crate::output::Output;

/// Import an OSM XML file in one transaction
pub fn import(mirror: &mut Mirror, path: &Path, output: &Output) -> Result<()> {
    let stats = mirror
        .import_file(path)
        .with_context(|| format!("Failed to import {}", path.display()))?;
    output.print_import(&stats)
}
