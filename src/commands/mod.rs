use crate::cli::{Cli, Commands};
use crate::host::Privilege;
use crate::manifest::{validate_manifest, Manifest, ManifestSource};
use crate::ui;
use anyhow::Result;
use std::path::Path;

mod apply;
mod check;
mod plan;

pub fn execute(cli: Cli) -> Result<()> {
    let manifest = cli.manifest.as_deref();

    match cli.command.unwrap_or(Commands::Apply) {
        Commands::Apply => apply::execute(&Privilege::current(), &cli.root, manifest),
        Commands::Plan => plan::execute(&cli.root, manifest),
        Commands::Check => check::execute(&cli.root, manifest),
    }
}

/// Resolve the manifest and refuse to continue when it has issues.
fn load_valid_manifest(root: &Path, explicit: Option<&Path>) -> Result<(Manifest, ManifestSource)> {
    let (manifest, source) = Manifest::resolve(explicit, root)?;
    tracing::debug!(source = %source, "loaded manifest");

    let issues = validate_manifest(&manifest);
    if issues.is_empty() {
        return Ok((manifest, source));
    }

    for issue in &issues {
        ui::error(format!("{source}: {issue}"));
    }
    anyhow::bail!("Manifest validation failed ({} issue(s)).", issues.len());
}
