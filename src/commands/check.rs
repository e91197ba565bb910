use crate::ui;
use anyhow::Result;
use std::path::Path;

pub fn execute(root: &Path, manifest: Option<&Path>) -> Result<()> {
    let (manifest, source) = super::load_valid_manifest(root, manifest)?;

    ui::success(
        "Check",
        format!(
            "{source}: {} packages, {} libraries, {} sources ({} required), {} wrappers, \
             {} desktop entries",
            manifest.packages.install.len() + manifest.packages.remove.len(),
            manifest.python.libraries.len(),
            manifest.python.sources.len(),
            manifest.required_sources().count(),
            manifest.wrappers.len(),
            manifest.desktop.len(),
        ),
    );
    Ok(())
}
