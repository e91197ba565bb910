use crate::actions::build_plan;
use crate::error::ProvisionError;
use crate::host::{Host, Privilege};
use crate::layout::{HostPath, Layout};
use crate::receipt::Receipt;
use crate::{provisioner, ui};
use anyhow::Result;
use std::path::Path;

pub fn execute(privilege: &Privilege, root: &Path, manifest: Option<&Path>) -> Result<()> {
    // Nothing may be read from or written to the host before this.
    privilege.ensure_root()?;

    let (manifest, source) = super::load_valid_manifest(root, manifest)?;
    let host = Host::system(Layout::new(root, &manifest.paths))?;

    ui::status("Provisioning", format!("from {source}"));
    let actions = build_plan(&manifest, &host);
    let report = provisioner::apply(&actions, &host);
    report.print_summary();

    let receipt_path = host.layout.path(HostPath::Receipt);
    let saved = Receipt::new(source.to_string(), &report).save(&receipt_path);

    if let Some(failed) = report.required_failure() {
        if let Err(err) = saved {
            ui::warn(format!("{err:#}"));
        }
        return Err(ProvisionError::RequiredActionFailed {
            action: failed.name.clone(),
        }
        .into());
    }
    saved?;

    ui::info(format!(
        "AI security tools are installed.\n\
         Environment:     {}\n\
         Wrappers:        {}\n\
         Desktop entries: {}\n\
         Receipt:         {}",
        host.layout.path(HostPath::Venv).display(),
        host.layout.path(HostPath::Bin).display(),
        host.layout.path(HostPath::Applications).display(),
        receipt_path.display(),
    ));
    Ok(())
}
