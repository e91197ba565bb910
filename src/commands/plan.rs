use crate::actions::build_plan;
use crate::host::Host;
use crate::layout::{HostPath, Layout};
use crate::provisioner::{ActionReport, Outcome, Report};
use crate::receipt::Receipt;
use crate::{provisioner, ui};
use anyhow::Result;
use std::path::Path;

/// Report what `apply` would change. Safe to run unprivileged.
pub fn execute(root: &Path, manifest: Option<&Path>) -> Result<()> {
    let (manifest, source) = super::load_valid_manifest(root, manifest)?;
    let host = Host::system(Layout::new(root, &manifest.paths))?;

    ui::status("Planning", format!("from {source}"));
    let actions = build_plan(&manifest, &host);
    let report = provisioner::plan(&actions, &host);

    let receipt_path = host.layout.path(HostPath::Receipt);
    if receipt_path.exists() {
        match Receipt::load(&receipt_path) {
            Ok(receipt) => {
                ui::info(format!(
                    "Last apply: {} (aisec {})",
                    receipt.metadata.run_at, receipt.metadata.aisec_version
                ));
                for last in failed_last_time(&report, &receipt) {
                    ui::warn(format!(
                        "{} failed on the last apply: {}",
                        last.name,
                        last.detail.as_deref().unwrap_or("no detail")
                    ));
                }
            }
            Err(err) => ui::warn(format!("{err:#}")),
        }
    }

    ui::success("Plan", report.tally());
    Ok(())
}

/// Pending actions whose previous run ended in failure.
fn failed_last_time<'a>(report: &Report, receipt: &'a Receipt) -> Vec<&'a ActionReport> {
    report
        .actions()
        .iter()
        .filter(|current| current.outcome == Outcome::Pending)
        .filter_map(|current| receipt.action(&current.name))
        .filter(|last| last.outcome == Outcome::Failed)
        .collect()
}
