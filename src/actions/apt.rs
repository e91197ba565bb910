use anyhow::Result;

use super::{Action, ActionState, Applied, Policy};
use crate::host::{CommandSpec, Host};

pub(crate) const APT_GET: &str = "apt-get";

/// `apt-get` with prompts disabled.
pub(crate) fn apt_get<I, S>(args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CommandSpec::new(APT_GET)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .args(args)
}

/// Package state as the last word of dpkg's `${Status}`, e.g. `installed`
/// or `config-files`.
///
/// Unknown packages and a missing `dpkg-query` give `None`.
fn dpkg_status(host: &Host, package: &str) -> Option<String> {
    let spec = CommandSpec::new("dpkg-query").args(["-W", "--showformat=${Status}", package]);
    let output = host.run(&spec).ok().filter(|output| output.success)?;
    output.stdout.split_whitespace().last().map(str::to_string)
}

pub(crate) fn is_installed(host: &Host, package: &str) -> bool {
    dpkg_status(host, package).as_deref() == Some("installed")
}

/// Installed, or removed with its configuration left behind.
fn has_leftovers(host: &Host, package: &str) -> bool {
    matches!(
        dpkg_status(host, package).as_deref(),
        Some("installed" | "config-files")
    )
}

/// Purge every listed package that is still installed or still has
/// configuration on disk, in one call.
pub struct PurgePackages {
    packages: Vec<String>,
}

impl PurgePackages {
    pub fn new(packages: Vec<String>) -> Self {
        Self { packages }
    }

    fn installed(&self, host: &Host) -> Vec<String> {
        self.packages
            .iter()
            .filter(|package| has_leftovers(host, package))
            .cloned()
            .collect()
    }
}

impl Action for PurgePackages {
    fn name(&self) -> String {
        "purge desktop packages".to_string()
    }

    fn policy(&self) -> Policy {
        Policy::BestEffort
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        let installed = self.installed(host);
        if installed.is_empty() {
            Ok(ActionState::Satisfied)
        } else {
            Ok(ActionState::Pending(format!("purge {}", installed.join(" "))))
        }
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        let installed = self.installed(host);
        if installed.is_empty() {
            return Ok(Applied::default());
        }
        host.run_checked(&apt_get(["purge", "-y"]).args(installed.iter().cloned()))?;
        Ok(Applied::detail(format!("{} package(s)", installed.len())))
    }
}

/// Install every listed package that is missing, in one call.
pub struct InstallPackages {
    packages: Vec<String>,
}

impl InstallPackages {
    pub fn new(packages: Vec<String>) -> Self {
        Self { packages }
    }

    fn missing(&self, host: &Host) -> Vec<String> {
        self.packages
            .iter()
            .filter(|package| !is_installed(host, package))
            .cloned()
            .collect()
    }
}

impl Action for InstallPackages {
    fn name(&self) -> String {
        "install base packages".to_string()
    }

    fn policy(&self) -> Policy {
        Policy::BestEffort
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        let missing = self.missing(host);
        if missing.is_empty() {
            Ok(ActionState::Satisfied)
        } else {
            Ok(ActionState::Pending(format!("install {}", missing.join(" "))))
        }
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        let missing = self.missing(host);
        if missing.is_empty() {
            return Ok(Applied::default());
        }
        host.run_checked(&apt_get(["install", "-y"]).args(missing.iter().cloned()))?;
        Ok(Applied::detail(format!("{} package(s)", missing.len())))
    }
}
