use anyhow::{Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::os::unix::fs::symlink;

use super::{apt, Action, ActionState, Applied, Policy};
use crate::error::ProvisionError;
use crate::host::{CommandSpec, Host};
use crate::layout::HostPath;
use crate::manifest::{parse_sha256, RuntimeConfig};

/// Major version of a `node --version` string such as `v20.11.1`.
pub fn parse_node_major(version: &str) -> Option<u32> {
    let pattern = Regex::new(r"^v(\d+)\.\d+").ok()?;
    pattern
        .captures(version.trim())
        .and_then(|captures| captures.get(1))
        .and_then(|major| major.as_str().parse().ok())
}

/// Node.js from the vendor repository, unless a compatible one is present.
pub struct NodeRuntime {
    config: RuntimeConfig,
}

impl NodeRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    fn installed_major(&self, host: &Host) -> Option<u32> {
        let output = host.run(&CommandSpec::new("node").arg("--version")).ok()?;
        if !output.success {
            return None;
        }
        parse_node_major(&output.stdout)
    }
}

impl Action for NodeRuntime {
    fn name(&self) -> String {
        "node runtime".to_string()
    }

    fn policy(&self) -> Policy {
        Policy::Required
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        Ok(match self.installed_major(host) {
            Some(major) if major >= self.config.major => ActionState::Satisfied,
            Some(major) => ActionState::Pending(format!(
                "upgrade {} v{major} to {}.x",
                self.config.package, self.config.major
            )),
            None => ActionState::Pending(format!(
                "install {} {}.x",
                self.config.package, self.config.major
            )),
        })
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        let url = &self.config.setup_url;
        let script = host
            .fetch(url)
            .with_context(|| format!("Failed to download runtime setup script from {url}"))?;

        let digest = Sha256::digest(&script);
        let actual = hex::encode(digest);
        tracing::info!(url = %url, sha256 = %actual, "fetched runtime setup script");

        if let Some(pin) = &self.config.setup_sha256 {
            let expected = parse_sha256(pin)?;
            if expected[..] != digest[..] {
                return Err(ProvisionError::ChecksumMismatch {
                    url: url.clone(),
                    expected: hex::encode(expected),
                    actual,
                }
                .into());
            }
        }

        host.run_checked(&CommandSpec::new("bash").arg("-").stdin(script))?;
        host.run_checked(&apt::apt_get(["install", "-y", self.config.package.as_str()]))?;

        Ok(Applied {
            detail: Some(format!("{} {}.x", self.config.package, self.config.major)),
            revision: Some(format!("sha256:{actual}")),
        })
    }
}

/// A CLI tool installed with `npm install -g`.
pub struct NpmGlobalTool {
    tool: String,
}

impl NpmGlobalTool {
    pub fn new(tool: String) -> Self {
        Self { tool }
    }
}

impl Action for NpmGlobalTool {
    fn name(&self) -> String {
        format!("npm global {}", self.tool)
    }

    fn policy(&self) -> Policy {
        Policy::BestEffort
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        let listed = CommandSpec::new("npm").args(["ls", "-g", "--depth=0", self.tool.as_str()]);
        if host.succeeds(&listed) {
            Ok(ActionState::Satisfied)
        } else {
            Ok(ActionState::Pending(format!("npm install -g {}", self.tool)))
        }
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        host.run_checked(&CommandSpec::new("npm").args(["install", "-g", self.tool.as_str()]))?;
        Ok(Applied::default())
    }
}

/// Symlink a globally installed tool into the wrapper directory when it can
/// be found on the search path.
pub struct GlobalToolLink {
    tool: String,
}

impl GlobalToolLink {
    pub fn new(tool: String) -> Self {
        Self { tool }
    }
}

impl Action for GlobalToolLink {
    fn name(&self) -> String {
        format!("link {}", self.tool)
    }

    fn policy(&self) -> Policy {
        Policy::BestEffort
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        let link = host.layout.path(HostPath::Bin).join(&self.tool);
        let Some(resolved) = host.which(&self.tool) else {
            return Ok(ActionState::Skip(format!("{} not found on PATH", self.tool)));
        };

        if resolved == link {
            return Ok(ActionState::Satisfied);
        }
        if fs::read_link(&link).map(|target| target == resolved).unwrap_or(false) {
            return Ok(ActionState::Satisfied);
        }

        Ok(ActionState::Pending(format!(
            "link {} -> {}",
            link.display(),
            resolved.display()
        )))
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        let bin_dir = host.layout.path(HostPath::Bin);
        let link = bin_dir.join(&self.tool);
        let resolved = host
            .which(&self.tool)
            .with_context(|| format!("{} is no longer on PATH", self.tool))?;

        fs::create_dir_all(&bin_dir)
            .with_context(|| format!("Failed to create directory {:?}", bin_dir))?;

        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link)
                .with_context(|| format!("Failed to replace existing {:?}", link))?;
        }

        symlink(&resolved, &link)
            .with_context(|| format!("Failed to link {:?} -> {:?}", link, resolved))?;

        Ok(Applied::detail(format!("-> {}", resolved.display())))
    }
}
