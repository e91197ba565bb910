use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::host::{CommandSpec, Host};
use crate::layout::HostPath;
use crate::manifest::Manifest;

mod apt;
mod desktop;
mod python;
mod runtime;
mod wrappers;

pub use apt::{InstallPackages, PurgePackages};
pub use desktop::{
    render_desktop_entry, render_directory_file, render_menu_merge, DesktopEntry, MenuCategory,
};
pub use python::{PythonLibraries, SourceCheckout, TextCorpus, VirtualEnv};
pub use runtime::{parse_node_major, GlobalToolLink, NodeRuntime, NpmGlobalTool};
pub use wrappers::{render_wrapper, Wrapper};

/// How a failing action affects the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// Failure stops the run.
    Required,
    /// Failure is recorded and the run continues.
    BestEffort,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Required => write!(f, "required"),
            Policy::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Result of comparing the host against an action's desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    /// Host already matches; nothing to do.
    Satisfied,
    /// Host differs; the message describes the pending change.
    Pending(String),
    /// Preconditions are absent; the message says which.
    Skip(String),
}

/// What an applied action reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub detail: Option<String>,
    /// Revision pinned by the action (commit id, digest).
    pub revision: Option<String>,
}

impl Applied {
    pub fn detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            revision: None,
        }
    }
}

/// One reconcilable provisioning step.
pub trait Action {
    fn name(&self) -> String;
    fn policy(&self) -> Policy;
    /// Inspect the host without changing it.
    fn check(&self, host: &Host) -> Result<ActionState>;
    /// Bring the host into the desired state.
    fn apply(&self, host: &Host) -> Result<Applied>;
}

/// A command whose effect cannot be observed beforehand; always pending.
pub struct RunCommand {
    name: String,
    policy: Policy,
    command: CommandSpec,
}

impl RunCommand {
    pub fn new(name: impl Into<String>, policy: Policy, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            policy,
            command,
        }
    }
}

impl Action for RunCommand {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn policy(&self) -> Policy {
        self.policy
    }

    fn check(&self, _host: &Host) -> Result<ActionState> {
        Ok(ActionState::Pending(format!("run {}", self.command)))
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        host.run_checked(&self.command)?;
        Ok(Applied::default())
    }
}

/// Build the ordered action list for a manifest.
pub fn build_plan(manifest: &Manifest, host: &Host) -> Vec<Box<dyn Action>> {
    let layout = &host.layout;
    let tag = manifest.menu.tag.clone();
    let mut plan: Vec<Box<dyn Action>> = Vec::new();

    plan.push(Box::new(RunCommand::new(
        "refresh package index",
        Policy::Required,
        apt::apt_get(["update"]),
    )));
    plan.push(Box::new(PurgePackages::new(manifest.packages.remove.clone())));
    plan.push(Box::new(InstallPackages::new(
        manifest.packages.install.clone(),
    )));

    plan.push(Box::new(NodeRuntime::new(manifest.runtime.clone())));
    if let Some(tool) = &manifest.runtime.global_tool {
        plan.push(Box::new(NpmGlobalTool::new(tool.clone())));
    }

    plan.push(Box::new(VirtualEnv));
    plan.push(Box::new(PythonLibraries::new(
        manifest.python.libraries.clone(),
    )));
    for source in &manifest.python.sources {
        plan.push(Box::new(SourceCheckout::new(source.clone())));
    }
    if let Some(corpus) = &manifest.python.corpus {
        plan.push(Box::new(TextCorpus::new(corpus.clone())));
    }

    for wrapper in &manifest.wrappers {
        plan.push(Box::new(Wrapper::new(wrapper.clone())));
    }
    if let Some(tool) = &manifest.runtime.global_tool {
        plan.push(Box::new(GlobalToolLink::new(tool.clone())));
    }

    for entry in &manifest.desktop {
        plan.push(Box::new(DesktopEntry::new(entry.clone(), tag.clone())));
    }
    plan.push(Box::new(RunCommand::new(
        "refresh desktop database",
        Policy::BestEffort,
        CommandSpec::new("update-desktop-database")
            .arg(layout.path(HostPath::Applications).display().to_string()),
    )));
    plan.push(Box::new(MenuCategory::new(manifest.menu.clone())));

    plan.push(Box::new(RunCommand::new(
        "remove orphaned packages",
        Policy::BestEffort,
        apt::apt_get(["autoremove", "-y"]),
    )));
    plan.push(Box::new(RunCommand::new(
        "clean package cache",
        Policy::BestEffort,
        apt::apt_get(["clean"]),
    )));

    plan
}

/// Whether `path` holds exactly `contents` (and, when given, exactly `mode`).
pub(crate) fn file_matches(path: &Path, contents: &str, mode: Option<u32>) -> bool {
    let Ok(existing) = fs::read(path) else {
        return false;
    };
    if existing != contents.as_bytes() {
        return false;
    }
    match mode {
        Some(mode) => fs::metadata(path)
            .map(|meta| meta.permissions().mode() & 0o7777 == mode)
            .unwrap_or(false),
        None => true,
    }
}

/// Write `contents` to `path`, creating parent directories and applying `mode`.
pub(crate) fn write_file(path: &Path, contents: &str, mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))?;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set permissions on {:?}", path))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::{host, FakeFetcher, FakeRunner};
    use crate::layout::Layout;
    use tempfile::TempDir;

    #[test]
    fn test_plan_order_follows_pipeline() {
        let temp = TempDir::new().unwrap();
        let manifest = Manifest::embedded().unwrap();
        let host = host(
            Layout::new(temp.path(), &manifest.paths),
            &FakeRunner::new(),
            &FakeFetcher::default(),
        );

        let names: Vec<String> = build_plan(&manifest, &host)
            .iter()
            .map(|action| action.name())
            .collect();

        let position = |name: &str| {
            names
                .iter()
                .position(|candidate| candidate == name)
                .unwrap_or_else(|| panic!("{name} missing from {names:?}"))
        };

        assert_eq!(names.first().map(String::as_str), Some("refresh package index"));
        assert!(position("purge desktop packages") < position("install base packages"));
        assert!(position("install base packages") < position("node runtime"));
        assert!(position("python environment") < position("python libraries"));
        assert!(position("python libraries") < position("source PyRIT"));
        assert!(position("source vigil-llm") < position("wrapper garak"));
        assert!(position("link promptfoo") < position("desktop entry vigil.desktop"));
        assert!(position("refresh desktop database") < position("menu category aisec"));
        assert_eq!(names.last().map(String::as_str), Some("clean package cache"));
    }

    #[test]
    fn test_plan_policies() {
        let temp = TempDir::new().unwrap();
        let manifest = Manifest::embedded().unwrap();
        let host = host(
            Layout::new(temp.path(), &manifest.paths),
            &FakeRunner::new(),
            &FakeFetcher::default(),
        );

        let plan = build_plan(&manifest, &host);
        let policy = |name: &str| {
            plan.iter()
                .find(|action| action.name() == name)
                .map(|action| action.policy())
                .unwrap()
        };

        assert_eq!(policy("refresh package index"), Policy::Required);
        assert_eq!(policy("purge desktop packages"), Policy::BestEffort);
        assert_eq!(policy("install base packages"), Policy::BestEffort);
        assert_eq!(policy("node runtime"), Policy::Required);
        assert_eq!(policy("npm global promptfoo"), Policy::BestEffort);
        assert_eq!(policy("python libraries"), Policy::Required);
        assert_eq!(policy("source PyRIT"), Policy::Required);
        assert_eq!(policy("source vigil-llm"), Policy::BestEffort);
        assert_eq!(policy("nltk corpus"), Policy::BestEffort);
        assert_eq!(policy("wrapper garak"), Policy::Required);
        assert_eq!(policy("link promptfoo"), Policy::BestEffort);
        assert_eq!(policy("desktop entry garak.desktop"), Policy::Required);
        assert_eq!(policy("desktop entry vigil.desktop"), Policy::BestEffort);
        assert_eq!(policy("refresh desktop database"), Policy::BestEffort);
        assert_eq!(policy("menu category aisec"), Policy::Required);
        assert_eq!(policy("remove orphaned packages"), Policy::BestEffort);
    }

    #[test]
    fn test_write_file_and_matches() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/file");

        assert!(!file_matches(&path, "hello", None));
        write_file(&path, "hello", Some(0o755)).unwrap();
        assert!(file_matches(&path, "hello", Some(0o755)));
        assert!(!file_matches(&path, "hello", Some(0o644)));
        assert!(!file_matches(&path, "hello!", None));
    }
}
