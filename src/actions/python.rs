use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Action, ActionState, Applied, Policy};
use crate::host::{CommandSpec, Host};
use crate::layout::{HostPath, Layout};
use crate::manifest::{requirement_name, CorpusDefinition, SourceDefinition};

const BOOTSTRAP_PACKAGES: [&str; 3] = ["pip", "setuptools", "wheel"];

/// Run an executable from the venv as if the venv were activated.
fn venv_command(layout: &Layout, executable: &str) -> CommandSpec {
    let venv = layout.path(HostPath::Venv);
    let venv_bin = layout.path(HostPath::VenvBin);
    let path = match env::var("PATH") {
        Ok(existing) if !existing.is_empty() => format!("{}:{existing}", venv_bin.display()),
        _ => venv_bin.display().to_string(),
    };

    CommandSpec::new(layout.venv_executable(executable).display().to_string())
        .env("VIRTUAL_ENV", venv.display().to_string())
        .env("PATH", path)
}

fn pip(layout: &Layout) -> CommandSpec {
    venv_command(layout, "pip")
}

/// Distributions pip inside the venv does not know.
///
/// Queried one name at a time: `pip show a b` exits 0 when any one is found.
fn pip_missing<'a>(host: &Host, names: &[&'a str]) -> Vec<&'a str> {
    names
        .iter()
        .copied()
        .filter(|name| !host.succeeds(&pip(&host.layout).args(["show", "--quiet", *name])))
        .collect()
}

/// The isolated interpreter environment with an up-to-date installer.
pub struct VirtualEnv;

impl Action for VirtualEnv {
    fn name(&self) -> String {
        "python environment".to_string()
    }

    fn policy(&self) -> Policy {
        Policy::Required
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        let python = host.layout.venv_executable("python");
        if python.exists() {
            Ok(ActionState::Satisfied)
        } else {
            Ok(ActionState::Pending(format!(
                "create {}",
                host.layout.path(HostPath::Venv).display()
            )))
        }
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        let base = host.layout.path(HostPath::Base);
        fs::create_dir_all(&base)
            .with_context(|| format!("Failed to create base directory {:?}", base))?;

        let venv = host.layout.path(HostPath::Venv);
        if !host.layout.venv_executable("python").exists() {
            host.run_checked(
                &CommandSpec::new("python3")
                    .args(["-m", "venv"])
                    .arg(venv.display().to_string()),
            )?;
        }

        host.run_checked(
            &pip(&host.layout)
                .args(["install", "--upgrade"])
                .args(BOOTSTRAP_PACKAGES),
        )?;

        Ok(Applied::detail(venv.display().to_string()))
    }
}

/// The security-library batch. One failing requirement fails the batch.
pub struct PythonLibraries {
    libraries: Vec<String>,
}

impl PythonLibraries {
    pub fn new(libraries: Vec<String>) -> Self {
        Self { libraries }
    }
}

impl Action for PythonLibraries {
    fn name(&self) -> String {
        "python libraries".to_string()
    }

    fn policy(&self) -> Policy {
        Policy::Required
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        let names: Vec<&str> = self
            .libraries
            .iter()
            .map(|spec| requirement_name(spec))
            .collect();
        let missing = pip_missing(host, &names);
        if missing.is_empty() {
            Ok(ActionState::Satisfied)
        } else {
            Ok(ActionState::Pending(format!("pip install {}", missing.join(" "))))
        }
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        if self.libraries.is_empty() {
            return Ok(Applied::default());
        }
        host.run_checked(&pip(&host.layout).arg("install").args(self.libraries.iter().cloned()))?;
        Ok(Applied::detail(format!("{} requirement(s)", self.libraries.len())))
    }
}

/// Clone `url` into `dest` and return the checked-out commit id.
pub(crate) fn clone_repository(url: &str, dest: &Path) -> Result<String> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    tracing::info!(url = %url, dest = %dest.display(), "cloning");
    git2::Repository::clone(url, dest)
        .with_context(|| format!("Failed to clone repository {} to {:?}", url, dest))?;

    head_revision(dest)
}

/// Commit id at `HEAD` of the repository at `path`.
pub(crate) fn head_revision(path: &Path) -> Result<String> {
    let repo = git2::Repository::open(path)
        .with_context(|| format!("{:?} is not a git repository", path))?;
    let head = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .with_context(|| format!("Repository {:?} has no commits", path))?;
    Ok(head.id().to_string())
}

/// A package installed from a git checkout under the sources directory.
///
/// Existing checkouts are reused as-is; there is no fetch or pin.
pub struct SourceCheckout {
    source: SourceDefinition,
}

impl SourceCheckout {
    pub fn new(source: SourceDefinition) -> Self {
        Self { source }
    }
}

impl Action for SourceCheckout {
    fn name(&self) -> String {
        format!("source {}", self.source.name)
    }

    fn policy(&self) -> Policy {
        if self.source.required {
            Policy::Required
        } else {
            Policy::BestEffort
        }
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        let dir = host.layout.source_dir(&self.source.name);
        if !dir.exists() {
            return Ok(ActionState::Pending(format!("clone {}", self.source.url)));
        }
        // Requirements files cannot be compared cheaply; pip resolves them as no-ops.
        if self.source.requirements.is_some() {
            return Ok(ActionState::Pending("sync requirements".to_string()));
        }
        if self.source.editable && !pip_missing(host, &[self.source.name.as_str()]).is_empty() {
            return Ok(ActionState::Pending(format!(
                "pip install -e {}",
                dir.display()
            )));
        }
        Ok(ActionState::Satisfied)
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        let dir = host.layout.source_dir(&self.source.name);
        let revision = if dir.exists() {
            head_revision(&dir).ok()
        } else {
            Some(clone_repository(&self.source.url, &dir)?)
        };

        if self.source.editable {
            host.run_checked(
                &pip(&host.layout)
                    .args(["install", "-e"])
                    .arg(dir.display().to_string()),
            )?;
        }

        if let Some(requirements) = &self.source.requirements {
            host.run_checked(
                &pip(&host.layout)
                    .args(["install", "-r"])
                    .arg(dir.join(requirements).display().to_string()),
            )?;
        }

        Ok(Applied {
            detail: Some(dir.display().to_string()),
            revision,
        })
    }
}

/// NLTK data packages downloaded into the venv.
///
/// `<venv>/nltk_data` is `sys.prefix/nltk_data`, which NLTK searches by default.
pub struct TextCorpus {
    corpus: CorpusDefinition,
}

impl TextCorpus {
    pub fn new(corpus: CorpusDefinition) -> Self {
        Self { corpus }
    }

    fn data_dir(&self, host: &Host) -> PathBuf {
        host.layout.path(HostPath::Venv).join(&self.corpus.dir)
    }

    fn missing(&self, data_dir: &Path) -> Vec<String> {
        self.corpus
            .ids
            .iter()
            .filter(|id| !corpus_present(data_dir, id))
            .cloned()
            .collect()
    }
}

/// NLTK stores packages as `<data>/<category>/<id>` or `<id>.zip`.
fn corpus_present(data_dir: &Path, id: &str) -> bool {
    let Ok(categories) = fs::read_dir(data_dir) else {
        return false;
    };
    categories.filter_map(|entry| entry.ok()).any(|entry| {
        let category = entry.path();
        category.join(id).exists() || category.join(format!("{id}.zip")).exists()
    })
}

impl Action for TextCorpus {
    fn name(&self) -> String {
        "nltk corpus".to_string()
    }

    fn policy(&self) -> Policy {
        Policy::BestEffort
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        let missing = self.missing(&self.data_dir(host));
        if missing.is_empty() {
            Ok(ActionState::Satisfied)
        } else {
            Ok(ActionState::Pending(format!("download {}", missing.join(" "))))
        }
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        let data_dir = self.data_dir(host);
        let missing = self.missing(&data_dir);
        if missing.is_empty() {
            return Ok(Applied::default());
        }

        host.run_checked(
            &venv_command(&host.layout, "python")
                .args(["-m", "nltk.downloader", "-d"])
                .arg(data_dir.display().to_string())
                .args(missing.iter().cloned()),
        )?;
        Ok(Applied::detail(missing.join(" ")))
    }
}
