use anyhow::Result;
use std::path::Path;

use super::{file_matches, write_file, Action, ActionState, Applied, Policy};
use crate::host::Host;
use crate::layout::HostPath;
use crate::manifest::WrapperDefinition;

const WRAPPER_MODE: u32 = 0o755;

/// Shell script forwarding all arguments to `target` inside the venv.
///
/// The path is the real host path; the script runs after `--root` is gone.
pub fn render_wrapper(venv_bin: &Path, target: &str) -> String {
    format!(
        "#!/bin/sh\nexec \"{}\" \"$@\"\n",
        venv_bin.join(target).display()
    )
}

/// Wrapper in the bin directory exposing a venv executable system-wide.
pub struct Wrapper {
    definition: WrapperDefinition,
}

impl Wrapper {
    pub fn new(definition: WrapperDefinition) -> Self {
        Self { definition }
    }

    fn contents(&self, host: &Host) -> String {
        let venv_bin = host.layout.unrooted(HostPath::VenvBin);
        render_wrapper(&venv_bin, &self.definition.target)
    }
}

impl Action for Wrapper {
    fn name(&self) -> String {
        format!("wrapper {}", self.definition.name)
    }

    fn policy(&self) -> Policy {
        Policy::Required
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        let path = host.layout.path(HostPath::Bin).join(&self.definition.name);
        if file_matches(&path, &self.contents(host), Some(WRAPPER_MODE)) {
            Ok(ActionState::Satisfied)
        } else {
            Ok(ActionState::Pending(format!("write {}", path.display())))
        }
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        let path = host.layout.path(HostPath::Bin).join(&self.definition.name);
        write_file(&path, &self.contents(host), Some(WRAPPER_MODE))?;
        Ok(Applied::detail(path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::{host, FakeFetcher, FakeRunner};
    use crate::layout::Layout;
    use crate::manifest::PathsConfig;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn wrapper(name: &str, target: &str) -> Wrapper {
        Wrapper::new(WrapperDefinition {
            name: name.to_string(),
            target: target.to_string(),
        })
    }

    #[test]
    fn test_render_wrapper() {
        assert_eq!(
            render_wrapper(Path::new("/opt/aisec/venv/bin"), "garak"),
            "#!/bin/sh\nexec \"/opt/aisec/venv/bin/garak\" \"$@\"\n"
        );
    }

    #[test]
    fn test_wrapper_written_executable_and_idempotent() {
        let temp = TempDir::new().unwrap();
        let host = host(
            Layout::new(temp.path(), &PathsConfig::default()),
            &FakeRunner::new(),
            &FakeFetcher::default(),
        );
        let action = wrapper("aisec-python", "python");

        assert!(matches!(action.check(&host).unwrap(), ActionState::Pending(_)));
        action.apply(&host).unwrap();

        let path = host.layout.path(HostPath::Bin).join("aisec-python");
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "#!/bin/sh\nexec \"/opt/aisec/venv/bin/python\" \"$@\"\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        assert_eq!(action.check(&host).unwrap(), ActionState::Satisfied);
    }

    #[test]
    fn test_wrapper_repairs_drift() {
        let temp = TempDir::new().unwrap();
        let host = host(
            Layout::new(temp.path(), &PathsConfig::default()),
            &FakeRunner::new(),
            &FakeFetcher::default(),
        );
        let action = wrapper("garak", "garak");
        action.apply(&host).unwrap();

        let path = host.layout.path(HostPath::Bin).join("garak");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(action.check(&host).unwrap(), ActionState::Pending(_)));

        action.apply(&host).unwrap();
        assert_eq!(action.check(&host).unwrap(), ActionState::Satisfied);
    }
}
