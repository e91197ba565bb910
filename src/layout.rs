use std::path::{Component, Path, PathBuf};

use crate::manifest::PathsConfig;

const APPLICATIONS_DIR: &str = "/usr/share/applications";
const DESKTOP_DIRECTORIES_DIR: &str = "/usr/share/desktop-directories";
const MENUS_MERGED_DIR: &str = "/etc/xdg/menus/applications-merged";
const STATE_DIR: &str = "/var/lib/aisec";

/// Host path types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPath {
    /// Filesystem root every other path is resolved under (`--root`)
    Root,
    /// Base directory: /opt/aisec
    Base,
    /// Isolated Python environment: base/venv
    Venv,
    /// Executables inside the environment: base/venv/bin
    VenvBin,
    /// Source checkouts: base/src
    Sources,
    /// Wrapper scripts: /usr/local/bin
    Bin,
    /// Desktop entries: /usr/share/applications
    Applications,
    /// Menu category descriptors: /usr/share/desktop-directories
    DesktopDirectories,
    /// Menu merge fragments: /etc/xdg/menus/applications-merged
    MenusMerged,
    /// Local state: /var/lib/aisec
    State,
    /// Last run receipt: /var/lib/aisec/receipt.toml
    Receipt,
}

/// Layout - where provisioning writes on the host
///
/// All paths are absolute host paths re-rooted under `root`, which is `/`
/// for a real run and a scratch directory in tests.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    base_dir: PathBuf,
    bin_dir: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, paths: &PathsConfig) -> Self {
        Self {
            root: root.into(),
            base_dir: PathBuf::from(&paths.base_dir),
            bin_dir: PathBuf::from(&paths.bin_dir),
        }
    }

    /// Get path for a specific host location
    pub fn path(&self, path_type: HostPath) -> PathBuf {
        match path_type {
            HostPath::Root => self.root.clone(),
            HostPath::Base => self.rooted(&self.base_dir),
            HostPath::Venv => self.path(HostPath::Base).join("venv"),
            HostPath::VenvBin => self.path(HostPath::Venv).join("bin"),
            HostPath::Sources => self.path(HostPath::Base).join("src"),
            HostPath::Bin => self.rooted(&self.bin_dir),
            HostPath::Applications => self.rooted(Path::new(APPLICATIONS_DIR)),
            HostPath::DesktopDirectories => self.rooted(Path::new(DESKTOP_DIRECTORIES_DIR)),
            HostPath::MenusMerged => self.rooted(Path::new(MENUS_MERGED_DIR)),
            HostPath::State => self.rooted(Path::new(STATE_DIR)),
            HostPath::Receipt => self.path(HostPath::State).join("receipt.toml"),
        }
    }

    /// Path as seen on the provisioned host, ignoring `--root`.
    ///
    /// Used for paths written into generated files.
    pub fn unrooted(&self, path_type: HostPath) -> PathBuf {
        let host = Layout {
            root: PathBuf::from("/"),
            ..self.clone()
        };
        host.path(path_type)
    }

    /// Checkout directory for a named source.
    pub fn source_dir(&self, name: &str) -> PathBuf {
        self.path(HostPath::Sources).join(name)
    }

    /// Resolve a path relative to the base directory.
    pub fn base_relative(&self, relative: &str) -> PathBuf {
        self.path(HostPath::Base).join(relative)
    }

    /// Executable inside the isolated environment.
    pub fn venv_executable(&self, name: &str) -> PathBuf {
        self.path(HostPath::VenvBin).join(name)
    }

    fn rooted(&self, absolute: &Path) -> PathBuf {
        let relative: PathBuf = absolute
            .components()
            .filter(|component| !matches!(component, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.root.join(relative)
    }
}
