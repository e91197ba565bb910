use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AI security workstation provisioner
///
/// aisec turns a Debian-family desktop into an AI/LLM security testing
/// workstation: it trims desktop packages, installs the toolchain, builds an
/// isolated Python environment of security libraries and registers wrappers
/// and menu entries. Every step checks the host first, so reruns only change
/// what drifted.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Manifest to provision from (defaults to /etc/aisec/manifest.toml, then the built-in one)
    #[arg(long, global = true, value_name = "PATH", env = "AISEC_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Directory every host path is resolved under
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        env = "AISEC_ROOT",
        default_value = "/"
    )]
    pub root: PathBuf,

    /// Defaults to `apply`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Provision the host (requires root)
    Apply,

    /// Show what `apply` would change without touching the host
    Plan,

    /// Validate the manifest
    Check,
}
