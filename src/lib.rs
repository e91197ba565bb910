// Public API
pub mod cli;
pub mod commands;

// Core domain types
pub mod actions;
mod error;
mod host;
mod layout;
mod manifest;
mod provisioner;
mod receipt;
mod ui;

// Re-export main types
pub use actions::{build_plan, Action, ActionState, Applied, Policy};
pub use error::ProvisionError;
pub use host::{CommandOutput, CommandRunner, CommandSpec, Fetcher, Host, Privilege};
pub use layout::{HostPath, Layout};
pub use manifest::{validate_manifest, Manifest, ManifestIssue, ManifestSource};
pub use provisioner::{ActionReport, Outcome, Report};
pub use receipt::Receipt;
