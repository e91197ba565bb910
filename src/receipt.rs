use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::provisioner::{ActionReport, Report};

const RECEIPT_VERSION: u32 = 1;

/// Receipt format
/// Records what the last `apply` did to the host, action by action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Version of the receipt format
    version: u32,
    pub metadata: Metadata,
    #[serde(default)]
    pub actions: Vec<ActionReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// When the run finished (RFC 3339)
    pub run_at: String,
    /// Manifest the run was driven by
    pub manifest: String,
    pub aisec_version: String,
}

impl Receipt {
    pub fn new(manifest: impl Into<String>, report: &Report) -> Self {
        Self {
            version: RECEIPT_VERSION,
            metadata: Metadata {
                run_at: chrono::Utc::now().to_rfc3339(),
                manifest: manifest.into(),
                aisec_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            actions: report.actions().to_vec(),
        }
    }

    /// Load receipt from disk
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read receipt from {:?}", path))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse receipt from {:?}", path))
    }

    /// Save receipt to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create receipt directory {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize receipt")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write receipt to {:?}", path))?;

        Ok(())
    }

    /// Look up the record for a named action.
    pub fn action(&self, name: &str) -> Option<&ActionReport> {
        self.actions.iter().find(|entry| entry.name == name)
    }
}
