use std::path::PathBuf;
use thiserror::Error;

/// Typed failures surfaced by the provisioner.
///
/// Everything else travels as `anyhow::Error` with context attached at the
/// call site.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("aisec must be run as root (current user: {user})")]
    NotRoot { user: String },

    #[error("'{command}' exited with {status}{}", stderr_suffix(.stderr))]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("required action '{action}' failed")]
    RequiredActionFailed { action: String },

    #[error("checksum mismatch for {url}: expected sha256:{expected}, got sha256:{actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("marker {0:?} disappeared before the desktop entry could be written")]
    MarkerMissing(PathBuf),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_includes_stderr_when_present() {
        let err = ProvisionError::CommandFailed {
            command: "apt-get install -y git".to_string(),
            status: "exit status: 100".to_string(),
            stderr: "E: Unable to locate package\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "'apt-get install -y git' exited with exit status: 100: E: Unable to locate package"
        );
    }

    #[test]
    fn command_failed_without_stderr() {
        let err = ProvisionError::CommandFailed {
            command: "true".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "  ".to_string(),
        };
        assert_eq!(err.to_string(), "'true' exited with exit status: 1");
    }
}
