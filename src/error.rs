use std::io;
use std::path::PathBuf;

/// Terminal failures of an installation run.
///
/// Transfer-time variants carry the manifest file name and its 1-based
/// position so the host can tell the user exactly which file broke.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("download of {file} ({index}/{total}) failed: {source}")]
    Network {
        file: String,
        index: usize,
        total: usize,
        #[source]
        source: reqwest::Error,
    },

    #[error("{action} {} failed: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    Integrity {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("installation cancelled")]
    Cancelled,

    #[error("failed to start installer {}: {source}", path.display())]
    Subprocess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("game install path was not selected")]
    UserDeclined,

    #[error("manifest entry {name} is not a safe relative path")]
    InvalidEntry { name: String },

    #[error("unable to persist settings: {0}")]
    Settings(String),
}

impl InstallError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Cancellation is a user decision, not a failure worth an error dialog.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_message_names_the_file() {
        let err = InstallError::Integrity {
            file: "a.bin".into(),
            expected: "ABCD".into(),
            actual: "ffff".into(),
        };
        let text = err.to_string();
        assert!(text.contains("a.bin"));
        assert!(text.contains("ABCD"));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn io_message_includes_path_and_action() {
        let err = InstallError::io(
            "open",
            "/tmp/missing.bin",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        let text = err.to_string();
        assert!(text.starts_with("open /tmp/missing.bin failed"));
        assert!(InstallError::Cancelled.is_cancelled());
    }
}
