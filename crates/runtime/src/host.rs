use std::path::PathBuf;

use tracing::info;

use weft_core::{ActionError, RuntimeCallbacks, ToastVariant};

/// Host callbacks for a headless process: UI effects are logged, downloads
/// are written to a directory.
#[derive(Debug, Clone)]
pub struct ConsoleHost {
    download_dir: PathBuf,
}

impl ConsoleHost {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
        }
    }
}

impl Default for ConsoleHost {
    fn default() -> Self {
        Self::new(".")
    }
}

impl RuntimeCallbacks for ConsoleHost {
    fn toast(&self, message: &str, variant: ToastVariant) {
        info!(target: "weft::host", ?variant, "{message}");
    }

    fn navigate(&self, href: &str, replace: bool) {
        info!(target: "weft::host", href, replace, "navigate");
    }

    fn open_modal(&self, id: &str) {
        info!(target: "weft::host", modal = id, "open modal");
    }

    fn close_modal(&self, id: &str) {
        info!(target: "weft::host", modal = id, "close modal");
    }

    fn download(&self, filename: &str, content_type: &str, data: &[u8]) -> Result<(), ActionError> {
        // Final path component only.
        let name = std::path::Path::new(filename)
            .file_name()
            .ok_or_else(|| {
                ActionError::Validation(format!("invalid download filename '{filename}'"))
            })?;
        let path = self.download_dir.join(name);
        std::fs::write(&path, data).map_err(|e| ActionError::Storage(e.to_string()))?;
        info!(
            target: "weft::host",
            path = %path.display(),
            content_type,
            bytes = data.len(),
            "download written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downloads_stay_inside_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let host = ConsoleHost::new(dir.path());

        host.download("../../escape.csv", "text/csv", b"a\r\n").unwrap();

        assert_eq!(std::fs::read(dir.path().join("escape.csv")).unwrap(), b"a\r\n");
        assert!(host.download("..", "text/csv", b"").is_err());
    }
}
