//! Input resolution: turn a user-supplied path or URL into PDF bytes.
//!
//! Documents are loaded fully into memory; pdfium opens them from a byte
//! slice, so a URL never needs to touch the file system. The `%PDF` magic is
//! checked here so callers get a meaningful error rather than a pdfium crash.

use crate::error::StudyError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// A document's bytes plus a display name.
#[derive(Debug, Clone)]
pub struct LoadedInput {
    /// File name (local) or last URL path segment (download).
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to PDF bytes.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<LoadedInput, StudyError> {
    if input.trim().is_empty() {
        return Err(StudyError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        let path = PathBuf::from(input);
        tokio::task::spawn_blocking(move || read_local(&path))
            .await
            .map_err(|e| StudyError::Internal(format!("Read task panicked: {e}")))?
    }
}

fn read_local(path: &Path) -> Result<LoadedInput, StudyError> {
    if !path.exists() {
        return Err(StudyError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut bytes = Vec::new();
    match std::fs::File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut bytes)
                .map_err(|e| StudyError::Internal(format!("Failed to read '{}': {e}", path.display())))?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(StudyError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(StudyError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    check_magic(&name, &bytes)?;

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(LoadedInput { name, bytes })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedInput, StudyError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| StudyError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_error = |e: reqwest::Error| {
        if e.is_timeout() {
            StudyError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            StudyError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(to_error)?;
    if !response.status().is_success() {
        return Err(StudyError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(to_error)?.to_vec();
    let name = filename_from_url(url);
    check_magic(&name, &bytes)?;

    info!("Downloaded {} ({} bytes)", name, bytes.len());
    Ok(LoadedInput { name, bytes })
}

/// Reject anything that does not start with `%PDF`.
pub fn check_magic(name: &str, bytes: &[u8]) -> Result<(), StudyError> {
    if bytes.len() < 4 {
        return Err(StudyError::EmptyInput(format!("'{name}' is empty or truncated")));
    }
    if &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(StudyError::NotAPdf {
            name: name.to_string(),
            magic,
        });
    }
    Ok(())
}

/// Last URL path segment that looks like a file name, else "downloaded.pdf".
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
