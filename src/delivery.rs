//! Artifact delivery.
//!
//! The export pipeline ends by handing its markup to a delivery step that
//! wraps it as a downloadable file: `text/html` bytes under a suggested
//! name. The artifact itself is immutable; delivery only copies it out.

use crate::export::ExportArtifact;
use crate::{Error, Result};
use log::info;
use std::io::Write;
use std::path::Path;

/// Media type of every delivered artifact.
pub const MEDIA_TYPE: &str = "text/html";

/// Default suggested filename.
pub const DEFAULT_FILENAME: &str = "home.html";

/// A packaged artifact ready to be offered as a download.
#[derive(Debug, Clone)]
pub struct DeliveredFile {
    pub name: String,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Wrap an artifact into its downloadable form.
pub fn package(artifact: &ExportArtifact) -> DeliveredFile {
    DeliveredFile {
        name: artifact.filename.clone(),
        media_type: MEDIA_TYPE,
        bytes: artifact.html.clone().into_bytes(),
    }
}

/// Stream an artifact's bytes into `sink`.
pub fn write_to(artifact: &ExportArtifact, sink: &mut dyn Write) -> Result<()> {
    sink.write_all(artifact.html.as_bytes())
        .and_then(|_| sink.flush())
        .map_err(|e| Error::Delivery(format!("failed to write artifact: {}", e)))
}

/// Write an artifact to a filesystem path.
pub fn write_to_path(artifact: &ExportArtifact, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, artifact.html.as_bytes())
        .map_err(|e| Error::Delivery(format!("failed to write {}: {}", path.display(), e)))?;
    info!("artifact delivered to {}", path.display());
    Ok(())
}
