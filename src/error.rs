//! Error types for the export pipeline

use thiserror::Error;

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while exporting a document
#[derive(Error, Debug)]
pub enum Error {
    /// The sandbox document could not be loaded (fatal, aborts the export)
    #[error("Sandbox load failed: {0}")]
    SandboxLoad(String),

    /// The snapshotter produced no tree for the sandbox document (fatal)
    #[error("Structural snapshot was empty: {0}")]
    SnapshotEmpty(String),

    /// A remote resource could not be retrieved
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// A single asset could not be rewritten into embeddable form
    /// (recoverable: logged and skipped, the original reference remains)
    #[error("Failed to inline asset {url}: {reason}")]
    AssetInline { url: String, reason: String },

    /// A single canvas could not be replaced with a static image
    /// (recoverable: logged and skipped, the canvas is left in place)
    #[error("Failed to flatten canvas: {0}")]
    CanvasFlatten(String),

    /// A pipeline stage exceeded its bounded wait
    #[error("Stage {stage} timed out after {ms}ms")]
    StageTimeout { stage: &'static str, ms: u64 },

    /// An export was invoked while another one had not reached a terminal state
    #[error("An export is already in flight")]
    ExportInFlight,

    /// A snapshot could not be reconstructed into markup
    #[error("Rebuild failed: {0}")]
    Rebuild(String),

    /// The final artifact could not be written out
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}
