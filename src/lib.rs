//! pagesnap
//!
//! A snapshot-export engine that captures a live, network-addressable HTML
//! document (including canvas-rendered chart surfaces and remotely-hosted
//! images) into a single, self-contained page that renders offline.
//!
//! # Pipeline
//!
//! One export isolates a disposable sandbox clone of the page, waits for it
//! to load and settle, rewrites network- and canvas-dependent state into
//! embeddable form, freezes the tree into a structural snapshot, rebuilds
//! the snapshot into fresh markup, and packages the result for delivery.
//! Asset failures degrade the artifact instead of aborting it; sandbox
//! teardown runs exactly once on every exit path.
//!
//! # Example
//!
//! ```no_run
//! use pagesnap::{ExportConfig, Exporter, RenderSurface};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = Exporter::new(ExportConfig::default())?;
//! let surface = RenderSurface::new("http://localhost:3000/");
//! let artifact = exporter.export(&surface, &[]).await?;
//! pagesnap::delivery::write_to_path(&artifact, "home.html")?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod assets;
pub mod canvas;
pub mod delivery;
pub mod dom;
pub mod export;
pub mod sandbox;
pub mod snapshot;

pub use assets::InlineStrategy;
pub use canvas::CanvasCapture;
pub use export::{ExportArtifact, ExportOutcome, ExportStage, Exporter};
pub use snapshot::{SnapshotOptions, StructuralSnapshot};

/// Configuration for one exporter instance
///
/// Defaults mirror the behavior the export feature shipped with: base64
/// embedding, a one second settle delay, and a 30 second bound on every
/// pipeline stage.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// User agent string sent with sandbox navigation and asset fetches
    pub user_agent: String,
    /// Bounded wait applied to every pipeline stage, in milliseconds
    pub stage_timeout_ms: u64,
    /// How long to wait after sandbox load for asynchronous rendering
    pub settle: SettlePolicy,
    /// Active image-inlining strategy (one per export)
    pub strategy: InlineStrategy,
    /// Rewrites applied while freezing the tree
    pub snapshot: SnapshotOptions,
    /// Suggested filename for the delivered artifact
    pub filename: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/115.0 pagesnap/0.1"
                .to_string(),
            stage_timeout_ms: 30000,
            settle: SettlePolicy::default(),
            strategy: InlineStrategy::default(),
            snapshot: SnapshotOptions::default(),
            filename: delivery::DEFAULT_FILENAME.to_string(),
        }
    }
}

/// How the pipeline decides that asynchronous rendering inside the sandbox
/// has finished painting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Sleep a fixed interval after load. The original heuristic; simple
    /// but a known source of flakiness on slow renderers.
    FixedDelay { ms: u64 },
    /// Poll the attached chart surfaces until all report rendered and their
    /// dimensions hold steady across consecutive polls, capped by
    /// `max_wait_ms` as a safety fallback.
    Stabilize {
        poll_interval_ms: u64,
        max_wait_ms: u64,
    },
}

impl Default for SettlePolicy {
    fn default() -> Self {
        SettlePolicy::FixedDelay { ms: 1000 }
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// The document being exported: its location and viewport.
///
/// Read-only from the pipeline's perspective; the sandbox clones it by
/// navigating to the same location so that same-origin relative resources
/// resolve identically.
#[derive(Debug, Clone)]
pub struct RenderSurface {
    pub location: String,
    pub viewport: Viewport,
}

impl RenderSurface {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            viewport: Viewport::default(),
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }
}

/// A managed chart instance painting onto a canvas in the exported page.
///
/// The pipeline consumes charts as data: a completion signal for the settle
/// stage, rendered dimensions, and a PNG capture of the current pixel
/// buffer for the flattening stage.
pub trait ChartSurface: Send + Sync {
    /// `id` of the canvas element this chart paints onto, when known.
    fn canvas_id(&self) -> Option<&str> {
        None
    }

    /// Whether the chart has finished its asynchronous render.
    fn rendered(&self) -> bool;

    /// Current rendered width in pixels.
    fn width(&self) -> u32;

    /// Current rendered height in pixels.
    fn height(&self) -> u32;

    /// Capture the current pixel buffer as PNG bytes.
    fn capture_png(&self) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExportConfig::default();
        assert_eq!(config.stage_timeout_ms, 30000);
        assert_eq!(config.settle, SettlePolicy::FixedDelay { ms: 1000 });
        assert_eq!(config.strategy, InlineStrategy::Base64Embed);
        assert_eq!(config.filename, "home.html");
        assert!(config.user_agent.contains("pagesnap"));
    }

    #[test]
    fn test_viewport() {
        let viewport = Viewport {
            width: 1920,
            height: 1080,
        };
        assert_eq!(viewport.width, 1920);
        assert_eq!(viewport.height, 1080);
        assert_eq!(Viewport::default().width, 1280);
    }

    #[test]
    fn surface_builder_sets_viewport() {
        let surface = RenderSurface::new("http://localhost/").with_viewport(Viewport {
            width: 800,
            height: 600,
        });
        assert_eq!(surface.viewport.width, 800);
    }
}
