//! Export orchestration.
//!
//! One export is a strictly sequential walk of the stage machine
//!
//! ```text
//! Idle -> SandboxCreated -> Loaded -> AssetsInlined -> CanvasFlattened
//!      -> Snapshotted -> Rebuilt -> Serialized -> TornDown(Success|Failure)
//! ```
//!
//! Any stage failure jumps straight to `TornDown(Failure)`; sandbox teardown
//! runs exactly once regardless of where the pipeline stopped. Every stage
//! before teardown runs under a bounded timeout, and an atomic in-flight
//! token rejects a second export before the first reaches a terminal state.

use crate::assets::{inline_images, AssetInliner};
use crate::canvas::{flatten_canvases, CanvasCapture};
use crate::sandbox::Sandbox;
use crate::snapshot::{rebuild, serialize_html, snapshot, RebuildContext};
use crate::{ChartSurface, Error, ExportConfig, RenderSurface, Result};
use log::{debug, info, warn};
use reqwest::Client;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Terminal outcome of one export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Success,
    Failure,
}

/// Stages of the export pipeline, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Idle,
    SandboxCreated,
    Loaded,
    AssetsInlined,
    CanvasFlattened,
    Snapshotted,
    Rebuilt,
    Serialized,
    TornDown(ExportOutcome),
}

impl ExportStage {
    pub fn name(&self) -> &'static str {
        match self {
            ExportStage::Idle => "Idle",
            ExportStage::SandboxCreated => "SandboxCreated",
            ExportStage::Loaded => "Loaded",
            ExportStage::AssetsInlined => "AssetsInlined",
            ExportStage::CanvasFlattened => "CanvasFlattened",
            ExportStage::Snapshotted => "Snapshotted",
            ExportStage::Rebuilt => "Rebuilt",
            ExportStage::Serialized => "Serialized",
            ExportStage::TornDown(ExportOutcome::Success) => "TornDown(Success)",
            ExportStage::TornDown(ExportOutcome::Failure) => "TornDown(Failure)",
        }
    }
}

impl std::fmt::Display for ExportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The final, self-contained output of one export run.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    /// Complete markup of the captured page.
    pub html: String,
    /// Suggested filename for delivery.
    pub filename: String,
}

/// Drives the snapshot-export pipeline.
///
/// Re-entrant only after the previous run reached a terminal state; a
/// concurrent invocation fails fast with [`Error::ExportInFlight`].
pub struct Exporter {
    config: ExportConfig,
    client: Client,
    in_flight: AtomicBool,
    trace: Mutex<Vec<ExportStage>>,
}

impl Exporter {
    pub fn new(config: ExportConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_millis(config.stage_timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            in_flight: AtomicBool::new(false),
            trace: Mutex::new(vec![ExportStage::Idle]),
        })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Stage trace of the most recent run, terminal state last.
    pub fn last_trace(&self) -> Vec<ExportStage> {
        self.trace.lock().unwrap().clone()
    }

    /// Export `surface` into a self-contained artifact.
    ///
    /// `charts` are the managed chart instances painting onto canvases in
    /// the surface; their pixel buffers and rendered dimensions feed the
    /// canvas flattening stage.
    pub async fn export(
        &self,
        surface: &RenderSurface,
        charts: &[&dyn ChartSurface],
    ) -> Result<ExportArtifact> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(Error::ExportInFlight);
        }
        let result = self.run(surface, charts).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run(
        &self,
        surface: &RenderSurface,
        charts: &[&dyn ChartSurface],
    ) -> Result<ExportArtifact> {
        {
            let mut trace = self.trace.lock().unwrap();
            trace.clear();
            trace.push(ExportStage::Idle);
        }
        info!("export started for {}", surface.location);

        let mut sandbox = Sandbox::create(surface, &self.client)?;
        self.push_stage(ExportStage::SandboxCreated);

        let outcome = self.run_stages(&mut sandbox, charts).await;

        // Teardown runs exactly once, on success and on every failure path.
        sandbox.teardown();
        match outcome {
            Ok(artifact) => {
                self.push_stage(ExportStage::TornDown(ExportOutcome::Success));
                info!(
                    "export finished: {} bytes of markup as {}",
                    artifact.html.len(),
                    artifact.filename
                );
                Ok(artifact)
            }
            Err(e) => {
                self.push_stage(ExportStage::TornDown(ExportOutcome::Failure));
                warn!("export failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        sandbox: &mut Sandbox,
        charts: &[&dyn ChartSurface],
    ) -> Result<ExportArtifact> {
        let settle = self.config.settle.clone();
        self.staged(ExportStage::Loaded, async {
            sandbox.await_ready().await?;
            sandbox.settle(&settle, charts).await;
            Ok(())
        })
        .await?;

        let inliner = AssetInliner::new(&self.client, &self.config.strategy);
        let base = sandbox.location().clone();

        self.staged(ExportStage::AssetsInlined, async {
            let doc = sandbox.document_mut()?;
            inline_images(doc, &base, &inliner).await;
            Ok(())
        })
        .await?;

        // Capture charts into plain data before touching the tree; a chart
        // that fails to capture degrades the artifact, never the export.
        let captures: Vec<CanvasCapture> = charts
            .iter()
            .filter_map(|chart| match CanvasCapture::from_chart(*chart) {
                Ok(capture) => Some(capture),
                Err(e) => {
                    warn!("chart capture skipped: {}", e);
                    None
                }
            })
            .collect();

        self.staged(ExportStage::CanvasFlattened, async {
            let doc = sandbox.document_mut()?;
            flatten_canvases(doc, &captures);
            Ok(())
        })
        .await?;

        let structural = self
            .staged(ExportStage::Snapshotted, async {
                let doc = sandbox.document()?;
                snapshot(doc, &base, &self.config.snapshot, &inliner, &captures)
                    .await
                    .ok_or_else(|| {
                        Error::SnapshotEmpty(format!("no document tree captured for {}", base))
                    })
            })
            .await?;
        debug!("snapshot holds {} nodes", structural.len());

        let rebuilt = self
            .staged(ExportStage::Rebuilt, async {
                rebuild(&structural, RebuildContext::new())
            })
            .await?;

        let artifact = self
            .staged(ExportStage::Serialized, async {
                Ok(ExportArtifact {
                    html: serialize_html(&rebuilt),
                    filename: self.config.filename.clone(),
                })
            })
            .await?;

        Ok(artifact)
    }

    /// Run one pipeline stage under the configured bounded timeout and
    /// record its completion in the trace.
    async fn staged<T, F>(&self, stage: ExportStage, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let ms = self.config.stage_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(ms), fut).await {
            Ok(result) => {
                let value = result?;
                self.push_stage(stage);
                debug!("stage {} complete", stage);
                Ok(value)
            }
            Err(_) => Err(Error::StageTimeout {
                stage: stage.name(),
                ms,
            }),
        }
    }

    fn push_stage(&self, stage: ExportStage) {
        self.trace.lock().unwrap().push(stage);
    }
}
