//! Document sandbox lifecycle.
//!
//! A sandbox is a disposable, off-screen clone of the surface being
//! exported: a fresh fetch context navigated to the same location, sized to
//! the surface's viewport, owned exclusively by one export from creation to
//! teardown. A process-wide registry enforces the single-sandbox invariant
//! and makes teardown observable to callers and tests.

use crate::dom::DocumentTree;
use crate::{ChartSurface, Error, Result, RenderSurface, SettlePolicy, Viewport};
use log::{debug, warn};
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use url::Url;

static ACTIVE_SANDBOXES: AtomicUsize = AtomicUsize::new(0);

/// Number of sandboxes currently alive in this process.
///
/// Zero after every completed export; teardown runs exactly once per sandbox
/// on every exit path.
pub fn active_sandboxes() -> usize {
    ACTIVE_SANDBOXES.load(Ordering::SeqCst)
}

/// An isolated clone of the export surface.
///
/// `teardown` consumes the handle, so a sandbox cannot be torn down twice;
/// dropping an un-torn sandbox (a panic path) deregisters it as a backstop.
pub struct Sandbox {
    location: Url,
    viewport: Viewport,
    client: Client,
    document: Option<DocumentTree>,
    torn_down: bool,
}

impl Sandbox {
    /// Create a sandbox for `surface`. Fails when another sandbox is alive:
    /// concurrent exports are rejected, not queued.
    pub fn create(surface: &RenderSurface, client: &Client) -> Result<Self> {
        let location = Url::parse(&surface.location)
            .map_err(|e| Error::SandboxLoad(format!("invalid location {}: {}", surface.location, e)))?;

        if ACTIVE_SANDBOXES
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::ExportInFlight);
        }

        debug!(
            "sandbox created for {} at {}x{}",
            location, surface.viewport.width, surface.viewport.height
        );
        Ok(Self {
            location,
            viewport: surface.viewport,
            client: client.clone(),
            document: None,
            torn_down: false,
        })
    }

    /// Run the sandbox's own load sequence: navigate to the surface location
    /// and parse the response into a mutable document tree.
    ///
    /// An unreachable location or non-success response is fatal to the
    /// export and is not retried.
    pub async fn await_ready(&mut self) -> Result<()> {
        let resp = self
            .client
            .get(self.location.clone())
            .send()
            .await
            .map_err(|e| Error::SandboxLoad(format!("navigation to {} failed: {}", self.location, e)))?;

        if !resp.status().is_success() {
            return Err(Error::SandboxLoad(format!(
                "{} answered with HTTP status {}",
                self.location,
                resp.status()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::SandboxLoad(format!("failed to read document body: {}", e)))?;

        self.document = Some(DocumentTree::parse(&body));
        debug!("sandbox document ready ({} bytes of markup)", body.len());
        Ok(())
    }

    /// Wait for asynchronous rendering inside the sandbox to finish painting.
    ///
    /// `FixedDelay` is the original heuristic. `Stabilize` polls the attached
    /// chart surfaces until every one reports rendered and its dimensions
    /// hold steady across two consecutive polls, capped by `max_wait_ms`.
    pub async fn settle(&self, policy: &SettlePolicy, charts: &[&dyn ChartSurface]) {
        match policy {
            SettlePolicy::FixedDelay { ms } => sleep(Duration::from_millis(*ms)).await,
            SettlePolicy::Stabilize {
                poll_interval_ms,
                max_wait_ms,
            } => {
                let deadline = Instant::now() + Duration::from_millis(*max_wait_ms);
                let mut previous: Vec<(u32, u32)> =
                    charts.iter().map(|c| (c.width(), c.height())).collect();
                loop {
                    sleep(Duration::from_millis(*poll_interval_ms)).await;
                    let current: Vec<(u32, u32)> =
                        charts.iter().map(|c| (c.width(), c.height())).collect();
                    let all_rendered = charts.iter().all(|c| c.rendered());
                    if all_rendered && current == previous {
                        break;
                    }
                    previous = current;
                    if Instant::now() >= deadline {
                        warn!("settle wait capped at {}ms before charts stabilized", max_wait_ms);
                        break;
                    }
                }
            }
        }
    }

    /// The location the sandbox was navigated to. Relative resources in the
    /// cloned document resolve against this, exactly as they did live.
    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// The cloned document, available once `await_ready` has completed.
    pub fn document(&self) -> Result<&DocumentTree> {
        self.document
            .as_ref()
            .ok_or_else(|| Error::SandboxLoad("sandbox document is not loaded".to_string()))
    }

    pub fn document_mut(&mut self) -> Result<&mut DocumentTree> {
        self.document
            .as_mut()
            .ok_or_else(|| Error::SandboxLoad("sandbox document is not loaded".to_string()))
    }

    /// Close the sandbox and detach it. Consumes the handle: teardown can
    /// only happen once, and callers run it on every exit path.
    pub fn teardown(mut self) {
        self.torn_down = true;
        self.document = None;
        ACTIVE_SANDBOXES.fetch_sub(1, Ordering::SeqCst);
        debug!("sandbox torn down");
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.torn_down {
            ACTIVE_SANDBOXES.fetch_sub(1, Ordering::SeqCst);
            warn!("sandbox dropped without explicit teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sandbox uniqueness is process-global state; keep these assertions in
    // one test so parallel test threads cannot interleave registrations.
    #[test]
    fn registry_enforces_single_sandbox_and_counts_teardown() {
        let client = Client::new();
        let surface = RenderSurface::new("http://127.0.0.1:1/");

        let first = Sandbox::create(&surface, &client).expect("first sandbox");
        assert_eq!(active_sandboxes(), 1);

        let second = Sandbox::create(&surface, &client);
        assert!(matches!(second, Err(Error::ExportInFlight)));

        first.teardown();
        assert_eq!(active_sandboxes(), 0);

        // Re-creation succeeds once the previous sandbox is gone.
        let third = Sandbox::create(&surface, &client).expect("third sandbox");
        drop(third); // Drop backstop must deregister too.
        assert_eq!(active_sandboxes(), 0);
    }

    #[test]
    fn create_rejects_unparseable_locations() {
        let client = Client::new();
        let surface = RenderSurface::new("not a url");
        assert!(matches!(
            Sandbox::create(&surface, &client),
            Err(Error::SandboxLoad(_))
        ));
    }
}
