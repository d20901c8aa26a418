//! Canvas flattening.
//!
//! A canvas element only paints while scripts run, so an offline artifact
//! must carry its pixels as a static image instead. The flattener receives
//! captures as plain data (pixel buffer plus the chart's rendered
//! dimensions) and substitutes an `<img>` for each canvas at the same tree
//! position, carrying over `id`, `class`, and `style`. A canvas without a
//! usable capture is logged and left in place rather than failing the
//! export.

use crate::assets::png_data_uri;
use crate::dom::{DocumentTree, NodeData, NodeId};
use crate::{ChartSurface, Error, Result};
use log::{debug, warn};

/// A captured canvas surface: pixel buffer plus rendered dimensions.
///
/// Dimensions come from the managed chart instance driving the canvas when
/// one exists; they take precedence over the canvas element's own
/// `width`/`height` attributes.
#[derive(Debug, Clone)]
pub struct CanvasCapture {
    /// `id` of the canvas element this capture belongs to, when known.
    pub id: Option<String>,
    /// PNG-encoded pixel buffer.
    pub png: Vec<u8>,
    /// Rendered width in pixels (0 when unknown).
    pub width: u32,
    /// Rendered height in pixels (0 when unknown).
    pub height: u32,
}

impl CanvasCapture {
    /// Capture a live chart surface into plain data.
    pub fn from_chart(chart: &dyn ChartSurface) -> Result<Self> {
        let png = chart.capture_png()?;
        Ok(Self {
            id: chart.canvas_id().map(|s| s.to_string()),
            png,
            width: chart.width(),
            height: chart.height(),
        })
    }
}

/// Pick the capture for a canvas node: an id match wins, otherwise the first
/// capture that is neither claimed nor bound to some other id.
pub(crate) fn select_capture(
    canvas_id: Option<&str>,
    captures: &[CanvasCapture],
    claimed: &mut [bool],
) -> Option<usize> {
    if let Some(id) = canvas_id {
        if let Some(pos) = captures
            .iter()
            .enumerate()
            .position(|(i, c)| !claimed[i] && c.id.as_deref() == Some(id))
        {
            claimed[pos] = true;
            return Some(pos);
        }
    }
    let pos = captures
        .iter()
        .enumerate()
        .position(|(i, c)| !claimed[i] && c.id.is_none())?;
    claimed[pos] = true;
    Some(pos)
}

/// Replace every canvas node that has a capture with a static `<img>`.
///
/// Must run after layout has settled and before structural snapshotting.
/// Returns the number of canvases flattened.
pub fn flatten_canvases(doc: &mut DocumentTree, captures: &[CanvasCapture]) -> usize {
    let canvases = doc.elements_by_tag("canvas");
    let mut claimed = vec![false; captures.len()];
    let mut flattened = 0;

    for canvas in canvases {
        match flatten_one(doc, canvas, captures, &mut claimed) {
            Ok(()) => flattened += 1,
            Err(e) => warn!("leaving canvas in place: {}", e),
        }
    }
    debug!("flattened {} canvas node(s)", flattened);
    flattened
}

fn flatten_one(
    doc: &mut DocumentTree,
    canvas: NodeId,
    captures: &[CanvasCapture],
    claimed: &mut [bool],
) -> Result<()> {
    let canvas_id = doc.attr(canvas, "id").map(|s| s.to_string());
    let idx = select_capture(canvas_id.as_deref(), captures, claimed).ok_or_else(|| {
        Error::CanvasFlatten(format!(
            "no pixel capture for canvas {}",
            canvas_id.as_deref().unwrap_or("<anonymous>")
        ))
    })?;
    let capture = &captures[idx];
    if capture.png.is_empty() {
        return Err(Error::CanvasFlatten(format!(
            "empty pixel buffer for canvas {}",
            canvas_id.as_deref().unwrap_or("<anonymous>")
        )));
    }

    let mut attrs: Vec<(String, String)> = vec![("src".to_string(), png_data_uri(&capture.png))];

    // id, class, and style carry over so selectors keep applying.
    for name in ["id", "class", "style"] {
        if let Some(value) = doc.attr(canvas, name) {
            attrs.push((name.to_string(), value.to_string()));
        }
    }

    // Prefer the chart's rendered dimensions, fall back to the element's own.
    let width = dimension(capture.width, doc.attr(canvas, "width"));
    let height = dimension(capture.height, doc.attr(canvas, "height"));
    if let Some(w) = width {
        attrs.push(("width".to_string(), w));
    }
    if let Some(h) = height {
        attrs.push(("height".to_string(), h));
    }

    let img = doc.create_node(NodeData::Element {
        tag: "img".to_string(),
        attrs,
    });
    doc.replace_with(canvas, img);
    Ok(())
}

fn dimension(rendered: u32, element_attr: Option<&str>) -> Option<String> {
    if rendered > 0 {
        Some(rendered.to_string())
    } else {
        element_attr.map(|s| s.to_string())
    }
}
