//! Structural snapshotting and rebuilding.
//!
//! `snapshot` walks a sandbox document and freezes it into a
//! [`StructuralSnapshot`]: a serializable tree that owns all of its data and
//! survives the sandbox's teardown. `rebuild` deterministically
//! reconstructs a fresh document from a snapshot, and `serialize_html`
//! renders a document tree back into concrete markup.
//!
//! Snapshot options mirror what a pixel-faithful export needs: external
//! stylesheets inlined into the tree, still-remote images embedded, canvas
//! pixel state recorded as a fallback, and insignificant whitespace kept so
//! text layout survives the round trip.

use crate::assets::{png_data_uri, remote_src, AssetInliner};
use crate::canvas::{select_capture, CanvasCapture};
use crate::dom::{DocumentTree, NodeCategory, NodeData, NodeId};
use crate::{Error, Result};
use futures::future;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// Which rewrites the snapshotter applies while freezing the tree.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Replace `<link rel="stylesheet">` with `<style>` holding the fetched text.
    pub inline_stylesheets: bool,
    /// Embed image sources that are still remote at snapshot time.
    pub inline_images: bool,
    /// Record pixel state on canvases the flattener missed.
    pub record_canvas: bool,
    /// Keep whitespace-only text nodes (required for pixel-faithful layout).
    pub preserve_whitespace: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            inline_stylesheets: true,
            inline_images: true,
            record_canvas: true,
            preserve_whitespace: true,
        }
    }
}

/// One node of a structural snapshot.
///
/// Attribute maps are keyed uniquely and carry no insertion order; child
/// sequences are order-preserving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotNode {
    Document {
        children: Vec<SnapshotNode>,
    },
    Doctype {
        name: String,
    },
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        children: Vec<SnapshotNode>,
    },
    Text {
        contents: String,
    },
    Comment {
        contents: String,
    },
}

/// An ownership-independent mirror of a document tree.
///
/// Produced once per export, consumed once by the rebuilder, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralSnapshot {
    pub root: SnapshotNode,
}

impl StructuralSnapshot {
    /// Total node count, doctype and text runs included.
    pub fn len(&self) -> usize {
        fn count(node: &SnapshotNode) -> usize {
            match node {
                SnapshotNode::Document { children } | SnapshotNode::Element { children, .. } => {
                    1 + children.iter().map(count).sum::<usize>()
                }
                _ => 1,
            }
        }
        count(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.root, SnapshotNode::Document { children } if children.is_empty())
    }
}

/// Freeze a document tree into a structural snapshot.
///
/// Returns `None` (not an error) when the document holds nothing worth
/// capturing; the orchestrator treats that as a fatal empty-snapshot
/// condition. Stylesheet and image fetches run concurrently and are joined
/// before the tree is walked, so the produced snapshot is internally
/// consistent.
pub async fn snapshot(
    doc: &DocumentTree,
    base: &Url,
    opts: &SnapshotOptions,
    inliner: &AssetInliner<'_>,
    canvas_fallbacks: &[CanvasCapture],
) -> Option<StructuralSnapshot> {
    if doc.is_empty() {
        return None;
    }

    let css = if opts.inline_stylesheets {
        prefetch_stylesheets(doc, base, inliner).await
    } else {
        HashMap::new()
    };
    let images = if opts.inline_images {
        prefetch_images(doc, base, inliner).await
    } else {
        HashMap::new()
    };

    let mut claimed = vec![false; canvas_fallbacks.len()];
    let ctx = BuildContext {
        doc,
        base,
        opts,
        css: &css,
        images: &images,
        canvas_fallbacks,
    };
    let root = build_node(&ctx, doc.root(), &mut claimed)
        .expect("document root always snapshots");
    Some(StructuralSnapshot { root })
}

async fn prefetch_stylesheets(
    doc: &DocumentTree,
    base: &Url,
    inliner: &AssetInliner<'_>,
) -> HashMap<String, String> {
    let urls: Vec<String> = doc
        .elements_by_tag("link")
        .into_iter()
        .filter(|&id| is_stylesheet_link(doc, id))
        .filter_map(|id| doc.attr(id, "href"))
        .filter_map(|href| remote_src(base, href))
        .collect();

    let fetches: Vec<_> = urls.iter().map(|u| inliner.fetch_text(u)).collect();
    let results = future::join_all(fetches).await;

    let mut out = HashMap::new();
    for (url, result) in urls.into_iter().zip(results) {
        match result {
            Ok(text) => {
                out.insert(url, text);
            }
            Err(e) => warn!("keeping external stylesheet reference {}: {}", url, e),
        }
    }
    out
}

async fn prefetch_images(
    doc: &DocumentTree,
    base: &Url,
    inliner: &AssetInliner<'_>,
) -> HashMap<String, String> {
    let urls: Vec<String> = doc
        .descendants(doc.root())
        .into_iter()
        .filter(|&id| doc.data(id).category() == NodeCategory::Image)
        .filter_map(|id| doc.attr(id, "src"))
        .filter_map(|src| remote_src(base, src))
        .collect();

    let fetches: Vec<_> = urls.iter().map(|u| inliner.embeddable_src(u)).collect();
    let results = future::join_all(fetches).await;

    let mut out = HashMap::new();
    for (url, result) in urls.into_iter().zip(results) {
        match result {
            Ok(src) => {
                out.insert(url, src);
            }
            Err(e) => warn!("keeping remote image reference {}: {}", url, e),
        }
    }
    out
}

fn is_stylesheet_link(doc: &DocumentTree, id: NodeId) -> bool {
    doc.attr(id, "rel")
        .map(|rel| {
            rel.split_ascii_whitespace()
                .any(|part| part.eq_ignore_ascii_case("stylesheet"))
        })
        .unwrap_or(false)
}

struct BuildContext<'a> {
    doc: &'a DocumentTree,
    base: &'a Url,
    opts: &'a SnapshotOptions,
    css: &'a HashMap<String, String>,
    images: &'a HashMap<String, String>,
    canvas_fallbacks: &'a [CanvasCapture],
}

fn build_node(ctx: &BuildContext<'_>, id: NodeId, claimed: &mut [bool]) -> Option<SnapshotNode> {
    match ctx.doc.data(id) {
        NodeData::Document => Some(SnapshotNode::Document {
            children: build_children(ctx, id, claimed),
        }),
        NodeData::Doctype { name } => Some(SnapshotNode::Doctype { name: name.clone() }),
        NodeData::Comment { contents } => Some(SnapshotNode::Comment {
            contents: contents.clone(),
        }),
        NodeData::Text { contents } => {
            if !ctx.opts.preserve_whitespace && contents.trim().is_empty() {
                return None;
            }
            Some(SnapshotNode::Text {
                contents: contents.clone(),
            })
        }
        NodeData::Element { tag, attrs } => {
            // Stylesheet links collapse into inline <style> when their text
            // was fetched; otherwise the reference is kept as-is.
            if tag == "link" && ctx.opts.inline_stylesheets && is_stylesheet_link(ctx.doc, id) {
                if let Some(css) = ctx
                    .doc
                    .attr(id, "href")
                    .and_then(|href| remote_src(ctx.base, href))
                    .and_then(|url| ctx.css.get(&url))
                {
                    return Some(SnapshotNode::Element {
                        tag: "style".to_string(),
                        attrs: BTreeMap::new(),
                        children: vec![SnapshotNode::Text {
                            contents: css.clone(),
                        }],
                    });
                }
            }

            let mut snap_attrs: BTreeMap<String, String> = attrs.iter().cloned().collect();

            match ctx.doc.data(id).category() {
                NodeCategory::Image if ctx.opts.inline_images => {
                    if let Some(embedded) = ctx
                        .doc
                        .attr(id, "src")
                        .and_then(|src| remote_src(ctx.base, src))
                        .and_then(|url| ctx.images.get(&url))
                    {
                        snap_attrs.insert("src".to_string(), embedded.clone());
                    }
                }
                NodeCategory::Canvas if ctx.opts.record_canvas => {
                    let canvas_id = ctx.doc.attr(id, "id");
                    if let Some(idx) = select_capture(canvas_id, ctx.canvas_fallbacks, claimed) {
                        let capture = &ctx.canvas_fallbacks[idx];
                        if !capture.png.is_empty() {
                            snap_attrs.insert(
                                "data-pixel-snapshot".to_string(),
                                png_data_uri(&capture.png),
                            );
                        }
                    }
                }
                _ => {}
            }

            Some(SnapshotNode::Element {
                tag: tag.clone(),
                attrs: snap_attrs,
                children: build_children(ctx, id, claimed),
            })
        }
    }
}

fn build_children(ctx: &BuildContext<'_>, id: NodeId, claimed: &mut [bool]) -> Vec<SnapshotNode> {
    ctx.doc
        .children(id)
        .iter()
        .filter_map(|&child| build_node(ctx, child, claimed))
        .collect()
}

/// A clean target for one rebuild.
///
/// The context is consumed by value: a rebuild can never observe node
/// identity or caches from the snapshot's source document or from a
/// previous rebuild.
pub struct RebuildContext {
    tree: DocumentTree,
}

impl RebuildContext {
    pub fn new() -> Self {
        Self {
            tree: DocumentTree::new(),
        }
    }
}

impl Default for RebuildContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconstruct a live document tree from a structural snapshot.
///
/// Deterministic: rebuilding the same snapshot into equivalent fresh
/// contexts yields identical trees.
pub fn rebuild(snapshot: &StructuralSnapshot, ctx: RebuildContext) -> Result<DocumentTree> {
    let mut tree = ctx.tree;
    let root = tree.root();
    match &snapshot.root {
        SnapshotNode::Document { children } => {
            for child in children {
                rebuild_into(&mut tree, root, child);
            }
            Ok(tree)
        }
        other => Err(Error::Rebuild(format!(
            "snapshot root must be a document node, found {:?}",
            node_kind(other)
        ))),
    }
}

fn node_kind(node: &SnapshotNode) -> &'static str {
    match node {
        SnapshotNode::Document { .. } => "document",
        SnapshotNode::Doctype { .. } => "doctype",
        SnapshotNode::Element { .. } => "element",
        SnapshotNode::Text { .. } => "text",
        SnapshotNode::Comment { .. } => "comment",
    }
}

fn rebuild_into(tree: &mut DocumentTree, parent: NodeId, node: &SnapshotNode) {
    match node {
        SnapshotNode::Document { children } => {
            // Nested document nodes cannot occur in a well-formed snapshot;
            // fold their children into the current parent.
            for child in children {
                rebuild_into(tree, parent, child);
            }
        }
        SnapshotNode::Doctype { name } => {
            let id = tree.create_node(NodeData::Doctype { name: name.clone() });
            tree.append_child(parent, id);
        }
        SnapshotNode::Element { tag, attrs, children } => {
            let id = tree.create_node(NodeData::Element {
                tag: tag.clone(),
                attrs: attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            });
            tree.append_child(parent, id);
            for child in children {
                rebuild_into(tree, id, child);
            }
        }
        SnapshotNode::Text { contents } => {
            let id = tree.create_node(NodeData::Text {
                contents: contents.clone(),
            });
            tree.append_child(parent, id);
        }
        SnapshotNode::Comment { contents } => {
            let id = tree.create_node(NodeData::Comment {
                contents: contents.clone(),
            });
            tree.append_child(parent, id);
        }
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["style", "script"];

/// Render a document tree into markup.
///
/// Void elements emit no closing tag, `style`/`script` bodies stay
/// unescaped, everything else is escaped. No whitespace is injected, so a
/// preserved-whitespace snapshot serializes byte-faithfully.
pub fn serialize_html(doc: &DocumentTree) -> String {
    let mut out = String::new();
    for &child in doc.children(doc.root()) {
        write_node(doc, child, &mut out);
    }
    out
}

fn write_node(doc: &DocumentTree, id: NodeId, out: &mut String) {
    match doc.data(id) {
        NodeData::Document => {
            for &child in doc.children(id) {
                write_node(doc, child, out);
            }
        }
        NodeData::Doctype { name } => {
            out.push_str("<!DOCTYPE ");
            out.push_str(name);
            out.push('>');
        }
        NodeData::Comment { contents } => {
            out.push_str("<!--");
            out.push_str(contents);
            out.push_str("-->");
        }
        NodeData::Text { contents } => {
            let parent_raw = doc
                .parent(id)
                .and_then(|p| doc.tag(p))
                .map(|t| RAW_TEXT_ELEMENTS.contains(&t))
                .unwrap_or(false);
            if parent_raw {
                out.push_str(contents);
            } else {
                out.push_str(&escape_text(contents));
            }
        }
        NodeData::Element { tag, attrs } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&tag.as_str()) {
                return;
            }
            for &child in doc.children(id) {
                write_node(doc, child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
