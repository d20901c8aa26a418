//! Asset retrieval and inlining.
//!
//! Remote images referenced by the sandbox document are fetched and rewritten
//! into embeddable form before the tree is snapshotted. Two mutually
//! exclusive strategies exist: base64 embedding (the default, fully offline)
//! and re-hosting through a configured storage endpoint (smaller artifact,
//! still network-dependent). Inlining is best-effort: a failed asset is
//! logged and keeps its original reference instead of aborting the export.

use crate::dom::{DocumentTree, NodeCategory, NodeId};
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

/// How remote image references are rewritten at export time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineStrategy {
    /// Embed fetched bytes as `data:` URIs. Larger artifact, renders offline.
    Base64Embed,
    /// Re-upload fetched bytes to a storage endpoint and point the artifact
    /// at the returned URL. Smaller artifact, needs network to render.
    Rehost { endpoint: String },
}

impl Default for InlineStrategy {
    fn default() -> Self {
        InlineStrategy::Base64Embed
    }
}

/// A fetched binary resource together with its media type.
#[derive(Debug, Clone)]
pub struct Binary {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

/// Response of the asset storage endpoint (re-host strategy only).
#[derive(Debug, Deserialize)]
struct StoredAsset {
    url: String,
}

/// Retrieve a remote binary resource.
///
/// Non-success statuses and transport failures both map to [`Error::Fetch`].
pub async fn fetch_binary(client: &Client, url: &str) -> Result<Binary> {
    let resp = client.get(url).send().await.map_err(|e| Error::Fetch {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !resp.status().is_success() {
        return Err(Error::Fetch {
            url: url.to_string(),
            reason: format!("HTTP status {}", resp.status()),
        });
    }

    let header_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?
        .to_vec();

    let media_type = header_type
        .filter(|t| !t.is_empty())
        .or_else(|| sniff_media_type(&bytes).map(|t| t.to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok(Binary { bytes, media_type })
}

/// Encode a fetched resource as a base64 `data:` URI.
pub fn to_data_uri(binary: &Binary) -> String {
    format!(
        "data:{};base64,{}",
        binary.media_type,
        BASE64.encode(&binary.bytes)
    )
}

/// Shorthand for PNG pixel buffers (canvas flattening always produces PNG).
pub fn png_data_uri(bytes: &[u8]) -> String {
    to_data_uri(&Binary {
        bytes: bytes.to_vec(),
        media_type: "image/png".to_string(),
    })
}

fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(b"\xff\xd8\xff") {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() > 11 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Bundles the HTTP client with the active inlining strategy.
///
/// One strategy is active per export; the inliner is shared by the asset
/// stage and by the snapshotter's own inlining options.
pub struct AssetInliner<'a> {
    client: &'a Client,
    strategy: &'a InlineStrategy,
}

impl<'a> AssetInliner<'a> {
    pub fn new(client: &'a Client, strategy: &'a InlineStrategy) -> Self {
        Self { client, strategy }
    }

    /// Fetch `url` and return a self-contained (or re-hosted) replacement
    /// source for it.
    pub async fn embeddable_src(&self, url: &str) -> Result<String> {
        let binary = fetch_binary(self.client, url).await?;
        match self.strategy {
            InlineStrategy::Base64Embed => Ok(to_data_uri(&binary)),
            InlineStrategy::Rehost { endpoint } => self.rehost(endpoint, url, binary).await,
        }
    }

    /// Fetch a remote text resource (external stylesheets).
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let binary = fetch_binary(self.client, url).await?;
        Ok(String::from_utf8_lossy(&binary.bytes).into_owned())
    }

    async fn rehost(&self, endpoint: &str, url: &str, binary: Binary) -> Result<String> {
        let resp = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, binary.media_type.clone())
            .body(binary.bytes)
            .send()
            .await
            .map_err(|e| Error::AssetInline {
                url: url.to_string(),
                reason: format!("upload to {} failed: {}", endpoint, e),
            })?;

        if !resp.status().is_success() {
            return Err(Error::AssetInline {
                url: url.to_string(),
                reason: format!("storage endpoint returned {}", resp.status()),
            });
        }

        let body = resp.bytes().await.map_err(|e| Error::AssetInline {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let stored: StoredAsset =
            serde_json::from_slice(&body).map_err(|e| Error::AssetInline {
                url: url.to_string(),
                reason: format!("malformed storage response: {}", e),
            })?;
        Ok(stored.url)
    }
}

/// Resolve an `src` attribute against the sandbox location and keep it only
/// when it is a remote, network-dependent reference.
pub(crate) fn remote_src(base: &Url, src: &str) -> Option<String> {
    if src.starts_with("data:") {
        return None;
    }
    let resolved = base.join(src).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// Rewrite every remote `<img>` source in the document into embeddable form.
///
/// All fetches run concurrently and are joined before this function returns,
/// so the snapshotter never observes a half-inlined tree. Returns the number
/// of assets actually rewritten.
pub async fn inline_images(
    doc: &mut DocumentTree,
    base: &Url,
    inliner: &AssetInliner<'_>,
) -> usize {
    let targets: Vec<(NodeId, String)> = doc
        .descendants(doc.root())
        .into_iter()
        .filter(|&id| doc.data(id).category() == NodeCategory::Image)
        .filter_map(|id| {
            let src = doc.attr(id, "src")?;
            remote_src(base, src).map(|resolved| (id, resolved))
        })
        .collect();

    let fetches: Vec<_> = targets
        .iter()
        .map(|(_, url)| inliner.embeddable_src(url))
        .collect();
    let results = future::join_all(fetches).await;

    let mut inlined = 0;
    for ((id, url), result) in targets.iter().zip(results) {
        match result {
            Ok(src) => {
                doc.set_attr(*id, "src", &src);
                inlined += 1;
            }
            Err(e) => warn!("leaving image {} with its original source: {}", url, e),
        }
    }
    debug!("inlined {}/{} image assets", inlined, targets.len());
    inlined
}
