//! End-to-end tests for the export pipeline

use pagesnap::sandbox::active_sandboxes;
use pagesnap::{
    ChartSurface, Error, ExportConfig, ExportOutcome, ExportStage, Exporter, InlineStrategy,
    RenderSurface, SettlePolicy, SnapshotOptions,
};
use std::sync::Mutex;
use tiny_http::{Header, Method, Response, Server};

// Sandbox uniqueness is process-global, so pipeline tests must not overlap.
static PIPELINE_LOCK: Mutex<()> = Mutex::new(());

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nnotrealpixels";

fn png_header() -> Header {
    "Content-Type: image/png".parse::<Header>().unwrap()
}

fn html_header() -> Header {
    "Content-Type: text/html; charset=utf-8".parse::<Header>().unwrap()
}

fn fast_config() -> ExportConfig {
    ExportConfig {
        settle: SettlePolicy::FixedDelay { ms: 0 },
        stage_timeout_ms: 10000,
        ..Default::default()
    }
}

struct FakeChart {
    id: Option<String>,
    width: u32,
    height: u32,
}

impl ChartSurface for FakeChart {
    fn canvas_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn rendered(&self) -> bool {
        true
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn capture_png(&self) -> pagesnap::Result<Vec<u8>> {
        Ok(PNG.to_vec())
    }
}

/// Serve `page` at `/` plus a PNG at `/pic.png`; unknown paths get 404.
fn start_asset_server(page: String) -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let path = request.url().to_string();
            let _ = match path.as_str() {
                "/" => request.respond(Response::from_string(page.clone()).with_header(html_header())),
                "/pic.png" => {
                    request.respond(Response::from_data(PNG.to_vec()).with_header(png_header()))
                }
                _ => request.respond(Response::from_string("Not Found").with_status_code(404)),
            };
        }
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn export_inlines_images_and_flattens_canvas() {
    let _guard = PIPELINE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let page = "<!DOCTYPE html><html><head><title>Home</title></head><body>\
                <canvas id=\"c1\" class=\"chart\" width=\"300\" height=\"150\"></canvas>\
                <img src=\"/pic.png\"></body></html>"
        .to_string();
    let base = start_asset_server(page);

    let chart = FakeChart {
        id: Some("c1".to_string()),
        width: 640,
        height: 320,
    };
    let exporter = Exporter::new(fast_config()).unwrap();
    let surface = RenderSurface::new(format!("{}/", base));
    let artifact = exporter
        .export(&surface, &[&chart])
        .await
        .expect("export should succeed");

    // Every image source is embedded; nothing in the artifact points at the
    // network any more.
    assert_eq!(artifact.html.matches("src=\"data:image/png;base64,").count(), 2);
    assert!(!artifact.html.contains("src=\"http"));

    // The canvas became an <img> carrying its id/class and the chart's
    // rendered dimensions, in the original sibling position.
    assert!(!artifact.html.contains("<canvas"));
    assert!(artifact.html.contains("id=\"c1\""));
    assert!(artifact.html.contains("class=\"chart\""));
    assert!(artifact.html.contains("width=\"640\""));
    assert!(artifact.html.contains("height=\"320\""));
    let flattened_at = artifact.html.find("id=\"c1\"").unwrap();
    let remote_img_at = artifact.html.rfind("src=\"data:image/png").unwrap();
    assert!(flattened_at < remote_img_at, "sibling order must survive");

    assert_eq!(artifact.filename, "home.html");
    assert_eq!(active_sandboxes(), 0);
    assert_eq!(
        exporter.last_trace().last(),
        Some(&ExportStage::TornDown(ExportOutcome::Success))
    );
}

#[tokio::test]
async fn export_completes_when_an_image_fetch_fails() {
    let _guard = PIPELINE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let page = "<html><head><title>Degraded</title></head><body>\
                <img src=\"/missing.png\"><p>content</p></body></html>"
        .to_string();
    let base = start_asset_server(page);

    let exporter = Exporter::new(fast_config()).unwrap();
    let surface = RenderSurface::new(format!("{}/", base));
    let artifact = exporter
        .export(&surface, &[])
        .await
        .expect("a failed asset must not abort the export");

    // The asset kept its original reference: degraded, not aborted.
    assert!(artifact.html.contains("missing.png"));
    assert!(artifact.html.contains("<p>content</p>"));
    assert_eq!(active_sandboxes(), 0);
}

#[tokio::test]
async fn sandbox_load_failure_tears_down_and_yields_no_artifact() {
    let _guard = PIPELINE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let _ = request.respond(Response::from_string("boom").with_status_code(500));
        }
    });

    let exporter = Exporter::new(fast_config()).unwrap();
    let surface = RenderSurface::new(format!("http://{}/", addr));
    let err = exporter
        .export(&surface, &[])
        .await
        .expect_err("load failure must be fatal");

    assert!(matches!(err, Error::SandboxLoad(_)));
    assert!(err.to_string().contains("500"), "error should be descriptive: {}", err);
    assert_eq!(active_sandboxes(), 0);
    assert_eq!(
        exporter.last_trace().last(),
        Some(&ExportStage::TornDown(ExportOutcome::Failure))
    );
}

#[tokio::test]
async fn concurrent_export_is_rejected_not_queued() {
    let _guard = PIPELINE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    // First request answers slowly so the second export arrives mid-flight.
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            std::thread::sleep(std::time::Duration::from_millis(300));
            let _ = request.respond(
                Response::from_string("<html><body><p>slow</p></body></html>")
                    .with_header(html_header()),
            );
        }
    });

    let exporter = Exporter::new(fast_config()).unwrap();
    let surface = RenderSurface::new(format!("http://{}/", addr));

    let first = exporter.export(&surface, &[]);
    let second = async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        exporter.export(&surface, &[]).await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_ok(), "in-flight export should finish: {:?}", first.err());
    assert!(matches!(second, Err(Error::ExportInFlight)));
    assert_eq!(active_sandboxes(), 0);
}

#[tokio::test]
async fn rehost_strategy_rewrites_sources_to_stored_urls() {
    let _guard = PIPELINE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let path = request.url().to_string();
            let _ = match (request.method().clone(), path.as_str()) {
                (Method::Get, "/") => request.respond(
                    Response::from_string(
                        "<html><body><img src=\"/pic.png\"></body></html>",
                    )
                    .with_header(html_header()),
                ),
                (Method::Get, "/pic.png") => {
                    request.respond(Response::from_data(PNG.to_vec()).with_header(png_header()))
                }
                (Method::Post, "/upload") => request.respond(
                    Response::from_string(r#"{"url":"http://assets.example/stored/pic.png"}"#)
                        .with_header(
                            "Content-Type: application/json".parse::<Header>().unwrap(),
                        ),
                ),
                _ => request.respond(Response::from_string("Not Found").with_status_code(404)),
            };
        }
    });

    let config = ExportConfig {
        strategy: InlineStrategy::Rehost {
            endpoint: format!("http://{}/upload", addr),
        },
        // The asset stage already rewrote every source; a second snapshot-time
        // pass would chase the (off-origin) stored URLs.
        snapshot: SnapshotOptions {
            inline_images: false,
            ..Default::default()
        },
        ..fast_config()
    };
    let exporter = Exporter::new(config).unwrap();
    let surface = RenderSurface::new(format!("http://{}/", addr));
    let artifact = exporter.export(&surface, &[]).await.unwrap();

    assert!(artifact.html.contains("src=\"http://assets.example/stored/pic.png\""));
    assert!(!artifact.html.contains("data:image/png"));
    assert_eq!(active_sandboxes(), 0);
}

#[tokio::test]
async fn external_stylesheets_inline_into_style_elements() {
    let _guard = PIPELINE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let path = request.url().to_string();
            let _ = match path.as_str() {
                "/" => request.respond(
                    Response::from_string(
                        "<html><head><link rel=\"stylesheet\" href=\"/s.css\"></head>\
                         <body><p>styled</p></body></html>",
                    )
                    .with_header(html_header()),
                ),
                "/s.css" => request.respond(
                    Response::from_string("body{color:blue}")
                        .with_header("Content-Type: text/css".parse::<Header>().unwrap()),
                ),
                _ => request.respond(Response::from_string("Not Found").with_status_code(404)),
            };
        }
    });

    let exporter = Exporter::new(fast_config()).unwrap();
    let surface = RenderSurface::new(format!("http://{}/", addr));
    let artifact = exporter.export(&surface, &[]).await.unwrap();

    assert!(artifact.html.contains("<style>body{color:blue}</style>"));
    assert!(!artifact.html.contains("<link"));
    assert_eq!(active_sandboxes(), 0);
}
