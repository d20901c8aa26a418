//! Self-contained demo: serve a little dashboard page locally, export it,
//! and write the offline artifact next to the binary.
//!
//! Run with: cargo run --example export_page

use pagesnap::{
    delivery, ChartSurface, ExportConfig, Exporter, RenderSurface, Result, SettlePolicy,
};
use tiny_http::{Header, Response, Server};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\ndemopixels";

struct DemoChart;

impl ChartSurface for DemoChart {
    fn canvas_id(&self) -> Option<&str> {
        Some("revenue")
    }

    fn rendered(&self) -> bool {
        true
    }

    fn width(&self) -> u32 {
        480
    }

    fn height(&self) -> u32 {
        240
    }

    fn capture_png(&self) -> Result<Vec<u8>> {
        Ok(PNG.to_vec())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let path = request.url().to_string();
            let _ = match path.as_str() {
                "/" => request.respond(Response::from_string(
                    "<!DOCTYPE html><html><head><title>Dashboard</title></head>\
                     <body><h1>Quarterly numbers</h1>\
                     <canvas id=\"revenue\" width=\"480\" height=\"240\"></canvas>\
                     <img src=\"/logo.png\" alt=\"logo\"></body></html>",
                )),
                "/logo.png" => request.respond(
                    Response::from_data(PNG.to_vec())
                        .with_header("Content-Type: image/png".parse::<Header>().unwrap()),
                ),
                _ => request.respond(Response::from_string("Not Found").with_status_code(404)),
            };
        }
    });

    let exporter = Exporter::new(ExportConfig {
        settle: SettlePolicy::Stabilize {
            poll_interval_ms: 50,
            max_wait_ms: 2000,
        },
        ..Default::default()
    })?;
    let surface = RenderSurface::new(format!("http://{}/", addr));
    let chart = DemoChart;

    let artifact = exporter.export(&surface, &[&chart]).await?;
    delivery::write_to_path(&artifact, &artifact.filename)?;
    println!(
        "wrote {} ({} bytes, fully self-contained)",
        artifact.filename,
        artifact.html.len()
    );
    Ok(())
}
