use anyhow::Context;
use clap::Parser;
use pagesnap::{
    delivery, ExportConfig, Exporter, InlineStrategy, RenderSurface, SettlePolicy, Viewport,
};

/// Capture a live page into a single self-contained HTML file.
#[derive(Parser, Debug)]
#[command(name = "pagesnap", version, about)]
struct Cli {
    /// Location of the page to export
    url: String,

    /// Output path for the delivered artifact
    #[arg(short, long, default_value = delivery::DEFAULT_FILENAME)]
    out: std::path::PathBuf,

    /// Sandbox viewport width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Sandbox viewport height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Fixed settle delay after the sandbox loads, in milliseconds
    #[arg(long, default_value_t = 1000)]
    settle_ms: u64,

    /// Bounded wait per pipeline stage, in milliseconds
    #[arg(long, default_value_t = 30000)]
    stage_timeout_ms: u64,

    /// Re-host fetched images through this storage endpoint instead of
    /// embedding them as base64 data URIs
    #[arg(long)]
    rehost: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let strategy = match cli.rehost {
        Some(endpoint) => InlineStrategy::Rehost { endpoint },
        None => InlineStrategy::Base64Embed,
    };
    let config = ExportConfig {
        stage_timeout_ms: cli.stage_timeout_ms,
        settle: SettlePolicy::FixedDelay { ms: cli.settle_ms },
        strategy,
        ..Default::default()
    };

    let surface = RenderSurface::new(&cli.url).with_viewport(Viewport {
        width: cli.width,
        height: cli.height,
    });

    let exporter = Exporter::new(config)?;
    let artifact = exporter
        .export(&surface, &[])
        .await
        .with_context(|| format!("export of {} failed", cli.url))?;

    delivery::write_to_path(&artifact, &cli.out)?;
    println!(
        "exported {} ({} bytes) to {}",
        cli.url,
        artifact.html.len(),
        cli.out.display()
    );
    Ok(())
}
