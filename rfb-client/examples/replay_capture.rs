//! Replay a captured server stream through the update pipeline.
//!
//! Usage:
//!   cargo run --example replay_capture --features cli -- capture.bin --width 1280 --height 800
//!
//! The capture holds the raw server-to-client bytes that followed ServerInit.
//! Client messages are discarded. Set `RUST_VNC_TRACE=1` for wire tracing.

use rfb_client::args::Args;
use rfb_client::{ClientBuilder, Config, ServerEvent};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let config = Config::from_args(&args)?;
    let capture = tokio::fs::File::open(&args.capture).await?;
    info!(
        "Replaying {} at {}x{}",
        args.capture.display(),
        args.width,
        args.height
    );

    let client = ClientBuilder::new(config).attach(
        capture,
        tokio::io::sink(),
        args.width,
        args.height,
        "replay",
    )?;
    let handle = client.handle();

    let mut update_count = 0u64;
    while let Ok(event) = handle.events().recv_async().await {
        match event {
            ServerEvent::Connected { pixel_format, .. } => {
                info!("Decoding at {}bpp", pixel_format.bits_per_pixel);
            }
            ServerEvent::FramebufferUpdated { damage, .. } => {
                update_count += 1;
                debug!("Update {} (damage regions: {})", update_count, damage.len());
            }
            ServerEvent::DesktopResized { width, height } => {
                info!("Desktop resized to {}x{}", width, height);
            }
            ServerEvent::CursorMoved { x, y } => debug!("Pointer at {},{}", x, y),
            ServerEvent::CursorShapeChanged { shape } => match shape {
                Some(s) => debug!("Cursor {}x{}", s.width, s.height),
                None => debug!("Cursor hidden"),
            },
            ServerEvent::Bell => debug!("Bell"),
            ServerEvent::ServerCutText { text } => {
                debug!("Server clipboard: {} bytes", text.len());
            }
            ServerEvent::Error { message } => error!("Decode failed: {}", message),
            ServerEvent::ConnectionClosed => break,
        }
    }

    let stats = handle.stats();
    info!("Replayed {} updates: {}", update_count, stats.format_summary());
    client.join().await?;
    Ok(())
}
