use anyhow::Context;
use clap::Parser;
use gameview::config::GameviewConfig;
use gameview::platform::{self, CaptureDevice};
use gameview::server::{self, AppState};
use gameview::testing::SyntheticDevice;
use gameview::types::PixelFormat;
use gameview::{CaptureSource, FrameHub};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Serve one camera to WebSocket and WebRTC viewers.
#[derive(Debug, Parser)]
#[command(name = "gameview-server", version, about)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, default_value = "gameview.toml")]
    config: PathBuf,

    /// Capture device node
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Capture format: mjpeg or h264
    #[arg(long)]
    format: Option<PixelFormat>,

    /// Serve a generated test pattern instead of a camera
    #[arg(long)]
    synthetic: bool,
}

fn load_config(args: &Args) -> anyhow::Result<GameviewConfig> {
    let mut config = GameviewConfig::load_layered(&args.config)?;
    if let Some(device) = &args.device {
        config.camera.device = device.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(format) = args.format {
        config.camera.format = format;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gameview::init_logging();
    let args = Args::parse();
    let config = load_config(&args)?;

    let device: Box<dyn CaptureDevice> = if args.synthetic {
        Box::new(SyntheticDevice::new())
    } else {
        platform::default_device(&config.camera.device, config.camera.buffers)
    };
    let source = Arc::new(CaptureSource::new(device, config.camera.capture_format()));
    if let Err(e) = source.open().and_then(|()| source.start()) {
        log::error!("Capture source failed to start: {}", e);
        std::process::exit(1);
    }

    let hub = FrameHub::with_default_capacity(config.stream.subscriber_buffer);
    let mut pump = hub.spawn_pump(Arc::clone(&source))?;

    let addr = config.server.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!(
        "{} {} listening on {} ({})",
        gameview::NAME,
        gameview::VERSION,
        listener.local_addr()?,
        source.format().pixel_format
    );

    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);
    let mut server = tokio::spawn(server::serve(
        listener,
        AppState::new(hub.clone(), config),
        async move { shutdown_signal.notified().await },
    ));

    let mut server_done = false;
    let mut exit_code = 0;
    tokio::select! {
        result = pump.wait() => {
            if let Err(e) = result {
                log::error!("Capture failed, shutting down: {}", e);
                exit_code = 1;
            } else {
                log::info!("Capture source finished, shutting down");
            }
        }
        result = &mut server => {
            server_done = true;
            match result {
                Ok(Ok(())) => log::info!("Server stopped"),
                Ok(Err(e)) => {
                    log::error!("Server failed: {}", e);
                    exit_code = 1;
                }
                Err(e) => {
                    log::error!("Server task failed: {}", e);
                    exit_code = 1;
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupt received, shutting down");
        }
    }

    // Closing the source ends every session through end-of-stream.
    pump.stop();
    if let Err(e) = pump.wait().await {
        log::error!("Capture failed during shutdown: {}", e);
        exit_code = 1;
    }
    shutdown.notify_one();
    if !server_done {
        if let Ok(Err(e)) = server.await {
            log::error!("Server failed during shutdown: {}", e);
            exit_code = 1;
        }
    }

    let stats = hub.stats();
    log::info!(
        "Published {} frames, dropped {}",
        stats.frames_published,
        stats.frames_dropped
    );
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
