//! Engagement Monitor CLI
//!
//! Samples a camera, scores engagement and streams the results to viewers.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use engagement_monitor::{
    collector::{DetectorEnv, FrameSource, NoopDetector, StillImageCamera, SyntheticCamera},
    config::{CameraSource, Config, OverlapPolicy},
    core::{CaptureLoop, LoopSettings},
    logging::init_logging,
    server::{self, ServerConfig, ServerState},
    tracking::read_entries,
    transparency::create_shared_stats,
    Broadcaster, TrackingLog, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How long shutdown waits for pending tracking writes.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "engagement-monitor")]
#[command(version = VERSION)]
#[command(about = "Webcam engagement sampler with live viewer streaming", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the capture loop and the viewer server
    Serve(ServeArgs),

    /// Show configuration
    Config {
        /// Write the default configuration to the config file
        #[arg(long)]
        init: bool,

        /// With --init, replace an existing config file
        #[arg(long, requires = "init")]
        force: bool,
    },

    /// Summarize the tracking log
    Status {
        /// Tracking log to read (defaults to the configured path)
        #[arg(long)]
        tracking_log: Option<PathBuf>,
    },
}

/// Overrides for the loaded configuration.
#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Address to bind the HTTP server to
    #[arg(long)]
    host: Option<String>,

    /// HTTP port
    #[arg(long, short)]
    port: Option<u16>,

    /// Milliseconds between capture ticks
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Number of scores kept for the trend chart
    #[arg(long)]
    history: Option<usize>,

    /// Behaviour when a tick fires while the previous one is still running
    #[arg(long, value_enum)]
    overlap: Option<OverlapPolicy>,

    /// Directory holding the detection model assets
    #[arg(long)]
    models: Option<PathBuf>,

    /// Root for the viewer page and static assets
    #[arg(long)]
    public: Option<PathBuf>,

    /// JSON file receiving tracking events
    #[arg(long)]
    tracking_log: Option<PathBuf>,

    /// Use an image file as the camera instead of the test pattern
    #[arg(long)]
    frame_file: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

impl ServeArgs {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ms) = self.interval_ms {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(history) = self.history {
            config.history_capacity = history;
        }
        if let Some(overlap) = self.overlap {
            config.overlap_policy = overlap;
        }
        if let Some(models) = self.models {
            config.model_path = models;
        }
        if let Some(public) = self.public {
            config.public_dir = public;
        }
        if let Some(tracking_log) = self.tracking_log {
            config.tracking_log_path = tracking_log;
        }
        if let Some(path) = self.frame_file {
            config.camera.source = CameraSource::Still { path };
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => cmd_serve(args).await,
        Commands::Config { init, force } => cmd_config(init, force),
        Commands::Status { tracking_log } => {
            cmd_status(tracking_log);
            Ok(())
        }
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config ({e}), using defaults");
        Config::default()
    })
}

fn build_camera(config: &Config) -> Arc<dyn FrameSource> {
    let camera = &config.camera;
    match &camera.source {
        CameraSource::Synthetic => Arc::new(SyntheticCamera::new(
            camera.width,
            camera.height,
            camera.jpeg_quality,
        )),
        CameraSource::Still { path } => {
            Arc::new(StillImageCamera::new(path.clone(), camera.jpeg_quality))
        }
    }
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config();
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging);

    println!("Engagement Monitor v{VERSION}");
    println!();

    let detector_env = DetectorEnv::init(&config.model_path);

    let camera = build_camera(&config);
    let detector = Arc::new(NoopDetector::new());
    let broadcaster = Broadcaster::default();
    let stats = create_shared_stats();
    let (tracking, writer) = TrackingLog::spawn(config.tracking_log_path.clone());

    println!("Starting capture...");
    println!("  Camera: {}", camera.describe());
    println!(
        "  Model assets: {} file(s) in {}",
        detector_env.model_files().len(),
        detector_env.model_dir().display()
    );
    println!("  Tick interval: {}ms", config.tick_interval.as_millis());
    println!("  History capacity: {}", config.history_capacity);
    println!("  Overlap policy: {:?}", config.overlap_policy);
    println!("  Tracking log: {}", config.tracking_log_path.display());

    let capture = CaptureLoop::new(
        camera,
        detector,
        broadcaster.clone(),
        Arc::clone(&stats),
        LoopSettings::from(&config),
    );
    let history = capture.history();
    let (loop_handle, stop_loop) = capture.spawn();

    let state = Arc::new(ServerState::new(
        broadcaster,
        tracking,
        Arc::clone(&stats),
        history,
    ));
    let server_config = ServerConfig::new(
        config.host.clone(),
        config.port,
        config.public_dir.clone(),
    );
    let (addr, stop_server) = server::run(server_config, state)
        .await
        .context("Failed to start server")?;

    println!();
    println!("Viewer page: http://{addr}");
    println!("Press Ctrl+C to stop");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("Shutting down...");

    let _ = stop_loop.send(());
    if let Err(e) = loop_handle.await {
        tracing::error!("Capture loop ended abnormally: {e}");
    }
    let _ = stop_server.send(());

    // The writer exits once the server and its viewer sessions have dropped
    // their handles
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer)
        .await
        .is_err()
    {
        tracing::warn!("Tracking writer did not finish in time");
    }

    println!();
    println!("{}", stats.summary());

    Ok(())
}

fn cmd_config(init: bool, force: bool) -> anyhow::Result<()> {
    if init {
        let path = Config::config_path();
        if init_config(&path, force)? {
            println!("Wrote default configuration to {}", path.display());
        } else {
            println!("Config file already exists: {}", path.display());
            println!("Use --force to replace it.");
        }
        return Ok(());
    }

    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
    Ok(())
}

/// Write the default configuration unless a file is already there.
///
/// Returns whether the file was written.
fn init_config(path: &Path, force: bool) -> anyhow::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    Config::default()
        .save_to(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

fn cmd_status(tracking_log: Option<PathBuf>) {
    let path = tracking_log.unwrap_or_else(|| load_config().tracking_log_path);
    let entries = read_entries(&path);

    println!("Engagement Monitor Status");
    println!("=========================");
    println!();
    println!("Tracking log: {}", path.display());
    println!("  Entries: {}", entries.len());

    let timestamp = |entry: &serde_json::Value| {
        entry
            .get("timestamp")
            .and_then(|t| t.as_str())
            .unwrap_or("unknown")
            .to_string()
    };
    if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
        println!("  First entry: {}", timestamp(first));
        println!("  Last entry: {}", timestamp(last));
    } else {
        println!("  No tracking data recorded yet.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve_overrides() {
        let cli = Cli::try_parse_from([
            "engagement-monitor",
            "serve",
            "--port",
            "8080",
            "--interval-ms",
            "250",
            "--overlap",
            "allow",
            "--frame-file",
            "face.jpg",
        ])
        .unwrap();

        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.port, 8080);
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.overlap_policy, OverlapPolicy::Allow);
        assert_eq!(
            config.camera.source,
            CameraSource::Still {
                path: PathBuf::from("face.jpg")
            }
        );
        // Untouched fields keep their defaults
        assert_eq!(config.history_capacity, 100);
    }

    #[test]
    fn test_empty_overrides_keep_config() {
        let mut config = Config::default();
        ServeArgs::default().apply(&mut config);
        assert_eq!(config.port, 3000);
        assert_eq!(config.camera.source, CameraSource::Synthetic);
    }

    #[test]
    fn test_init_config_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engagement-monitor").join("config.json");

        assert!(init_config(&path, false).unwrap());
        assert_eq!(Config::load_from(&path).unwrap().port, 3000);

        std::fs::write(&path, r#"{"port": 9000}"#).unwrap();
        assert!(!init_config(&path, false).unwrap());
        assert_eq!(Config::load_from(&path).unwrap().port, 9000);

        assert!(init_config(&path, true).unwrap());
        assert_eq!(Config::load_from(&path).unwrap().port, 3000);
    }

    #[test]
    fn test_force_requires_init() {
        assert!(Cli::try_parse_from(["engagement-monitor", "config", "--force"]).is_err());
        assert!(Cli::try_parse_from(["engagement-monitor", "config", "--init", "--force"]).is_ok());
    }
}
