use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "airplay-display",
    version,
    about = "Now-playing display for a Pi AirPlay receiver",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Base URL of the receiver's web server
    #[arg(long, env = "AIRPLAY_SERVER", default_value = "http://localhost:8080", global = true)]
    pub server: String,

    /// Timeout for each HTTP request, in milliseconds
    #[arg(long, env = "AIRPLAY_TIMEOUT_MS", default_value_t = 5000, global = true)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Keep the display files in sync with the receiver (default)
    Run(RunArgs),
    /// Control the receiver's audio capture
    Visualizer {
        #[command(subcommand)]
        action: VisualizerAction,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum VisualizerAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// Poll `/now-playing`
    Poll,
    /// Follow `metadata_update` / `playback_state` push events
    Push,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// How metadata reaches the display
    #[arg(long, value_enum, env = "AIRPLAY_TRANSPORT", default_value = "poll")]
    pub transport: Transport,

    /// Base polling interval in milliseconds
    #[arg(long, env = "AIRPLAY_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Directory receiving now_playing.png and spectrum.png
    #[arg(long, env = "AIRPLAY_OUTPUT_DIR", default_value = "display")]
    pub output_dir: PathBuf,

    /// TrueType font for the card text
    #[arg(long, env = "AIRPLAY_FONT")]
    pub font: Option<PathBuf>,

    /// Render visualization frames to spectrum.png
    #[arg(long, env = "AIRPLAY_SPECTRUM")]
    pub spectrum: bool,

    /// Ask the receiver to start audio capture at startup (implies --spectrum)
    #[arg(long)]
    pub start_visualizer: bool,

    #[arg(long, default_value_t = 640)]
    pub spectrum_width: u32,

    #[arg(long, default_value_t = 160)]
    pub spectrum_height: u32,

    #[arg(long, default_value_t = 12)]
    pub meter_height: u32,
}

/// Validated settings for a display run
#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub request_timeout: Duration,
    pub transport: Transport,
    pub poll_interval: Duration,
    pub output_dir: PathBuf,
    pub font: Option<PathBuf>,
    pub spectrum: bool,
    pub start_visualizer: bool,
    pub spectrum_width: u32,
    pub spectrum_height: u32,
    pub meter_height: u32,
}

impl Config {
    pub fn new(server: &str, timeout_ms: u64, args: RunArgs) -> Result<Self> {
        validate_server_url(server)?;
        if args.poll_interval_ms == 0 {
            anyhow::bail!("--poll-interval-ms must be greater than zero");
        }
        if args.spectrum_width == 0 || args.spectrum_height == 0 {
            anyhow::bail!("spectrum canvas must have a non-zero size");
        }

        Ok(Self {
            server_url: server.to_string(),
            request_timeout: Duration::from_millis(timeout_ms.max(1)),
            transport: args.transport,
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            output_dir: args.output_dir,
            font: args.font,
            spectrum: args.spectrum || args.start_visualizer,
            start_visualizer: args.start_visualizer,
            spectrum_width: args.spectrum_width,
            spectrum_height: args.spectrum_height,
            meter_height: args.meter_height,
        })
    }

    /// Whether the Socket.IO channel is needed at all
    pub fn uses_push(&self) -> bool {
        self.transport == Transport::Push || self.spectrum
    }
}

pub fn validate_server_url(server: &str) -> Result<()> {
    if !(server.starts_with("http://") || server.starts_with("https://")) {
        anyhow::bail!("server URL must start with http:// or https://, got {:?}", server);
    }
    Ok(())
}
