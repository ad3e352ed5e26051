//! Shadercast CLI: compile shader programs and export them to video.
//!
//! Usage:
//!   shadercast export <SHADER>    Render a shader program to a video file
//!   shadercast compile <SHADER>   Compile only and report diagnostics
//!   shadercast audio <WAV>        Inspect a track's loudness
//!   shadercast check              Check encoder and backend availability
//!   shadercast config [--init]    Show or write the configuration file

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shadercast_common::config::AppConfig;
use shadercast_export::BridgeKind;
use shadercast_render::RendererKind;

mod commands;

#[derive(Parser)]
#[command(
    name = "shadercast",
    about = "Offline shader-to-video exporter",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a shader program to a video file
    Export {
        /// Path to the shader program
        shader: PathBuf,

        /// Output file path (defaults to the shader path with .mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Duration in seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Output width
        #[arg(long)]
        width: Option<u32>,

        /// Output height
        #[arg(long)]
        height: Option<u32>,

        /// WAV file driving the audio level input
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Render backend: cpu|gpu
        #[arg(long, default_value = "cpu")]
        backend: RendererKind,

        /// Texture bridge: zero-copy|copy
        #[arg(long, default_value = "zero-copy")]
        bridge: BridgeKind,
    },

    /// Compile a shader program and report diagnostics
    Compile {
        /// Path to the shader program
        shader: PathBuf,

        /// Render backend: cpu|gpu
        #[arg(long, default_value = "cpu")]
        backend: RendererKind,
    },

    /// Print a track's loudness summary and levels
    Audio {
        /// Path to a WAV file
        wav: PathBuf,

        /// Report the level at these times (seconds)
        #[arg(long = "at")]
        at: Vec<f64>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check encoder and backend availability
    Check,

    /// Show the effective configuration, or write the defaults to disk
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    shadercast_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export {
            shader,
            output,
            duration,
            width,
            height,
            audio,
            backend,
            bridge,
        } => {
            commands::export::run(
                commands::export::ExportArgs {
                    shader,
                    output,
                    duration,
                    width,
                    height,
                    audio,
                    backend,
                    bridge,
                },
                &config.export,
            )
            .await
        }
        Commands::Compile { shader, backend } => commands::compile::run(shader, backend),
        Commands::Audio { wav, at, json } => commands::audio::run(wav, at, json),
        Commands::Check => commands::check::run(&config),
        Commands::Config { init, force } => commands::config::run(&config, init, force),
    }
}
