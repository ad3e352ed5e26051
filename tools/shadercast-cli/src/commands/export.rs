//! Export a shader program to video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use shadercast_audio::{AudioSnapshot, RmsLevelProvider};
use shadercast_common::config::ExportDefaults;
use shadercast_common::ShadercastError;
use shadercast_export::{
    is_ffmpeg_available, BridgeKind, ExportCallbacks, ExportError, ExportProgress, ExportRequest,
    Exporter, ExporterSettings,
};
use shadercast_render::{create_renderer, RendererKind};

use super::read_program;

pub struct ExportArgs {
    pub shader: PathBuf,
    pub output: Option<PathBuf>,
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub audio: Option<PathBuf>,
    pub backend: RendererKind,
    pub bridge: BridgeKind,
}

pub async fn run(args: ExportArgs, defaults: &ExportDefaults) -> anyhow::Result<()> {
    println!("Exporting shader: {}", args.shader.display());

    let source = read_program(&args.shader)?;

    if !is_ffmpeg_available(&defaults.ffmpeg_binary) {
        return Err(anyhow::anyhow!(
            "'{}' is not available; install ffmpeg or set export.ffmpeg_binary",
            defaults.ffmpeg_binary
        ));
    }

    let renderer = create_renderer(args.backend).map_err(ShadercastError::from)?;

    let mut settings = ExporterSettings::from_defaults(defaults);
    settings.bridge = args.bridge;
    let exporter = Exporter::new(renderer, settings);
    exporter
        .compile(&source)
        .map_err(|e| anyhow::anyhow!("{}:{e}", args.shader.display()))?;

    let output_path = args
        .output
        .unwrap_or_else(|| args.shader.with_extension("mp4"));
    let width = args.width.unwrap_or(defaults.width);
    let height = args.height.unwrap_or(defaults.height);
    let duration = args.duration.unwrap_or(defaults.duration_secs);

    let mut request = ExportRequest::new(&output_path, duration, width, height);
    if let Some(wav) = &args.audio {
        let snapshot = AudioSnapshot::from_wav(wav).map_err(ShadercastError::from)?;
        println!(
            "  Audio: {} ({:.1}s)",
            wav.display(),
            snapshot.duration_secs()
        );
        request = request.with_audio(Arc::new(RmsLevelProvider::new(snapshot)));
    }

    println!("  Output: {}", output_path.display());
    println!("  Resolution: {width}x{height} @ {}", request.frame_rate);
    println!(
        "  Duration: {duration}s ({} frames)",
        request.total_frames()
    );
    println!("  Renderer: {}", exporter.renderer_name());

    let callbacks = ExportCallbacks::new().on_progress(|p: ExportProgress| {
        print!(
            "\r  Progress: {:.1}% ({}/{} frames, ETA: {:.0}s)  ",
            p.progress * 100.0,
            p.frames_rendered,
            p.total_frames,
            p.eta_secs,
        );
        let _ = std::io::stdout().flush();
    });

    let handle = exporter.export_to_file(request, callbacks);

    let cancel = handle.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling export...");
            cancel.cancel();
        }
    });

    let result = handle.join().await;
    interrupt.abort();

    match result {
        Ok(summary) => {
            println!(
                "\nExport complete: {} ({} frames in {:.1}s)",
                summary.destination.display(),
                summary.frames_written,
                summary.elapsed_secs
            );
            tracing::debug!(
                pool = ?summary.pool,
                textures = ?summary.textures,
                "Export resource usage"
            );
            Ok(())
        }
        Err(ExportError::Cancelled) => {
            println!("\nExport cancelled.");
            Ok(())
        }
        Err(e) => Err(ShadercastError::from(e).into()),
    }
}
