//! Check encoder and backend availability.

use shadercast_common::config::{config_file_path, AppConfig};
use shadercast_export::is_ffmpeg_available;
use shadercast_render::{create_renderer, RendererKind};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Shadercast System Check");
    println!("{}", "=".repeat(50));

    let path = config_file_path();
    if path.exists() {
        println!("[OK] Config: {}", path.display());
    } else {
        println!("[--] Config: {} (using defaults)", path.display());
    }

    let ffmpeg = &config.export.ffmpeg_binary;
    let ffmpeg_ok = is_ffmpeg_available(ffmpeg);
    if ffmpeg_ok {
        println!("[OK] Encoder: {ffmpeg} ({})", config.export.video_codec);
    } else {
        println!("[FAIL] Encoder: '{ffmpeg}' not found or not runnable");
    }

    for kind in [RendererKind::Cpu, RendererKind::Gpu] {
        match create_renderer(kind) {
            Ok(renderer) => println!("[OK] Backend {kind:?}: {}", renderer.name()),
            Err(e) => println!("[WARN] Backend {kind:?}: {e}"),
        }
    }

    println!();
    if ffmpeg_ok {
        println!("Shadercast is ready to export.");
    } else {
        println!("Install ffmpeg or set export.ffmpeg_binary in the config file.");
    }

    Ok(())
}
