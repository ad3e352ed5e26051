//! Show or initialize the configuration file.

use shadercast_common::config::{config_file_path, AppConfig};

pub fn run(config: &AppConfig, init: bool, force: bool) -> anyhow::Result<()> {
    let path = config_file_path();

    if init {
        if path.exists() && !force {
            return Err(anyhow::anyhow!(
                "{} already exists; pass --force to overwrite it",
                path.display()
            ));
        }
        let written = AppConfig::default().save()?;
        tracing::info!(path = %written.display(), "Wrote default configuration");
        println!("Wrote default configuration to {}", written.display());
        return Ok(());
    }

    let source = if path.exists() {
        path.display().to_string()
    } else {
        "defaults".to_string()
    };
    println!("# {source}");
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
