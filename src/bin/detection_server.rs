use anyhow::{Context, Result};
use mitm_testbed::config::DetectorConfig;
use mitm_testbed::events::TracingSink;
use mitm_testbed::servers::detector::DetectionServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut conf_file: Option<String> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: detection_server [--conf FILE]");
                println!("SERVER_* environment variables override the file.");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = Some(args[i].clone());
                } else {
                    return Err(anyhow::anyhow!("--conf requires a FILE argument"));
                }
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = match &conf_file {
        Some(path) => DetectorConfig::from_file(path)?,
        None => DetectorConfig::default(),
    };
    config
        .apply_env(std::env::vars())
        .context("Invalid SERVER_* environment")?;
    config.validate().context("Invalid detector configuration")?;

    let server = DetectionServer::bind(config, TracingSink::shared()).await?;

    tokio::select! {
        result = server.serve_one() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[detector] [interrupted] Detector interrupted (Ctrl+C)");
        }
    }

    tracing::info!("[detector] [closed] Detector closed");
    Ok(())
}
