use anyhow::{Context, Result};
use mitm_testbed::config::RelayConfig;
use mitm_testbed::events::TracingSink;
use mitm_testbed::servers::relay::RelayServer;
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
                println!("Usage: relay_server [--conf FILE]");
                println!("PROXY_* environment variables override the file.");
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
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    config
        .apply_env(std::env::vars())
        .context("Invalid PROXY_* environment")?;
    config.validate().context("Invalid relay configuration")?;

    let server = RelayServer::bind(config, TracingSink::shared()).await?;

    tokio::select! {
        result = server.serve_one() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[relay] [interrupted] Relay interrupted (Ctrl+C)");
        }
    }

    tracing::info!("[relay] [closed] Relay closed");
    Ok(())
}
