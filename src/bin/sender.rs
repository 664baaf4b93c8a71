use anyhow::{Context, Result};
use mitm_testbed::config::SenderConfig;
use mitm_testbed::servers::sender;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut conf_file: Option<String> = None;
    let mut count: Option<u64> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: sender [--conf FILE] [--count N]");
                println!("CLIENT_* environment variables override the file.");
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
            "--count" => {
                if i + 1 < args.len() {
                    i += 1;
                    count = Some(args[i].parse().context("--count expects a number")?);
                } else {
                    return Err(anyhow::anyhow!("--count requires a number"));
                }
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = match &conf_file {
        Some(path) => SenderConfig::from_file(path)?,
        None => SenderConfig::default(),
    };
    config
        .apply_env(std::env::vars())
        .context("Invalid CLIENT_* environment")?;
    if count.is_some() {
        config.max_messages = count;
    }
    config.validate().context("Invalid sender configuration")?;

    tokio::select! {
        result = sender::run(&config) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[sender] [interrupted] Sender interrupted (Ctrl+C)");
        }
    }

    Ok(())
}
