//! Line-delimited JSON host for the scheduling agent.
//!
//! Each stdin line is one request object tagged by `action`; each response is
//! written as one stdout line in the same order. EOF or Ctrl-C shuts down.

use anyhow::{bail, Result};
use automeet_lib::commands::{Request, Response};
use automeet_lib::settings::{default_settings_path, load_or_create_settings};
use automeet_lib::start_agent;
use std::env;
use std::path::PathBuf;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

fn config_path() -> Result<PathBuf> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        None => default_settings_path(),
        Some("--config") => match args.next() {
            Some(path) => Ok(PathBuf::from(path)),
            None => bail!("--config needs a path"),
        },
        Some(other) => bail!("Unknown argument: {}", other),
    }
}

fn parse_line(line: &str) -> Result<Request, Response> {
    serde_json::from_str(line).map_err(|e| Response::error(format!("Invalid request: {}", e)))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let path = config_path()?;
    let settings = load_or_create_settings(&path);
    log::info!("Loaded settings from {}", path.display());
    let agent = start_agent(settings).await?;

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let response = match parse_line(&line) {
                    Ok(request) => agent.handle.request(request).await,
                    Err(response) => response,
                };
                let mut out = serde_json::to_string(&response)?;
                out.push('\n');
                stdout.write_all(out.as_bytes()).await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
    }

    agent.shutdown().await;
    Ok(())
}
