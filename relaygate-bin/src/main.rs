mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use relaygate_core::{
    config::Config,
    gateway::Gateway,
    model::{Message, MessageContent, MessagesRequest, Role},
    services::Services,
    stream::{ClientEvent, encode_sse},
    upstream::ReplaySource,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Anthropic Messages gateway for text-delta upstreams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        #[arg(long, help = "Config file (JSON or TOML)")]
        config: Option<PathBuf>,
        #[arg(long, help = "Override the bind address from config")]
        bind: Option<String>,
    },
    /// Translate a captured upstream body and print the client event stream
    Replay {
        #[arg(long, help = "File holding raw upstream `data:` lines")]
        file: PathBuf,
        #[arg(long, default_value = "claude-sonnet-4-5")]
        model: String,
        #[arg(long, help = "Config file (JSON or TOML)")]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 64, help = "Bytes per simulated network chunk")]
        chunk_size: usize,
        #[arg(long, help = "Actually run recovered commands")]
        execute: bool,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Ok(match path {
        Some(p) => Config::from_path(&p)?,
        None => Config::default(),
    })
}

/// Split `text` into pieces of at most `size` bytes without cutting a char.
fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if !current.is_empty() && current.len() + ch.len_utf8() > size {
            out.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => {
            let mut cfg = load_config(config)?;
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            let gateway = Arc::new(Gateway::new(Services::from_config(&cfg)?));
            let app = server::router(gateway);

            let listener = tokio::net::TcpListener::bind(&cfg.server.bind).await?;
            tracing::info!(addr = %cfg.server.bind, "relaygate listening");
            axum::serve(listener, app).await?;
        }
        Commands::Replay {
            file,
            model,
            config,
            chunk_size,
            execute,
        } => {
            let mut cfg = load_config(config)?;
            cfg.executor.enabled = execute;
            let body = std::fs::read_to_string(&file)?;
            let source = ReplaySource::new(split_chunks(&body, chunk_size));
            let gateway = Gateway::new(Services::with_source(Arc::new(source), &cfg)?);

            let req = MessagesRequest {
                model,
                messages: vec![Message {
                    role: Role::User,
                    content: MessageContent::Text(format!("replay of {}", file.display())),
                }],
                max_tokens: None,
                stream: true,
                system: None,
                tools: vec![],
            };
            let mut events: Vec<ClientEvent> = Vec::new();
            let summary = gateway.stream_messages(&req, &mut events).await?;
            for event in &events {
                print!("{}", encode_sse(event)?);
            }
            eprintln!(
                "[stop: {} blocks={} tool_calls={} recovered={}]",
                summary.stop_reason.as_str(),
                summary.blocks,
                summary.tool_calls,
                summary.recovered
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_char_boundaries() {
        let chunks = split_chunks("aé✅b", 2);
        assert_eq!(chunks.concat(), "aé✅b");
        assert!(chunks.iter().all(|c| c.len() <= 3));
        assert_eq!(chunks[0], "a");
    }

    #[test]
    fn zero_chunk_size_still_makes_progress() {
        assert_eq!(split_chunks("abc", 0), vec!["a", "b", "c"]);
    }
}
