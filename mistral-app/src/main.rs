//! `mistral` command-line client.

mod commands;
mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::AppConfig;
use mistral_llm::MistralClient;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "mistral", version, about = "Mistral API command-line client")]
struct Cli {
    /// TOML config file (defaults to ./mistral.toml when present).
    #[arg(long, global = true, env = "MISTRAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Chat completion for a single user prompt.
    Chat {
        prompt: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        system: Option<String>,
        /// Print tokens as they arrive.
        #[arg(long)]
        stream: bool,
    },
    /// Fill-in-the-middle completion between a prompt and a suffix.
    Fim {
        prompt: String,
        #[arg(long, default_value = "")]
        suffix: String,
        #[arg(long)]
        model: Option<String>,
    },
    /// Embed one or more inputs.
    Embed {
        #[arg(required = true)]
        inputs: Vec<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// List available models.
    Models,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Chat { .. } => "chat",
            Command::Fim { .. } => "fim",
            Command::Embed { .. } => "embed",
            Command::Models => "models",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    init_tracing()?;

    let cli = Cli::parse();
    install_panic_hook(cli.command.name());
    let cfg = AppConfig::load(cli.config).await?;
    let client =
        MistralClient::with_config(cfg.client.clone()).context("build mistral client")?;

    match cli.command {
        Command::Chat {
            prompt,
            model,
            system,
            stream,
        } => {
            let model = model.unwrap_or_else(|| cfg.defaults.model.clone());
            commands::chat(&client, &cfg, &model, system.as_deref(), &prompt, stream).await
        }
        Command::Fim {
            prompt,
            suffix,
            model,
        } => {
            let model = model.unwrap_or_else(|| cfg.defaults.fim_model.clone());
            commands::fim(&client, &cfg, &model, &prompt, &suffix).await
        }
        Command::Embed { inputs, model } => {
            let model = model.unwrap_or_else(|| cfg.defaults.embed_model.clone());
            commands::embed(&client, &model, &inputs).await
        }
        Command::Models => commands::models(&client).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("warn,mistral=info,mistral_app=info,mistral_llm=info"),
    };
    let log_format = std::env::var("MISTRAL_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    // stdout carries command output; logs go to stderr.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported MISTRAL_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

/// Logs panics with the running subcommand before the default report.
fn install_panic_hook(command: &'static str) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let panic_message: &str = if let Some(msg) = payload.downcast_ref::<&str>() {
            msg
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg
        } else {
            "non-string panic payload"
        };
        tracing::error!(
            command,
            file = info.location().map(|l| l.file()),
            line = info.location().map(|l| l.line()),
            panic_message,
            "mistral panicked"
        );
        default_hook(info);
    }));
}
