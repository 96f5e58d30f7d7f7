mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dotenvy::dotenv;
use serde_json::Value;
use tracing::info;

use typed_llm::config::{AppConfig, CliOverrides};
use typed_llm::labels::Labels;
use typed_llm::logging::init_logging;
use typed_llm::{Engine, ModelParams};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tllm",
    version,
    about = "Typed generation from OpenAI-compatible models"
)]
struct Cli {
    /// OpenAI-compatible API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// API key (set via env OPENAI_API_KEY recommended)
    #[arg(long)]
    api_key: Option<String>,

    /// Log level (error,warn,info,debug,trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log every request and response payload (needs debug level)
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Maximum requests per generate call
    #[arg(long)]
    max_generate_attempts: Option<usize>,

    /// Sampling temperature override
    #[arg(long)]
    temperature: Option<f32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Convert data into the given shape
    Cast {
        /// Input text, or `-` for stdin
        data: String,
        /// Scalar keyword, JSON schema, or @file
        #[arg(long, default_value = "string")]
        schema: String,
        #[arg(long)]
        instructions: Option<String>,
    },
    /// Extract every entity of the given shape
    Extract {
        data: String,
        #[arg(long, default_value = "string")]
        schema: String,
        #[arg(long)]
        instructions: Option<String>,
    },
    /// Pick the best label for the data
    Classify {
        data: String,
        /// Candidate label, repeat for each
        #[arg(long = "label", required = true)]
        labels: Vec<String>,
        #[arg(long)]
        instructions: Option<String>,
    },
    /// Generate n values of the given shape
    Generate {
        #[arg(long, default_value = "string")]
        schema: String,
        #[arg(short, long, default_value_t = 1)]
        n: usize,
        #[arg(long)]
        instructions: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    let cfg = AppConfig::resolve(CliOverrides {
        api_key: cli.api_key.clone(),
        base_url: cli.base_url.clone(),
        model: cli.model.clone(),
        log_verbose: cli.verbose,
        max_generate_attempts: cli.max_generate_attempts,
    })?;
    info!(base_url = %cfg.base_url, model = %cfg.model, "app config");

    let engine = Engine::from_config(&cfg)?;
    let params = ModelParams {
        temperature: cli.temperature,
        ..Default::default()
    };

    let output = run(&engine, cli.command, &params).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("serialize output")?
    );
    Ok(())
}

async fn run(engine: &Engine, command: Command, params: &ModelParams) -> Result<Value> {
    let output = match command {
        Command::Cast {
            data,
            schema,
            instructions,
        } => {
            let spec = cli::parse_schema(&schema)?;
            let data = Value::String(cli::read_data(&data)?);
            engine
                .cast_value(&data, &spec, instructions.as_deref(), params)
                .await?
        }
        Command::Extract {
            data,
            schema,
            instructions,
        } => {
            let spec = cli::parse_schema(&schema)?;
            let data = Value::String(cli::read_data(&data)?);
            let items = engine
                .extract_value(&data, &spec, instructions.as_deref(), params)
                .await?;
            Value::Array(items)
        }
        Command::Classify {
            data,
            labels,
            instructions,
        } => {
            let labels = Labels::from_strings(labels)?;
            let data = Value::String(cli::read_data(&data)?);
            engine
                .classify_value(&data, labels, instructions.as_deref(), params)
                .await?
        }
        Command::Generate {
            schema,
            n,
            instructions,
        } => {
            let spec = cli::parse_schema(&schema)?;
            let items = engine
                .generate_value(&spec, n, instructions.as_deref(), params)
                .await?;
            Value::Array(items)
        }
    };
    Ok(output)
}
