//! cuuri: command-line front end for the chat backend.
//! Reads config, connects to the backend bridge, and runs one command: start a
//! session, ask a question (streamed to stdout), list models, sessions, or
//! history, or manage the stored API key.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use cuuri_client::config::{self, Config};
use cuuri_client::{
    group_by_session, ApiKey, ChatClient, EncodedImage, ModelName, SessionId, UserInput, WsBridge,
};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cuuri", version, about = "Chat with the cuuri backend from a terminal")]
struct Cli {
    /// Config file (default: $CUURI_CONFIG or ~/.cuuri/client.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend bridge URL, overriding the config
    #[arg(long, global = true)]
    bridge: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new conversation and print its id
    Session,
    /// List conversations that have history
    Sessions,
    /// List models offered for the stored API key
    Models,
    /// Print the backend's default model
    DefaultModel,
    /// Manage the stored API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Show rendered chat history
    History {
        /// Only this conversation
        #[arg(long)]
        session: Option<String>,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send a message and print the answer
    Ask(AskArgs),
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Store a new API key in the backend config
    Set { key: String },
    /// Report whether an API key is stored
    Status,
}

#[derive(clap::Args, Debug)]
struct AskArgs {
    /// Continue this conversation instead of starting a new one
    #[arg(long)]
    session: Option<String>,
    /// Model to use (default: chat.model from config, then the backend default)
    #[arg(long)]
    model: Option<String>,
    /// Attach an image; repeatable
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    /// Wait for the full answer instead of streaming tokens
    #[arg(long)]
    no_stream: bool,
    /// Message text; read from stdin when omitted
    message: Option<String>,
}

/// The WebSocket crates log whole frames at debug and trace, API keys
/// included. They stay at warn whatever the requested level.
const WIRE_TARGETS: [&str; 2] = ["tungstenite", "tokio_tungstenite"];

/// `RUST_LOG`, then `-v`, then the config default, minus any directive aimed
/// at the wire crates.
fn filter_directives(rust_log: Option<&str>, verbose: u8, config_filter: &str) -> String {
    let base = match (rust_log, verbose) {
        (Some(env), _) => env,
        (None, 0) => config_filter,
        (None, 1) => "info",
        (None, 2) => "debug",
        (None, _) => "trace",
    };
    let mut directives: Vec<String> = base
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty() && !targets_wire(d))
        .map(str::to_string)
        .collect();
    directives.extend(WIRE_TARGETS.iter().map(|t| format!("{}=warn", t)));
    directives.join(",")
}

fn targets_wire(directive: &str) -> bool {
    let target = directive
        .split(|c: char| c == '=' || c == '[')
        .next()
        .unwrap_or(directive);
    WIRE_TARGETS
        .iter()
        .any(|t| target == *t || target.starts_with(&format!("{}::", t)))
}

fn init_logging(verbose: u8, config_filter: &str) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::new(filter_directives(rust_log.as_deref(), verbose, config_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn load_config(override_path: Option<&Path>) -> Result<Config> {
    match config::resolve_config_path(override_path) {
        Some(path) => config::load_or_default(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, cfg.log_filter());

    let url = cli
        .bridge
        .clone()
        .unwrap_or_else(|| cfg.bridge_url().to_string());
    let bridge = cuuri_client::connect(&url)
        .await
        .with_context(|| format!("cannot reach the backend at {}", url))?;
    info!(url = %url, "connected");
    let client = ChatClient::new(bridge);

    match cli.command {
        Command::Session => {
            let id = client
                .generate_session_id()
                .await
                .context("failed to generate a session id")?;
            println!("{}", id);
        }
        Command::Sessions => {
            let ids = client
                .get_session_id_list()
                .await
                .context("failed to list sessions")?;
            for id in ids {
                println!("{}", id);
            }
        }
        Command::Models => {
            let api_key = require_api_key(&client).await?;
            let models = client
                .get_available_models(&api_key)
                .await
                .context("failed to list available models")?;
            for model in models {
                println!("{}", model);
            }
        }
        Command::DefaultModel => {
            let model = client
                .get_default_model()
                .await
                .context("no default model configured")?;
            println!("{}", model);
        }
        Command::Key { action } => match action {
            KeyAction::Set { key } => {
                let key = ApiKey::new(key.trim());
                if key.is_empty() {
                    bail!("API key cannot be empty");
                }
                client
                    .set_api_key(&key)
                    .await
                    .context("failed to store the API key")?;
                eprintln!("API key saved");
            }
            KeyAction::Status => match client.get_api_key().await {
                Some(key) if !key.is_empty() => println!("API key: configured"),
                _ => println!("API key: not configured"),
            },
        },
        Command::History { session, json } => {
            let entries = match session {
                Some(id) => {
                    client
                        .get_database_chat_entry_by_session(&SessionId::new(id))
                        .await
                }
                None => client.get_database_chat_entry_list().await,
            }
            .context("failed to load chat history")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for chats in group_by_session(&entries) {
                    println!("== {}", chats.session_id);
                    for entry in chats.entries {
                        println!("> {}", entry.question);
                        println!("{}", entry.answer);
                    }
                }
            }
        }
        Command::Ask(args) => ask(&client, &cfg, args).await?,
    }
    Ok(())
}

async fn require_api_key(client: &ChatClient<WsBridge>) -> Result<ApiKey> {
    client
        .get_api_key()
        .await
        .filter(|key| !key.is_empty())
        .context("no API key configured; run `cuuri key set <KEY>`")
}

/// `--model`, then `chat.model`, then the backend default. The choice must be
/// one of the models the backend reports for this key.
async fn resolve_model(
    client: &ChatClient<WsBridge>,
    cfg: &Config,
    flag: Option<String>,
    api_key: &ApiKey,
) -> Result<ModelName> {
    let preferred = flag.or_else(|| cfg.chat.model.clone()).map(ModelName::new);
    let model = match preferred {
        Some(model) => model,
        None => client.get_default_model().await.context(
            "no model selected; pass --model, set chat.model, or configure a backend default",
        )?,
    };
    let available = client
        .get_available_models(api_key)
        .await
        .context("failed to list available models")?;
    if !model.is_listed_in(&available) {
        bail!("model `{}` is not offered by the backend", model);
    }
    Ok(model)
}

async fn load_images(paths: &[PathBuf]) -> Result<Vec<EncodedImage>> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read image {}", path.display()))?;
        images.push(EncodedImage::from_bytes(&bytes));
    }
    Ok(images)
}

fn read_message(arg: Option<String>) -> Result<UserInput> {
    let text = match arg {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read message from stdin")?;
            buf
        }
    };
    let text = text.trim();
    if text.is_empty() {
        bail!("no message provided (pass it as an argument or on stdin)");
    }
    Ok(UserInput::new(text))
}

async fn ask(client: &ChatClient<WsBridge>, cfg: &Config, args: AskArgs) -> Result<()> {
    let input = read_message(args.message)?;
    let api_key = require_api_key(client).await?;
    let model = resolve_model(client, cfg, args.model, &api_key).await?;
    let session_id = match args.session {
        Some(id) => SessionId::new(id),
        None => {
            let id = client
                .generate_session_id()
                .await
                .context("failed to start a new session")?;
            eprintln!("session: {}", id);
            id
        }
    };
    let images = load_images(&args.images).await?;

    if args.no_stream {
        let response = client
            .get_chat_gpt_response(&session_id, &input, &model, &api_key, &images)
            .await
            .context("chat request failed")?;
        println!("{}", response.response);
        return Ok(());
    }

    let response = client
        .stream_chat_gpt_response(
            &session_id,
            &input,
            &model,
            &api_key,
            |chunk: &str| -> io::Result<()> {
                let mut out = io::stdout().lock();
                out.write_all(chunk.as_bytes())?;
                out.flush()
            },
            &images,
        )
        .await;
    println!();
    response.context("streaming chat request failed")?;
    Ok(())
}
