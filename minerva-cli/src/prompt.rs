use anyhow::Context;
use futures::StreamExt;
use minerva::schema::{coerce_parameter, default_parameters};
use minerva::{
    CancellationToken, ConnectionConfig, GenerationOptions, GenerationParameter, Message,
    create_adapter,
};
use serde_json::{Map, Value};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub struct PromptRequest {
    pub message: Option<String>,
    pub system: Option<String>,
    pub stream: bool,
    pub params: Vec<String>,
    pub defaults: bool,
    pub history: Option<PathBuf>,
}

pub async fn run_prompt(config: ConnectionConfig, request: PromptRequest) -> anyhow::Result<()> {
    let adapter = create_adapter(config)?;
    let schema = adapter.kind().generation_parameters_schema();
    let parameters = parse_params(&schema, &request.params, request.defaults)?;

    let mut messages = match &request.history {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };
    let text = match request.message {
        Some(m) => m,
        None if messages.is_empty() => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
        None => String::new(),
    };
    if !text.trim().is_empty() {
        messages.push(Message::user(text.trim_end()));
    }

    let signal = CancellationToken::new();
    let on_interrupt = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut options = GenerationOptions::new()
        .with_signal(signal)
        .with_stream(request.stream)
        .with_parameters(parameters);
    if let Some(system) = request.system {
        options = options.with_system_instruction(system);
    }

    let mut tokens = adapter.prompt(&messages, &options);
    let mut stdout = std::io::stdout();
    while let Some(token) = tokens.next().await {
        match token {
            Ok(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            Err(e) if e.is_abort() => {
                eprintln!("\n[stopped by user]");
                return Ok(());
            }
            Err(e) => {
                println!();
                return Err(e.into());
            }
        }
    }
    println!();
    Ok(())
}

/// `KEY=VALUE` pairs typed through the provider's parameter schema.
fn parse_params(
    schema: &[GenerationParameter],
    raw: &[String],
    with_defaults: bool,
) -> anyhow::Result<Map<String, Value>> {
    let mut params = if with_defaults {
        default_parameters(schema)
    } else {
        Map::new()
    };
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Expected KEY=VALUE, got {:?}", pair))?;
        let key = key.trim();
        params.insert(key.to_string(), coerce_parameter(schema, key, value.trim()));
    }
    Ok(params)
}

fn load_history(path: &Path) -> anyhow::Result<Vec<Message>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid message history {}", path.display()))
}
