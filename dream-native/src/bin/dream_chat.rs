//! Talk to a Dream Assistant GGUF model from the terminal.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use common::config::AssistantConfig;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;

use dream_native::prompt::{self, PromptStyle};
use dream_native::DreamEngine;

#[derive(Parser, Debug, Clone)]
#[command(name = "dream-chat", author, version, about, long_about = None)]
struct Args {
    /// TOML config file (defaults to ~/.dream-assistant/config.toml if present)
    #[arg(short('f'), long)]
    config: Option<PathBuf>,

    /// GGUF model to load; overrides [model].path from the config
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Single prompt to answer; without it an interactive session starts
    #[arg(short, long)]
    prompt: Option<String>,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long, default_value = "plain", value_parser = parse_style, help = "prompt template (plain or gemma)")]
    style: PromptStyle,

    /// Print how the prompt tokenizes instead of generating
    #[arg(long)]
    tokens: bool,

    /// Print each reply as a JSON object
    #[arg(long)]
    json: bool,
}

fn parse_style(s: &str) -> Result<PromptStyle, String> {
    PromptStyle::parse(s).ok_or_else(|| format!("Invalid style '{}'. Must be 'plain' or 'gemma'", s))
}

impl Args {
    fn load_config(&self) -> Result<(AssistantConfig, PathBuf)> {
        let mut config = AssistantConfig::load_or_default(self.config.as_deref())
            .with_context(|| "Failed to load config")?;

        if let Some(max_tokens) = self.max_tokens {
            config.generation.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            config.generation.temperature = temperature;
        }
        config
            .generation
            .validate()
            .with_context(|| "Invalid generation flags")?;

        let model_path = self
            .model
            .clone()
            .or_else(|| config.model.path.as_ref().map(PathBuf::from))
            .ok_or_else(|| anyhow!("Either --model or [model].path in the config must be provided"))?;

        Ok((config, model_path))
    }
}

fn answer(engine: &mut DreamEngine, args: &Args, input: &str) -> Result<()> {
    if args.tokens {
        println!("{}", engine.describe_tokens(&args.style.format(input))?);
        return Ok(());
    }

    let mut reply = engine.generate(input, args.style)?;
    if args.style == PromptStyle::Gemma {
        reply.text = prompt::post_process(&reply.text, args.style, common::MAX_RESPONSE_LENGTH);
    }
    if args.json {
        println!("{}", serde_json::to_string(&reply)?);
        return Ok(());
    }
    println!("🤖 {}", reply.text);
    info!(
        "{} prompt tokens, {} generated, {:?}, {:.2}s",
        reply.prompt_tokens,
        reply.generated_tokens,
        reply.stop_reason,
        reply.elapsed.as_secs_f32()
    );
    Ok(())
}

fn main() -> Result<()> {
    dream_native::init();
    let args = Args::parse();
    let (config, model_path) = args.load_config()?;

    let mut engine = DreamEngine::load(&model_path, &config)?;
    println!("{}", engine.model_info());
    println!();

    if let Some(input) = &args.prompt {
        return answer(&mut engine, &args, input);
    }

    let stdin = io::stdin();
    loop {
        print!("👤 ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/quit" || input == "/exit" {
            break;
        }
        if let Err(e) = answer(&mut engine, &args, input) {
            eprintln!("❌ {:#}", e);
        }
    }

    println!("{}", engine.stats().to_json());
    Ok(())
}
