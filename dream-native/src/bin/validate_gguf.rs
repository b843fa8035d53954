//! GGUF Model Format Validator
//!
//! Checks that a file is a GGUF model the Dream Assistant can load

use anyhow::Result;
use clap::Parser;
use common::MIN_MODEL_SIZE_MB;
use std::path::PathBuf;

use dream_native::util::gguf;

#[derive(Parser, Debug)]
#[command(name = "validate-gguf", version, about = "Validate GGUF model file format and integrity")]
struct Args {
    /// Path to the GGUF file to validate
    file: PathBuf,

    /// Smallest acceptable file size in MB
    #[arg(long, default_value_t = MIN_MODEL_SIZE_MB)]
    min_size_mb: u64,

    /// Expected SHA-256 of the file (hex)
    #[arg(long)]
    sha256: Option<String>,

    /// Print the header summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let summary = gguf::validate_model_file(
        &args.file,
        args.min_size_mb * 1024 * 1024,
        args.sha256.as_deref(),
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("🔍 GGUF Model Validator");
    println!("📁 File: {:?}", args.file);
    println!();

    println!(
        "📊 File size: {} bytes ({:.2} MB)",
        summary.file_size,
        summary.size_mb()
    );
    println!("✅ Valid GGUF magic number");
    println!("📋 GGUF version: {}", summary.version);
    println!("🧩 Tensor count: {}", summary.tensor_count);
    println!("🔑 KV count: {}", summary.kv_count);
    if let Some(arch) = &summary.architecture {
        println!("🏗️  Architecture: {}", arch);
    }
    if let Some(name) = &summary.name {
        println!("📄 Name: {}", name);
    }
    if args.sha256.is_some() {
        println!("🔒 SHA-256 matches");
    }

    println!();
    println!("📖 Metadata keys:");
    for key in &summary.keys {
        println!("  📝 {}", key);
    }
    let shown = summary.keys.len() as u64;
    if summary.kv_count > shown {
        println!("  ... and {} more key-value pairs", summary.kv_count - shown);
    }

    println!();
    println!("🎉 GGUF file validation completed successfully!");
    Ok(())
}
