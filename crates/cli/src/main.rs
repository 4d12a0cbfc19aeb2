//! CLI tool for serializing chat exports into fine-tuning conversations.
//!
//! This tool reads Telegram-style JSON exports, builds one conversation per
//! personal chat, optionally splits them into overlapping windows and writes
//! JSONL training/validation files.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use chat_export_serializer_core::{
    pipeline::{PipelineConfig, PipelineResult},
    process_all_exports, write_jsonl_output, BuilderConfig, MiniJinjaRenderer, OutputFormat,
    ReplaceRule,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// `{"system", "conversations": [{"from", "value"}]}`
    Sharegpt,
    /// `{"messages": [{"role", "content"}]}`
    Messages,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Sharegpt => OutputFormat::ShareGpt,
            Format::Messages => OutputFormat::Messages,
        }
    }
}

/// Serialize chat exports to JSONL conversations.
#[derive(Parser, Debug)]
#[command(name = "chat-export-serialize")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Export file, or directory searched recursively for *.json exports
    #[arg(long)]
    export_root: PathBuf,

    /// Output directory for JSONL files
    #[arg(long)]
    output_dir: PathBuf,

    /// Sender id (`from_id`) whose messages become assistant turns
    #[arg(long)]
    assistant_id: String,

    /// File holding a Jinja template for the system message (variables: chat, message)
    #[arg(long)]
    system_template: Option<PathBuf>,

    /// JSON file with an array of [pattern, replacement] rewrite rules, applied in order
    #[arg(long)]
    replace_rules: Option<PathBuf>,

    /// Characters kept beyond the threshold in a limited run (0 disables)
    #[arg(long, default_value = "0")]
    max_repeats: usize,

    /// Run length at which repeated characters start being limited (0 disables)
    #[arg(long, default_value = "0")]
    min_run_before_limiting: usize,

    /// Maximum messages per conversation window
    #[arg(long)]
    max_messages_per_window: Option<usize>,

    /// Messages repeated between consecutive windows
    #[arg(long, default_value = "0")]
    overlap: usize,

    /// Minimum messages required to keep a conversation window
    #[arg(long, default_value = "2")]
    min_conversation_messages: usize,

    /// Keep chats that have no valid messages
    #[arg(long)]
    keep_empty_chats: bool,

    /// Fraction of exports for validation (0.0-1.0)
    #[arg(long, default_value = "0.1")]
    val_ratio: f64,

    /// Output record format
    #[arg(long, value_enum, default_value = "sharegpt")]
    format: Format,
}

fn load_replace_rules(path: &Path) -> Result<Vec<ReplaceRule>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let pairs: Vec<(String, String)> = serde_json::from_str(&text)?;
    Ok(ReplaceRule::from_pairs(pairs)?)
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();

    let system_message_template = match &args.system_template {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };
    let replace_rules = match &args.replace_rules {
        Some(path) => load_replace_rules(path)?,
        None => Vec::new(),
    };
    tracing::debug!(rules = replace_rules.len(), "loaded replace rules");

    let config = PipelineConfig {
        builder: BuilderConfig {
            assistant_sender_id: args.assistant_id.clone(),
            system_message_template,
            replace_rules,
            max_repeats: args.max_repeats,
            min_run_before_limiting: args.min_run_before_limiting,
        },
        max_messages_per_window: args.max_messages_per_window,
        overlap: args.overlap,
        min_conversation_messages: args.min_conversation_messages,
        skip_empty_chats: !args.keep_empty_chats,
        val_ratio: args.val_ratio,
        output_format: args.format.into(),
    };

    println!("Processing exports from {:?}...", args.export_root);
    let renderer = MiniJinjaRenderer::new();
    let export_results = process_all_exports(&args.export_root, &renderer, &config)?;
    println!("Processed {} exports", export_results.len());

    println!("Writing output to {:?}...", args.output_dir);
    let result: PipelineResult = write_jsonl_output(
        export_results,
        &args.output_dir,
        config.val_ratio,
        config.output_format,
    )?;

    let metadata_path = args.output_dir.join("metadata.json");
    let metadata = serde_json::json!({
        "config": {
            "export_root": args.export_root.to_string_lossy(),
            "output_dir": args.output_dir.to_string_lossy(),
            "assistant_id": args.assistant_id,
            "system_template": args.system_template.as_ref().map(|p| p.to_string_lossy()),
            "replace_rules": args.replace_rules.as_ref().map(|p| p.to_string_lossy()),
            "max_repeats": args.max_repeats,
            "min_run_before_limiting": args.min_run_before_limiting,
            "max_messages_per_window": args.max_messages_per_window,
            "overlap": args.overlap,
            "min_conversation_messages": args.min_conversation_messages,
            "keep_empty_chats": args.keep_empty_chats,
            "val_ratio": args.val_ratio,
            "format": config.output_format,
        },
        "counts": {
            "total_exports": result.total_exports,
            "total_conversations": result.total_conversations,
            "train_conversations": result.train_conversations,
            "val_conversations": result.val_conversations,
        },
        "stats": {
            "total_messages": result.total_messages,
            "avg_messages_per_conversation": if result.total_conversations > 0 {
                result.total_messages as f64 / result.total_conversations as f64
            } else {
                0.0
            },
        },
        "files": {
            "train_path": args.output_dir.join("training.jsonl").to_string_lossy(),
            "val_path": args.output_dir.join("validation.jsonl").to_string_lossy(),
        },
    });
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

    println!("\n[summary]");
    println!("  Total exports processed: {}", result.total_exports);
    println!("  Train conversations: {}", result.train_conversations);
    println!("  Val conversations: {}", result.val_conversations);
    println!("  Total messages: {}", result.total_messages);
    println!("  Output: {:?}/{{training,validation}}.jsonl", args.output_dir);
    println!("  Metadata: {:?}", metadata_path);

    Ok(())
}
