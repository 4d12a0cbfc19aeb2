//! Pipeline for processing chat export files into windowed conversations.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::builder::{BuilderConfig, ConversationBuilder};
use crate::conversation::{Conversation, Message, ShareGptMessage};
use crate::error::{Error, Result};
use crate::export::{parse_export, RawChatRecord};
use crate::TemplateRenderer;

/// Record layout of the JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `{"system": ..., "conversations": [{"from", "value"}]}`
    #[default]
    ShareGpt,
    /// `{"messages": [{"role", "content"}]}`, system message first when set.
    Messages,
}

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub builder: BuilderConfig,
    /// Window size; `None` keeps every conversation whole.
    pub max_messages_per_window: Option<usize>,
    /// Messages repeated between consecutive windows.
    pub overlap: usize,
    /// Windows with fewer messages are dropped.
    pub min_conversation_messages: usize,
    /// Skip chats that have no valid messages before building.
    pub skip_empty_chats: bool,
    pub val_ratio: f64,
    pub output_format: OutputFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            builder: BuilderConfig::default(),
            max_messages_per_window: None,
            overlap: 0,
            min_conversation_messages: 2,
            skip_empty_chats: true,
            val_ratio: 0.1,
            output_format: OutputFormat::default(),
        }
    }
}

impl PipelineConfig {
    /// Check the windowing settings before any export is read.
    pub fn validate(&self) -> Result<()> {
        match self.max_messages_per_window {
            None if self.overlap > 0 => Err(Error::InvalidArgument(
                "overlap requires max_messages_per_window".to_string(),
            )),
            Some(0) => Err(Error::InvalidArgument(
                "max_messages_per_window must be positive".to_string(),
            )),
            Some(max) if self.overlap >= max => Err(Error::InvalidArgument(format!(
                "overlap ({}) must be smaller than max_messages_per_window ({})",
                self.overlap, max
            ))),
            _ => Ok(()),
        }
    }
}

/// Result of processing a single export file.
#[derive(Debug)]
pub struct ExportResult {
    pub conversations: Vec<Conversation>,
    pub source_path: String,
}

/// Result of writing all exports.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub total_exports: usize,
    pub total_conversations: usize,
    pub train_conversations: usize,
    pub val_conversations: usize,
    pub total_messages: usize,
}

#[derive(Debug, Serialize)]
struct ShareGptRecord<'a> {
    system: &'a str,
    conversations: Vec<ShareGptMessage>,
}

#[derive(Debug, Serialize)]
struct MessagesRecord {
    messages: Vec<Message>,
}

/// Discover export files: `root` itself when it is a file, else every `*.json` below it.
pub fn discover_export_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}

/// Read and parse one export file.
pub fn load_export(path: &Path) -> Result<Vec<RawChatRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let value: serde_json::Value = serde_json::from_reader(reader)?;
    parse_export(&value)
}

/// Split conversations into windows and drop windows below the minimum size.
pub fn window_conversations(
    conversations: Vec<Conversation>,
    config: &PipelineConfig,
) -> Result<Vec<Conversation>> {
    config.validate()?;

    let mut windows = Vec::new();
    for conversation in conversations {
        let split = match config.max_messages_per_window {
            Some(max) if config.overlap > 0 => {
                conversation.split_with_overlap(max, config.overlap)?
            }
            Some(max) => conversation.split(max)?,
            None => vec![conversation],
        };
        windows.extend(
            split
                .into_iter()
                .filter(|w| w.len() >= config.min_conversation_messages),
        );
    }
    Ok(windows)
}

/// Process a single export file into windowed conversations.
///
/// Chats whose system message fails to render are logged and skipped.
pub fn process_export<R>(
    path: &Path,
    renderer: &R,
    config: &PipelineConfig,
) -> Result<Vec<Conversation>>
where
    R: TemplateRenderer + Sync,
{
    let mut chats = load_export(path)?;
    if config.skip_empty_chats {
        chats.retain(|chat| !chat.messages.is_empty());
    }
    let total_chats = chats.len();

    let builder = ConversationBuilder::new(renderer, config.builder.clone());
    let conversations: Vec<Conversation> = chats
        .into_par_iter()
        .filter_map(|chat| {
            let chat_id = chat.id;
            match builder.build(chat) {
                Ok(conversation) => Some(conversation),
                Err(e) => {
                    warn!(chat_id, error = %e, "skipping chat");
                    None
                }
            }
        })
        .collect();

    let built = conversations.len();
    let windows = window_conversations(conversations, config)?;

    info!(
        path = %path.display(),
        chats = total_chats,
        conversations = built,
        windows = windows.len(),
        "processed export"
    );

    Ok(windows)
}

/// Process every export under `export_root` in parallel.
///
/// Invalid windowing settings fail before any export is read. An export that
/// fails to load is logged and left out; the others still run.
pub fn process_all_exports<R>(
    export_root: &Path,
    renderer: &R,
    config: &PipelineConfig,
) -> Result<Vec<ExportResult>>
where
    R: TemplateRenderer + Sync,
{
    config.validate()?;
    let export_files = discover_export_files(export_root);

    if export_files.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "no export files found under {}",
            export_root.display()
        )));
    }

    let total_files = export_files.len();
    let processed_count = AtomicUsize::new(0);
    let error_count = AtomicUsize::new(0);

    let results: Vec<ExportResult> = export_files
        .into_par_iter()
        .filter_map(|path| {
            let result = process_export(&path, renderer, config);
            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;

            match result {
                Ok(conversations) => {
                    if count % 100 == 0 || count == total_files {
                        info!("processed {}/{} exports", count, total_files);
                    }
                    Some(ExportResult {
                        conversations,
                        source_path: path.to_string_lossy().to_string(),
                    })
                }
                Err(e) => {
                    error_count.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %path.display(), error = %e, "failed to process export");
                    None
                }
            }
        })
        .collect();

    let errors = error_count.load(Ordering::Relaxed);
    if errors > 0 {
        warn!("{} exports failed to process", errors);
    }

    Ok(results)
}

/// Write conversations to JSONL files (training and validation).
///
/// The split is by export file, so windows of one export never straddle both sets.
pub fn write_jsonl_output(
    export_results: Vec<ExportResult>,
    output_dir: &Path,
    val_ratio: f64,
    format: OutputFormat,
) -> Result<PipelineResult> {
    std::fs::create_dir_all(output_dir)?;

    // Simple deterministic shuffle based on index
    let mut exports: Vec<_> = export_results.into_iter().enumerate().collect();
    exports.sort_by(|(i, a), (j, b)| {
        let hash_a = i.wrapping_mul(2654435761) % 1000;
        let hash_b = j.wrapping_mul(2654435761) % 1000;
        hash_a.cmp(&hash_b).then_with(|| a.source_path.cmp(&b.source_path))
    });

    let total_exports = exports.len();
    let val_count = (total_exports as f64 * val_ratio).round() as usize;
    let train_count = total_exports - val_count.min(total_exports);

    let mut train_file = BufWriter::new(File::create(output_dir.join("training.jsonl"))?);
    let mut val_file = BufWriter::new(File::create(output_dir.join("validation.jsonl"))?);

    let mut train_conversations = 0;
    let mut val_conversations = 0;
    let mut total_messages = 0;

    for (idx, (_, export)) in exports.into_iter().enumerate() {
        let is_validation = idx >= train_count;

        for conversation in &export.conversations {
            let json_line = match format {
                OutputFormat::ShareGpt => serde_json::to_string(&ShareGptRecord {
                    system: &conversation.system_message,
                    conversations: conversation.to_sharegpt(),
                })?,
                OutputFormat::Messages => serde_json::to_string(&MessagesRecord {
                    messages: conversation.to_chat_messages(),
                })?,
            };

            if is_validation {
                writeln!(val_file, "{}", json_line)?;
                val_conversations += 1;
            } else {
                writeln!(train_file, "{}", json_line)?;
                train_conversations += 1;
            }

            total_messages += conversation.len();
        }
    }

    train_file.flush()?;
    val_file.flush()?;

    Ok(PipelineResult {
        total_exports,
        total_conversations: train_conversations + val_conversations,
        train_conversations,
        val_conversations,
        total_messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MiniJinjaRenderer;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    const ME: &str = "user100";

    fn message(id: i64, from_id: &str, text: &str) -> Value {
        let from = if from_id == ME { "Me" } else { "Friend" };
        json!({
            "id": id,
            "type": "message",
            "date_unixtime": "1704103200",
            "from": from,
            "from_id": from_id,
            "text": text,
            "text_entities": [{"type": "plain", "text": text}]
        })
    }

    fn write_export(path: &Path, turns: usize) {
        let messages: Vec<Value> = (0..turns)
            .map(|i| {
                let from = if i % 2 == 0 { "user1" } else { ME };
                message(i as i64, from, &format!("turn {}", i))
            })
            .collect();
        let export = json!({
            "chats": {
                "list": [
                    {"type": "personal_chat", "id": 1, "name": "Friend", "messages": messages},
                    {"type": "personal_chat", "id": 2, "name": "Silent", "messages": []}
                ]
            }
        });
        std::fs::write(path, serde_json::to_string(&export).unwrap()).unwrap();
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            builder: BuilderConfig {
                assistant_sender_id: ME.to_string(),
                system_message_template: Some("Chat with {{ chat.name }}".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_discover_export_files() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("nested")).unwrap();
        std::fs::write(temp.path().join("b.json"), "{}").unwrap();
        std::fs::write(temp.path().join("nested/a.json"), "{}").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "").unwrap();

        let files = discover_export_files(temp.path());
        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|w| w[0] <= w[1]));

        let single = temp.path().join("b.json");
        assert_eq!(discover_export_files(&single), vec![single]);
    }

    #[test]
    fn test_process_export_windows() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("result.json");
        write_export(&path, 10);

        let conversations = process_export(&path, &MiniJinjaRenderer::new(), &config()).unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].system_message, "Chat with Friend");
        assert_eq!(conversations[0].len(), 10);

        let windowed = PipelineConfig {
            max_messages_per_window: Some(4),
            overlap: 1,
            ..config()
        };
        let windows = process_export(&path, &MiniJinjaRenderer::new(), &windowed).unwrap();
        let sizes: Vec<usize> = windows.iter().map(Conversation::len).collect();
        assert_eq!(sizes, vec![4, 4, 4]);
    }

    #[test]
    fn test_empty_chat_policy() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("result.json");
        write_export(&path, 2);

        let keep_empty = PipelineConfig {
            skip_empty_chats: false,
            min_conversation_messages: 0,
            ..config()
        };
        let conversations = process_export(&path, &MiniJinjaRenderer::new(), &keep_empty).unwrap();
        assert_eq!(conversations.len(), 2);
        assert!(conversations[1].is_empty());

        let conversations = process_export(&path, &MiniJinjaRenderer::new(), &config()).unwrap();
        assert_eq!(conversations.len(), 1);
    }

    #[test]
    fn test_template_failure_skips_chat() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("result.json");
        write_export(&path, 4);

        let mut broken = config();
        broken.builder.system_message_template = Some("{% if %}".to_string());
        let conversations = process_export(&path, &MiniJinjaRenderer::new(), &broken).unwrap();
        assert!(conversations.is_empty());
    }

    #[test]
    fn test_window_conversations_rejects_overlap_without_window() {
        let cfg = PipelineConfig {
            overlap: 2,
            ..Default::default()
        };
        let err = window_conversations(Vec::new(), &cfg).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let cfg = PipelineConfig {
            max_messages_per_window: Some(2),
            overlap: 2,
            ..Default::default()
        };
        let conv = Conversation::new("", vec![Message::user("a"), Message::assistant("b")]);
        assert!(window_conversations(vec![conv], &cfg).is_err());
    }

    #[test]
    fn test_process_all_exports_continues_past_failures() {
        let temp = TempDir::new().unwrap();
        write_export(&temp.path().join("a.json"), 6);
        write_export(&temp.path().join("b.json"), 3);
        std::fs::write(temp.path().join("broken.json"), r#"{"contacts": []}"#).unwrap();

        let results = process_all_exports(temp.path(), &MiniJinjaRenderer::new(), &config()).unwrap();
        assert_eq!(results.len(), 2);

        let empty = TempDir::new().unwrap();
        assert!(process_all_exports(empty.path(), &MiniJinjaRenderer::new(), &config()).is_err());
    }

    #[test]
    fn test_process_all_exports_rejects_bad_window_settings() {
        let temp = TempDir::new().unwrap();
        write_export(&temp.path().join("a.json"), 6);

        let zero = PipelineConfig {
            max_messages_per_window: Some(0),
            ..config()
        };
        let err = process_all_exports(temp.path(), &MiniJinjaRenderer::new(), &zero).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let wide_overlap = PipelineConfig {
            max_messages_per_window: Some(2),
            overlap: 5,
            ..config()
        };
        let err = process_all_exports(temp.path(), &MiniJinjaRenderer::new(), &wide_overlap)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let no_window = PipelineConfig {
            overlap: 1,
            ..config()
        };
        assert!(process_all_exports(temp.path(), &MiniJinjaRenderer::new(), &no_window).is_err());

        let windowed = PipelineConfig {
            max_messages_per_window: Some(4),
            overlap: 1,
            ..config()
        };
        assert!(windowed.validate().is_ok());
    }

    #[test]
    fn test_write_jsonl_output() {
        let temp = TempDir::new().unwrap();
        let conv = Conversation::new(
            "be brief",
            vec![Message::user("hi"), Message::assistant("hello")],
        );
        let results = vec![
            ExportResult {
                conversations: vec![conv.clone(), conv.clone()],
                source_path: "a.json".to_string(),
            },
            ExportResult {
                conversations: vec![conv.clone()],
                source_path: "b.json".to_string(),
            },
        ];

        let out = temp.path().join("out");
        let summary = write_jsonl_output(results, &out, 0.5, OutputFormat::ShareGpt).unwrap();
        assert_eq!(summary.total_exports, 2);
        assert_eq!(summary.total_conversations, 3);
        assert_eq!(summary.total_messages, 6);
        assert_eq!(summary.train_conversations + summary.val_conversations, 3);
        assert!(summary.val_conversations > 0 && summary.train_conversations > 0);

        let train = std::fs::read_to_string(out.join("training.jsonl")).unwrap();
        let record: Value = serde_json::from_str(train.lines().next().unwrap()).unwrap();
        assert_eq!(record["system"], "be brief");
        assert_eq!(record["conversations"][0], json!({"from": "user", "value": "hi"}));

        let results = vec![ExportResult {
            conversations: vec![conv],
            source_path: "a.json".to_string(),
        }];
        write_jsonl_output(results, &out, 0.0, OutputFormat::Messages).unwrap();
        let train = std::fs::read_to_string(out.join("training.jsonl")).unwrap();
        let record: Value = serde_json::from_str(train.trim()).unwrap();
        assert_eq!(record["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(record["messages"].as_array().unwrap().len(), 3);
    }
}
