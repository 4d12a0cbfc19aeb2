//! Core serialization logic for chat-export fine-tuning data.
//!
//! This crate turns a raw chat export (per-message records with sender, timestamp
//! and text) into normalized multi-turn [`Conversation`]s: the export is parsed and
//! validated into [`RawChatRecord`]s, the [`ConversationBuilder`] assigns roles,
//! normalizes text and merges consecutive same-role turns, and conversations are
//! then split into bounded, optionally overlapping windows.

use serde_json::Value;

/// Trait for rendering the system message template.
///
/// Implementors receive the raw template text and a JSON object of variables
/// (`chat` and `message`) and return the rendered text.
pub trait TemplateRenderer {
    fn render(&self, template: &str, variables: &Value) -> std::result::Result<String, BoxError>;
}

// Blanket implementation for references to TemplateRenderers
impl<T: TemplateRenderer + ?Sized> TemplateRenderer for &T {
    fn render(&self, template: &str, variables: &Value) -> std::result::Result<String, BoxError> {
        (*self).render(template, variables)
    }
}

mod builder;
pub mod capabilities;
mod conversation;
mod error;
mod export;
mod normalize;
pub mod pipeline;

pub use builder::{BuilderConfig, ConversationBuilder, MiniJinjaRenderer};
pub use conversation::{Conversation, Message, Role, ShareGptMessage};
pub use error::{BoxError, Error, Result};
pub use export::{parse_export, parse_export_str, RawChatRecord, RawMessageRecord};
pub use normalize::{limit_repeats, normalize, ReplaceRule};
pub use pipeline::{
    discover_export_files, load_export, process_all_exports, process_export, window_conversations,
    write_jsonl_output, ExportResult, OutputFormat, PipelineConfig, PipelineResult,
};

/// Chat id of Telegram's service-notification chat, which is never a real conversation.
pub const TELEGRAM_SERVICE_CHAT_ID: i64 = 777000;

/// Export chat type of a one-to-one conversation.
pub const PERSONAL_CHAT_TYPE: &str = "personal_chat";

/// Export message type of an ordinary text message.
pub const MESSAGE_TYPE_MESSAGE: &str = "message";

/// Sentinel substituted for a null chat or sender name.
pub const NAME_UNKNOWN: &str = "unknown";
