//! Node.js bindings for the chat export serializer.
//!
//! Exposes export conversion, windowing and text normalization so tooling on the
//! JavaScript side produces exactly the conversations the CLI writes.

use napi::bindgen_prelude::*;
use napi_derive::napi;

use chat_export_serializer_core::{
    self as serializer, BuilderConfig, Conversation as CoreConversation,
    ConversationBuilder as CoreBuilder, Message as CoreMessage, MiniJinjaRenderer, ReplaceRule,
    Role,
};

fn to_napi_error(err: serializer::Error) -> Error {
    Error::from_reason(err.to_string())
}

/// A message in chat-completion form.
#[napi(object)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// A message in ShareGPT form.
#[napi(object)]
pub struct ShareGptMessage {
    pub from: String,
    pub value: String,
}

/// A conversation: optional system message plus ordered messages.
#[napi(object)]
pub struct Conversation {
    pub system_message: String,
    pub messages: Vec<ChatMessage>,
}

impl From<CoreConversation> for Conversation {
    fn from(conv: CoreConversation) -> Self {
        Self {
            system_message: conv.system_message,
            messages: conv
                .messages
                .into_iter()
                .map(|m| ChatMessage {
                    role: m.role.to_string(),
                    content: m.content,
                })
                .collect(),
        }
    }
}

impl TryFrom<Conversation> for CoreConversation {
    type Error = Error;

    fn try_from(conv: Conversation) -> Result<Self> {
        let messages = conv
            .messages
            .into_iter()
            .map(|m| {
                let role: Role = m.role.parse().map_err(to_napi_error)?;
                Ok(CoreMessage::new(role, m.content))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CoreConversation::new(conv.system_message, messages))
    }
}

/// An ordered `(pattern, replacement)` rewrite rule.
#[napi(object)]
pub struct ReplaceRuleInput {
    pub pattern: String,
    pub replacement: String,
}

fn compile_rules(rules: Option<Vec<ReplaceRuleInput>>) -> Result<Vec<ReplaceRule>> {
    ReplaceRule::from_pairs(
        rules
            .unwrap_or_default()
            .into_iter()
            .map(|r| (r.pattern, r.replacement)),
    )
    .map_err(to_napi_error)
}

/// Options for building conversations from an export.
/// All fields except the assistant id are optional.
#[napi(object)]
pub struct ChatExportConverterOptions {
    /// Sender id whose messages become assistant turns.
    pub assistant_sender_id: String,
    /// Jinja template for the system message (variables: chat, message).
    pub system_message_template: Option<String>,
    pub replace_rules: Option<Vec<ReplaceRuleInput>>,
    pub max_repeats: Option<u32>,
    pub min_run_before_limiting: Option<u32>,
}

/// Converts chat export JSON into conversations.
#[napi]
pub struct ChatExportConverter {
    inner: CoreBuilder<MiniJinjaRenderer>,
}

#[napi]
impl ChatExportConverter {
    /// @param options - Conversion options.
    #[napi(constructor)]
    pub fn new(options: ChatExportConverterOptions) -> Result<Self> {
        let config = BuilderConfig {
            assistant_sender_id: options.assistant_sender_id,
            system_message_template: options.system_message_template,
            replace_rules: compile_rules(options.replace_rules)?,
            max_repeats: options.max_repeats.unwrap_or(0) as usize,
            min_run_before_limiting: options.min_run_before_limiting.unwrap_or(0) as usize,
        };

        Ok(Self {
            inner: CoreBuilder::new(MiniJinjaRenderer::new(), config),
        })
    }

    /// Convert an export into one conversation per retained personal chat.
    ///
    /// @param exportJson - The export file contents.
    #[napi]
    pub fn convert(&self, export_json: String) -> Result<Vec<Conversation>> {
        let value: serde_json::Value = serde_json::from_str(&export_json)
            .map_err(|e| Error::from_reason(format!("invalid export JSON: {}", e)))?;
        let chats = serializer::parse_export(&value).map_err(to_napi_error)?;
        let conversations = self.inner.build_all(chats).map_err(to_napi_error)?;
        Ok(conversations.into_iter().map(Into::into).collect())
    }
}

/// Split a conversation into windows.
///
/// @param conversation - The conversation to split.
/// @param maxPerWindow - Maximum messages per window.
/// @param overlap - Messages repeated between consecutive windows (default 0).
#[napi]
pub fn split_conversation(
    conversation: Conversation,
    max_per_window: u32,
    overlap: Option<u32>,
) -> Result<Vec<Conversation>> {
    let conv = CoreConversation::try_from(conversation)?;
    let windows = match overlap {
        Some(overlap) if overlap > 0 => {
            conv.split_with_overlap(max_per_window as usize, overlap as usize)
        }
        _ => conv.split(max_per_window as usize),
    }
    .map_err(to_napi_error)?;
    Ok(windows.into_iter().map(Into::into).collect())
}

/// Convert a conversation to ShareGPT `{from, value}` messages.
#[napi]
pub fn to_sharegpt(conversation: Conversation) -> Result<Vec<ShareGptMessage>> {
    let conv = CoreConversation::try_from(conversation)?;
    Ok(conv
        .to_sharegpt()
        .into_iter()
        .map(|m| ShareGptMessage {
            from: m.from,
            value: m.value,
        })
        .collect())
}

/// Convert a conversation to `{role, content}` messages, system message first.
#[napi]
pub fn to_chat_messages(conversation: Conversation) -> Result<Vec<ChatMessage>> {
    let conv = CoreConversation::try_from(conversation)?;
    Ok(conv
        .to_chat_messages()
        .into_iter()
        .map(|m| ChatMessage {
            role: m.role.to_string(),
            content: m.content,
        })
        .collect())
}

/// Helper function: apply rewrite rules and repeat limiting to text.
#[napi]
pub fn normalize_text(
    text: String,
    replace_rules: Option<Vec<ReplaceRuleInput>>,
    max_repeats: Option<u32>,
    min_run_before_limiting: Option<u32>,
) -> Result<String> {
    let rules = compile_rules(replace_rules)?;
    Ok(serializer::normalize(
        &text,
        &rules,
        max_repeats.unwrap_or(0) as usize,
        min_run_before_limiting.unwrap_or(0) as usize,
    ))
}

/// Helper function: limit runs of repeated characters.
#[napi]
pub fn limit_repeats(text: String, max_repeats: u32, min_run_before_limiting: u32) -> String {
    serializer::limit_repeats(&text, max_repeats as usize, min_run_before_limiting as usize)
}
