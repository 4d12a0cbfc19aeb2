//! Chat export parsing and validation.
//!
//! Decodes a Telegram-style JSON export (`{"chats": {"list": [...]}}`) into
//! [`RawChatRecord`]s. A missing top-level structure is fatal; individual chats and
//! messages that fail validation are skipped with a debug log and never abort the
//! parse.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::{MESSAGE_TYPE_MESSAGE, NAME_UNKNOWN, PERSONAL_CHAT_TYPE, TELEGRAM_SERVICE_CHAT_ID};

const KEY_CHATS: &str = "chats";
const KEY_LIST: &str = "list";
const KEY_TYPE: &str = "type";
const KEY_ID: &str = "id";
const KEY_NAME: &str = "name";
const KEY_MESSAGES: &str = "messages";
const KEY_DATE_UNIXTIME: &str = "date_unixtime";
const KEY_FROM: &str = "from";
const KEY_FROM_ID: &str = "from_id";
const KEY_TEXT: &str = "text";
const KEY_TEXT_ENTITIES: &str = "text_entities";

/// Required keys for one kind of export record.
///
/// Presence is all that is checked here; a present key may still hold `null`.
struct RecordSchema {
    kind: &'static str,
    required: &'static [&'static str],
}

const CHAT_SCHEMA: RecordSchema = RecordSchema {
    kind: "chat",
    required: &[KEY_TYPE, KEY_ID, KEY_NAME, KEY_MESSAGES],
};

const MESSAGE_SCHEMA: RecordSchema = RecordSchema {
    kind: "message",
    required: &[
        KEY_ID,
        KEY_TYPE,
        KEY_DATE_UNIXTIME,
        KEY_FROM,
        KEY_FROM_ID,
        KEY_TEXT_ENTITIES,
    ],
};

impl RecordSchema {
    /// Return the entry as an object if it carries every required key.
    fn validate<'a>(
        &self,
        entry: &'a Value,
    ) -> std::result::Result<&'a Map<String, Value>, String> {
        let object = entry
            .as_object()
            .ok_or_else(|| format!("{} entry is not an object", self.kind))?;
        match self.required.iter().find(|key| !object.contains_key(**key)) {
            Some(key) => Err(format!("{} entry is missing '{}'", self.kind, key)),
            None => Ok(object),
        }
    }
}

/// A validated message entry of an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawMessageRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    /// Epoch seconds, fractions truncated; `0` when the export value is not numeric.
    pub timestamp: i64,
    pub sender_name: String,
    pub sender_id: String,
    /// Concatenation of every text fragment, in order.
    pub text: String,
}

/// A validated one-to-one chat of an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawChatRecord {
    pub id: i64,
    pub name: String,
    pub messages: Vec<RawMessageRecord>,
}

/// String form of a scalar value: strings verbatim, anything else as JSON text.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Integer form of a number or numeric string. Fractional numbers truncate toward zero.
fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn name_or_unknown(value: &Value) -> String {
    match value {
        Value::Null => NAME_UNKNOWN.to_string(),
        other => value_to_string(other),
    }
}

/// Parse a decoded export into its retained personal chats.
///
/// Fails with [`Error::MalformedExport`] when `chats` or `chats.list` is absent.
pub fn parse_export(export: &Value) -> Result<Vec<RawChatRecord>> {
    let chats = export
        .get(KEY_CHATS)
        .ok_or_else(|| Error::MalformedExport(format!("missing key '{}'", KEY_CHATS)))?;
    let list = chats.get(KEY_LIST).ok_or_else(|| {
        Error::MalformedExport(format!("missing key '{}' in '{}'", KEY_LIST, KEY_CHATS))
    })?;
    let entries = list.as_array().ok_or_else(|| {
        Error::MalformedExport(format!("'{}.{}' is not a list", KEY_CHATS, KEY_LIST))
    })?;

    debug!(count = entries.len(), "processing chats");

    let records: Vec<RawChatRecord> = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match parse_chat(entry) {
            Ok(record) => record,
            Err(reason) => {
                debug!(index, %reason, "skipping invalid chat");
                None
            }
        })
        .collect();

    info!(chats = records.len(), "parsed chat export");
    Ok(records)
}

/// Parse an export from JSON text.
pub fn parse_export_str(json: &str) -> Result<Vec<RawChatRecord>> {
    let value: Value = serde_json::from_str(json)?;
    parse_export(&value)
}

/// `Ok(None)` means the chat is valid but filtered out (service chat, group chat).
fn parse_chat(entry: &Value) -> std::result::Result<Option<RawChatRecord>, String> {
    let chat = CHAT_SCHEMA.validate(entry)?;

    let id = value_to_i64(&chat[KEY_ID])
        .ok_or_else(|| format!("chat id {} is not an integer", chat[KEY_ID]))?;
    if id == TELEGRAM_SERVICE_CHAT_ID {
        debug!(id, "skipping service chat");
        return Ok(None);
    }

    let chat_type = &chat[KEY_TYPE];
    if chat_type.as_str() != Some(PERSONAL_CHAT_TYPE) {
        debug!(id, chat_type = %chat_type, "skipping non-personal chat");
        return Ok(None);
    }

    let messages = chat[KEY_MESSAGES]
        .as_array()
        .ok_or_else(|| format!("chat {} messages is not a list", id))?;

    let records: Vec<RawMessageRecord> = messages
        .iter()
        .filter_map(|message| match parse_message(message) {
            Ok(record) => Some(record),
            Err(reason) => {
                debug!(chat_id = id, %reason, "skipping invalid message");
                None
            }
        })
        .collect();

    debug!(chat_id = id, kept = records.len(), total = messages.len(), "processed messages");

    Ok(Some(RawChatRecord {
        id,
        name: name_or_unknown(&chat[KEY_NAME]),
        messages: records,
    }))
}

fn parse_message(entry: &Value) -> std::result::Result<RawMessageRecord, String> {
    let message = MESSAGE_SCHEMA.validate(entry)?;

    let message_type = &message[KEY_TYPE];
    if message_type.as_str() != Some(MESSAGE_TYPE_MESSAGE) {
        return Err(format!("message type {} is not '{}'", message_type, MESSAGE_TYPE_MESSAGE));
    }

    let fragments = match message[KEY_TEXT_ENTITIES].as_array() {
        Some(fragments) if !fragments.is_empty() => fragments,
        _ => return Err("message has no text fragments".to_string()),
    };

    let text: String = fragments
        .iter()
        .filter_map(|fragment| fragment.get(KEY_TEXT).and_then(Value::as_str))
        .collect();

    Ok(RawMessageRecord {
        id: value_to_string(&message[KEY_ID]),
        message_type: MESSAGE_TYPE_MESSAGE.to_string(),
        timestamp: value_to_i64(&message[KEY_DATE_UNIXTIME]).unwrap_or(0),
        sender_name: name_or_unknown(&message[KEY_FROM]),
        sender_id: value_to_string(&message[KEY_FROM_ID]),
        text,
    })
}
