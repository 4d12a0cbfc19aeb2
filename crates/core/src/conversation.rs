//! Conversation model and windowing.
//!
//! A [`Conversation`] is a passive container of role-tagged [`Message`]s plus an
//! optional system message. It owns the two windowing operations used to fit long
//! chats into training context limits; both return new conversations and never
//! mutate the source.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(Error::InvalidArgument(format!("unknown role '{}'", other))),
        }
    }
}

/// A single turn in a conversation.
///
/// Serializes as `{"role": ..., "content": ...}`, the shape chat-completion APIs expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn to_sharegpt(&self) -> ShareGptMessage {
        ShareGptMessage {
            from: self.role.as_str().to_string(),
            value: self.content.clone(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

/// A message in the ShareGPT training interchange format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGptMessage {
    pub from: String,
    pub value: String,
}

/// Append `content` as a new turn, or onto the last turn when it has the same role.
///
/// Merged turns are separated by a single newline, so no two adjacent messages
/// in `messages` ever share a role as long as every append goes through here.
pub(crate) fn merge_or_push(messages: &mut Vec<Message>, role: Role, content: &str) {
    match messages.last_mut() {
        Some(last) if last.role == role => {
            last.content.push('\n');
            last.content.push_str(content);
        }
        _ => messages.push(Message::new(role, content)),
    }
}

/// Ordered sequence of messages with an optional system message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub system_message: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_message: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_message: system_message.into(),
            messages,
        }
    }

    /// Append a message at the end of the conversation.
    pub fn add_entry(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn window(&self, start: usize, end: usize) -> Conversation {
        Conversation::new(self.system_message.clone(), self.messages[start..end].to_vec())
    }

    /// Partition the messages into consecutive, non-overlapping windows of at most
    /// `max_per_window` messages. Every window carries the same system message.
    pub fn split(&self, max_per_window: usize) -> Result<Vec<Conversation>> {
        if max_per_window == 0 {
            return Err(Error::InvalidArgument(
                "max_per_window must be a positive integer".to_string(),
            ));
        }

        Ok(self
            .messages
            .chunks(max_per_window)
            .map(|chunk| Conversation::new(self.system_message.clone(), chunk.to_vec()))
            .collect())
    }

    /// Split into windows of at most `max_per_window` messages where each window
    /// repeats up to `overlap` trailing messages of the previous one.
    ///
    /// Iteration stops as soon as a window reaches the last message, so the tail is
    /// never emitted twice. The cursor always advances by at least one message.
    pub fn split_with_overlap(
        &self,
        max_per_window: usize,
        overlap: usize,
    ) -> Result<Vec<Conversation>> {
        if max_per_window == 0 {
            return Err(Error::InvalidArgument(
                "max_per_window must be a positive integer".to_string(),
            ));
        }
        if overlap >= max_per_window {
            return Err(Error::InvalidArgument(format!(
                "overlap ({}) must be less than max_per_window ({})",
                overlap, max_per_window
            )));
        }

        let total = self.messages.len();
        let mut windows = Vec::new();
        let mut start = 0;

        while start < total {
            let end = (start + max_per_window).min(total);
            windows.push(self.window(start, end));
            if end == total {
                break;
            }
            start = (start + 1).max(end - overlap);
        }

        Ok(windows)
    }

    /// Chat-completion view: `{role, content}` entries, led by the system message when set.
    pub fn to_chat_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if !self.system_message.is_empty() {
            out.push(Message::system(self.system_message.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Training interchange view: `{from, value}` entries for every message.
    pub fn to_sharegpt(&self) -> Vec<ShareGptMessage> {
        self.messages.iter().map(Message::to_sharegpt).collect()
    }

    /// Serialize the chat-completion view as JSON.
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let messages = self.to_chat_messages();
        let json = if pretty {
            serde_json::to_string_pretty(&messages)?
        } else {
            serde_json::to_string(&messages)?
        };
        Ok(json)
    }
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Conversation: system_message={}, num_messages={}",
            self.system_message,
            self.messages.len()
        )
    }
}
