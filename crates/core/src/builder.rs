//! Conversation construction from parsed chat records.
//!
//! Assigns roles by sender id, normalizes each message, drops turns that end up
//! empty and merges consecutive same-role turns so that roles strictly alternate.

use minijinja::Environment;
use serde_json::{Map, Value};
use tracing::debug;

use crate::conversation::{merge_or_push, Conversation, Role};
use crate::error::{BoxError, Error, Result};
use crate::export::{RawChatRecord, RawMessageRecord};
use crate::normalize::{normalize, ReplaceRule};
use crate::TemplateRenderer;

/// Configuration for the ConversationBuilder.
#[derive(Debug, Clone, Default)]
pub struct BuilderConfig {
    /// Sender id whose messages become assistant turns; everyone else is the user.
    pub assistant_sender_id: String,
    /// Jinja template for the system message, rendered with `chat` and `message`.
    pub system_message_template: Option<String>,
    pub replace_rules: Vec<ReplaceRule>,
    /// Zero disables repeat limiting.
    pub max_repeats: usize,
    /// Zero disables repeat limiting.
    pub min_run_before_limiting: usize,
}

/// [`TemplateRenderer`] backed by minijinja (Jinja2 syntax).
#[derive(Debug)]
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
}

impl MiniJinjaRenderer {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }
}

impl Default for MiniJinjaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn render(&self, template: &str, variables: &Value) -> std::result::Result<String, BoxError> {
        Ok(self.env.render_str(template, variables)?)
    }
}

/// Builds one [`Conversation`] per [`RawChatRecord`].
pub struct ConversationBuilder<R>
where
    R: TemplateRenderer,
{
    renderer: R,
    config: BuilderConfig,
}

impl<R> ConversationBuilder<R>
where
    R: TemplateRenderer,
{
    pub fn new(renderer: R, config: BuilderConfig) -> Self {
        Self { renderer, config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn role_for(&self, message: &RawMessageRecord) -> Role {
        if message.sender_id == self.config.assistant_sender_id {
            Role::Assistant
        } else {
            Role::User
        }
    }

    /// Render the system message from the first non-assistant message, or return
    /// an empty string when there is no template or no such message.
    fn render_system_message(&self, chat: &RawChatRecord) -> Result<String> {
        let template = match self.config.system_message_template.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(String::new()),
        };

        let first_user = chat
            .messages
            .iter()
            .find(|m| m.sender_id != self.config.assistant_sender_id);
        let message = match first_user {
            Some(m) => m,
            None => return Ok(String::new()),
        };

        let mut variables = Map::new();
        variables.insert("chat".to_string(), serde_json::to_value(chat)?);
        variables.insert("message".to_string(), serde_json::to_value(message)?);

        self.renderer
            .render(template, &Value::Object(variables))
            .map_err(|source| Error::TemplateRender {
                chat_id: chat.id,
                source,
            })
    }

    /// Build the conversation for one chat.
    ///
    /// Fails only when the system message template cannot be rendered.
    pub fn build(&self, chat: RawChatRecord) -> Result<Conversation> {
        let system_message = self.render_system_message(&chat)?;

        let mut messages = Vec::new();
        let mut dropped = 0usize;
        for message in &chat.messages {
            let role = self.role_for(message);
            let content = normalize(
                message.text.trim(),
                &self.config.replace_rules,
                self.config.max_repeats,
                self.config.min_run_before_limiting,
            );

            if content.trim().is_empty() {
                dropped += 1;
                continue;
            }

            merge_or_push(&mut messages, role, &content);
        }

        debug!(
            chat_id = chat.id,
            raw = chat.messages.len(),
            dropped,
            merged = messages.len(),
            "built conversation"
        );

        Ok(Conversation::new(system_message, messages))
    }

    /// Build every chat, failing on the first chat whose template does not render.
    pub fn build_all(&self, chats: Vec<RawChatRecord>) -> Result<Vec<Conversation>> {
        chats.into_iter().map(|chat| self.build(chat)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;
    use proptest::prelude::*;

    const ME: &str = "user100";

    fn raw(sender_id: &str, text: &str) -> RawMessageRecord {
        RawMessageRecord {
            id: "1".to_string(),
            message_type: "message".to_string(),
            timestamp: 1_700_000_000,
            sender_name: if sender_id == ME { "Me" } else { "Alice" }.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
        }
    }

    fn chat(messages: Vec<RawMessageRecord>) -> RawChatRecord {
        RawChatRecord {
            id: 42,
            name: "Alice".to_string(),
            messages,
        }
    }

    fn builder(config: BuilderConfig) -> ConversationBuilder<MiniJinjaRenderer> {
        ConversationBuilder::new(
            MiniJinjaRenderer::new(),
            BuilderConfig {
                assistant_sender_id: ME.to_string(),
                ..config
            },
        )
    }

    struct FailingRenderer;

    impl TemplateRenderer for FailingRenderer {
        fn render(&self, _: &str, _: &Value) -> std::result::Result<String, BoxError> {
            Err("renderer unavailable".into())
        }
    }

    #[test]
    fn test_consecutive_messages_merge() {
        let b = builder(BuilderConfig::default());
        let conv = b
            .build(chat(vec![
                raw("user1", "first"),
                raw("user1", "second"),
                raw(ME, "reply"),
            ]))
            .unwrap();

        assert_eq!(
            conv.messages,
            vec![Message::user("first\nsecond"), Message::assistant("reply")]
        );
        assert_eq!(conv.system_message, "");
    }

    #[test]
    fn test_empty_messages_are_dropped_before_merge() {
        let rules = ReplaceRule::from_pairs([(r"https?://\S+", "")]).unwrap();
        let b = builder(BuilderConfig {
            replace_rules: rules,
            ..Default::default()
        });
        let conv = b
            .build(chat(vec![
                raw("user1", "  hello  "),
                raw(ME, "https://example.com"),
                raw("user1", "again"),
                raw(ME, "   "),
                raw(ME, "ok"),
            ]))
            .unwrap();

        assert_eq!(
            conv.messages,
            vec![Message::user("hello\nagain"), Message::assistant("ok")]
        );
    }

    #[test]
    fn test_normalization_is_applied() {
        let b = builder(BuilderConfig {
            max_repeats: 1,
            min_run_before_limiting: 3,
            ..Default::default()
        });
        let conv = b.build(chat(vec![raw("user1", "heeeeeey")])).unwrap();
        assert_eq!(conv.messages[0].content, "heeey");
    }

    #[test]
    fn test_system_message_template() {
        let b = builder(BuilderConfig {
            system_message_template: Some(
                "You are chatting with {{ chat.name }} ({{ message.sender_id }}): {{ message.text }}"
                    .to_string(),
            ),
            ..Default::default()
        });
        let conv = b
            .build(chat(vec![raw(ME, "hi"), raw("user1", "hey there")]))
            .unwrap();
        assert_eq!(conv.system_message, "You are chatting with Alice (user1): hey there");
    }

    #[test]
    fn test_system_message_empty_without_user_turn() {
        let b = builder(BuilderConfig {
            system_message_template: Some("{{ chat.name }}".to_string()),
            ..Default::default()
        });
        let conv = b.build(chat(vec![raw(ME, "talking to myself")])).unwrap();
        assert_eq!(conv.system_message, "");
        assert_eq!(conv.messages, vec![Message::assistant("talking to myself")]);
    }

    #[test]
    fn test_malformed_template_fails_chat() {
        let b = builder(BuilderConfig {
            system_message_template: Some("{{ chat.name ".to_string()),
            ..Default::default()
        });
        let err = b.build(chat(vec![raw("user1", "hi")])).unwrap_err();
        assert!(matches!(err, Error::TemplateRender { chat_id: 42, .. }));

        let err = b
            .build_all(vec![chat(vec![]), chat(vec![raw("user1", "hi")])])
            .unwrap_err();
        assert!(matches!(err, Error::TemplateRender { .. }));
    }

    #[test]
    fn test_injected_renderer_errors_propagate() {
        let b = ConversationBuilder::new(
            FailingRenderer,
            BuilderConfig {
                assistant_sender_id: ME.to_string(),
                system_message_template: Some("anything".to_string()),
                ..Default::default()
            },
        );
        let err = b.build(chat(vec![raw("user1", "hi")])).unwrap_err();
        assert!(err.to_string().contains("renderer unavailable"));
    }

    #[test]
    fn test_zero_messages_builds_empty_conversation() {
        let b = builder(BuilderConfig::default());
        let conv = b.build(chat(Vec::new())).unwrap();
        assert!(conv.is_empty());
        assert_eq!(b.build_all(vec![chat(Vec::new())]).unwrap().len(), 1);
    }

    proptest! {
        #[test]
        fn prop_no_adjacent_roles(turns in proptest::collection::vec((any::<bool>(), "[ a-c]{0,4}"), 0..40)) {
            let b = builder(BuilderConfig::default());
            let messages = turns
                .iter()
                .map(|(mine, text)| raw(if *mine { ME } else { "user1" }, text))
                .collect();
            let conv = b.build(chat(messages)).unwrap();

            for pair in conv.messages.windows(2) {
                prop_assert_ne!(pair[0].role, pair[1].role);
            }
            prop_assert!(conv.messages.iter().all(|m| !m.content.trim().is_empty()));
        }
    }
}
