//! Capability interfaces for external collaborators.
//!
//! Language-model backends, vector stores and document decoders live outside this
//! crate and plug in through these single-method traits, so a backend can be
//! swapped without touching conversation construction.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::conversation::{merge_or_push, Conversation, Role};
use crate::error::{BoxError, Error, Result};

/// Metadata attached to stored content.
pub type Metadata = BTreeMap<String, String>;

/// Produces the next assistant reply for a conversation.
pub trait ResponseProvider {
    fn respond(&self, conversation: &Conversation) -> std::result::Result<String, BoxError>;
}

/// Stores content with metadata and answers nearest-neighbour queries.
pub trait Store {
    fn add(&self, content: &str, metadata: &Metadata) -> std::result::Result<(), BoxError>;

    fn nearest(&self, query: &str, k: usize) -> std::result::Result<Vec<KnowledgeItem>, BoxError>;
}

/// Maps a document on disk to plain text.
pub trait TextExtractor {
    fn extract(&self, path: &Path) -> std::result::Result<String, BoxError>;
}

/// A unit of stored content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeItem {
    pub content: String,
    pub metadata: Metadata,
}

/// Remove markdown code fences models tend to wrap JSON answers in.
pub fn strip_code_fences(response: &str) -> String {
    response
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Ask `provider` for the next reply and return a copy of the conversation with
/// the reply appended as an assistant turn (merged if the last turn is the assistant's).
pub fn continue_conversation<P>(provider: &P, conversation: &Conversation) -> Result<Conversation>
where
    P: ResponseProvider + ?Sized,
{
    let reply = provider.respond(conversation).map_err(Error::Collaborator)?;
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(Error::Collaborator("response provider returned an empty reply".into()));
    }

    let mut next = conversation.clone();
    merge_or_push(&mut next.messages, Role::Assistant, reply);
    Ok(next)
}

/// Store every non-empty window of one chat as ShareGPT JSON.
///
/// Returns the number of windows stored.
pub fn index_conversations<S>(store: &S, chat_id: i64, windows: &[Conversation]) -> Result<usize>
where
    S: Store + ?Sized,
{
    let mut stored = 0;
    for (index, window) in windows.iter().enumerate() {
        if window.is_empty() {
            continue;
        }

        let content = serde_json::to_string(&window.to_sharegpt())?;
        let mut metadata = Metadata::new();
        metadata.insert("chat_id".to_string(), chat_id.to_string());
        metadata.insert("window".to_string(), index.to_string());
        metadata.insert("messages".to_string(), window.len().to_string());
        if !window.system_message.is_empty() {
            metadata.insert("system_message".to_string(), window.system_message.clone());
        }

        store.add(&content, &metadata).map_err(Error::Collaborator)?;
        stored += 1;
    }

    debug!(chat_id, stored, "indexed conversation windows");
    Ok(stored)
}

/// Extract `path` and split the text into one item per non-empty paragraph.
pub fn gather_knowledge<E>(extractor: &E, path: &Path) -> Result<Vec<KnowledgeItem>>
where
    E: TextExtractor + ?Sized,
{
    let text = extractor.extract(path).map_err(Error::Collaborator)?;

    let file_dir = path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let file_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let items: Vec<KnowledgeItem> = text
        .split('\n')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(index, paragraph)| {
            let mut metadata = Metadata::new();
            metadata.insert("file_dir".to_string(), file_dir.clone());
            metadata.insert("file_name".to_string(), file_name.clone());
            metadata.insert("file_ext".to_string(), file_ext.clone());
            metadata.insert("paragraph_number".to_string(), (index + 1).to_string());
            KnowledgeItem {
                content: paragraph.to_string(),
                metadata,
            }
        })
        .collect();

    debug!(path = %path.display(), paragraphs = items.len(), "gathered knowledge");
    Ok(items)
}

/// Add gathered items to `store`, returning how many were stored.
pub fn index_knowledge<S>(store: &S, items: &[KnowledgeItem]) -> Result<usize>
where
    S: Store + ?Sized,
{
    for item in items {
        store
            .add(&item.content, &item.metadata)
            .map_err(Error::Collaborator)?;
    }
    Ok(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        items: Mutex<Vec<KnowledgeItem>>,
    }

    impl Store for MemoryStore {
        fn add(&self, content: &str, metadata: &Metadata) -> std::result::Result<(), BoxError> {
            self.items.lock().unwrap().push(KnowledgeItem {
                content: content.to_string(),
                metadata: metadata.clone(),
            });
            Ok(())
        }

        fn nearest(
            &self,
            query: &str,
            k: usize,
        ) -> std::result::Result<Vec<KnowledgeItem>, BoxError> {
            Ok(self
                .items
                .lock()
                .unwrap()
                .iter()
                .filter(|item| item.content.contains(query))
                .take(k)
                .cloned()
                .collect())
        }
    }

    struct CannedProvider(&'static str);

    impl ResponseProvider for CannedProvider {
        fn respond(&self, _: &Conversation) -> std::result::Result<String, BoxError> {
            Ok(self.0.to_string())
        }
    }

    struct FixedExtractor(&'static str);

    impl TextExtractor for FixedExtractor {
        fn extract(&self, _: &Path) -> std::result::Result<String, BoxError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  plain  "), "plain");
    }

    #[test]
    fn test_continue_conversation() {
        let conv = Conversation::new("", vec![Message::user("hi")]);
        let next = continue_conversation(&CannedProvider(" hello "), &conv).unwrap();
        assert_eq!(next.messages, vec![Message::user("hi"), Message::assistant("hello")]);
        assert_eq!(conv.len(), 1);

        let again = continue_conversation(&CannedProvider("more"), &next).unwrap();
        assert_eq!(again.messages[1].content, "hello\nmore");

        let err = continue_conversation(&CannedProvider("   "), &conv).unwrap_err();
        assert!(matches!(err, Error::Collaborator(_)));
    }

    #[test]
    fn test_index_conversations() {
        let store = MemoryStore::default();
        let windows = vec![
            Conversation::new(
                "sys",
                vec![
                    Message::user("where is the key"),
                    Message::assistant("under the mat"),
                ],
            ),
            Conversation::default(),
            Conversation::new("sys", vec![Message::user("thanks")]),
        ];

        assert_eq!(index_conversations(&store, 7, &windows).unwrap(), 2);

        let found = store.nearest("under the mat", 5).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata["chat_id"], "7");
        assert_eq!(found[0].metadata["window"], "0");
        assert_eq!(found[0].metadata["system_message"], "sys");
        assert!(found[0].content.contains(r#""from":"assistant""#));
    }

    #[test]
    fn test_gather_knowledge() {
        let extractor = FixedExtractor("First paragraph.\n\n   \nSecond paragraph.\n");
        let path = PathBuf::from("/docs/notes.txt");
        let items = gather_knowledge(&extractor, &path).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[1].content, "Second paragraph.");
        assert_eq!(items[1].metadata["paragraph_number"], "2");
        assert_eq!(items[0].metadata["file_dir"], "/docs");
        assert_eq!(items[0].metadata["file_name"], "notes");
        assert_eq!(items[0].metadata["file_ext"], ".txt");

        let store = MemoryStore::default();
        assert_eq!(index_knowledge(&store, &items).unwrap(), 2);
        assert_eq!(store.nearest("paragraph", 1).unwrap().len(), 1);
    }
}
