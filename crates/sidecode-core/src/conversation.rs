//! Conversation management.
//!
//! A conversation is an append-only list of messages plus aggregate usage.
//! The [`ConversationStore`] keeps live conversations in memory, one mutex
//! per conversation, and persists each one as a JSON file under
//! `<data_dir>/conversation/<id>.json`.

use crate::error::{ConversationError, CoreResult};
use serde::{Deserialize, Serialize};
use sidecode_provider::{Message, Role, ToolCall, Usage};
use sidecode_storage::{JsonStorage, Storage};
use sidecode_util::Identifier;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

const STORAGE_PREFIX: &str = "conversation";

/// A message as recorded in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    #[serde(flatten)]
    pub message: Message,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl StoredMessage {
    pub fn new(message: Message) -> Self {
        Self {
            id: Identifier::message(),
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
            usage: None,
            cost: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage, cost: f64) -> Self {
        self.usage = Some(usage);
        self.cost = Some(cost);
        self
    }

    pub fn role(&self) -> Role {
        self.message.role
    }
}

/// Conversation timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTime {
    pub created: i64,
    pub updated: i64,
}

/// Usage aggregated over every message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Approval state of a held tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Approved,
    Rejected,
}

/// A tool call held back for approval in manual mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: String,
    pub call: ToolCall,
    pub status: OperationStatus,
    pub created: i64,
}

impl PendingOperation {
    pub fn new(call: ToolCall) -> Self {
        Self {
            id: Identifier::operation(),
            call,
            status: OperationStatus::Pending,
            created: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OperationStatus::Pending
    }
}

/// A conversation with its full history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub time: ConversationTime,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub stats: ConversationStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PendingOperation>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: Identifier::conversation(),
            title: title.into(),
            time: ConversationTime {
                created: now,
                updated: now,
            },
            messages: Vec::new(),
            stats: ConversationStats::default(),
            pending: Vec::new(),
        }
    }

    /// Append a message, folding its usage into the aggregates.
    pub fn push(&mut self, message: StoredMessage) {
        if let Some(usage) = &message.usage {
            self.stats.input_tokens += u64::from(usage.input_tokens);
            self.stats.output_tokens += u64::from(usage.output_tokens);
        }
        if let Some(cost) = message.cost {
            self.stats.cost += cost;
        }
        self.time.updated = chrono::Utc::now().timestamp_millis().max(self.time.updated);
        self.messages.push(message);
    }

    /// The last `n` messages in order, starting at the first user message
    /// in that window.
    ///
    /// A window without any user message (one long tool-using turn) only
    /// loses its leading tool results, whose calls fell outside it.
    pub fn context_slice(&self, n: usize) -> &[StoredMessage] {
        let window = &self.messages[self.messages.len().saturating_sub(n)..];
        let start = window
            .iter()
            .position(|m| m.role() == Role::User)
            .or_else(|| window.iter().position(|m| m.role() != Role::ToolResult))
            .unwrap_or(window.len());
        &window[start..]
    }

    /// Text of the most recent assistant message.
    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role() == Role::Assistant)
            .map(|m| m.message.text())
    }

    pub fn pending_operations(&self) -> impl Iterator<Item = &PendingOperation> {
        self.pending.iter().filter(|op| op.is_pending())
    }

    pub fn has_pending(&self) -> bool {
        self.pending.iter().any(PendingOperation::is_pending)
    }
}

/// Summary row for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub updated: i64,
    pub messages: usize,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            updated: conversation.time.updated,
            messages: conversation.messages.len(),
        }
    }
}

type Handle = Arc<Mutex<Conversation>>;

/// In-memory conversations backed by JSON files.
///
/// Mutation of one conversation is serialized by its mutex. Locks are held
/// only for the duration of an append, snapshot or write.
pub struct ConversationStore {
    storage: JsonStorage,
    conversations: RwLock<HashMap<String, Handle>>,
}

impl ConversationStore {
    pub fn new(storage: JsonStorage) -> Self {
        Self {
            storage,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &JsonStorage {
        &self.storage
    }

    /// Create and immediately persist a new conversation.
    pub async fn create(&self, title: impl Into<String>) -> CoreResult<Conversation> {
        let conversation = Conversation::new(title);
        self.write(&conversation).await?;
        debug!(conversation = %conversation.id, "Created conversation");

        self.conversations.write().await.insert(
            conversation.id.clone(),
            Arc::new(Mutex::new(conversation.clone())),
        );
        Ok(conversation)
    }

    /// The live handle for `id`, loading it from disk on first use.
    async fn handle(&self, id: &str) -> CoreResult<Handle> {
        if let Some(handle) = self.conversations.read().await.get(id) {
            return Ok(handle.clone());
        }

        let conversation = self.read(id).await?;
        let mut conversations = self.conversations.write().await;
        // Another task may have loaded it while we were reading
        let handle = conversations
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(conversation)))
            .clone();
        Ok(handle)
    }

    /// Append a message. Does not persist.
    pub async fn append(&self, id: &str, message: StoredMessage) -> CoreResult<()> {
        let handle = self.handle(id).await?;
        let mut conversation = handle.lock().await;
        debug!(conversation = %id, role = message.role().as_str(), "Appending message");
        conversation.push(message);
        Ok(())
    }

    /// Run `f` against the live conversation.
    pub async fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Conversation) -> R,
    ) -> CoreResult<R> {
        let handle = self.handle(id).await?;
        let mut conversation = handle.lock().await;
        Ok(f(&mut conversation))
    }

    /// The last `n` messages, see [`Conversation::context_slice`].
    pub async fn context_slice(&self, id: &str, n: usize) -> CoreResult<Vec<StoredMessage>> {
        let handle = self.handle(id).await?;
        let conversation = handle.lock().await;
        Ok(conversation.context_slice(n).to_vec())
    }

    /// Snapshot of the live conversation.
    pub async fn get(&self, id: &str) -> CoreResult<Conversation> {
        let handle = self.handle(id).await?;
        let conversation = handle.lock().await;
        Ok(conversation.clone())
    }

    /// Write the conversation to disk.
    pub async fn persist(&self, id: &str) -> CoreResult<()> {
        let handle = self.handle(id).await?;
        let conversation = handle.lock().await;
        self.write(&conversation).await
    }

    /// Load the conversation from disk, replacing any in-memory copy.
    pub async fn load(&self, id: &str) -> CoreResult<Conversation> {
        let conversation = self.read(id).await?;
        let handle = self.handle(id).await?;
        *handle.lock().await = conversation.clone();
        Ok(conversation)
    }

    /// IDs of every conversation on disk.
    pub async fn list(&self) -> CoreResult<Vec<String>> {
        let keys = self.storage.list(&[STORAGE_PREFIX]).await?;
        Ok(keys.into_iter().filter_map(|mut key| key.pop()).collect())
    }

    /// Summaries of every readable conversation on disk, newest first.
    /// Unreadable files are skipped.
    pub async fn summaries(&self) -> CoreResult<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();
        for id in self.list().await? {
            match self.read(&id).await {
                Ok(conversation) => summaries.push(ConversationSummary::from(&conversation)),
                Err(e) => debug!(conversation = %id, error = %e, "Skipping unreadable conversation"),
            }
        }
        summaries.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(summaries)
    }

    async fn read(&self, id: &str) -> CoreResult<Conversation> {
        self.storage
            .read::<Conversation>(&[STORAGE_PREFIX, id])
            .await?
            .ok_or_else(|| ConversationError::not_found(id).into())
    }

    async fn write(&self, conversation: &Conversation) -> CoreResult<()> {
        debug!(
            conversation = %conversation.id,
            messages = conversation.messages.len(),
            "Persisting conversation"
        );
        self.storage
            .write(&[STORAGE_PREFIX, &conversation.id], conversation)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sidecode_provider::ToolResult;
    use tempfile::TempDir;

    fn store() -> (TempDir, ConversationStore) {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::new(JsonStorage::new(dir.path()));
        (dir, store)
    }

    fn tool_exchange(conversation: &mut Conversation, id: &str) {
        let call = ToolCall::new(id, "list_files", json!({}));
        conversation.push(StoredMessage::new(
            Message::assistant("").with_part(call.clone().into()),
        ));
        conversation.push(StoredMessage::new(Message::tool_result(&ToolResult::success(
            &call, "a.txt",
        ))));
    }

    #[test]
    fn test_push_updates_aggregates() {
        let mut conversation = Conversation::new("t");
        conversation.push(StoredMessage::new(Message::user("hi")));
        conversation.push(
            StoredMessage::new(Message::assistant("hello")).with_usage(Usage::new(10, 5), 0.25),
        );
        conversation.push(
            StoredMessage::new(Message::assistant("again")).with_usage(Usage::new(3, 2), 0.5),
        );

        assert_eq!(conversation.stats.input_tokens, 13);
        assert_eq!(conversation.stats.output_tokens, 7);
        assert!((conversation.stats.cost - 0.75).abs() < f64::EPSILON);
        assert!(conversation.time.updated >= conversation.time.created);
        assert_eq!(conversation.last_assistant_text().as_deref(), Some("again"));
    }

    #[test]
    fn test_context_slice_bounds() {
        let mut conversation = Conversation::new("t");
        for i in 0..4 {
            conversation.push(StoredMessage::new(Message::user(format!("m{i}"))));
        }
        assert!(conversation.context_slice(0).is_empty());
        assert_eq!(conversation.context_slice(2).len(), 2);
        assert_eq!(conversation.context_slice(2)[0].message.text(), "m2");
        assert_eq!(conversation.context_slice(100).len(), 4);
    }

    #[test]
    fn test_context_slice_drops_orphaned_tool_results() {
        let mut conversation = Conversation::new("t");
        conversation.push(StoredMessage::new(Message::user("list")));
        tool_exchange(&mut conversation, "c1");
        conversation.push(StoredMessage::new(Message::assistant("done")));

        // [user, assistant(call), tool_result, assistant]
        let slice = conversation.context_slice(2);
        assert_eq!(slice.len(), 1);
        assert_eq!(slice[0].role(), Role::Assistant);

        let slice = conversation.context_slice(3);
        assert_eq!(slice.len(), 3);
        assert_eq!(slice[0].role(), Role::Assistant);
    }

    #[test]
    fn test_context_slice_starts_at_user_message() {
        let mut conversation = Conversation::new("t");
        conversation.push(StoredMessage::new(Message::user("first")));
        tool_exchange(&mut conversation, "c1");
        conversation.push(StoredMessage::new(Message::assistant("done")));
        conversation.push(StoredMessage::new(Message::user("second")));
        tool_exchange(&mut conversation, "c2");
        conversation.push(StoredMessage::new(Message::assistant("done again")));

        // Window of 7 opens on the first tool call
        let slice = conversation.context_slice(7);
        assert_eq!(slice.len(), 4);
        assert_eq!(slice[0].message.text(), "second");

        let roles: Vec<Role> = conversation.context_slice(4).iter().map(|m| m.role()).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::ToolResult, Role::Assistant]
        );

        assert_eq!(conversation.context_slice(7), conversation.context_slice(7));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let raw = json!({
            "id": "cnv_1",
            "title": "old",
            "future_field": {"nested": true},
            "messages": [{
                "id": "msg_1",
                "role": "user",
                "content": [{"type": "text", "text": "hi"}],
                "timestamp": 1,
                "extra": 7
            }]
        });
        let conversation: Conversation = serde_json::from_value(raw).unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].message.text(), "hi");
    }

    #[tokio::test]
    async fn test_create_persists_immediately() {
        let (dir, store) = store();
        let conversation = store.create("first").await.unwrap();
        assert!(conversation.id.starts_with("cnv_"));
        assert!(dir
            .path()
            .join(format!("conversation/{}.json", conversation.id))
            .exists());
        assert_eq!(store.list().await.unwrap(), vec![conversation.id]);
    }

    #[tokio::test]
    async fn test_append_unknown_conversation() {
        let (_dir, store) = store();
        let err = store
            .append("cnv_missing", StoredMessage::new(Message::user("hi")))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_persist_load_round_trip() {
        let (dir, store) = store();
        let id = store.create("round trip").await.unwrap().id;
        store
            .append(&id, StoredMessage::new(Message::user("hello")))
            .await
            .unwrap();
        store
            .append(
                &id,
                StoredMessage::new(Message::assistant("hi")).with_usage(Usage::new(12, 4), 0.01),
            )
            .await
            .unwrap();
        store.persist(&id).await.unwrap();
        let before = store.get(&id).await.unwrap();

        let fresh = ConversationStore::new(JsonStorage::new(dir.path()));
        let after = fresh.load(&id).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(after.stats.input_tokens, 12);
    }

    #[tokio::test]
    async fn test_load_missing_vs_corrupted() {
        let (dir, store) = store();
        assert!(store.load("cnv_nope").await.unwrap_err().is_not_found());

        std::fs::create_dir_all(dir.path().join("conversation")).unwrap();
        std::fs::write(dir.path().join("conversation/cnv_bad.json"), "{ truncated").unwrap();
        let err = store.load("cnv_bad").await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(
            err,
            crate::CoreError::Persistence(sidecode_storage::StorageError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn test_summaries_newest_first() {
        let (_dir, store) = store();
        let older = store.create("older").await.unwrap().id;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = store.create("newer").await.unwrap().id;

        let summaries = store.summaries().await.unwrap();
        let ids: Vec<_> = summaries.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec![newer, older]);
    }
}
