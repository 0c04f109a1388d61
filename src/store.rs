use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use anyhow::Result;

const CONVERSATIONS_FILE: &str = "conversations.json";
const CURRENT_FILE: &str = "current_conversation";

/// Titles derive from the first user message, truncated to this many chars.
const TITLE_CHARS: usize = 30;

pub const UNTITLED_CONVERSATION: &str = "New conversation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub timestamp_ms: i64,
}

/// On-disk chat history: a keyed map of conversations in one JSON file and
/// the current conversation id in a second file. Every mutation rewrites the
/// whole state synchronously. The two files are written one after the other
/// with no atomicity across them; concurrent writers are last-write-wins.
pub struct ConversationStore {
    dir: PathBuf,
    conversations: HashMap<String, Conversation>,
    current_id: String,
}

impl ConversationStore {
    /// Load persisted state from `dir`. A malformed conversations file is a
    /// load failure, not something to repair; the caller decides what to do
    /// (the TUI logs it and starts over with [`ConversationStore::fresh`]).
    /// A current id that references no stored conversation falls back to a
    /// fresh conversation.
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;

        let map_path = dir.join(CONVERSATIONS_FILE);
        let conversations: HashMap<String, Conversation> = if map_path.exists() {
            serde_json::from_str(&fs::read_to_string(&map_path)?)?
        } else {
            HashMap::new()
        };

        let saved_id = fs::read_to_string(dir.join(CURRENT_FILE))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let current_id = match saved_id {
            Some(id) if conversations.contains_key(&id) => id,
            _ => {
                let id = new_conversation_id();
                fs::write(dir.join(CURRENT_FILE), &id)?;
                id
            }
        };

        Ok(Self {
            dir,
            conversations,
            current_id,
        })
    }

    /// Empty in-memory state for when loading failed. Later saves still go to
    /// `dir`, so a corrupt history file gets overwritten on the next mutation.
    pub fn fresh(dir: PathBuf) -> Self {
        Self {
            dir,
            conversations: HashMap::new(),
            current_id: new_conversation_id(),
        }
    }

    pub fn current_id(&self) -> &str {
        &self.current_id
    }

    /// The active conversation, if it has any persisted messages yet.
    pub fn current(&self) -> Option<&Conversation> {
        self.conversations.get(&self.current_id)
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Conversations sorted by descending timestamp (most recent first).
    pub fn sorted(&self) -> Vec<&Conversation> {
        let mut conversations: Vec<&Conversation> = self.conversations.values().collect();
        conversations.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        conversations
    }

    /// Append a message to the active conversation (creating its record on
    /// first use) and persist the whole state.
    pub fn append(&mut self, role: Role, content: &str) -> Result<()> {
        let now = now_ms();

        let conversation = self
            .conversations
            .entry(self.current_id.clone())
            .or_insert_with(|| Conversation {
                id: self.current_id.clone(),
                title: UNTITLED_CONVERSATION.to_string(),
                messages: Vec::new(),
                timestamp_ms: now,
            });

        conversation.messages.push(ChatMessage {
            role,
            content: content.to_string(),
            timestamp_ms: now,
        });

        // First user message names the conversation
        if role == Role::User && conversation.messages.len() == 1 {
            conversation.title = derive_title(content);
        }
        conversation.timestamp_ms = now;

        self.save()
    }

    /// Switch to a fresh conversation. The previous conversation's record is
    /// left untouched; the new one is only written once it gets a message.
    pub fn start_new(&mut self) -> Result<()> {
        self.current_id = new_conversation_id();
        fs::write(self.dir.join(CURRENT_FILE), &self.current_id)?;
        Ok(())
    }

    pub fn select(&mut self, id: &str) -> Result<()> {
        self.current_id = id.to_string();
        fs::write(self.dir.join(CURRENT_FILE), id)?;
        Ok(())
    }

    /// Delete a conversation. Deleting the active one starts a new empty one.
    /// Returns whether the active conversation was the one deleted.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        self.conversations.remove(id);

        let was_active = id == self.current_id;
        if was_active {
            self.start_new()?;
        }
        self.save()?;

        Ok(was_active)
    }

    fn save(&self) -> Result<()> {
        // Map first, then the current id: two independent writes.
        fs::write(
            self.dir.join(CONVERSATIONS_FILE),
            serde_json::to_string_pretty(&self.conversations)?,
        )?;
        fs::write(self.dir.join(CURRENT_FILE), &self.current_id)?;
        Ok(())
    }
}

pub fn derive_title(content: &str) -> String {
    let truncated: String = content.chars().take(TITLE_CHARS).collect();
    if content.chars().count() > TITLE_CHARS {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConversationStore {
        ConversationStore::open(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_round_trip_preserves_order_and_roles() {
        let dir = TempDir::new().unwrap();

        let mut store = store_in(&dir);
        store.append(Role::User, "What is X?").unwrap();
        store.append(Role::Assistant, "X is Y [1].").unwrap();
        store.append(Role::User, "And Z?").unwrap();
        let id = store.current_id().to_string();
        drop(store);

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.current_id(), id);

        let messages = &reloaded.current().unwrap().messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "What is X?");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "X is Y [1].");
        assert_eq!(messages[2].content, "And Z?");
    }

    #[test]
    fn test_title_from_first_user_message() {
        let dir = TempDir::new().unwrap();

        let mut store = store_in(&dir);
        store.append(Role::User, "short question").unwrap();
        assert_eq!(store.current().unwrap().title, "short question");
    }

    #[test]
    fn test_new_chat_keeps_previous_record() {
        let dir = TempDir::new().unwrap();

        let mut store = store_in(&dir);
        store.append(Role::User, "first conversation").unwrap();
        let old_id = store.current_id().to_string();

        store.start_new().unwrap();
        assert_ne!(store.current_id(), old_id);
        assert!(store.current().is_none());
        assert_eq!(store.get(&old_id).unwrap().messages.len(), 1);
    }

    #[test]
    fn test_missing_current_id_falls_back_to_fresh() {
        let dir = TempDir::new().unwrap();

        let mut store = store_in(&dir);
        store.append(Role::User, "hello").unwrap();
        drop(store);

        // Point the current-id file at a conversation that does not exist
        fs::write(dir.path().join(CURRENT_FILE), "no-such-id").unwrap();

        let reloaded = store_in(&dir);
        assert_ne!(reloaded.current_id(), "no-such-id");
        assert!(reloaded.current().is_none());
        // The stored conversation survives untouched
        assert_eq!(reloaded.sorted().len(), 1);
    }

    #[test]
    fn test_malformed_state_is_a_load_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONVERSATIONS_FILE), "{not json").unwrap();

        assert!(ConversationStore::open(dir.path().to_path_buf()).is_err());
    }

    #[test]
    fn test_delete_inactive_conversation() {
        let dir = TempDir::new().unwrap();

        let mut store = store_in(&dir);
        store.append(Role::User, "old one").unwrap();
        let old_id = store.current_id().to_string();

        store.start_new().unwrap();
        store.append(Role::User, "active one").unwrap();
        let active_id = store.current_id().to_string();

        let was_active = store.delete(&old_id).unwrap();
        assert!(!was_active);
        assert_eq!(store.current_id(), active_id);
        assert!(store.get(&old_id).is_none());
    }

    #[test]
    fn test_delete_active_conversation_starts_new() {
        let dir = TempDir::new().unwrap();

        let mut store = store_in(&dir);
        store.append(Role::User, "doomed").unwrap();
        let id = store.current_id().to_string();

        let was_active = store.delete(&id).unwrap();
        assert!(was_active);
        assert_ne!(store.current_id(), id);
        assert!(store.current().is_none());
        assert!(store.sorted().is_empty());
    }

    #[test]
    fn test_sorted_is_most_recent_first() {
        let dir = TempDir::new().unwrap();

        let mut store = store_in(&dir);
        store.append(Role::User, "first").unwrap();
        store.start_new().unwrap();
        store.append(Role::User, "second").unwrap();

        // Force distinct timestamps in case both appends land on the same ms
        let first_id = store
            .sorted()
            .iter()
            .find(|c| c.title == "first")
            .unwrap()
            .id
            .clone();
        store
            .conversations
            .get_mut(&first_id)
            .unwrap()
            .timestamp_ms -= 10;

        let titles: Vec<&str> = store.sorted().iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);
    }

    #[test]
    fn test_derive_title_truncates_to_30_chars() {
        assert_eq!(derive_title("short"), "short");

        let long = "a".repeat(45);
        let title = derive_title(&long);
        assert_eq!(title, format!("{}...", "a".repeat(30)));

        let exact = "b".repeat(30);
        assert_eq!(derive_title(&exact), exact);
    }
}
