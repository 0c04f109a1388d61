use chrono::{DateTime, Utc};
use ratatui::widgets::ListState;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::api::{ApiClient, DocumentInfo, QueryAnswer, UploadReceipt};
use crate::citations::{self, Source};
use crate::store::{ConversationStore, Role};

/// Shown in place of an answer when the query fails; the real error only
/// goes to the log.
pub const QUERY_FAILED_MESSAGE: &str =
    "Sorry, something went wrong while answering your question. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Chat,
    Library,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Sidebar,
    Transcript,
    Input,
}

/// What the transcript shows. Persisted messages only keep role and content;
/// sources panels and loading placeholders are presentation-time state.
#[derive(Debug, Clone)]
pub enum TranscriptEntry {
    User(String),
    Assistant {
        content: String,
        sources: Vec<Source>,
        show_sources: bool,
    },
    /// Out-of-band note, e.g. "uploaded X (4 chunks)".
    Notice(String),
    /// Loading placeholder for an in-flight query, keyed by sequence number.
    Pending(u64),
}

/// Client-side cache of an uploaded document; rebuilt from the backend on
/// every startup and extended after each successful upload.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub chunk_count: u32,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn from_info(info: DocumentInfo) -> Self {
        let uploaded_at = info
            .upload_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Self {
            id: info.id,
            name: info.filename,
            chunk_count: info.total_chunks,
            uploaded_at,
        }
    }

    pub fn from_upload(name: String, receipt: &UploadReceipt) -> Self {
        Self {
            id: receipt.document_id.clone(),
            name,
            chunk_count: receipt.total_chunks,
            uploaded_at: Utc::now(),
        }
    }
}

pub struct PendingQuery {
    pub seq: u64,
    pub task: JoinHandle<anyhow::Result<QueryAnswer>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Queued,
    Uploading,
    Done { chunks: u32 },
    Failed,
}

#[derive(Debug, Clone)]
pub struct UploadItem {
    pub name: String,
    pub status: UploadStatus,
}

/// Progress messages from the background upload task. Files in a batch are
/// uploaded strictly one at a time.
#[derive(Debug)]
pub enum UploadEvent {
    Started(usize),
    Finished(usize, anyhow::Result<UploadReceipt>),
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub screen: Screen,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // Chat state
    pub input: String,
    pub cursor: usize, // cursor position in input (chars)
    pub transcript: Vec<TranscriptEntry>,
    pub transcript_scroll: u16,
    pub chat_height: u16, // inner chat area size, updated during render
    pub chat_width: u16,
    pub pending_queries: Vec<PendingQuery>,
    next_query_seq: u64,

    // Conversations sidebar
    pub sidebar_state: ListState,

    // Document library
    pub documents: Vec<Document>,
    pub library_state: ListState,
    pub documents_task: Option<JoinHandle<anyhow::Result<Vec<DocumentInfo>>>>,

    // Upload screen
    pub upload_input: String,
    pub upload_cursor: usize,
    pub upload_items: Vec<UploadItem>,
    pub upload_rx: Option<mpsc::UnboundedReceiver<UploadEvent>>,

    // Transient status line (cleared on the next key press)
    pub status: Option<String>,

    // Animation state (loading ellipsis)
    pub animation_frame: u8,

    pub store: ConversationStore,
    pub api: ApiClient,
}

impl App {
    pub async fn new(api: ApiClient, store_dir: PathBuf) -> Self {
        // A corrupt history file is logged and replaced with an empty state,
        // never repaired in place.
        let store = match ConversationStore::open(store_dir.clone()) {
            Ok(store) => store,
            Err(e) => {
                error!("failed to load conversation history: {e:#}");
                ConversationStore::fresh(store_dir)
            }
        };

        let documents = match api.documents().await {
            Ok(infos) => infos.into_iter().map(Document::from_info).collect(),
            Err(e) => {
                warn!("failed to load document list: {e:#}");
                Vec::new()
            }
        };

        let mut app = Self {
            should_quit: false,
            screen: Screen::Chat,
            input_mode: InputMode::Normal,
            focus: FocusPane::Sidebar,

            input: String::new(),
            cursor: 0,
            transcript: Vec::new(),
            transcript_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            pending_queries: Vec::new(),
            next_query_seq: 0,

            sidebar_state: ListState::default(),

            documents,
            library_state: ListState::default(),
            documents_task: None,

            upload_input: String::new(),
            upload_cursor: 0,
            upload_items: Vec::new(),
            upload_rx: None,

            status: None,
            animation_frame: 0,

            store,
            api,
        };

        app.load_current_conversation();
        app
    }

    /// Chat is enabled once at least one document exists to ask about.
    pub fn chat_enabled(&self) -> bool {
        !self.documents.is_empty()
    }

    pub fn tick_animation(&mut self) {
        if !self.pending_queries.is_empty() || self.upload_rx.is_some() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // --- Chat -------------------------------------------------------------

    /// Rebuild the visible transcript from the persisted active conversation.
    /// Sources panels are not persisted, so reloaded answers render plain.
    pub fn load_current_conversation(&mut self) {
        self.transcript.clear();
        self.transcript_scroll = 0;

        if let Some(conversation) = self.store.current() {
            for message in &conversation.messages {
                let entry = match message.role {
                    Role::User => TranscriptEntry::User(message.content.clone()),
                    Role::Assistant => TranscriptEntry::Assistant {
                        content: message.content.clone(),
                        sources: Vec::new(),
                        show_sources: false,
                    },
                };
                self.transcript.push(entry);
            }
        }
    }

    /// Send the trimmed input as a query. The user message is rendered and
    /// persisted before the request goes out; a second query may be issued
    /// while the first is still pending (no cancellation or queueing).
    pub fn send_query(&mut self) {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return;
        }

        self.input.clear();
        self.cursor = 0;

        self.transcript.push(TranscriptEntry::User(text.clone()));
        if let Err(e) = self.store.append(Role::User, &text) {
            error!("failed to persist user message: {e:#}");
        }

        let seq = self.next_query_seq;
        self.next_query_seq += 1;
        self.transcript.push(TranscriptEntry::Pending(seq));
        self.scroll_transcript_to_bottom();

        let client = self.api.clone();
        let task = tokio::spawn(async move { client.query(&text).await });
        self.pending_queries.push(PendingQuery { seq, task });
    }

    /// Resolve a finished query: swap its loading placeholder for the answer
    /// (with sources panel) or for a generic failure message. Failure text is
    /// transcript-only; it is never persisted.
    pub fn finish_query(&mut self, seq: u64, result: anyhow::Result<QueryAnswer>) {
        let placeholder = self
            .transcript
            .iter()
            .position(|entry| matches!(entry, TranscriptEntry::Pending(s) if *s == seq));

        let Some(index) = placeholder else {
            // The transcript was cleared (new chat) while this query was in
            // flight; the answer has nowhere to land.
            warn!("query {seq} finished after its conversation was closed");
            return;
        };

        match result {
            Ok(reply) => {
                let sources = citations::cited_sources(&reply.answer, &reply.context);
                self.transcript[index] = TranscriptEntry::Assistant {
                    content: reply.answer.clone(),
                    sources,
                    show_sources: false,
                };
                if let Err(e) = self.store.append(Role::Assistant, &reply.answer) {
                    error!("failed to persist assistant message: {e:#}");
                }
            }
            Err(e) => {
                error!("query failed: {e:#}");
                self.transcript[index] = TranscriptEntry::Assistant {
                    content: QUERY_FAILED_MESSAGE.to_string(),
                    sources: Vec::new(),
                    show_sources: false,
                };
            }
        }

        self.scroll_transcript_to_bottom();
    }

    /// Toggle the sources panel of the most recent answer that has one.
    pub fn toggle_last_sources(&mut self) {
        for entry in self.transcript.iter_mut().rev() {
            if let TranscriptEntry::Assistant {
                sources,
                show_sources,
                ..
            } = entry
            {
                if !sources.is_empty() {
                    *show_sources = !*show_sources;
                }
                return;
            }
        }
    }

    pub fn start_new_chat(&mut self) {
        if let Err(e) = self.store.start_new() {
            error!("failed to start a new conversation: {e:#}");
        }
        self.transcript.clear();
        self.transcript_scroll = 0;
        self.sidebar_state.select(None);
    }

    pub fn open_selected_conversation(&mut self) {
        let Some(id) = self.selected_conversation_id() else {
            return;
        };
        if let Err(e) = self.store.select(&id) {
            error!("failed to switch conversation: {e:#}");
        }
        self.load_current_conversation();
        self.focus = FocusPane::Transcript;
        self.scroll_transcript_to_bottom();
    }

    pub fn delete_selected_conversation(&mut self) {
        let Some(id) = self.selected_conversation_id() else {
            return;
        };
        match self.store.delete(&id) {
            Ok(was_active) => {
                if was_active {
                    self.transcript.clear();
                    self.transcript_scroll = 0;
                }
                self.sidebar_state.select(None);
            }
            Err(e) => error!("failed to delete conversation: {e:#}"),
        }
    }

    fn selected_conversation_id(&self) -> Option<String> {
        let index = self.sidebar_state.selected()?;
        self.store.sorted().get(index).map(|c| c.id.clone())
    }

    pub fn sidebar_nav_down(&mut self) {
        let len = self.store.sorted().len();
        if len > 0 {
            let i = self.sidebar_state.selected().unwrap_or(0);
            self.sidebar_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn sidebar_nav_up(&mut self) {
        let i = self.sidebar_state.selected().unwrap_or(0);
        self.sidebar_state.select(Some(i.saturating_sub(1)));
    }

    // --- Transcript scrolling --------------------------------------------

    pub fn scroll_down(&mut self) {
        self.transcript_scroll = self.transcript_scroll.saturating_add(1);
    }

    pub fn scroll_up(&mut self) {
        self.transcript_scroll = self.transcript_scroll.saturating_sub(1);
    }

    pub fn scroll_transcript_to_bottom(&mut self) {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for entry in &self.transcript {
            total_lines = total_lines.saturating_add(entry_line_count(entry, wrap_width));
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        if total_lines > visible_height {
            self.transcript_scroll = total_lines - visible_height;
        } else {
            self.transcript_scroll = 0;
        }
    }

    // --- Documents --------------------------------------------------------

    pub fn refresh_documents(&mut self) {
        if self.documents_task.is_some() {
            return;
        }
        let client = self.api.clone();
        self.documents_task = Some(tokio::spawn(async move { client.documents().await }));
    }

    pub fn set_documents(&mut self, infos: Vec<DocumentInfo>) {
        self.documents = infos.into_iter().map(Document::from_info).collect();
        let len = self.documents.len();
        if let Some(i) = self.library_state.selected() {
            if len == 0 {
                self.library_state.select(None);
            } else if i >= len {
                self.library_state.select(Some(len - 1));
            }
        }
    }

    pub fn library_nav_down(&mut self) {
        let len = self.documents.len();
        if len > 0 {
            let i = self.library_state.selected().unwrap_or(0);
            self.library_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn library_nav_up(&mut self) {
        let i = self.library_state.selected().unwrap_or(0);
        self.library_state.select(Some(i.saturating_sub(1)));
    }

    // --- Uploads ----------------------------------------------------------

    pub fn upload_in_progress(&self) -> bool {
        self.upload_rx.is_some()
    }

    /// Record a file that failed client-side validation. No request is made
    /// for it.
    pub fn reject_upload(&mut self, name: String) {
        self.upload_items.push(UploadItem {
            name,
            status: UploadStatus::Failed,
        });
        self.status = Some(format!(
            "Only {} files can be uploaded",
            crate::api::ACCEPTED_EXTENSION
        ));
    }

    /// Queue validated paths and spawn one task that uploads them in order.
    pub fn start_uploads(&mut self, paths: Vec<PathBuf>) {
        if paths.is_empty() || self.upload_in_progress() {
            return;
        }

        let base = self.upload_items.len();
        let mut jobs: Vec<(usize, PathBuf)> = Vec::new();
        for (offset, path) in paths.into_iter().enumerate() {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();
            self.upload_items.push(UploadItem {
                name,
                status: UploadStatus::Queued,
            });
            jobs.push((base + offset, path));
        }

        let client = self.api.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for (index, path) in jobs {
                if tx.send(UploadEvent::Started(index)).is_err() {
                    return;
                }
                let result = client.upload(&path).await;
                if tx.send(UploadEvent::Finished(index, result)).is_err() {
                    return;
                }
            }
        });
        self.upload_rx = Some(rx);
    }

    pub fn apply_upload_event(&mut self, event: UploadEvent) {
        match event {
            UploadEvent::Started(index) => {
                if let Some(item) = self.upload_items.get_mut(index) {
                    item.status = UploadStatus::Uploading;
                }
            }
            UploadEvent::Finished(index, Ok(receipt)) => {
                let name = match self.upload_items.get_mut(index) {
                    Some(item) => {
                        item.status = UploadStatus::Done {
                            chunks: receipt.total_chunks,
                        };
                        item.name.clone()
                    }
                    None => "unknown".to_string(),
                };
                self.documents
                    .push(Document::from_upload(name.clone(), &receipt));
                self.transcript.push(TranscriptEntry::Notice(format!(
                    "Uploaded \"{}\" ({} chunks).",
                    name, receipt.total_chunks
                )));
            }
            UploadEvent::Finished(index, Err(e)) => {
                error!("upload failed: {e:#}");
                if let Some(item) = self.upload_items.get_mut(index) {
                    item.status = UploadStatus::Failed;
                }
                self.status = Some("Something went wrong while uploading the file".to_string());
            }
        }
    }
}

/// Lines an entry occupies in the transcript, including wrapping, matching
/// how `ui::transcript_lines` lays it out. Used to scroll to the bottom.
pub fn entry_line_count(entry: &TranscriptEntry, wrap_width: usize) -> u16 {
    let wrap_width = wrap_width.max(1);
    let wrapped = |text: &str| -> u16 {
        let mut lines: u16 = 0;
        for line in text.lines() {
            // Char-based estimate. The paragraph wraps at word boundaries,
            // so this can be off by a line on text with long words.
            let chars = line.chars().count().max(1);
            lines += ((chars + wrap_width - 1) / wrap_width) as u16;
        }
        lines.max(1)
    };

    match entry {
        // Role line + content + trailing blank
        TranscriptEntry::User(content) => 1 + wrapped(content) + 1,
        TranscriptEntry::Assistant {
            content,
            sources,
            show_sources,
        } => {
            let mut lines = 1 + wrapped(content);
            if !sources.is_empty() {
                lines += 1; // collapsed "sources used" line
                if *show_sources {
                    for source in sources {
                        lines += 1 + wrapped(&source.preview);
                    }
                }
            }
            lines + 1
        }
        TranscriptEntry::Notice(content) => wrapped(content) + 1,
        // "AI:" + "Thinking..."
        TranscriptEntry::Pending(_) => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::store::ConversationStore;
    use tempfile::TempDir;

    fn test_app(dir: &TempDir) -> App {
        App {
            should_quit: false,
            screen: Screen::Chat,
            input_mode: InputMode::Normal,
            focus: FocusPane::Sidebar,

            input: String::new(),
            cursor: 0,
            transcript: Vec::new(),
            transcript_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            pending_queries: Vec::new(),
            next_query_seq: 0,

            sidebar_state: ListState::default(),

            documents: Vec::new(),
            library_state: ListState::default(),
            documents_task: None,

            upload_input: String::new(),
            upload_cursor: 0,
            upload_items: Vec::new(),
            upload_rx: None,

            status: None,
            animation_frame: 0,

            store: ConversationStore::fresh(dir.path().to_path_buf()),
            api: ApiClient::new("http://127.0.0.1:0"),
        }
    }

    #[test]
    fn test_successful_upload_adds_document_and_enables_chat() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        app.upload_items.push(UploadItem {
            name: "notes.txt".to_string(),
            status: UploadStatus::Uploading,
        });
        assert!(!app.chat_enabled());

        let receipt = UploadReceipt {
            document_id: "d1".to_string(),
            total_chunks: 4,
        };
        app.apply_upload_event(UploadEvent::Finished(0, Ok(receipt)));

        assert_eq!(app.documents.len(), 1);
        assert_eq!(app.documents[0].name, "notes.txt");
        assert_eq!(app.documents[0].chunk_count, 4);
        assert!(app.chat_enabled());
        assert_eq!(app.upload_items[0].status, UploadStatus::Done { chunks: 4 });
    }

    #[test]
    fn test_failed_upload_leaves_documents_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        app.upload_items.push(UploadItem {
            name: "notes.txt".to_string(),
            status: UploadStatus::Uploading,
        });

        app.apply_upload_event(UploadEvent::Finished(0, Err(anyhow::anyhow!("boom"))));

        assert!(app.documents.is_empty());
        assert!(!app.chat_enabled());
        assert_eq!(app.upload_items[0].status, UploadStatus::Failed);
        assert!(app.status.is_some());
    }

    #[test]
    fn test_entry_line_count_user() {
        let entry = TranscriptEntry::User("hello".to_string());
        // role line + one content line + blank
        assert_eq!(entry_line_count(&entry, 40), 3);
    }

    #[test]
    fn test_entry_line_count_wraps_long_lines() {
        let entry = TranscriptEntry::User("x".repeat(100));
        // 100 chars at width 40 -> 3 wrapped lines
        assert_eq!(entry_line_count(&entry, 40), 1 + 3 + 1);
    }

    #[test]
    fn test_entry_line_count_exact_width_line_is_one_line() {
        let entry = TranscriptEntry::User("y".repeat(40));
        // role line + exactly one content line + blank
        assert_eq!(entry_line_count(&entry, 40), 3);
    }

    #[test]
    fn test_entry_line_count_collapsed_vs_expanded_sources() {
        let source = Source {
            number: 1,
            title: Some("Doc A".to_string()),
            preview: "short preview".to_string(),
        };
        let collapsed = TranscriptEntry::Assistant {
            content: "answer".to_string(),
            sources: vec![source.clone()],
            show_sources: false,
        };
        let expanded = TranscriptEntry::Assistant {
            content: "answer".to_string(),
            sources: vec![source],
            show_sources: true,
        };

        let collapsed_lines = entry_line_count(&collapsed, 40);
        let expanded_lines = entry_line_count(&expanded, 40);
        // One label line plus one preview line more when expanded
        assert_eq!(expanded_lines, collapsed_lines + 2);
    }

    #[test]
    fn test_document_from_info_parses_rfc3339() {
        let info = DocumentInfo {
            id: "d1".to_string(),
            filename: "notes.txt".to_string(),
            total_chunks: 4,
            upload_date: Some("2026-08-20T10:00:00Z".to_string()),
        };
        let doc = Document::from_info(info);
        assert_eq!(doc.name, "notes.txt");
        assert_eq!(doc.chunk_count, 4);
        assert_eq!(doc.uploaded_at.to_rfc3339(), "2026-08-20T10:00:00+00:00");
    }
}
