use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::path::PathBuf;

use crate::api;
use crate::app::{App, FocusPane, InputMode, Screen};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await?,
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
            poll_background(app).await;
        }
    }
    Ok(())
}

/// Drain finished network work: resolved queries, the document list fetch,
/// and upload progress. Runs on every tick so results land promptly even
/// when the user is idle.
async fn poll_background(app: &mut App) {
    let mut i = 0;
    while i < app.pending_queries.len() {
        if app.pending_queries[i].task.is_finished() {
            let pending = app.pending_queries.remove(i);
            let result = match pending.task.await {
                Ok(result) => result,
                Err(join_err) => Err(anyhow::anyhow!("query task failed: {join_err}")),
            };
            app.finish_query(pending.seq, result);
        } else {
            i += 1;
        }
    }

    if app
        .documents_task
        .as_ref()
        .is_some_and(|task| task.is_finished())
    {
        let Some(task) = app.documents_task.take() else {
            return;
        };
        match task.await {
            Ok(Ok(infos)) => app.set_documents(infos),
            Ok(Err(e)) => {
                tracing::warn!("failed to refresh document list: {e:#}");
                app.status = Some("Could not load documents".to_string());
            }
            Err(join_err) => {
                tracing::warn!("document list task failed: {join_err}");
            }
        }
    }

    let mut upload_events = Vec::new();
    let mut batch_done = false;
    if let Some(rx) = app.upload_rx.as_mut() {
        loop {
            match rx.try_recv() {
                Ok(event) => upload_events.push(event),
                Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
                Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                    batch_done = true;
                    break;
                }
            }
        }
    }
    for event in upload_events {
        app.apply_upload_event(event);
    }
    if batch_done {
        app.upload_rx = None;
    }
}

async fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    // Global quit
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }

    // Status messages live until the next key press
    app.status = None;

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }

    Ok(())
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match app.screen {
        Screen::Chat => handle_chat_normal(app, key),
        Screen::Library => handle_library_normal(app, key),
        // The upload screen is always in editing mode for its path input
        Screen::Upload => {}
    }
}

fn handle_chat_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        // Tab cycles: Sidebar -> Input -> Transcript -> Sidebar.
        // A disabled chat input (no documents yet) is skipped.
        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Sidebar => {
                    if app.chat_enabled() {
                        FocusPane::Input
                    } else {
                        FocusPane::Transcript
                    }
                }
                FocusPane::Input => FocusPane::Transcript,
                FocusPane::Transcript => FocusPane::Sidebar,
            };

            if app.focus == FocusPane::Input {
                app.input_mode = InputMode::Editing;
                app.cursor = app.input.chars().count();
            }
        }

        // Jump straight into the input box
        KeyCode::Char('i') | KeyCode::Char('a') => {
            if app.chat_enabled() {
                app.focus = FocusPane::Input;
                app.input_mode = InputMode::Editing;
                app.cursor = app.input.chars().count();
            } else {
                app.status = Some("Upload a document before asking questions".to_string());
            }
        }

        KeyCode::Char('n') => app.start_new_chat(),

        KeyCode::Char('u') => {
            app.screen = Screen::Upload;
            app.input_mode = InputMode::Editing;
        }

        KeyCode::Char('l') => {
            app.screen = Screen::Library;
            app.refresh_documents();
        }

        KeyCode::Char('j') | KeyCode::Down => match app.focus {
            FocusPane::Sidebar => app.sidebar_nav_down(),
            _ => app.scroll_down(),
        },
        KeyCode::Char('k') | KeyCode::Up => match app.focus {
            FocusPane::Sidebar => app.sidebar_nav_up(),
            _ => app.scroll_up(),
        },

        KeyCode::Char('g') => app.transcript_scroll = 0,
        KeyCode::Char('G') => app.scroll_transcript_to_bottom(),

        // Expand/collapse the sources panel under the latest answer
        KeyCode::Char('s') => app.toggle_last_sources(),

        KeyCode::Enter => match app.focus {
            FocusPane::Sidebar => app.open_selected_conversation(),
            FocusPane::Transcript => app.toggle_last_sources(),
            FocusPane::Input => {}
        },

        KeyCode::Char('d') => {
            if app.focus == FocusPane::Sidebar {
                app.delete_selected_conversation();
            }
        }

        _ => {}
    }
}

fn handle_library_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Esc => app.screen = Screen::Chat,
        KeyCode::Char('j') | KeyCode::Down => app.library_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.library_nav_up(),
        KeyCode::Char('r') => app.refresh_documents(),
        KeyCode::Char('u') => {
            app.screen = Screen::Upload;
            app.input_mode = InputMode::Editing;
        }
        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match app.screen {
        Screen::Chat => handle_chat_editing(app, key),
        Screen::Upload => handle_upload_editing(app, key),
        Screen::Library => {}
    }
}

fn handle_chat_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
            app.focus = FocusPane::Transcript;
        }
        KeyCode::Enter => {
            app.send_query();
        }
        KeyCode::Backspace => {
            if app.cursor > 0 {
                app.cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.cursor = app.cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.cursor = (app.cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.cursor = 0;
        }
        KeyCode::End => {
            app.cursor = app.input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.input, app.cursor);
            app.input.insert(byte_pos, c);
            app.cursor += 1;
        }
        _ => {}
    }
}

fn handle_upload_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.screen = Screen::Chat;
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            submit_upload_paths(app);
        }
        KeyCode::Backspace => {
            if app.upload_cursor > 0 {
                app.upload_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.upload_input, app.upload_cursor);
                app.upload_input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.upload_cursor = app.upload_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.upload_input.chars().count();
            app.upload_cursor = (app.upload_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.upload_cursor = 0;
        }
        KeyCode::End => {
            app.upload_cursor = app.upload_input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.upload_input, app.upload_cursor);
            app.upload_input.insert(byte_pos, c);
            app.upload_cursor += 1;
        }
        _ => {}
    }
}

/// Validate the entered paths and queue the accepted ones. Rejected files
/// (wrong extension) are marked failed immediately without any request.
fn submit_upload_paths(app: &mut App) {
    let entered = app.upload_input.trim().to_string();
    if entered.is_empty() {
        return;
    }
    if app.upload_in_progress() {
        app.status = Some("An upload is already in progress".to_string());
        return;
    }

    app.upload_input.clear();
    app.upload_cursor = 0;

    let mut accepted: Vec<PathBuf> = Vec::new();
    for raw in entered.split_whitespace() {
        let path = PathBuf::from(raw);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(raw)
            .to_string();

        if api::accepted_upload(&name) {
            accepted.push(path);
        } else {
            app.reject_upload(name);
        }
    }

    app.start_uploads(accepted);
}
