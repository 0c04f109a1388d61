use chrono::{DateTime, Utc};
use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};
use crate::app::{App, FocusPane, InputMode, Screen, TranscriptEntry, UploadStatus};

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.screen {
        Screen::Chat => render_chat_screen(app, frame, body_area),
        Screen::Library => render_library_screen(app, frame, body_area),
        Screen::Upload => render_upload_screen(app, frame, body_area),
    }

    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let doc_count = app.documents.len();
    let doc_indicator = if doc_count > 0 {
        format!(" [{} documents]", doc_count)
    } else {
        String::new()
    };

    let title = Line::from(vec![
        Span::styled(" Nibras ", Style::default().fg(Color::Cyan).bold()),
        Span::styled("document Q&A", Style::default().fg(Color::White)),
        Span::styled(doc_indicator, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    // A pending status message takes over the whole footer
    if let Some(status) = &app.status {
        let footer = Paragraph::new(Span::styled(
            format!(" {} ", status),
            Style::default().bg(Color::Red).fg(Color::White).bold(),
        ));
        frame.render_widget(footer, area);
        return;
    }

    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match app.screen {
        Screen::Chat => " CHAT ",
        Screen::Library => " LIBRARY ",
        Screen::Upload => " UPLOAD ",
    };

    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints = match (app.screen, app.input_mode) {
        (Screen::Chat, InputMode::Normal) => {
            let mut hints = vec![
                Span::styled(" Tab ", key_style),
                Span::styled(" focus ", label_style),
                Span::styled(" j/k ", key_style),
            ];
            if app.focus == FocusPane::Sidebar {
                hints.push(Span::styled(" conversations ", label_style));
                hints.extend(vec![
                    Span::styled(" Enter ", key_style),
                    Span::styled(" open ", label_style),
                    Span::styled(" d ", key_style),
                    Span::styled(" delete ", label_style),
                ]);
            } else {
                hints.push(Span::styled(" scroll ", label_style));
                hints.extend(vec![
                    Span::styled(" s ", key_style),
                    Span::styled(" sources ", label_style),
                ]);
            }
            hints.extend(vec![
                Span::styled(" i ", key_style),
                Span::styled(" ask ", label_style),
                Span::styled(" n ", key_style),
                Span::styled(" new chat ", label_style),
                Span::styled(" u ", key_style),
                Span::styled(" upload ", label_style),
                Span::styled(" l ", key_style),
                Span::styled(" library ", label_style),
                Span::styled(" q ", key_style),
                Span::styled(" quit ", label_style),
            ]);
            hints
        }
        (Screen::Chat, InputMode::Editing) => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" stop typing ", label_style),
        ],
        (Screen::Library, _) => vec![
            Span::styled(" j/k ", key_style),
            Span::styled(" nav ", label_style),
            Span::styled(" r ", key_style),
            Span::styled(" refresh ", label_style),
            Span::styled(" u ", key_style),
            Span::styled(" upload ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" chat ", label_style),
        ],
        (Screen::Upload, _) => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" upload ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" chat ", label_style),
        ],
    };

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [sidebar_area, chat_area] = Layout::horizontal([
        Constraint::Length(30),
        Constraint::Min(0),
    ])
    .areas(area);

    render_sidebar(app, frame, sidebar_area);

    let [transcript_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(chat_area);

    // Store transcript dimensions for scroll calculations (minus borders)
    app.chat_height = transcript_area.height.saturating_sub(2);
    app.chat_width = transcript_area.width.saturating_sub(2);

    render_transcript(app, frame, transcript_area);
    render_chat_input(app, frame, input_area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect) {
    let sidebar_focused = app.focus == FocusPane::Sidebar && app.input_mode == InputMode::Normal;
    let border_color = if sidebar_focused { Color::Cyan } else { Color::DarkGray };

    let items: Vec<ListItem> = {
        let current_id = app.store.current_id().to_string();
        app.store
            .sorted()
            .iter()
            .map(|conversation| {
                let marker = if conversation.id == current_id { "* " } else { "  " };
                let style = if conversation.id == current_id {
                    Style::default().fg(Color::Cyan)
                } else {
                    Style::default()
                };
                ListItem::new(Line::from(Span::styled(
                    format!("{}{}", marker, conversation.title),
                    style,
                )))
            })
            .collect()
    };

    let count = items.len();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" Conversations ({}) ", count));

    if count == 0 {
        let placeholder = Paragraph::new("No conversations yet.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    let transcript_focused =
        app.focus == FocusPane::Transcript && app.input_mode == InputMode::Normal;
    let border_color = if transcript_focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Chat ");

    let text = if app.transcript.is_empty() {
        let welcome = if app.chat_enabled() {
            "Ask questions about your uploaded documents."
        } else {
            "Welcome to Nibras.\nPress 'u' to upload a document, then ask away."
        };
        Text::from(
            welcome
                .lines()
                .map(|l| {
                    Line::from(Span::styled(
                        l.to_string(),
                        Style::default().fg(Color::DarkGray),
                    ))
                })
                .collect::<Vec<_>>(),
        )
    } else {
        Text::from(transcript_lines(app))
    };

    let transcript = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: true })
        .scroll((app.transcript_scroll, 0));

    frame.render_widget(transcript, area);
}

/// Project the transcript entries into styled lines. Must stay in step with
/// `app::entry_line_count` for bottom-scrolling to land correctly.
fn transcript_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = Vec::new();

    for entry in &app.transcript {
        match entry {
            TranscriptEntry::User(content) => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
                for line in content.lines() {
                    lines.push(Line::from(line.to_string()));
                }
                lines.push(Line::default());
            }
            TranscriptEntry::Assistant {
                content,
                sources,
                show_sources,
            } => {
                lines.push(Line::from(Span::styled(
                    "AI:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                for line in content.lines() {
                    lines.push(Line::from(line.to_string()));
                }
                if !sources.is_empty() {
                    let arrow = if *show_sources { "▾" } else { "▸" };
                    lines.push(Line::from(Span::styled(
                        format!("{} Sources used ({})", arrow, sources.len()),
                        Style::default().fg(Color::Magenta),
                    )));
                    if *show_sources {
                        for source in sources {
                            lines.push(Line::from(Span::styled(
                                source.label(),
                                Style::default()
                                    .fg(Color::Magenta)
                                    .add_modifier(Modifier::BOLD),
                            )));
                            lines.push(Line::from(Span::styled(
                                format!("{}...", source.preview.replace('\n', " ")),
                                Style::default().fg(Color::DarkGray),
                            )));
                        }
                    }
                }
                lines.push(Line::default());
            }
            TranscriptEntry::Notice(content) => {
                lines.push(Line::from(Span::styled(
                    content.clone(),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
                lines.push(Line::default());
            }
            TranscriptEntry::Pending(_) => {
                lines.push(Line::from(Span::styled(
                    "AI:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                // Animated ellipsis: cycles through ".", "..", "..."
                let dots = ".".repeat((app.animation_frame as usize) + 1);
                lines.push(Line::from(Span::styled(
                    format!("Thinking{}", dots),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            }
        }
    }

    lines
}

fn render_chat_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing && app.screen == Screen::Chat;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };

    let title = if app.chat_enabled() {
        " Ask (i to type) "
    } else {
        " Ask (upload a document first) "
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Horizontal scroll keeps the cursor visible in a one-line input
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let style = if app.chat_enabled() {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let input = Paragraph::new(visible_text).style(style).block(block);
    frame.render_widget(input, area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_library_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let refreshing = app.documents_task.is_some();
    let title = if refreshing {
        format!(" Documents ({}) — refreshing... ", app.documents.len())
    } else {
        format!(" Documents ({}) ", app.documents.len())
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(title);

    if app.documents.is_empty() {
        let placeholder = Paragraph::new("No documents yet.\nPress 'u' to upload one.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let now = Utc::now();
    let items: Vec<ListItem> = app
        .documents
        .iter()
        .map(|doc| {
            ListItem::new(vec![
                Line::from(Span::styled(
                    doc.name.clone(),
                    Style::default().fg(Color::Yellow).bold(),
                )),
                Line::from(Span::styled(
                    format!(
                        "{} chunks • {}",
                        doc.chunk_count,
                        relative_upload_date(doc.uploaded_at, now)
                    ),
                    Style::default().fg(Color::DarkGray),
                )),
            ])
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.library_state);
}

fn render_upload_screen(app: &App, frame: &mut Frame, area: Rect) {
    let [input_area, items_area] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
    ])
    .areas(area);

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" File path (.txt) ");

    let inner_width = input_area.width.saturating_sub(2) as usize;
    let cursor_pos = app.upload_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .upload_input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);
    frame.render_widget(input, input_area);

    frame.set_cursor_position((input_area.x + (cursor_pos - scroll_offset) as u16 + 1, input_area.y + 1));

    let items_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Uploads ");

    if app.upload_items.is_empty() {
        let placeholder = Paragraph::new(
            "Enter the path of a text file and press Enter.\nMultiple paths can be separated by spaces; files upload one at a time.",
        )
        .style(Style::default().fg(Color::DarkGray))
        .block(items_block)
        .wrap(Wrap { trim: true });
        frame.render_widget(placeholder, items_area);
        return;
    }

    let lines: Vec<Line> = app
        .upload_items
        .iter()
        .map(|item| {
            let (status_text, status_style) = match item.status {
                UploadStatus::Queued => (
                    "queued".to_string(),
                    Style::default().fg(Color::DarkGray),
                ),
                UploadStatus::Uploading => {
                    let dots = ".".repeat((app.animation_frame as usize) + 1);
                    (
                        format!("uploading{}", dots),
                        Style::default().fg(Color::Yellow),
                    )
                }
                UploadStatus::Done { chunks } => (
                    format!("done ({} chunks)", chunks),
                    Style::default().fg(Color::Green),
                ),
                UploadStatus::Failed => (
                    "failed".to_string(),
                    Style::default().fg(Color::Red),
                ),
            };

            Line::from(vec![
                Span::styled(format!(" {} ", item.name), Style::default().bold()),
                Span::styled(status_text, status_style),
            ])
        })
        .collect();

    let list = Paragraph::new(Text::from(lines)).block(items_block);
    frame.render_widget(list, items_area);
}

/// Approximate relative age for the document list: minutes or hours ago,
/// falling back to a plain date after a day.
pub fn relative_upload_date(date: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - date).num_minutes();

    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return format!("{} min ago", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{} h ago", hours);
    }

    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn test_relative_upload_date_just_now() {
        let now = at(1_000_000);
        assert_eq!(relative_upload_date(at(1_000_000 - 30), now), "just now");
    }

    #[test]
    fn test_relative_upload_date_minutes() {
        let now = at(1_000_000);
        assert_eq!(relative_upload_date(at(1_000_000 - 5 * 60), now), "5 min ago");
        assert_eq!(
            relative_upload_date(at(1_000_000 - 59 * 60), now),
            "59 min ago"
        );
    }

    #[test]
    fn test_relative_upload_date_hours() {
        let now = at(1_000_000);
        assert_eq!(
            relative_upload_date(at(1_000_000 - 3 * 3600), now),
            "3 h ago"
        );
        assert_eq!(
            relative_upload_date(at(1_000_000 - 23 * 3600), now),
            "23 h ago"
        );
    }

    #[test]
    fn test_relative_upload_date_falls_back_to_date() {
        let now = Utc.with_ymd_and_hms(2026, 8, 24, 12, 0, 0).unwrap();
        let date = Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap();
        assert_eq!(relative_upload_date(date, now), "2026-08-20");
    }
}
