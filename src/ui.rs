use crate::{
    app::{
        App, Dialog, DialogChoice, DialogKind, DownloadPhase, InputMode, InputPurpose, LogLevel,
        SelectionSummary, ToastLevel,
    },
    bbcode,
    library::{self, ModRecord},
};
use anyhow::Result;
use crossterm::{
    event::{self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, Gauge, List, ListItem, ListState, Padding, Paragraph, Wrap},
};
use std::{
    io,
    time::{Duration, Instant},
};

const SIDE_PANEL_WIDTH: u16 = 50;
const DESCRIPTION_PREVIEW_LINES: usize = 12;

#[derive(Clone)]
struct Theme {
    accent: Color,
    accent_soft: Color,
    border: Color,
    text: Color,
    muted: Color,
    success: Color,
    warning: Color,
    error: Color,
    header_bg: Color,
    log_bg: Color,
}

impl Theme {
    fn new() -> Self {
        Self {
            accent: Color::Rgb(120, 190, 255),
            accent_soft: Color::Rgb(70, 110, 160),
            border: Color::Rgb(65, 75, 90),
            text: Color::Rgb(220, 230, 240),
            muted: Color::Rgb(135, 145, 155),
            success: Color::Rgb(120, 220, 140),
            warning: Color::Rgb(230, 200, 120),
            error: Color::Rgb(235, 100, 95),
            header_bg: Color::Rgb(22, 28, 36),
            log_bg: Color::Rgb(16, 20, 26),
        }
    }

    fn block(&self, title: &'static str) -> Block<'static> {
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(self.border))
            .title(Span::styled(
                title,
                Style::default()
                    .fg(self.accent)
                    .add_modifier(Modifier::BOLD),
            ))
    }

    fn panel(&self, title: &'static str) -> Block<'static> {
        self.block(title).padding(Padding {
            left: 1,
            right: 1,
            top: 1,
            bottom: 0,
        })
    }

    fn panel_dense(&self, title: &'static str) -> Block<'static> {
        self.block(title).padding(Padding {
            left: 0,
            right: 1,
            top: 1,
            bottom: 0,
        })
    }
}

pub fn run(app: &mut App) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), DisableBracketedPaste, LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_loop(terminal: &mut Terminal<impl Backend>, app: &mut App) -> Result<()> {
    loop {
        app.tick();
        terminal.draw(|frame| draw(frame, app))?;

        if app.should_quit {
            break;
        }

        if event::poll(app.poll_interval())? {
            match event::read()? {
                Event::Key(key) if key.kind != KeyEventKind::Release => {
                    handle_key(app, key)?;
                }
                Event::Paste(text) => handle_paste(app, text),
                _ => {}
            }
        }
    }

    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    if app.dialog.is_some() {
        return handle_dialog_mode(app, key);
    }

    let mode = std::mem::replace(&mut app.input_mode, InputMode::Normal);
    match mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing {
            prompt,
            mut buffer,
            purpose,
        } => {
            handle_input_mode(app, key, &mut buffer, purpose, prompt);
            Ok(())
        }
    }
}

fn handle_dialog_mode(app: &mut App, key: KeyEvent) -> Result<()> {
    let completed = app
        .dialog
        .as_ref()
        .is_some_and(|dialog| matches!(dialog.kind, DialogKind::DownloadComplete));
    let has_toggle = app
        .dialog
        .as_ref()
        .is_some_and(|dialog| dialog.toggle.is_some());
    match key.code {
        KeyCode::Left | KeyCode::Char('h') | KeyCode::Char('H') => {
            app.dialog_choice_left();
        }
        KeyCode::Right | KeyCode::Char('l') | KeyCode::Char('L') | KeyCode::Tab => {
            app.dialog_choice_right();
        }
        KeyCode::Up | KeyCode::Char('k') => app.dialog_scroll_by(-1),
        KeyCode::Down | KeyCode::Char('j') => app.dialog_scroll_by(1),
        KeyCode::Char('y') | KeyCode::Char('Y') => {
            app.dialog_set_choice(DialogChoice::Yes);
        }
        KeyCode::Char('n') | KeyCode::Char('N') => {
            app.dialog_set_choice(DialogChoice::No);
        }
        KeyCode::Char('c') | KeyCode::Char('C') if completed => app.copy_failed_ids(),
        KeyCode::Char('d') | KeyCode::Char('D') if completed => app.copy_failed_details(),
        KeyCode::Char(' ') if has_toggle => app.dialog_toggle(),
        KeyCode::Enter | KeyCode::Char(' ') => {
            app.dialog_confirm();
        }
        KeyCode::Esc => app.dialog_dismiss(),
        _ => {}
    }
    Ok(())
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) -> Result<()> {
    match (key.code, key.modifiers) {
        (KeyCode::Char('q'), _) | (KeyCode::Char('Q'), _) => app.should_quit = true,
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => app.should_quit = true,
        (KeyCode::Char('a'), _) | (KeyCode::Char('A'), _) => {
            if app.is_busy() {
                app.set_toast("Download in progress", ToastLevel::Warn, Duration::from_secs(2));
            } else {
                app.input_mode = InputMode::Editing {
                    prompt: "Add mod (URL or ID)".to_string(),
                    buffer: String::new(),
                    purpose: InputPurpose::AddMod,
                };
            }
        }
        (KeyCode::Char('/'), _) | (KeyCode::Char('f'), _) => {
            app.input_mode = InputMode::Editing {
                prompt: "Filter".to_string(),
                buffer: app.filter.text.clone(),
                purpose: InputPurpose::FilterMods,
            };
        }
        (KeyCode::Char('m'), _) => app.toggle_show_main(),
        (KeyCode::Char('p'), _) => app.toggle_show_dependencies(),
        (KeyCode::Char('c'), _) => app.clear_filter(),
        (KeyCode::Up, _) | (KeyCode::Char('k'), _) => app.move_cursor(-1),
        (KeyCode::Down, _) | (KeyCode::Char('j'), _) => app.move_cursor(1),
        (KeyCode::Home, _) | (KeyCode::Char('g'), _) => app.move_cursor(isize::MIN),
        (KeyCode::End, _) | (KeyCode::Char('G'), _) => app.move_cursor(isize::MAX),
        (KeyCode::Char(' '), _) => app.toggle_selected(),
        (KeyCode::Char('*'), _) => app.select_all_visible(),
        (KeyCode::Esc, _) => app.clear_selection(),
        (KeyCode::Char('x'), _) | (KeyCode::Delete, _) => app.delete_selected(),
        (KeyCode::Char('d'), _) => app.download_selected(),
        (KeyCode::Char('D'), _) => app.download_all(),
        (KeyCode::Char('r'), _) | (KeyCode::Char('R'), _) => app.refresh_selected(),
        (KeyCode::Char('v'), _) | (KeyCode::Enter, _) => app.open_description(),
        (KeyCode::PageUp, _) => app.scroll_log_up(3),
        (KeyCode::PageDown, _) => app.scroll_log_down(3),
        _ => {}
    }
    Ok(())
}

fn handle_input_mode(
    app: &mut App,
    key: KeyEvent,
    buffer: &mut String,
    purpose: InputPurpose,
    prompt: String,
) {
    let mut keep_editing = true;
    match key.code {
        KeyCode::Esc => {
            keep_editing = false;
            match purpose {
                InputPurpose::AddMod => {
                    app.set_toast("Add cancelled", ToastLevel::Warn, Duration::from_secs(2));
                }
                InputPurpose::FilterMods => {
                    app.set_filter_text("");
                    app.set_toast("Filter cleared", ToastLevel::Info, Duration::from_secs(2));
                }
            }
        }
        KeyCode::Enter => {
            keep_editing = false;
            if purpose == InputPurpose::AddMod {
                app.add_input(buffer);
            }
        }
        KeyCode::Char(c) => {
            if key.modifiers.contains(KeyModifiers::CONTROL)
                || key.modifiers.contains(KeyModifiers::ALT)
            {
                return restore_editing(app, buffer, purpose, prompt);
            }
            buffer.push(c);
            if purpose == InputPurpose::FilterMods {
                app.set_filter_text(buffer);
            }
        }
        KeyCode::Backspace => {
            buffer.pop();
            if purpose == InputPurpose::FilterMods {
                app.set_filter_text(buffer);
            }
        }
        _ => {}
    }

    if keep_editing {
        restore_editing(app, buffer, purpose, prompt);
    }
}

fn restore_editing(app: &mut App, buffer: &str, purpose: InputPurpose, prompt: String) {
    app.input_mode = InputMode::Editing {
        prompt,
        buffer: buffer.to_string(),
        purpose,
    };
}

/// Pasted text goes to the open editor, otherwise every token is added.
fn handle_paste(app: &mut App, text: String) {
    if app.dialog.is_some() {
        return;
    }
    if let InputMode::Editing {
        buffer, purpose, ..
    } = &mut app.input_mode
    {
        buffer.push_str(text.trim());
        if *purpose == InputPurpose::FilterMods {
            let value = buffer.clone();
            app.set_filter_text(&value);
        }
        return;
    }

    let mut added = 0;
    for token in text.split_whitespace() {
        if app.add_input(token).is_some() {
            added += 1;
        }
        if app.dialog.is_some() {
            break;
        }
    }
    if added > 1 {
        app.status = format!("Added {added} mods, fetching info...");
    }
}

fn hint(app: &App) -> &'static str {
    if app.is_busy() {
        "q quit | j/k move | / filter"
    } else {
        "a add | d download | D all | x delete | space select | / filter | q quit"
    }
}

fn draw(frame: &mut Frame<'_>, app: &App) {
    let area = frame.size();
    let theme = Theme::new();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(10), Constraint::Length(11)])
        .split(area);

    let phase_label = match app.phase {
        DownloadPhase::Idle => "",
        DownloadPhase::PreparingDependencies => "  RESOLVING",
        DownloadPhase::AwaitingConfirmation => "  CONFIRM",
        DownloadPhase::Downloading => "  DOWNLOADING",
    };
    let lookups = app.workers_active();
    let header = Paragraph::new(vec![
        Line::from(vec![
            Span::styled(
                "Workshop Downloader",
                Style::default()
                    .fg(theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                phase_label,
                Style::default().fg(theme.warning).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
        Line::from(vec![
            Span::styled("Mods: ", Style::default().fg(theme.muted)),
            Span::styled(app.total_mods.to_string(), Style::default().fg(theme.text)),
            Span::raw("   "),
            Span::styled("Selected: ", Style::default().fg(theme.muted)),
            Span::styled(
                app.selected.len().to_string(),
                Style::default().fg(theme.success).add_modifier(Modifier::BOLD),
            ),
            Span::raw("   "),
            Span::styled(
                app.filter_summary(),
                Style::default().fg(if app.filter.is_active() {
                    theme.warning
                } else {
                    theme.muted
                }),
            ),
            if lookups > 0 {
                Span::styled(
                    format!("   Working: {lookups}"),
                    Style::default().fg(theme.muted),
                )
            } else {
                Span::raw("")
            },
        ]),
    ])
    .style(Style::default().bg(theme.header_bg))
    .alignment(Alignment::Center);
    frame.render_widget(header, chunks[0]);

    let body_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(30), Constraint::Length(SIDE_PANEL_WIDTH)])
        .split(chunks[1]);

    if app.rows.is_empty() {
        let message = if app.total_mods == 0 {
            "Press a or paste a Workshop URL to add a mod."
        } else {
            "No mods match the current filter."
        };
        let empty = Paragraph::new(message)
            .style(Style::default().fg(theme.muted))
            .block(theme.panel_dense("Mods"))
            .alignment(Alignment::Center);
        frame.render_widget(empty, body_chunks[0]);
    } else {
        let list = List::new(build_mod_items(app, &theme))
            .block(theme.panel_dense("Mods"))
            .highlight_style(
                Style::default()
                    .bg(theme.accent_soft)
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol(">");
        let mut state = ListState::default();
        state.select(Some(app.cursor));
        frame.render_stateful_widget(list, body_chunks[0], &mut state);
    }

    let details_block = theme.panel("Mod Info");
    let details_inner = details_block.inner(body_chunks[1]);
    let details = Paragraph::new(build_details(app, &theme, details_inner.width as usize))
        .style(Style::default().fg(theme.text))
        .block(details_block)
        .wrap(Wrap { trim: false });
    frame.render_widget(details, body_chunks[1]);

    let footer_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Length(7)])
        .split(chunks[2]);

    let status_block = theme.panel("Status");
    let status_inner = status_block.inner(footer_chunks[0]);
    let footer = Paragraph::new(status_bar_line(app, status_inner.width))
        .style(Style::default().fg(theme.text))
        .block(status_block);
    frame.render_widget(footer, footer_chunks[0]);

    let log_area = footer_chunks[1];
    let log_block = theme.panel("Log").style(Style::default().bg(theme.log_bg));
    let log_inner = log_block.inner(log_area);
    let log_lines = build_log_lines(app, &theme, log_inner.height as usize);
    let log = Paragraph::new(log_lines)
        .style(Style::default().fg(theme.text).bg(theme.log_bg))
        .block(log_block);
    frame.render_widget(log, log_area);

    if app.download.is_some() {
        draw_download(frame, app, &theme);
    }
    if let Some(dialog) = &app.dialog {
        let has_failures = app
            .last_result
            .as_ref()
            .is_some_and(|result| !result.failed.is_empty());
        draw_dialog(frame, dialog, &theme, has_failures);
    }
    draw_toast(frame, app, &theme, chunks[1]);
}

fn build_mod_items(app: &App, theme: &Theme) -> Vec<ListItem<'static>> {
    app.rows
        .iter()
        .map(|row| {
            let marker = if app.selected.contains(&row.id) {
                "[x] "
            } else {
                "[ ] "
            };
            let indent = "  ".repeat(row.depth);
            let branch = if row.depth > 0 || row.is_dependency {
                "├─ "
            } else {
                ""
            };
            let title_style = if row.has_error {
                Style::default().fg(theme.error)
            } else if row.pending {
                Style::default().fg(theme.muted)
            } else {
                Style::default().fg(theme.text)
            };
            let mut spans = vec![
                Span::styled(marker, Style::default().fg(theme.accent)),
                Span::raw(format!("{indent}{branch}")),
                Span::styled(row.title.clone(), title_style),
            ];
            if row.is_dependency {
                spans.push(Span::styled(" (dependency)", Style::default().fg(theme.muted)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect()
}

fn status_bar_line(app: &App, width: u16) -> String {
    let width = width as usize;
    let (left, right) = match &app.input_mode {
        InputMode::Normal => (format!("Status: {}", app.status), hint(app).to_string()),
        InputMode::Editing { prompt, buffer, .. } => (
            format!("{prompt}: {buffer}"),
            "Enter confirm | Esc cancel".to_string(),
        ),
    };

    if width == 0 {
        return String::new();
    }

    if left.len() + right.len() + 1 > width {
        let available = width.saturating_sub(left.len() + 1);
        let mut trimmed_right = right;
        if trimmed_right.len() > available {
            trimmed_right.truncate(available);
        }
        return format!("{left} {trimmed_right}");
    }

    let spaces = width - left.len() - right.len();
    format!("{left}{}{}", " ".repeat(spaces), right)
}

fn build_log_lines(app: &App, theme: &Theme, height: usize) -> Vec<Line<'static>> {
    if height == 0 {
        return Vec::new();
    }

    if app.logs.is_empty() {
        return vec![Line::from(Span::styled(
            "No recent events.",
            Style::default().fg(theme.muted),
        ))];
    }

    let total = app.logs.len();
    let view = height.max(1);
    let max_scroll = total.saturating_sub(view);
    let scroll = app.log_scroll.min(max_scroll);
    let start = total.saturating_sub(view + scroll);
    let end = (start + view).min(total);

    app.logs[start..end]
        .iter()
        .map(|entry| {
            let (label, color) = match entry.level {
                LogLevel::Info => ("[i]", theme.accent),
                LogLevel::Warn => ("[!]", theme.warning),
                LogLevel::Error => ("[x]", theme.error),
            };
            Line::from(vec![
                Span::styled(entry.stamp.clone(), Style::default().fg(theme.muted)),
                Span::raw(" "),
                Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
                Span::raw(" "),
                Span::styled(entry.message.clone(), Style::default().fg(theme.text)),
            ])
        })
        .collect()
}

fn build_details(app: &App, theme: &Theme, width: usize) -> Vec<Line<'static>> {
    let focused = app.focused_records();
    match focused.as_slice() {
        [] => vec![Line::from(Span::styled(
            "No mod selected.",
            Style::default().fg(theme.muted),
        ))],
        [record] => build_single_details(app, record, theme, width),
        records => {
            let mut lines: Vec<Line<'static>> = SelectionSummary::of(records)
                .lines()
                .into_iter()
                .map(Line::from)
                .collect();
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                "Select a single mod to view detailed information",
                Style::default().fg(theme.muted),
            )));
            lines
        }
    }
}

fn build_single_details(
    app: &App,
    record: &ModRecord,
    theme: &Theme,
    width: usize,
) -> Vec<Line<'static>> {
    let info = &record.info;
    if info.is_placeholder() {
        return vec![Line::from(Span::styled(
            "Fetching details...",
            Style::default().fg(theme.muted),
        ))];
    }
    if let Some(err) = &info.error {
        let mut lines = Vec::new();
        push_wrapped_kv(
            &mut lines,
            "Error fetching info",
            err,
            Style::default().fg(theme.error),
            Style::default().fg(theme.text),
            width,
        );
        return lines;
    }

    let mut lines = Vec::new();
    let label_style = Style::default().fg(theme.muted);
    let value_style = Style::default().fg(theme.text);
    let app_id = info
        .app_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let size = if info.file_size > 0 {
        library::format_size(info.file_size)
    } else {
        "N/A".to_string()
    };
    push_wrapped_kv(&mut lines, "Title", &info.title, label_style, value_style, width);
    push_wrapped_kv(&mut lines, "ID", &record.id, label_style, value_style, width);
    push_wrapped_kv(&mut lines, "App ID", &app_id, label_style, value_style, width);
    push_wrapped_kv(&mut lines, "URL", &record.url, label_style, value_style, width);
    push_wrapped_kv(&mut lines, "Size", &size, label_style, value_style, width);

    let repository = app.repository();
    if !info.dependencies.is_empty() {
        let titles: Vec<String> = info
            .dependencies
            .iter()
            .map(|id| {
                repository
                    .get(id)
                    .map(|dep| dep.display_title().to_string())
                    .unwrap_or_else(|| id.clone())
            })
            .collect();
        push_wrapped_kv(&mut lines, "Requires", &titles.join(", "), label_style, value_style, width);
    }
    let dependents: Vec<String> = repository
        .find_dependents(&record.id)
        .iter()
        .map(|dependent| dependent.display_title().to_string())
        .collect();
    if !dependents.is_empty() {
        push_wrapped_kv(
            &mut lines,
            "Required by",
            &dependents.join(", "),
            label_style,
            value_style,
            width,
        );
    }

    lines.push(Line::from(""));
    if info.description.trim().is_empty() {
        lines.push(Line::from(Span::styled(
            "[No description available]",
            Style::default().fg(theme.muted),
        )));
        return lines;
    }
    let plain = bbcode::to_plain_text(&info.description);
    let preview: Vec<String> = plain
        .lines()
        .filter(|line| !line.trim().is_empty())
        .flat_map(|line| wrap_text(line, width))
        .take(DESCRIPTION_PREVIEW_LINES)
        .collect();
    for line in preview {
        lines.push(Line::from(Span::styled(line, value_style)));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "v: open full description",
        Style::default().fg(theme.accent),
    )));
    lines
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(2)).max(1);
    let height = height.min(area.height.saturating_sub(2)).max(1);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn draw_download(frame: &mut Frame<'_>, app: &App, theme: &Theme) {
    let Some(download) = &app.download else {
        return;
    };
    let area = frame.size();
    let panel = centered(
        area,
        area.width.saturating_mul(3) / 4,
        area.height.saturating_mul(2) / 3,
    );
    frame.render_widget(Clear, panel);
    let block = theme
        .panel("Download Progress")
        .style(Style::default().bg(theme.header_bg));
    let inner = block.inner(panel);
    frame.render_widget(block, panel);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Min(1)])
        .split(inner);

    let elapsed = download.started_at.elapsed().as_secs();
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(theme.success).bg(theme.log_bg))
        .percent(download.percent())
        .label(format!(
            "{}/{} mods ({}%)",
            download.completed,
            download.total,
            download.percent()
        ));
    frame.render_widget(gauge, parts[0]);

    let summary = Paragraph::new(Line::from(vec![
        Span::styled(app.status.clone(), Style::default().fg(theme.text)),
        Span::styled(
            format!("   {}m{:02}s", elapsed / 60, elapsed % 60),
            Style::default().fg(theme.muted),
        ),
    ]));
    frame.render_widget(summary, parts[1]);

    let view = parts[2].height as usize;
    let skip = download.lines.len().saturating_sub(view);
    let lines: Vec<Line> = download
        .lines
        .iter()
        .skip(skip)
        .map(|line| Line::from(Span::styled(line.clone(), Style::default().fg(theme.muted))))
        .collect();
    frame.render_widget(Paragraph::new(lines), parts[2]);
}

fn draw_dialog(frame: &mut Frame<'_>, dialog: &Dialog, theme: &Theme, has_failures: bool) {
    let area = frame.size();
    let message_lines: Vec<Line> = dialog
        .message
        .lines()
        .skip(dialog.scroll)
        .map(|line| Line::from(line.to_string()))
        .collect();
    let extra = if dialog.toggle.is_some() { 8 } else { 6 };
    let content_height = message_lines.len().max(1) as u16;
    let height = (content_height + extra).max(7);
    let width = (area.width.saturating_mul(2) / 3).max(34);
    let dialog_area = centered(area, width, height);

    let selected_style = |color: Color| {
        Style::default()
            .fg(Color::Black)
            .bg(color)
            .add_modifier(Modifier::BOLD)
    };
    let plain = Style::default().fg(theme.text);
    let yes_style = if dialog.choice == DialogChoice::Yes {
        selected_style(theme.accent)
    } else {
        plain
    };
    let no_style = if dialog.choice == DialogChoice::No {
        selected_style(theme.warning)
    } else {
        plain
    };

    let mut buttons = vec![
        Span::raw(" "),
        Span::styled(format!(" {} ", dialog.yes_label), yes_style),
    ];
    if !dialog.is_acknowledgement() {
        buttons.push(Span::raw("   "));
        buttons.push(Span::styled(format!(" {} ", dialog.no_label), no_style));
    }
    if matches!(dialog.kind, DialogKind::DownloadScope { .. }) {
        let cancel_style = if dialog.choice == DialogChoice::Cancel {
            selected_style(theme.muted)
        } else {
            plain
        };
        buttons.push(Span::raw("   "));
        buttons.push(Span::styled(" Cancel ", cancel_style));
    }

    let mut lines = Vec::new();
    lines.push(Line::from(Span::styled(
        dialog.title.clone(),
        Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(""));
    lines.extend(message_lines);
    if let Some(toggle) = &dialog.toggle {
        let mark = if toggle.checked { "[x]" } else { "[ ]" };
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("{mark} {} (space)", toggle.label),
            Style::default().fg(theme.muted),
        )));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(buttons));
    if matches!(dialog.kind, DialogKind::DownloadComplete) && has_failures {
        lines.push(Line::from(Span::styled(
            "c copy failed IDs | d copy failed details",
            Style::default().fg(theme.muted),
        )));
    }

    frame.render_widget(Clear, dialog_area);
    let dialog_block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(theme.accent_soft))
        .style(Style::default().bg(theme.header_bg));
    let dialog_widget = Paragraph::new(lines)
        .block(dialog_block)
        .style(Style::default().fg(theme.text))
        .alignment(Alignment::Center);
    frame.render_widget(dialog_widget, dialog_area);
}

fn render_toast(
    frame: &mut Frame<'_>,
    theme: &Theme,
    body_area: Rect,
    message: &str,
    level: ToastLevel,
) {
    let mut message = message.to_string();
    let max_width = body_area.width.saturating_sub(4).max(24);
    let max_text = max_width.saturating_sub(4) as usize;
    if message.len() > max_text {
        message.truncate(max_text.saturating_sub(3));
        message.push_str("...");
    }
    let width = (message.len() as u16 + 4).clamp(24, max_width);
    let height = 3u16;
    let x = body_area.x + (body_area.width.saturating_sub(width)) / 2;
    let y = body_area.y + 1;
    let toast_area = Rect::new(x, y, width, height);

    let border = match level {
        ToastLevel::Info => theme.accent,
        ToastLevel::Warn => theme.warning,
        ToastLevel::Error => theme.error,
    };

    frame.render_widget(Clear, toast_area);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(theme.header_bg));
    let content = Paragraph::new(message)
        .block(block)
        .style(Style::default().fg(theme.text))
        .alignment(Alignment::Center);
    frame.render_widget(content, toast_area);
}

fn draw_toast(frame: &mut Frame<'_>, app: &App, theme: &Theme, body_area: Rect) {
    let Some(toast) = app.toast.as_ref() else {
        return;
    };
    if toast.expires_at <= Instant::now() {
        return;
    }

    render_toast(frame, theme, body_area, &toast.message, toast.level);
}

fn wrap_text(value: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 {
        return Vec::new();
    }

    let mut lines = Vec::new();
    let mut current = String::new();

    for word in value.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            for chunk in chars.chunks(max_width) {
                lines.push(chunk.iter().collect());
            }
            continue;
        }
        let next_len = if current.is_empty() {
            word_len
        } else {
            current.chars().count() + 1 + word_len
        };
        if next_len > max_width {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn push_wrapped_kv(
    lines: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    label_style: Style,
    value_style: Style,
    max_width: usize,
) {
    if max_width == 0 {
        return;
    }

    let label_text = format!("{label}: ");
    let label_len = label_text.len();

    if max_width <= label_len + 1 {
        lines.push(Line::from(Span::styled(label_text, label_style)));
        for part in wrap_text(value, max_width) {
            lines.push(Line::from(Span::styled(part, value_style)));
        }
        return;
    }

    let wrapped = wrap_text(value, max_width.saturating_sub(label_len));
    let Some((first, rest)) = wrapped.split_first() else {
        lines.push(Line::from(Span::styled(label_text, label_style)));
        return;
    };

    lines.push(Line::from(vec![
        Span::styled(label_text.clone(), label_style),
        Span::styled(first.clone(), value_style),
    ]));

    let indent = " ".repeat(label_len);
    for part in rest {
        lines.push(Line::from(vec![
            Span::raw(indent.clone()),
            Span::styled(part.clone(), value_style),
        ]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_splits_on_words_and_breaks_long_ones() {
        assert_eq!(wrap_text("alpha beta gamma", 10), vec!["alpha beta", "gamma"]);
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert!(wrap_text("anything", 0).is_empty());
    }

    #[test]
    fn long_values_wrap_under_their_label() {
        let mut lines = Vec::new();
        push_wrapped_kv(
            &mut lines,
            "Title",
            "one two three",
            Style::default(),
            Style::default(),
            14,
        );
        let rendered: Vec<String> = lines
            .iter()
            .map(|line| line.spans.iter().map(|span| span.content.as_ref()).collect())
            .collect();
        assert_eq!(rendered, vec!["Title: one two", "       three"]);
    }
}
