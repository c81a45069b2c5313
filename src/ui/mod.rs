use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Tabs, Wrap};
use ratatui::Frame;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::app::{AppState, ComposeField, Projection, ResultStatus, TextField, View};
use crate::calendar::{CalendarCell, MonthCursor, YearProgress, DAYS_PER_YEAR, WEEKDAY_LABELS};
use crate::model::{Analysis, Entry};

const CELL_WIDTH: usize = 5;

pub fn draw_app(
    frame: &mut Frame,
    state: &AppState,
    active: View,
    projection: &Projection<'_>,
    list_state: &mut ListState,
) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(2),
        ])
        .split(frame.size());

    let titles: Vec<String> = View::tabs().map(|view| view.to_string()).collect();
    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title("NurtureNote"))
        .select(active.tab_index())
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(tabs, vertical[0]);

    match projection {
        Projection::Compose { saving, failure } => {
            draw_compose(frame, state, vertical[1], *saving, *failure);
        }
        Projection::ComposeWithResult {
            saving,
            entry,
            status,
        } => {
            let split = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
                .split(vertical[1]);
            draw_compose(frame, state, split[0], *saving, None);
            draw_result(frame, state.offset(), split[1], entry, status);
        }
        Projection::List { entries, pending } => {
            draw_list(frame, state, vertical[1], entries, *pending, list_state);
        }
        Projection::Calendar {
            cursor,
            cells,
            progress,
        } => draw_calendar(frame, vertical[1], *cursor, cells, progress),
    }

    let status = build_status_line(state, active);
    frame.render_widget(
        Paragraph::new(status).style(Style::default().fg(Color::Gray)),
        vertical[2],
    );
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    }
}

fn draw_compose(
    frame: &mut Frame,
    state: &AppState,
    area: Rect,
    saving: bool,
    failure: Option<&str>,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(3)])
        .split(area);
    let form = &state.form;

    let mut mood_title = vec![Span::raw("Mood")];
    if saving {
        mood_title.push(Span::styled(
            " (saving…)",
            Style::default().fg(Color::Yellow),
        ));
    }
    if let Some(message) = failure {
        mood_title.push(Span::styled(
            format!(" save failed: {message}"),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }
    let mood = Paragraph::new(form.mood.buffer().to_string()).block(
        Block::default()
            .title(Line::from(mood_title))
            .borders(Borders::ALL)
            .border_style(focus_style(form.focus() == ComposeField::Mood)),
    );
    frame.render_widget(mood, rows[0]);

    let body = Paragraph::new(form.body.buffer().to_string()).block(
        Block::default()
            .title("How was the day?")
            .borders(Borders::ALL)
            .border_style(focus_style(form.focus() == ComposeField::Body)),
    );
    frame.render_widget(body, rows[1]);

    let (field, field_area) = match form.focus() {
        ComposeField::Mood => (&form.mood, rows[0]),
        ComposeField::Body => (&form.body, rows[1]),
    };
    if let Some((x, y)) = field_cursor_position(field, field_area) {
        frame.set_cursor(x, y);
    }
}

fn field_cursor_position(field: &TextField, area: Rect) -> Option<(u16, u16)> {
    let inner_width = area.width.saturating_sub(2) as usize;
    let inner_height = area.height.saturating_sub(2);
    if inner_width == 0 || inner_height == 0 {
        return None;
    }
    let buffer = field.buffer();
    let cursor = field.cursor().min(buffer.len());
    let mut row = 0u16;
    let mut col = 0usize;
    for grapheme in buffer[..cursor].graphemes(true) {
        if grapheme == "\n" {
            row += 1;
            col = 0;
            continue;
        }
        col += UnicodeWidthStr::width(grapheme);
    }
    let row = row.min(inner_height - 1);
    let col = col.min(inner_width - 1) as u16;
    Some((area.x + 1 + col, area.y + 1 + row))
}

fn draw_result(
    frame: &mut Frame,
    offset: UtcOffset,
    area: Rect,
    entry: &Entry,
    status: &ResultStatus<'_>,
) {
    let mut lines = entry_header(entry, offset);
    lines.push(Line::from(""));
    match status {
        ResultStatus::Pending => {
            lines.push(Line::from(Span::styled(
                "Analysing this entry… it will appear here automatically.",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::ITALIC),
            )));
        }
        ResultStatus::NothingToReport(analysis) => {
            lines.push(Line::from("Nothing to report for this entry."));
            lines.push(disclaimer_line(analysis));
        }
        ResultStatus::Ready(analysis) => lines.extend(analysis_lines(analysis)),
    }
    let result = Paragraph::new(Text::from(lines))
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Result (Esc to close)")
                .borders(Borders::ALL),
        );
    frame.render_widget(result, area);
}

fn draw_list(
    frame: &mut Frame,
    state: &AppState,
    area: Rect,
    entries: &[Entry],
    pending: usize,
    list_state: &mut ListState,
) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        let badge = if entry.is_pending() {
            Span::styled("… ", Style::default().fg(Color::Yellow))
        } else {
            Span::styled("✓ ", Style::default().fg(Color::Green))
        };
        let title = Line::from(vec![
            badge,
            Span::styled(
                format_entry_time(entry.created_at, state.offset()),
                Style::default().fg(Color::Gray),
            ),
            Span::raw("  "),
            Span::styled(
                entry.mood.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ]);
        let preview = entry.body.lines().next().unwrap_or_default().to_string();
        items.push(ListItem::new(vec![title, Line::from(preview)]));
    }
    if items.is_empty() {
        items.push(ListItem::new("No entries yet. Press `n` to write one."));
    }

    let title = if pending > 0 {
        format!("Entries ({pending} awaiting analysis)")
    } else {
        "Entries".to_string()
    };
    let list = List::new(items)
        .block(Block::default().title(title).borders(Borders::ALL))
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, columns[0], list_state);

    let detail: Text = state
        .selected_entry()
        .map(|entry| {
            let mut lines = entry_header(entry, state.offset());
            lines.push(Line::from(""));
            match ResultStatus::of(entry) {
                ResultStatus::Pending => lines.push(Line::from(Span::styled(
                    "Analysis pending.",
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::ITALIC),
                ))),
                ResultStatus::NothingToReport(analysis) => {
                    lines.push(Line::from("Nothing to report for this entry."));
                    lines.push(disclaimer_line(analysis));
                }
                ResultStatus::Ready(analysis) => lines.extend(analysis_lines(analysis)),
            }
            Text::from(lines)
        })
        .unwrap_or_else(|| Text::from("Select an entry to read it."));
    let detail = Paragraph::new(detail)
        .wrap(Wrap { trim: false })
        .block(Block::default().title("Entry").borders(Borders::ALL));
    frame.render_widget(detail, columns[1]);
}

fn draw_calendar(
    frame: &mut Frame,
    area: Rect,
    cursor: MonthCursor,
    cells: &[CalendarCell<'_>],
    progress: &YearProgress,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(10), Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let mut lines = Vec::with_capacity(7);
    lines.push(Line::from(
        WEEKDAY_LABELS
            .iter()
            .map(|label| {
                Span::styled(
                    format!("{label:^CELL_WIDTH$}"),
                    Style::default().add_modifier(Modifier::BOLD),
                )
            })
            .collect::<Vec<_>>(),
    ));
    for week in cells.chunks(7) {
        lines.push(Line::from(
            week.iter().map(calendar_span).collect::<Vec<_>>(),
        ));
    }
    let grid = Paragraph::new(Text::from(lines)).block(
        Block::default()
            .title(format!("{} {}  (h/l to move, t for today)", cursor.month(), cursor.year()))
            .borders(Borders::ALL),
    );
    frame.render_widget(grid, rows[0]);

    let gauge = Gauge::default()
        .block(
            Block::default()
                .title(format!("{} progress", progress.year))
                .borders(Borders::ALL),
        )
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(progress.ratio.clamp(0.0, 1.0))
        .label(format!(
            "{} / {} days ({:.1}%)",
            progress.distinct_days,
            DAYS_PER_YEAR,
            progress.percent()
        ));
    frame.render_widget(gauge, rows[1]);
}

fn calendar_span(cell: &CalendarCell<'_>) -> Span<'static> {
    let text = format!("{:^CELL_WIDTH$}", cell.day());
    let mut style = if !cell.is_current() {
        Style::default().fg(Color::DarkGray)
    } else if cell.entry.is_some() {
        Style::default()
            .fg(Color::Green)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    if cell.entry.is_some_and(Entry::is_pending) {
        style = style.fg(Color::Yellow);
    }
    if cell.is_today {
        style = style.add_modifier(Modifier::REVERSED);
    }
    Span::styled(text, style)
}

fn entry_header(entry: &Entry, offset: UtcOffset) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(vec![
        Span::styled(
            entry.mood.clone(),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" · "),
        Span::styled(
            format_entry_time(entry.created_at, offset),
            Style::default().fg(Color::Gray),
        ),
    ])];
    lines.extend(entry.body.lines().map(|line| Line::from(line.to_string())));
    lines
}

fn analysis_lines(analysis: &Analysis) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for section in analysis.populated_sections() {
        lines.push(Line::from(Span::styled(
            section.title(),
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        )));
        for item in &section.items {
            lines.push(Line::from(format!("  • {}", item.summary())));
        }
        lines.push(Line::from(""));
    }
    if !analysis.sources().is_empty() {
        lines.push(Line::from(Span::styled(
            "Sources",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for citation in analysis.sources() {
            let text = match &citation.url {
                Some(url) if *url != citation.label => format!("  - {} <{url}>", citation.label),
                _ => format!("  - {}", citation.label),
            };
            lines.push(Line::from(text));
        }
        lines.push(Line::from(""));
    }
    lines.push(disclaimer_line(analysis));
    lines
}

fn disclaimer_line(analysis: &Analysis) -> Line<'static> {
    Line::from(Span::styled(
        analysis.disclaimer_or_default().to_string(),
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    ))
}

fn build_status_line(state: &AppState, active: View) -> Text<'static> {
    let mut lines = Vec::with_capacity(2);
    let message = state.status_message().unwrap_or_default().to_string();
    lines.push(Line::from(Span::styled(
        message,
        Style::default().add_modifier(Modifier::BOLD),
    )));
    let hints = match active {
        View::Compose | View::ComposeWithResult => {
            "Tab switch field • Ctrl+S save • F2 entries • F3 calendar • Ctrl+Q quit"
        }
        View::List => "j/k move • r refresh • n write • c calendar • q quit",
        View::Calendar => "h/l month • t today • n write • 2 entries • q quit",
    };
    lines.push(Line::from(Span::styled(
        hints,
        Style::default().fg(Color::DarkGray),
    )));
    Text::from(lines)
}

fn format_entry_time(dt: OffsetDateTime, offset: UtcOffset) -> String {
    dt.to_offset(offset)
        .format(&format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| dt.unix_timestamp().to_string())
}
