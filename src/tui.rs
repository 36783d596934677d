use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use serde_json::Value;
use std::cell::RefCell;
use std::io::stdout;
use std::rc::Rc;

use crate::theme;
use crate::theme_store::ThemeStore;

struct AppState {
    themes: Vec<String>,
    tokens: Value,
    selected: usize,
    scroll_offset: u16,
    active_class: Rc<RefCell<String>>,
    message: Option<String>,
}

impl AppState {
    fn new(tokens: Value, store: &ThemeStore) -> Self {
        let themes: Vec<String> = tokens["themes"]
            .as_object()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        let selected = themes.iter().position(|t| t == store.current()).unwrap_or(0);
        Self {
            themes,
            tokens,
            selected,
            scroll_offset: 0,
            active_class: Rc::new(RefCell::new(store.class_name())),
            message: None,
        }
    }

    fn current_theme(&self) -> Option<&str> {
        self.themes.get(self.selected).map(String::as_str)
    }

    fn next(&mut self) {
        if !self.themes.is_empty() && self.selected < self.themes.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }
}

/// Interactive catalog of the design tokens in `tokens` (as built by
/// `tokens::build_tokens`). Enter activates the highlighted theme.
pub fn run_style_guide(tokens: Value, store: &mut ThemeStore) -> Result<()> {
    let mut state = AppState::new(tokens, store);
    if state.themes.is_empty() {
        println!("No themes found.");
        return Ok(());
    }

    let sink = Rc::clone(&state.active_class);
    let subscription = store.subscribe(move |name| *sink.borrow_mut() = format!("theme-{}", name));

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, store);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    store.unsubscribe(subscription);

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    store: &mut ThemeStore,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(state.selected));

    loop {
        terminal.draw(|frame| draw(frame, state, store.current(), &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let prev_selected = state.selected;
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Enter => {
                    if let Some(name) = state.current_theme().map(str::to_string) {
                        state.message = match store.set(&name) {
                            Ok(()) => Some(format!("Activated {}", name)),
                            Err(e) => Some(e.to_string()),
                        };
                    }
                }
                _ => {}
            }
            if state.selected != prev_selected {
                list_state.select(Some(state.selected));
                state.message = None;
            }
        }
    }
    Ok(())
}

fn draw(frame: &mut Frame, state: &AppState, active: &str, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(rows[0]);

    // Left panel: themes
    let items: Vec<ListItem> = state
        .themes
        .iter()
        .map(|name| {
            let marker = if name == active { "*" } else { " " };
            ListItem::new(format!("{} {}", marker, name))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Themes ({}) ", state.themes.len()
        )))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: token catalog
    let detail = Paragraph::new(build_catalog(state))
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Style guide: {} ", state.active_class.borrow()
        )))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));
    frame.render_widget(detail, chunks[1]);

    let footer = match &state.message {
        Some(message) => format!(" {}", message),
        None => " j/k:theme  J/K:scroll  enter:activate  q:quit".to_string(),
    };
    let help = Paragraph::new(footer).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, rows[1]);
}

fn heading(text: &str) -> Line<'static> {
    Line::from(Span::styled(
        text.to_string(),
        Style::default().add_modifier(Modifier::BOLD),
    ))
}

fn build_catalog(state: &AppState) -> Text<'static> {
    let Some(name) = state.current_theme() else {
        return Text::raw("No theme selected");
    };

    let mut lines: Vec<Line> = Vec::new();

    lines.push(heading("COLORS"));
    match state.tokens["themes"][name].as_object() {
        Some(colors) if !colors.is_empty() => {
            for (prop, token) in colors {
                let hsl = token["hsl"].as_str().unwrap_or_default();
                let swatch = match theme::parse_hsl(hsl).map(|c| c.to_rgb()) {
                    Some((r, g, b)) => Style::default().bg(Color::Rgb(r, g, b)),
                    None => Style::default(),
                };
                lines.push(Line::from(vec![
                    Span::raw("  "),
                    Span::styled("    ", swatch),
                    Span::raw(format!(
                        " {:<24} {:<8} {}",
                        prop,
                        token["value"].as_str().unwrap_or("?"),
                        hsl
                    )),
                ]));
            }
        }
        _ => lines.push(Line::from(Span::styled(
            "  (no colors declared)",
            Style::default().fg(Color::DarkGray),
        ))),
    }
    lines.push(Line::from(""));

    lines.push(heading("SPACING"));
    push_values(&mut lines, &state.tokens["spacing"]);
    lines.push(Line::from(""));

    lines.push(heading("TYPOGRAPHY"));
    if let Some(groups) = state.tokens["typography"].as_object() {
        for (group, values) in groups {
            lines.push(Line::from(Span::styled(
                format!("  {}", group),
                Style::default().fg(Color::Cyan),
            )));
            push_values(&mut lines, values);
        }
    }
    lines.push(Line::from(""));

    lines.push(heading("BORDER RADIUS"));
    push_values(&mut lines, &state.tokens["borderRadius"]);
    lines.push(Line::from(""));

    lines.push(heading("COMPONENTS"));
    if let Some(components) = state.tokens["components"].as_object() {
        for (component, parts) in components {
            lines.push(Line::from(Span::styled(
                format!("  {}", component),
                Style::default().fg(Color::Cyan),
            )));
            if let Some(parts) = parts.as_object() {
                for (kind, entries) in parts {
                    let names: Vec<&str> = entries
                        .as_array()
                        .map(|a| a.iter().filter_map(Value::as_str).collect())
                        .unwrap_or_default();
                    for line in textwrap::fill(&format!("{}: {}", kind, names.join(", ")), 70).lines() {
                        lines.push(Line::from(format!("    {}", line)));
                    }
                }
            }
        }
    }

    Text::from(lines)
}

fn push_values(lines: &mut Vec<Line<'static>>, group: &Value) {
    if let Some(entries) = group.as_object() {
        for (name, token) in entries {
            lines.push(Line::from(format!(
                "    {:<10} {}",
                name,
                token["value"].as_str().unwrap_or("?")
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::build_tokens;

    const CSS: &str = r#"
        .theme-bare { --radius: 1rem; }
        .theme-light { --background: 0 0% 100%; --primary: 210 50% 50%; }
    "#;

    fn state(current: &str) -> AppState {
        let tokens = build_tokens(CSS, "test.css").unwrap();
        let mut store = ThemeStore::load(vec!["bare".to_string(), "light".to_string()], None);
        store.set(current).unwrap();
        AppState::new(tokens, &store)
    }

    fn rendered(text: &Text) -> Vec<String> {
        text.lines
            .iter()
            .map(|line| line.spans.iter().map(|span| span.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn test_catalog_lists_every_section() {
        let state = state("light");
        assert_eq!(state.current_theme(), Some("light"));

        let lines = rendered(&build_catalog(&state));
        for heading in ["COLORS", "SPACING", "TYPOGRAPHY", "BORDER RADIUS", "COMPONENTS"] {
            assert!(lines.iter().any(|l| l == heading), "missing {}", heading);
        }
        assert!(lines.iter().any(|l| l.contains("primary") && l.contains("#4080bf")));
        assert!(lines.iter().any(|l| l.contains("md") && l.contains("16px")));
        assert!(lines.iter().any(|l| l.contains("variants:") && l.contains("destructive")));
    }

    #[test]
    fn test_color_rows_carry_a_swatch() {
        let state = state("light");
        let text = build_catalog(&state);
        let primary = text
            .lines
            .iter()
            .find(|line| line.spans.iter().any(|s| s.content.contains("primary")))
            .unwrap();
        assert_eq!(primary.spans[1].style.bg, Some(Color::Rgb(0x40, 0x80, 0xbf)));
    }

    #[test]
    fn test_theme_without_colors_shows_placeholder() {
        let state = state("bare");
        assert_eq!(state.current_theme(), Some("bare"));
        let lines = rendered(&build_catalog(&state));
        assert!(lines.iter().any(|l| l.contains("(no colors declared)")));
        assert!(lines.iter().any(|l| l == "SPACING"));
    }

    #[test]
    fn test_navigation_stays_in_bounds() {
        let mut state = state("bare");
        state.prev();
        assert_eq!(state.selected, 0);
        state.next();
        state.next();
        assert_eq!(state.selected, 1);
        state.scroll_down();
        assert_eq!(state.scroll_offset, 3);
        state.prev();
        assert_eq!(state.scroll_offset, 0);
        state.scroll_up();
        assert_eq!(state.scroll_offset, 0);
    }
}
