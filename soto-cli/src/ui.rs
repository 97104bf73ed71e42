//! TUI rendering: signal panel, spectrum panel, and the log panel.
//!
//! Panel density adapts to the terminal size the same way the original
//! meter display picked a rendering mode by available rows: a full layout
//! with both waveform and spectrum charts when there's room, collapsing to
//! a single combined panel on short terminals rather than truncating both.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, List, ListItem, Paragraph};
use ratatui::Frame;

use soto_core::sampler::SampleFrame;

use crate::logging::{LogKind, LogLine};

const COMPACT_HEIGHT_THRESHOLD: u16 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelMode {
    Full,
    Compact,
}

pub fn pick_panel_mode(area: Rect) -> PanelMode {
    if area.height < COMPACT_HEIGHT_THRESHOLD {
        PanelMode::Compact
    } else {
        PanelMode::Full
    }
}

/// Snapshot of everything the frame needs to render; built fresh by the
/// runner's display loop each tick.
pub struct AppState<'a> {
    pub device: &'a str,
    pub rate: u32,
    pub signal: &'a [SampleFrame],
    pub spectrum: &'a [f64],
    pub logs: &'a [LogLine],
    pub show_signal: bool,
    pub show_spectrum: bool,
}

pub fn draw(frame: &mut Frame, state: &AppState) {
    let size = frame.size();
    let mode = pick_panel_mode(size);

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(6), Constraint::Length(7)])
        .split(size);

    draw_title(frame, root[0], state);

    match mode {
        PanelMode::Full => draw_panels_full(frame, root[1], state),
        PanelMode::Compact => draw_panels_compact(frame, root[1], state),
    }

    draw_log_panel(frame, root[2], state.logs);
}

fn draw_title(frame: &mut Frame, area: Rect, state: &AppState) {
    let text = Line::from(vec![
        Span::styled("soto", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!("  {} @ {} Hz", state.device, state.rate)),
    ]);
    let block = Block::default().borders(Borders::ALL).title("capture");
    frame.render_widget(Paragraph::new(text).block(block), area);
}

fn draw_panels_full(frame: &mut Frame, area: Rect, state: &AppState) {
    let panels: Vec<Constraint> = match (state.show_signal, state.show_spectrum) {
        (true, true) => vec![Constraint::Percentage(50), Constraint::Percentage(50)],
        _ => vec![Constraint::Percentage(100)],
    };
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(panels)
        .split(area);

    let mut idx = 0;
    if state.show_signal {
        draw_signal_panel(frame, chunks[idx], state.signal);
        idx += 1;
    }
    if state.show_spectrum {
        draw_spectrum_panel(frame, chunks[idx], state.spectrum);
    }
    if !state.show_signal && !state.show_spectrum {
        let block = Block::default().borders(Borders::ALL).title("display");
        frame.render_widget(
            Paragraph::new("both panels hidden (--show-signal=false --show-spectrum=false)").block(block),
            chunks[0],
        );
    }
}

/// Short terminals get one panel, preferring the spectrum when both are
/// requested since it communicates more at a glance in few rows.
fn draw_panels_compact(frame: &mut Frame, area: Rect, state: &AppState) {
    if state.show_spectrum {
        draw_spectrum_panel(frame, area, state.spectrum);
    } else if state.show_signal {
        draw_signal_panel(frame, area, state.signal);
    } else {
        let block = Block::default().borders(Borders::ALL).title("display");
        frame.render_widget(Paragraph::new("both panels hidden").block(block), area);
    }
}

fn draw_signal_panel(frame: &mut Frame, area: Rect, samples: &[SampleFrame]) {
    let left: Vec<(f64, f64)> = samples
        .iter()
        .enumerate()
        .map(|(i, s)| (i as f64, s.ch0 as f64))
        .collect();
    let right: Vec<(f64, f64)> = samples
        .iter()
        .enumerate()
        .map(|(i, s)| (i as f64, s.ch1 as f64))
        .collect();

    let datasets = vec![
        Dataset::default()
            .name("L")
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Cyan))
            .data(&left),
        Dataset::default()
            .name("R")
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Magenta))
            .data(&right),
    ];

    let x_max = samples.len().max(1) as f64;
    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title("signal"))
        .x_axis(Axis::default().bounds([0.0, x_max]))
        .y_axis(Axis::default().bounds([i16::MIN as f64, i16::MAX as f64]));

    frame.render_widget(chart, area);
}

fn draw_spectrum_panel(frame: &mut Frame, area: Rect, magnitudes: &[f64]) {
    let points: Vec<(f64, f64)> = magnitudes
        .iter()
        .enumerate()
        .map(|(i, &m)| (i as f64, m))
        .collect();

    let peak = magnitudes.iter().cloned().fold(0.0_f64, f64::max).max(1e-6);

    let datasets = vec![Dataset::default()
        .name("|X(f)|")
        .graph_type(GraphType::Bar)
        .style(Style::default().fg(Color::Yellow))
        .data(&points)];

    let x_max = magnitudes.len().max(1) as f64;
    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title("spectrum"))
        .x_axis(Axis::default().bounds([0.0, x_max]))
        .y_axis(Axis::default().bounds([0.0, peak]));

    frame.render_widget(chart, area);
}

fn draw_log_panel(frame: &mut Frame, area: Rect, logs: &[LogLine]) {
    let start = logs.len().saturating_sub(area.height.saturating_sub(2) as usize);
    let items: Vec<ListItem> = logs[start..]
        .iter()
        .map(|line| ListItem::new(Span::styled(line.text.clone(), style_for_kind(line.kind))))
        .collect();

    let block = Block::default().borders(Borders::ALL).title("log");
    frame.render_widget(List::new(items).block(block), area);
}

fn style_for_kind(kind: LogKind) -> Style {
    match kind {
        LogKind::Error => Style::default().fg(Color::Red),
        LogKind::Stderr => Style::default().fg(Color::Red).add_modifier(Modifier::DIM),
        LogKind::Warn => Style::default().fg(Color::Yellow),
        LogKind::Info => Style::default().fg(Color::White),
        LogKind::Debug => Style::default().fg(Color::Gray),
        LogKind::Trace => Style::default().fg(Color::DarkGray),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_terminal_picks_compact_mode() {
        let area = Rect::new(0, 0, 80, 10);
        assert_eq!(pick_panel_mode(area), PanelMode::Compact);
    }

    #[test]
    fn tall_terminal_picks_full_mode() {
        let area = Rect::new(0, 0, 80, 40);
        assert_eq!(pick_panel_mode(area), PanelMode::Full);
    }
}
