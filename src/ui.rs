use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use crate::app::{note_name, App, EngineView};
use crate::engine::{Edit, Mode, PlayMode};

// ── Top-level routing ─────────────────────────────────────────────────────────

pub fn draw(f: &mut Frame, app: &App, enhanced: bool) {
    let view = app.view();
    let area = f.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // title bar    chunks[0]
            Constraint::Length(6),  // transport    chunks[1]
            Constraint::Length(10), // mode panel   chunks[2]
            Constraint::Length(3),  // status       chunks[3]
            Constraint::Min(0),     // help         chunks[4]
        ])
        .split(area);

    draw_title(f, chunks[0], enhanced, &view);
    draw_transport(f, chunks[1], &view);
    match view.mode {
        Mode::Basic          => draw_basic(f, chunks[2], &view),
        Mode::Arpeggiator    => draw_arp(f, chunks[2], &view),
        Mode::Sequencer      => draw_sequencer(f, chunks[2], &view),
        Mode::MultiSequencer => draw_multi(f, chunks[2], &view),
    }
    draw_status(f, chunks[3], app);
    draw_help(f, chunks[4], &view);
}

// ── Title bar ─────────────────────────────────────────────────────────────────

fn draw_title(f: &mut Frame, area: Rect, enhanced: bool, view: &EngineView) {
    let kb_mode = if enhanced { "enhanced" } else { "fallback" };
    let text = format!(
        "  MidiBeat  ─  {} {}  ─  [{}]  ─  ↑↓: mode  Space: play/pause",
        view.mode.label(),
        view.play_mode.glyph(),
        kb_mode
    );
    let color = if enhanced { Color::Cyan } else { Color::Yellow };
    f.render_widget(
        Paragraph::new(text)
            .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL)),
        area,
    );
}

// ── Transport panel ───────────────────────────────────────────────────────────

fn draw_transport(f: &mut Frame, area: Rect, view: &EngineView) {
    let lines = vec![
        Line::from(vec![
            field("Tempo", format!("{} BPM", view.bpm)),
            field("Division", view.time_div.label().to_string()),
            field("Gate", format!("{}/10", view.gate_tenths)),
        ]),
        Line::from(vec![
            field("Channel", format!("{}", view.midi_channel + 1)),
            field("Slot", format!("{:02}", view.seq_slot)),
            field("State", view.play_mode.glyph().to_string()),
        ]),
        Line::from(edit_prompt(view)),
    ];
    f.render_widget(
        Paragraph::new(lines).block(Block::default().title(" Transport ").borders(Borders::ALL)),
        area,
    );
}

fn field(name: &str, value: String) -> Span<'static> {
    Span::styled(
        format!("  {name}: {value}  "),
        Style::default().fg(Color::White),
    )
}

fn edit_prompt(view: &EngineView) -> Vec<Span<'static>> {
    let text = match view.edit {
        Edit::None               => return vec![Span::raw("")],
        Edit::LoadSlot { pending } => format!("Load slot: {pending:02}"),
        Edit::Channel { pending }  => format!("Channel: {pending}"),
        Edit::Gate { pending }     => format!("Gate: {pending}/10"),
        Edit::TimeDiv { pending }  => {
            format!("Division: {}", crate::clock::TimeDivision::ALL[pending as usize % 8].label())
        }
    };
    vec![Span::styled(
        format!("  ✎ {text}  (# confirm, * cancel)"),
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    )]
}

// ── Mode panels ───────────────────────────────────────────────────────────────

fn panel_block(title: &str) -> Block<'_> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
}

fn draw_basic(f: &mut Frame, area: Rect, view: &EngineView) {
    let text = format!(
        "Keys play straight through on channel {}.",
        view.midi_channel + 1
    );
    f.render_widget(
        Paragraph::new(text).block(panel_block(" Basic ")).wrap(Wrap { trim: true }),
        area,
    );
}

fn draw_arp(f: &mut Frame, area: Rect, view: &EngineView) {
    let held: Vec<String> = view.held.iter().map(|&n| note_name(n)).collect();
    let lines = vec![
        Line::from(format!("Ordering: {}", view.arp_mode.label())),
        Line::from(format!("Hold: {}", if view.hold { "on" } else { "off" })),
        Line::from(format!(
            "Chord: {}",
            if held.is_empty() { "—".to_string() } else { held.join(" ") }
        )),
    ];
    f.render_widget(Paragraph::new(lines).block(panel_block(" Arpeggiator ")), area);
}

fn draw_sequencer(f: &mut Frame, area: Rect, view: &EngineView) {
    let mut lines = vec![Line::from(format!(
        "Slot {:02} — {} steps{}",
        view.seq_slot,
        view.seq_length,
        if view.play_mode == PlayMode::Recording {
            format!("  (recording, {} keys held)", view.open_notes)
        } else if view.transpose_on {
            format!("  (transpose root {})", note_name(view.transpose_key))
        } else {
            String::new()
        }
    ))];

    // One cell per step; ● marks note starts, ▶ the playhead.
    let mut cells: Vec<Span> = Vec::new();
    for step in 0..view.seq_length.min(64) {
        let has_note = view.seq_entries.iter().any(|&(s, _)| s == step);
        let glyph = if has_note { " ● " } else { " · " };
        let style = if view.play_mode == PlayMode::Playing && step == view.seq_step {
            Style::default().bg(Color::Cyan).fg(Color::Black)
        } else {
            Style::default().fg(Color::White)
        };
        cells.push(Span::styled(glyph, style));
    }
    lines.push(Line::from(cells));

    let notes: Vec<String> = view
        .seq_entries
        .iter()
        .take(16)
        .map(|&(s, n)| format!("{}:{}×{}", s + 1, note_name(n.note), n.steps))
        .collect();
    lines.push(Line::from(notes.join("  ")));

    f.render_widget(Paragraph::new(lines).block(panel_block(" Sequencer ")), area);
}

fn draw_multi(f: &mut Frame, area: Rect, view: &EngineView) {
    let mut lines = vec![Line::from(format!(
        "Load target: channel {}   pattern period: {} clocks{}",
        view.multi_target + 1,
        view.multi_period,
        if view.multi_kbd_play { "   keys → ch 16" } else { "" }
    ))];
    if view.multi_channels.is_empty() {
        lines.push(Line::from("No channels loaded."));
    }
    for &(idx, len, div) in &view.multi_channels {
        let marker = if idx as u8 == view.multi_target { "▶" } else { " " };
        lines.push(Line::from(format!(
            "{marker} ch {:2}  {:3} steps  {}",
            idx + 1,
            len,
            div.label()
        )));
    }
    f.render_widget(Paragraph::new(lines).block(panel_block(" Multi Sequencer ")), area);
}

// ── Status & help ─────────────────────────────────────────────────────────────

fn draw_status(f: &mut Frame, area: Rect, app: &App) {
    f.render_widget(
        Paragraph::new(app.status_msg.clone())
            .style(Style::default().fg(Color::Green))
            .block(Block::default().title(" Status ").borders(Borders::ALL)),
        area,
    );
}

fn draw_help(f: &mut Frame, area: Rect, view: &EngineView) {
    let common = "↑↓ mode   Space play/pause   F6 stop   PgUp/PgDn tempo   ←→ octave   Esc quit";
    let mode = match view.mode {
        Mode::Basic => "F9 channel   Ins/Del bend   Home/End mod",
        Mode::Arpeggiator => "-/= ordering   F8 hold   F9 gate   F10 division",
        Mode::Sequencer => {
            "F5 record   Enter blank step   Backspace undo   F4 save take   F7 load   F8 clear   F9 gate   F10 division   F11 transpose"
        }
        Mode::MultiSequencer => "F7 load into target   F8 clear target   F9 target   F10 division   F11 keys→ch16",
    };
    let lines = vec![Line::from(common), Line::from(mode)];
    f.render_widget(
        Paragraph::new(lines)
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().title(" Keys ").borders(Borders::ALL))
            .wrap(Wrap { trim: true }),
        area,
    );
}
