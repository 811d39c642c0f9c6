mod app;
mod arp;
mod clock;
mod engine;
mod midi;
mod multi;
mod pots;
mod save;
mod sequencer;
mod ui;

use anyhow::Result;
use app::App;
use clock::TimerCtl;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind,
        KeyboardEnhancementFlags, KeyModifiers, PopKeyboardEnhancementFlags,
        PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{
        disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use engine::{DirtyFlag, Engine};
use midi::{MidiOut, MidiSink, MidirSink, NullSink};
use ratatui::{backend::CrosstermBackend, Terminal};
use save::SeqStore;
use std::{
    fs, io,
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

const SEQUENCE_DIR: &str = "sequences";

fn main() -> Result<()> {
    env_logger::init();

    enable_raw_mode()?;
    let mut stdout = io::stdout();

    let enhanced = supports_keyboard_enhancement().unwrap_or(false);
    if enhanced {
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                    | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES))?;
    } else {
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    }

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let result = run(&mut terminal, enhanced);

    disable_raw_mode()?;
    if enhanced {
        execute!(terminal.backend_mut(),
            PopKeyboardEnhancementFlags, LeaveAlternateScreen, DisableMouseCapture)?;
    } else {
        execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    }
    terminal.show_cursor()?;
    if let Err(e) = result { eprintln!("Error: {:?}", e); }
    Ok(())
}

fn open_midi() -> Box<dyn MidiSink> {
    match MidirSink::open("midibeat") {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            log::warn!("no MIDI output, running silent: {e:#}");
            Box::new(NullSink)
        }
    }
}

fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, enhanced: bool) -> Result<()> {
    fs::create_dir_all(SEQUENCE_DIR)?;

    let dirty = Arc::new(AtomicBool::new(true));
    let timer = Arc::new(TimerCtl::new(60));
    let engine = Arc::new(Mutex::new(Engine::new(
        MidiOut::new(open_midi()),
        SeqStore::new(SEQUENCE_DIR),
        Box::new(DirtyFlag(Arc::clone(&dirty))),
        Arc::clone(&timer),
    )));

    let shutdown = Arc::new(AtomicBool::new(false));
    let ticker = clock::spawn_ticker(Arc::clone(&engine), Arc::clone(&timer), Arc::clone(&shutdown));

    let mut app = App::new(Arc::clone(&engine));
    let mut last_draw = Instant::now();

    loop {
        if !enhanced { app.tick_fallback_release(); }

        // Commands mark the flag; redraw periodically anyway so the playhead
        // moves during playback.
        if dirty.swap(false, Ordering::Relaxed) || last_draw.elapsed() >= Duration::from_millis(100) {
            terminal.draw(|f| ui::draw(f, &app, enhanced))?;
            last_draw = Instant::now();
        }

        if event::poll(Duration::from_millis(16))? {
            match event::read()? {
                Event::Key(key) => {
                    // ── Key release (enhanced mode only) ──────────────────
                    if key.kind == KeyEventKind::Release {
                        if let KeyCode::Char(c) = key.code { app.key_release(c); }
                        continue;
                    }

                    // ── Key repeat: pots only ─────────────────────────────
                    if key.kind == KeyEventKind::Repeat {
                        match key.code {
                            KeyCode::PageUp   => app.tempo_up(),
                            KeyCode::PageDown => app.tempo_down(),
                            KeyCode::Insert   => app.bend_up(),
                            KeyCode::Delete   => app.bend_down(),
                            KeyCode::Home     => app.mod_up(),
                            KeyCode::End      => app.mod_down(),
                            KeyCode::Char(c)  => { if !enhanced { app.key_press_fallback(c); } }
                            _ => {}
                        }
                        continue;
                    }

                    // ── Key press ─────────────────────────────────────────
                    match key.code {
                        KeyCode::Esc => break,
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,

                        KeyCode::Up       => app.mode_next(),
                        KeyCode::Down     => app.mode_prev(),
                        KeyCode::Tab      => app.mode_next(),
                        KeyCode::BackTab  => app.mode_prev(),

                        KeyCode::Char(' ') => app.pauseplay(),
                        KeyCode::F(4)      => app.save_take(),
                        KeyCode::F(5)      => app.rec(),
                        KeyCode::F(6)      => app.stop(),
                        KeyCode::F(7)      => app.load_pressed(),
                        KeyCode::F(8)      => app.clear_hold(),
                        KeyCode::F(9)      => app.gate_channel_pressed(),
                        KeyCode::F(10)     => app.time_div_pressed(),
                        KeyCode::F(11)     => app.toggle_kbd_play(),

                        KeyCode::Enter     => app.blank_step(),
                        KeyCode::Backspace => app.undo_step(),

                        KeyCode::Left  => app.octave_down(),
                        KeyCode::Right => app.octave_up(),

                        KeyCode::PageUp   => app.tempo_up(),
                        KeyCode::PageDown => app.tempo_down(),
                        KeyCode::Insert   => app.bend_up(),
                        KeyCode::Delete   => app.bend_down(),
                        KeyCode::Char('\\') => app.bend_center(),
                        KeyCode::Home     => app.mod_up(),
                        KeyCode::End      => app.mod_down(),

                        KeyCode::Char(c) => {
                            if enhanced { app.key_press(c); } else { app.key_press_fallback(c); }
                        }

                        _ => {}
                    }
                }
                Event::FocusLost => { app.release_all(); }
                _ => {}
            }
        }
        if app.should_quit { break; }
    }

    app.release_all();
    let _ = engine.lock().unwrap().stop();
    shutdown.store(true, Ordering::Relaxed);
    let _ = ticker.join();
    Ok(())
}
