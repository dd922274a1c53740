//! Real-time 12-channel chart viewer for the MIRAS sensor.
//!
//! Usage:
//!   cargo run --bin tui               # press `c` to scan for MIRAS and connect
//!   cargo run --bin tui -- --simulate # use the built-in signal generator
//!
//! Keys
//! ----
//!   c        connect (only while disconnected)
//!   d        disconnect
//!   v        show / hide the charts (ingestion and flushing continue)
//!   q / Esc  quit

use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{info, warn};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame, Terminal,
};
use tokio::sync::oneshot;

use miras_rs::buffer::LiveWindow;
use miras_rs::ble::BleTransport;
use miras_rs::config::{FlushConfig, MirasClientConfig, SinkConfig};
use miras_rs::connection::ConnectionManager;
use miras_rs::flush::{FlushHandle, FlushScheduler, FlushStats};
use miras_rs::pipeline::spawn_ingest;
use miras_rs::protocol::{CHANNEL_COUNT, CHANNEL_NAMES};
use miras_rs::simulator::SimulatedTransport;
use miras_rs::transport::{Device, Transport};
use miras_rs::types::{ConnectionState, Sample};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Chart grid: 4 rows × 3 columns = 12 channels.
const GRID_ROWS: usize = 4;
const GRID_COLS: usize = 3;

const COLORS: [Color; CHANNEL_COUNT] = [
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::LightBlue,
    Color::LightRed,
    Color::LightCyan,
    Color::LightYellow,
    Color::LightGreen,
    Color::LightMagenta,
    Color::Blue,
    Color::Red,
];

/// Braille spinner frames cycled at ~100 ms intervals to indicate background activity.
const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

// ── App state (owned by the main loop) ────────────────────────────────────────

struct App {
    /// A connect attempt is in flight.
    connecting: bool,
    /// Advertised name of the connected device.
    device: Option<String>,
    /// Last connect error, shown in the header until the next attempt.
    last_error: Option<String>,
    /// `v` toggles this; hidden charts still ingest and flush.
    show_chart: bool,
    simulate: bool,
    sink: String,
    flush: FlushStats,
}

impl App {
    fn new(simulate: bool, sink: String) -> Self {
        Self {
            connecting: false,
            device: None,
            last_error: None,
            show_chart: true,
            simulate,
            sink,
            flush: FlushStats::default(),
        }
    }

    /// The header's connection status line.
    fn status_line(&self) -> String {
        match &self.device {
            Some(name) => format!("Connected to: {name}"),
            None => "No device connected".into(),
        }
    }
}

// ── Session (generic over the transport) ──────────────────────────────────────

/// Result of a background connect attempt.
type ConnectOutcome = Result<String, String>;

/// Spawn a connect attempt; on success ingestion starts feeding `window` and
/// the flush queue before the outcome is delivered.
fn start_connect<T: Transport>(
    manager: Arc<ConnectionManager<T>>,
    config: MirasClientConfig,
    window: LiveWindow,
    flush: &FlushHandle,
) -> oneshot::Receiver<ConnectOutcome> {
    let (tx, rx) = oneshot::channel();
    let queue = flush.queue();
    tokio::spawn(async move {
        let outcome = match manager.connect_with(&config).await {
            Ok(stream) => {
                spawn_ingest(stream, window, queue);
                Ok(manager
                    .device()
                    .map(|d| d.name().to_owned())
                    .unwrap_or_else(|| config.device_name.clone()))
            }
            Err(e) => {
                warn!("Connect failed: {e}");
                Err(e.to_string())
            }
        };
        let _ = tx.send(outcome);
    });
    rx
}

async fn run<T: Transport>(
    transport: T,
    config: MirasClientConfig,
    mut app: App,
    window: LiveWindow,
    flush: FlushHandle,
) -> Result<()> {
    let manager = Arc::new(ConnectionManager::new(transport));
    let mut pending_connect: Option<oneshot::Receiver<ConnectOutcome>> = None;

    // ── Terminal setup ────────────────────────────────────────────────────────
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    let tick = Duration::from_millis(33); // ~30 FPS

    // ── Main loop ─────────────────────────────────────────────────────────────
    loop {
        // ── 1. Collect a finished connect attempt ─────────────────────────────
        if let Some(rx) = pending_connect.as_mut() {
            if let Ok(outcome) = rx.try_recv() {
                pending_connect = None;
                app.connecting = false;
                match outcome {
                    Ok(name) => {
                        info!("TUI: connected to {name}");
                        app.last_error = None;
                    }
                    Err(e) => app.last_error = Some(e),
                }
            }
        }

        // ── 2. Mirror connection state (passive disconnects land here) ───────
        app.device = match manager.state() {
            ConnectionState::Connected => manager.device_name(),
            ConnectionState::Disconnected => None,
        };
        app.flush = flush.stats();

        // ── 3. Render ─────────────────────────────────────────────────────────
        let samples = if app.show_chart {
            window.snapshot()
        } else {
            Vec::new()
        };
        terminal.draw(|f| draw(f, &app, &samples))?;

        // ── 4. Handle keyboard ────────────────────────────────────────────────
        if !event::poll(tick)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };

        // In raw mode Ctrl+C arrives as a key event, not SIGINT.
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
        if ctrl_c {
            break;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break,

            // Connect, only while disconnected and idle.
            KeyCode::Char('c') => {
                if !manager.is_connected() && pending_connect.is_none() {
                    app.connecting = true;
                    app.last_error = None;
                    pending_connect = Some(start_connect(
                        Arc::clone(&manager),
                        config.clone(),
                        window.clone(),
                        &flush,
                    ));
                }
            }

            KeyCode::Char('d') => {
                let manager = Arc::clone(&manager);
                // Never block the render loop on a BLE call.
                tokio::spawn(async move {
                    if let Err(e) = manager.disconnect().await {
                        warn!("Disconnect error: {e}");
                    }
                });
            }

            KeyCode::Char('v') => app.show_chart = !app.show_chart,

            _ => {}
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    if let Err(e) = manager.disconnect().await {
        warn!("Disconnect error: {e}");
    }
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    let stats = flush.shutdown().await;
    info!("TUI: flush totals {stats:?}");
    Ok(())
}

// ── Drawing ───────────────────────────────────────────────────────────────────

fn draw(frame: &mut Frame, app: &App, samples: &[Sample]) {
    let area = frame.area();
    let root = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .split(area);

    draw_header(frame, root[0], app);
    if app.show_chart {
        draw_charts(frame, root[1], samples);
    } else {
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                " Charts hidden. Press [v] to show them.",
                Style::default().fg(Color::DarkGray),
            )))
            .block(Block::default().borders(Borders::ALL)),
            root[1],
        );
    }
    draw_footer(frame, root[2], app);
}

fn spinner_str() -> &'static str {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    SPINNER[(ms / 100) as usize % SPINNER.len()]
}

/// Title, connection status, flush counters, and sink.
fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let (label, color) = if app.connecting {
        (format!("{} Connecting…", spinner_str()), Color::Yellow)
    } else if app.device.is_some() {
        (format!("● {}", app.status_line()), Color::Green)
    } else if let Some(e) = &app.last_error {
        (format!("{} ({e})", app.status_line()), Color::Red)
    } else {
        (app.status_line(), Color::Yellow)
    };

    let mode = if app.simulate { "◆ Simulated" } else { "BLE" };
    let flushed = format!(
        "{} batches / {} smp",
        app.flush.batches_written, app.flush.samples_written
    );
    let failed_style = if app.flush.batches_failed > 0 {
        Style::default().fg(Color::Red)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let line = Line::from(vec![
        Span::styled(
            " MIRAS Monitor ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        sep(),
        Span::styled(mode, Style::default().fg(Color::Cyan)),
        sep(),
        Span::styled(flushed, Style::default().fg(Color::White)),
        sep(),
        Span::styled(format!("{} failed", app.flush.batches_failed), failed_style),
        sep(),
        Span::styled(app.sink.as_str(), Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ]);

    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn sep<'a>() -> Span<'a> {
    Span::styled(" │ ", Style::default().fg(Color::DarkGray))
}

/// Lay the twelve channels out as a grid of charts.
fn draw_charts(frame: &mut Frame, area: Rect, samples: &[Sample]) {
    let rows = Layout::vertical([Constraint::Ratio(1, GRID_ROWS as u32); GRID_ROWS]).split(area);
    for (r, row) in rows.iter().enumerate() {
        let cols =
            Layout::horizontal([Constraint::Ratio(1, GRID_COLS as u32); GRID_COLS]).split(*row);
        for (c, cell) in cols.iter().enumerate() {
            let ch = r * GRID_COLS + c;
            draw_channel(frame, *cell, ch, &channel_points(samples, ch));
        }
    }
}

/// `(seconds since connect, value)` pairs for channel `ch`; NaN readings and
/// samples too short to carry the channel are skipped.
fn channel_points(samples: &[Sample], ch: usize) -> Vec<(f64, f64)> {
    samples
        .iter()
        .filter_map(|s| {
            let v = *s.values.get(ch)?;
            (!v.is_nan()).then(|| (s.timestamp as f64 / 1000.0, v))
        })
        .collect()
}

/// Min/max of `values` with a little headroom; never degenerate.
fn bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return [0.0, 1.0];
    }
    let pad = ((hi - lo) * 0.05).max(1.0);
    [lo - pad, hi + pad]
}

fn draw_channel(frame: &mut Frame, area: Rect, ch: usize, data: &[(f64, f64)]) {
    let color = COLORS[ch];
    let x = match (data.first(), data.last()) {
        (Some(first), Some(last)) if last.0 > first.0 => [first.0, last.0],
        (Some(first), _) => [first.0, first.0 + 1.0],
        _ => [0.0, 1.0],
    };
    let y = bounds(data.iter().map(|&(_, v)| v));

    let latest = data
        .last()
        .map(|&(_, v)| format!("{v:.0}"))
        .unwrap_or_else(|| "–".into());
    let title = format!(" {}  {latest} ", CHANNEL_NAMES[ch]);

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(data);

    let chart = Chart::new(vec![dataset])
        .block(
            Block::default()
                .title(Span::styled(
                    title,
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color)),
        )
        .x_axis(
            Axis::default()
                .bounds(x)
                .labels(vec![format!("{:.1}s", x[0]), format!("{:.1}s", x[1])])
                .style(Style::default().fg(Color::DarkGray)),
        )
        .y_axis(
            Axis::default()
                .bounds(y)
                .labels(vec![format!("{:.0}", y[0]), format!("{:.0}", y[1])])
                .style(Style::default().fg(Color::DarkGray)),
        );

    frame.render_widget(chart, area);
}

fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let connect_style = if app.device.is_some() || app.connecting {
        // Connecting while connected is not offered.
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    };

    let keys = Line::from(vec![
        Span::raw(" "),
        Span::styled("[c]", connect_style),
        Span::raw("Connect  "),
        key("[d]"),
        Span::raw("Disconnect  "),
        key("[v]"),
        Span::raw(if app.show_chart { "Hide chart  " } else { "Show chart  " }),
        key("[q]"),
        Span::raw("Quit"),
    ]);

    let hint = if app.device.is_none() && !app.connecting && !app.simulate {
        if cfg!(target_os = "macos") {
            " Power on MIRAS and press [c]. On macOS grant Bluetooth access: System Settings → Privacy & Security → Bluetooth."
        } else {
            " Power on MIRAS, keep it in range, and press [c]."
        }
    } else {
        " Logs: miras-tui.log"
    };

    frame.render_widget(
        Paragraph::new(vec![
            keys,
            Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))),
        ])
        .block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn key(s: &str) -> Span<'_> {
    Span::styled(
        s,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    use std::io::IsTerminal as _;
    if !io::stdout().is_terminal() {
        eprintln!("Error: miras-rs tui requires a real terminal (TTY).");
        eprintln!("Run it directly in a terminal emulator, not piped or redirected.");
        std::process::exit(1);
    }

    // ── Logging ─────────────────────────────────────────────────────────────
    // Logs go to miras-tui.log in the current directory so they never
    // interfere with the display. RUST_LOG=debug for BLE diagnostics.
    if let Ok(file) = std::fs::File::create("miras-tui.log") {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    }

    let simulate = std::env::args().any(|a| a == "--simulate");
    let config = MirasClientConfig::default();
    let sink_config = SinkConfig::from_env();
    info!("TUI: persisting batches to {}", sink_config.describe());

    let flush = FlushScheduler::new(sink_config.build()?, FlushConfig::default()).spawn();
    let app = App::new(simulate, sink_config.describe());
    let window = LiveWindow::default();

    if simulate {
        run(SimulatedTransport::new(), config, app, window, flush).await
    } else {
        let transport = BleTransport::new(&config);
        run(transport, config, app, window, flush).await
    }
}
