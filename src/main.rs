mod capture;
mod config;
mod graph;
mod model;
mod parse;
mod physics;
mod resolve;
mod ring;
mod sim;
mod stats;
mod ui;

use std::io;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::Context;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, widgets::ListState, Terminal};
use tracing_subscriber::EnvFilter;

use crate::capture::{spawn_sniffer, CaptureHealth, CaptureStatus, DumpcapSource};
use crate::config::Settings;
use crate::resolve::{CountryLookup, NameResolver, NoCountryLookup};
use crate::sim::SimLoop;

const CONFIG_PATH: &str = "netstar.yaml";

fn init_logging(log_file: &str) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let path = Path::new(log_file);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "netstar.log".into());
    let appender = tracing_appender::rolling::never(dir, name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load_or_default(Path::new(CONFIG_PATH));
    let _log_guard = init_logging(&settings.log_file).context("logging setup")?;
    tracing::info!(interface = %settings.interface, "starting netstar");

    // Wire the core before touching the terminal: ring, capture, resolvers.
    let (tx, rx) = ring::channel(ring::DEFAULT_CAPACITY);
    let health = Arc::new(CaptureHealth::new());
    let sniffer = match DumpcapSource::open(&settings.interface, &settings.bpf_filter) {
        Ok(source) => Some(spawn_sniffer(source, tx, health.clone())?),
        Err(e) => {
            tracing::error!("{e}");
            health.set(CaptureStatus::Failed(e.to_string()));
            None
        }
    };

    let geo: Arc<dyn CountryLookup> = Arc::new(NoCountryLookup);
    let settings = Arc::new(RwLock::new(settings));
    let mut sim = SimLoop::new(rx, settings.clone(), NameResolver::new(), geo);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut list_state = ListState::default();
    list_state.select(Some(0));

    terminal.clear()?;
    loop {
        sim.pump(Instant::now());

        let rows = sim.graph.roster();
        if let Some(i) = list_state.selected() {
            if i >= rows.len() && !rows.is_empty() {
                list_state.select(Some(rows.len() - 1));
            }
        }
        let status = health.status();
        let debug = settings.read().unwrap().debug;
        terminal.draw(|f| ui::draw(f, &sim, &status, &rows, &mut list_state, debug))?;

        if event::poll(Duration::from_millis(16))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char(' ') => sim.paused = !sim.paused,
                    KeyCode::Char('c') => sim.graph.clear(),
                    KeyCode::Char('d') => {
                        let mut s = settings.write().unwrap();
                        s.debug = !s.debug;
                    }
                    KeyCode::Char('f') => {
                        if let Some((key, _)) = list_state.selected().and_then(|i| rows.get(i)) {
                            sim.graph.toggle_frozen(key);
                        }
                    }
                    KeyCode::Down => {
                        let i = match list_state.selected() {
                            Some(i) => {
                                if i >= rows.len().saturating_sub(1) {
                                    0
                                } else {
                                    i + 1
                                }
                            }
                            None => 0,
                        };
                        list_state.select(Some(i));
                    }
                    KeyCode::Up => {
                        let i = match list_state.selected() {
                            Some(i) => {
                                if i == 0 {
                                    rows.len().saturating_sub(1)
                                } else {
                                    i - 1
                                }
                            }
                            None => 0,
                        };
                        list_state.select(Some(i));
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(sniffer) = sniffer {
        sniffer.stop();
    }
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    tracing::info!("shut down cleanly");
    Ok(())
}
