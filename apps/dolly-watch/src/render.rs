//! Plain terminal output for views, the notice slot and the ticker.

use std::io::{IsTerminal, Write};
use std::time::Duration;

use async_trait::async_trait;
use crossterm::style::Stylize;
use crossterm::terminal;
use dolly_sync::autoscroll::{Extent, ScrollSurface};
use dolly_sync::connection::{ConnectionState, ConnectionStatus};
use dolly_sync::debounce::{RefreshOutcome, ViewEvent, ViewHandle};
use dolly_sync::notify::{Permission, PlatformNotifier, Severity, Slot};
use dolly_sync::reconcile::Reconciliation;
use dolly_sync::{SyncError, SyncResult, ViewModel};
use tokio::sync::{broadcast, watch};
use tracing::debug;

const PAYLOAD_WIDTH: usize = 72;
/// Rows reserved for the banner and view header.
const CHROME_ROWS: u16 = 4;

pub async fn print_view(handle: ViewHandle) {
    let mut models = handle.subscribe();
    loop {
        let model = models.borrow_and_update().clone();
        if model.is_populated() {
            println!("{}", format_view(handle.id(), &model));
        }
        if models.changed().await.is_err() {
            break;
        }
    }
}

pub fn format_view(name: &str, model: &ViewModel) -> String {
    let revision = model
        .applied_revision()
        .map(|rev| rev.to_string())
        .unwrap_or_else(|| "-".into());
    let mut out = format!(
        "== {name} v{} rev {revision} ({} rows) ==",
        model.version(),
        model.len()
    );
    for entity in model.entities() {
        let flags = model.flags(&entity.id);
        let marker = match (flags.selected, flags.expanded) {
            (true, true) => "*+",
            (true, false) => "* ",
            (false, true) => " +",
            (false, false) => "  ",
        };
        out.push_str(&format!("\n{marker} {}", entity.id));
        if flags.expanded {
            out.push_str(&format!("  {}", truncate(&entity.payload.to_string(), PAYLOAD_WIDTH)));
        }
    }
    out
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

pub async fn print_banner(mut slot: watch::Receiver<Slot>) {
    loop {
        if let Slot::Visible(notification) = &*slot.borrow_and_update() {
            let label = format!("[{}]", notification.severity);
            let label = match notification.severity {
                Severity::Error => label.red(),
                Severity::Warning => label.yellow(),
                Severity::Success => label.green(),
                Severity::Info => label.cyan(),
            };
            println!("{label} {}", notification.message);
        }
        if slot.changed().await.is_err() {
            break;
        }
    }
}

pub async fn print_connection(mut states: watch::Receiver<ConnectionState>) {
    let mut last: Option<ConnectionStatus> = None;
    loop {
        let state = states.borrow_and_update().clone();
        if last != Some(state.status) {
            let attempts = if state.attempts > 0 {
                format!(" (attempt {})", state.attempts)
            } else {
                String::new()
            };
            eprintln!("live updates: {}{attempts}", state.status);
            last = Some(state.status);
        }
        if states.changed().await.is_err() {
            break;
        }
    }
}

pub async fn print_outcomes(mut outcomes: broadcast::Receiver<ViewEvent>) {
    loop {
        match outcomes.recv().await {
            Ok(ViewEvent {
                view,
                outcome: RefreshOutcome::Failed { error },
            }) => {
                eprintln!("{} {view}: {error}; retrying on the next update", "refresh failed".red());
            }
            Ok(ViewEvent {
                view,
                outcome: RefreshOutcome::Reconciled(result),
            }) => {
                if let Some(line) = arrival_line(&view, &result) {
                    println!("{line}");
                }
                debug!(view = %view, result = result.label(), "view refreshed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "outcome printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Points at the focused arrival of an applied merge.
pub fn arrival_line(view: &str, result: &Reconciliation) -> Option<String> {
    let Reconciliation::Applied(report) = result else {
        return None;
    };
    let focus = report.focus.as_ref()?;
    match report.arrived.len().saturating_sub(1) {
        0 => Some(format!("-> {view}: {focus}")),
        more => Some(format!("-> {view}: {focus} (+{more} more)")),
    }
}

/// Scrolls a view's rows inside the terminal height, one row per unit.
pub struct TickerSurface {
    models: watch::Receiver<ViewModel>,
    offset: watch::Sender<f64>,
}

impl TickerSurface {
    pub fn new(models: watch::Receiver<ViewModel>) -> (Self, watch::Receiver<f64>) {
        let (offset, offsets) = watch::channel(0.0);
        (Self { models, offset }, offsets)
    }
}

impl ScrollSurface for TickerSurface {
    fn measure(&self) -> Option<Extent> {
        let (_, rows) = terminal::size().ok()?;
        let container = rows.checked_sub(CHROME_ROWS).filter(|rows| *rows > 0)?;
        Some(Extent {
            content: self.models.borrow().len() as f64,
            container: f64::from(container),
        })
    }

    fn animate_to(&self, offset: f64, duration: Duration) {
        debug!(offset, ?duration, "ticker slide");
        self.offset.send_replace(offset);
    }

    fn pin(&self, offset: f64) {
        self.offset.send_replace(offset);
    }
}

pub async fn print_ticker(models: watch::Receiver<ViewModel>, mut offsets: watch::Receiver<f64>) {
    loop {
        let offset = *offsets.borrow_and_update();
        let height = terminal::size()
            .map(|(_, rows)| rows.saturating_sub(CHROME_ROWS))
            .unwrap_or(0) as usize;
        let start = offset.max(0.0).floor() as usize;
        let window: Vec<String> = models
            .borrow()
            .ids()
            .skip(start)
            .take(height)
            .map(str::to_string)
            .collect();
        if !window.is_empty() {
            println!("-- ticker @{start} --\n{}", window.join("\n"));
        }
        if offsets.changed().await.is_err() {
            break;
        }
    }
}

/// Escalates notices with the terminal bell when stderr is a terminal.
#[derive(Debug, Default)]
pub struct TerminalBell;

#[async_trait]
impl PlatformNotifier for TerminalBell {
    async fn request_permission(&self) -> SyncResult<Permission> {
        if std::io::stderr().is_terminal() {
            Ok(Permission::Granted)
        } else {
            Ok(Permission::Denied)
        }
    }

    async fn notify(&self, title: &str, body: &str, tag: &str) -> SyncResult<()> {
        writeln!(std::io::stderr(), "\x07{} {body}", format!("{title}:").bold())
            .map_err(|err| SyncError::Transport(format!("terminal bell: {err}")))?;
        debug!(tag, "rang terminal bell");
        Ok(())
    }
}
