mod cli;
mod render;
mod telemetry;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dolly_sync::autoscroll::{AutoScroller, ScrollTiming};
use dolly_sync::fetch::{HttpSnapshotSource, SnapshotSource};
use dolly_sync::notify::NotificationCenter;
use dolly_sync::transport::WebSocketTransport;
use dolly_sync::{metrics, DashboardSession, SyncConfig};
use tokio::task::JoinHandle;
use tracing::info;

use crate::cli::Cli;
use crate::render::{TerminalBell, TickerSurface};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = SyncConfig::from_env();
    cli.apply(&mut config);
    telemetry::init_tracing(&config.log_filter);

    let transport = WebSocketTransport::new(&config.ws_url)
        .with_context(|| format!("invalid push endpoint {}", config.ws_url))?;
    let mut source = HttpSnapshotSource::new(&config.api_base)
        .with_context(|| format!("invalid api base {}", config.api_base))?;
    if let Some(field) = &cli.id_field {
        source = source.with_id_field(field.clone());
    }
    let source: Arc<dyn SnapshotSource> = Arc::new(source);

    let background = cli.background;
    let notifications = NotificationCenter::builder(config.notifications())
        .platform(Arc::new(TerminalBell))
        .visibility(move || !background)
        .build();

    info!(ws = %config.ws_url, api = %config.api_base, views = cli.views.len(), "starting dolly-watch");
    let session = DashboardSession::start(Arc::new(transport), &config, notifications);

    let mut printers: Vec<JoinHandle<()>> = vec![
        tokio::spawn(render::print_connection(session.watch_connection())),
        tokio::spawn(render::print_banner(session.notifications().subscribe())),
        tokio::spawn(render::print_outcomes(session.subscribe_outcomes())),
    ];
    for spec in cli.views.iter().cloned() {
        let handle = session.mount(spec, source.clone());
        if cli.ticker.as_deref() != Some(handle.id()) {
            printers.push(tokio::spawn(render::print_view(handle)));
        }
    }

    let _ticker = match &cli.ticker {
        Some(name) => {
            let handle = session
                .view(name)
                .ok_or_else(|| anyhow!("--ticker names unknown view `{name}`"))?;
            let (surface, offsets) = TickerSurface::new(handle.subscribe());
            // one unit is one terminal row
            let timing = ScrollTiming {
                buffer_px: 1.0,
                ..config.scroll()
            };
            let scroller = Arc::new(AutoScroller::new(Arc::new(surface), timing));
            printers.push(scroller.follow_view(handle.subscribe()));
            printers.push(tokio::spawn(render::print_ticker(handle.subscribe(), offsets)));
            Some(scroller)
        }
        None => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    for printer in printers {
        printer.abort();
    }
    session.shutdown().await;

    if cli.metrics {
        print!("{}", metrics::render());
    }
    Ok(())
}
