use std::time::Duration;

use clap::Parser;
use dolly_sync::fetch::ViewQuery;
use dolly_sync::registry::{Interest, ViewSpec};
use dolly_sync::router::PushKind;
use dolly_sync::SyncConfig;

#[derive(Parser, Debug)]
#[command(
    name = "dolly-watch",
    version,
    about = "Mirror live dolly dashboard views in the terminal"
)]
pub struct Cli {
    /// Push channel endpoint (ws:// or wss://).
    #[arg(long, env = "DOLLY_WS_URL")]
    pub ws_url: Option<String>,

    /// Base URL the view paths are resolved against.
    #[arg(long, env = "DOLLY_API_BASE")]
    pub api_base: Option<String>,

    /// View to mount, as `name=path[?key=value&...][@kind,kind]`.
    /// Without `@kinds` the view refreshes on every data event.
    #[arg(long = "view", value_name = "SPEC", required = true, value_parser = parse_view)]
    pub views: Vec<ViewSpec>,

    /// Row field holding the entity id.
    #[arg(long)]
    pub id_field: Option<String>,

    /// Auto-scroll the named view like a wall display.
    #[arg(long, value_name = "VIEW")]
    pub ticker: Option<String>,

    /// Treat the dashboard as hidden so notices escalate to the terminal bell.
    #[arg(long, default_value_t = false)]
    pub background: bool,

    /// Print the Prometheus metrics on exit.
    #[arg(long, default_value_t = false)]
    pub metrics: bool,

    /// Give up after this many failed connection attempts.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Refresh coalescing window in milliseconds.
    #[arg(long)]
    pub debounce_ms: Option<u64>,
}

impl Cli {
    pub fn apply(&self, config: &mut SyncConfig) {
        if let Some(url) = &self.ws_url {
            config.ws_url = url.clone();
        }
        if let Some(base) = &self.api_base {
            config.api_base = base.clone();
        }
        if let Some(attempts) = self.max_attempts {
            config.max_attempts = (attempts > 0).then_some(attempts);
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce = Duration::from_millis(ms);
        }
    }
}

fn parse_view(raw: &str) -> Result<ViewSpec, String> {
    let (name, rest) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=path, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("view name is empty".into());
    }

    let (target, kinds) = match rest.rsplit_once('@') {
        Some((target, kinds)) => (target, Some(kinds)),
        None => (rest, None),
    };
    let (path, params) = match target.split_once('?') {
        Some((path, params)) => (path, params),
        None => (target, ""),
    };
    if !path.starts_with('/') {
        return Err(format!("view path must start with '/', got `{path}`"));
    }

    let mut query = ViewQuery::new(path);
    for pair in params.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got `{pair}`"))?;
        query = query.param(key, value);
    }

    let mut spec = ViewSpec::new(name, query);
    if let Some(kinds) = kinds {
        let kinds: Vec<PushKind> = kinds
            .split(',')
            .map(str::trim)
            .filter(|kind| !kind.is_empty())
            .map(PushKind::parse)
            .collect();
        if kinds.is_empty() {
            return Err(format!("no event kinds after '@' in `{raw}`"));
        }
        spec = spec.with_interests(Interest::kinds(kinds));
    }
    Ok(spec)
}
