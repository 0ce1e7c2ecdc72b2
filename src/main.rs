mod appstate;
mod config;
mod events;
mod gateway;
mod guard;
mod platform;
mod poll;
#[cfg(feature = "serve")]
mod serve;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use crate::guard::{GuardTiming, NameGuard};
use crate::platform::PlatformClient;

/// Watches one group conversation and reverts its display name to a locked
/// value whenever it is changed, via a realtime event subscription plus a
/// polling fallback.
#[derive(Parser, Debug)]
#[command(name = "threadlock", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "threadlock.toml")]
    config: PathBuf,

    /// Liveness endpoint port (overrides config and the PORT env var)
    #[arg(long)]
    port: Option<u16>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (throttle decisions, skipped events)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut cfg = match config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let env_port = std::env::var("PORT").ok().and_then(|p| p.parse().ok());
    if let Some(port) = cli.port.or(env_port) {
        cfg.serve.port = port;
    }

    if let Err(e) = cfg.validate() {
        tracing::error!(error = %e, "configuration rejected");
        std::process::exit(1);
    }

    let matcher = match events::TitleEventMatcher::from_config(&cfg.events) {
        Ok(matcher) => matcher,
        Err(e) => {
            tracing::error!(error = %e, "invalid event category pattern");
            std::process::exit(1);
        }
    };

    if cli.dry_run {
        println!("threadlock v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file: {}", cli.config.display());
        println!("Thread: {}", cfg.thread.thread_id);
        println!("Locked name: {:?}", cfg.thread.locked_name);
        println!("Gateway: {}", cfg.platform.base_url);
        println!("Poll interval: {}ms", cfg.timing.poll_interval_ms);
        println!("Liveness port: {}", cfg.serve.port);
        println!("Dry run mode — config validated, not running.");
        return;
    }

    let credentials = match appstate::load(&cfg.platform.appstate_file) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "failed to load session credentials");
            std::process::exit(1);
        }
    };

    let client = match gateway::HttpGateway::login(&cfg.platform.base_url, &credentials).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "platform login failed");
            std::process::exit(1);
        }
    };

    tracing::info!(
        thread = %cfg.thread.thread_id,
        locked_name = %cfg.thread.locked_name,
        poll_interval_ms = cfg.timing.poll_interval_ms,
        debounce_ms = cfg.timing.debounce_ms,
        "name lock engaged"
    );

    let guard = NameGuard::new(
        Arc::clone(&client),
        cfg.thread.thread_id.clone(),
        cfg.thread.locked_name.clone(),
        GuardTiming {
            throttle: cfg.timing.throttle(),
            debounce: cfg.timing.debounce(),
        },
    );

    // Initial check runs unthrottled so a divergence present at startup is
    // corrected right away.
    guard.evaluate(true).await;

    let events_rx = client.subscribe();
    let listener = events::start(guard.clone(), events_rx, matcher, cfg.timing.settle());
    let poller = poll::start(guard.clone(), cfg.timing.poll_interval());

    #[cfg(feature = "serve")]
    {
        let serve_config = cfg.serve.clone();
        let started_at = chrono::Utc::now();
        tokio::spawn(async move {
            if let Err(e) = serve::run(&serve_config, started_at).await {
                tracing::error!(error = %e, "liveness endpoint failed");
            }
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }

    poller.stop();
    listener.abort();
    tracing::info!("threadlock stopped");
}

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "threadlock=debug"
    } else if cli.quiet {
        "threadlock=warn"
    } else {
        "threadlock=info"
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.parse().unwrap()),
        )
        .init();
}
