mod config;
mod logging;
mod scheduler;
mod server;
mod slack;
mod tracker;

use backlog_storage::SqliteItemStore;
use backlog_sync::Backlog;
use config::load_config;
use logging::init_logging;
use slack::{bookmarks::BookmarkPublisher, saved::SavedListSource, socket, SlackClient};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};
use tracker::{RefreshTrigger, Tracker};

#[tokio::main]
async fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config_error: {err}");
            std::process::exit(2);
        }
    };
    let _log_guard = init_logging(&config);

    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            std::process::exit(2);
        }
    };

    let store = match SqliteItemStore::open(&config.db_path) {
        Ok(store) => store,
        Err(err) => {
            error!(event = "store_open_failed", error = %err, path = %config.db_path.display());
            std::process::exit(1);
        }
    };
    let backlog = Arc::new(Backlog::new(Arc::new(store), config.sample_size));
    match backlog.prime() {
        Ok(count) => info!(event = "backlog_loaded", open_count = count),
        Err(err) => warn!(event = "backlog_prime_failed", error = %err),
    }

    let slack = match SlackClient::new() {
        Ok(client) => client,
        Err(err) => {
            error!(event = "http_client_failed", error = %err);
            std::process::exit(1);
        }
    };
    let source = SavedListSource::new(
        slack.clone(),
        config.saved_api_base.clone(),
        config.client_token.clone(),
        config.cookie.clone(),
    );
    let publisher = BookmarkPublisher::new(
        slack.clone(),
        config.api_base.clone(),
        config.bot_token.clone(),
        config.channel_id.clone(),
    );
    let tracker = Arc::new(Tracker::new(backlog, source, publisher));

    let startup = tracker.refresh(RefreshTrigger::Startup).await;
    info!(
        event = "startup_refresh",
        outcome = ?startup,
        open_count = tracker.backlog().live_count()
    );
    let _timer = scheduler::start_refresh_timer(tracker.clone(), config.refresh_interval);

    match config.app_token.clone() {
        Some(app_token) => {
            let listener_tracker = tracker.clone();
            let base = config.api_base.clone();
            tokio::spawn(async move {
                socket::run_listener(slack, base, app_token, listener_tracker).await;
            });
        }
        None => warn!(event = "live_events_disabled", reason = "SLACK_APP_TOKEN not set"),
    }

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "bind_failed", error = %err, addr = %addr);
            std::process::exit(1);
        }
    };
    info!(event = "hub_start", addr = %addr, channel_id = %config.channel_id);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    if let Err(err) = axum::serve(listener, server::router(tracker))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
    }
    info!(event = "hub_stop");
}
