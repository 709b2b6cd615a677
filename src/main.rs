// RTL next-bus service
// Serves next-arrival lookups over HTTP and/or publishes them to MQTT.

use anyhow::{Context, Result};
use clap::Parser;
use rtl_schedule::config::{Cli, HttpConfig, Mode, MqttConfig};
use rtl_schedule::feed_cache::HttpFeedFetcher;
use rtl_schedule::http_server::{AppState, run_server};
use rtl_schedule::publisher::{PublishSchedule, Publisher};
use rtl_schedule::{ScheduleService, logging};
use std::sync::Arc;
use tracing::{error, info};

// ============================================================================
// Modes
// ============================================================================

async fn run(
    mode: Mode,
    http: HttpConfig,
    mqtt: Option<(MqttConfig, PublishSchedule)>,
    service: Arc<ScheduleService>,
) -> Result<()> {
    match mode {
        Mode::Http => {
            run_server(http, AppState::new(service))
                .await
                .context("HTTP server failed")?;
        }
        Mode::Mqtt => {
            let (config, schedule) = mqtt.context("MQTT settings missing")?;
            Publisher::new(service, config, schedule).run().await?;
        }
        Mode::Both => {
            let (config, schedule) = mqtt.context("MQTT settings missing")?;
            let publisher = Publisher::new(service.clone(), config, schedule);
            let (server, published) = tokio::join!(
                run_server(http, AppState::new(service)),
                publisher.run()
            );
            server.context("HTTP server failed")?;
            published?;
        }
    }

    info!("Shut down cleanly");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = logging::init(&cli.log_config())?;

    let mqtt = match cli.mode {
        Mode::Http => None,
        Mode::Mqtt | Mode::Both => Some((cli.mqtt_config()?, cli.publish_schedule())),
    };

    let feed = cli.feed_config();
    info!(
        mode = ?cli.mode,
        url = %feed.url,
        path = %feed.path.display(),
        "Initializing feed"
    );

    // Blocking I/O, so this runs before the async runtime starts.
    let fetcher = HttpFeedFetcher::new()?;
    let service = match ScheduleService::initialize(feed.into_cache(Box::new(fetcher))) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!(error = %e, "Failed to load the GTFS feed, cannot start without schedule data");
            // Returning drops the log guard, which flushes the file writer.
            return Err(e).context("no loadable GTFS feed");
        }
    };

    actix_web::rt::System::new().block_on(run(cli.mode, cli.http_config(), mqtt, service))
}
