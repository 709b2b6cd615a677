// ============================================================================
// MQTT Publisher
// ============================================================================
//
// Publishes the next arrival for one stop on an adaptive interval, and
// listens on a refresh topic that forces a feed refresh and a burst of fast
// publishes.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::facade::{QueryResult, ScheduleService, local_now};
use crate::publisher::discovery;
use crate::publisher::schedule::{PublishSchedule, PublishTimer};

const CLIENT_ID_PREFIX: &str = "rtl-schedule";
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// What a single publish tick should do with a query result.
#[derive(Debug, PartialEq, Eq)]
pub enum Tick {
    Publish(Vec<u8>),
    Skip,
    Stop,
}

pub fn tick_for(result: &QueryResult, stop_code: u32) -> Result<Tick> {
    match result {
        QueryResult::Found(next) => {
            let payload = serde_json::to_vec(&next.payload(Some(stop_code)))
                .context("failed to serialize state payload")?;
            Ok(Tick::Publish(payload))
        }
        QueryResult::NoMoreService => {
            info!(stop_code, "No more buses for today.");
            Ok(Tick::Skip)
        }
        QueryResult::StopNotFound => {
            error!(stop_code, "Stop code not found, stopping the publisher");
            Ok(Tick::Stop)
        }
    }
}

fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let client_id = format!("{}-{}", CLIENT_ID_PREFIX, config.stop_code);
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(KEEP_ALIVE);

    if let Some((username, password)) = &config.credentials {
        options.set_credentials(username.clone(), password.clone());
    }
    if config.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    options
}

/// Starts a forced refresh on the blocking pool unless one is already
/// running. Returns whether a refresh was started.
fn spawn_refresh(refreshes: &mut JoinSet<crate::Result<()>>, service: &Arc<ScheduleService>) -> bool {
    if !refreshes.is_empty() {
        return false;
    }
    let service = service.clone();
    refreshes.spawn_blocking(move || service.force_refresh());
    true
}

pub struct Publisher {
    service: Arc<ScheduleService>,
    config: MqttConfig,
    timer: PublishTimer,
    client: AsyncClient,
    eventloop: EventLoop,
}

impl Publisher {
    pub fn new(service: Arc<ScheduleService>, config: MqttConfig, schedule: PublishSchedule) -> Self {
        let (client, eventloop) = AsyncClient::new(mqtt_options(&config), 10);
        Self {
            service,
            config,
            timer: PublishTimer::new(schedule),
            client,
            eventloop,
        }
    }

    /// Runs until Ctrl-C or an unknown stop code, then disconnects.
    pub async fn run(mut self) -> Result<()> {
        info!(
            stop_code = self.config.stop_code,
            host = %self.config.host,
            port = self.config.port,
            "Starting MQTT publisher"
        );

        self.client
            .subscribe(self.config.refresh_topic.clone(), QoS::AtLeastOnce)
            .await
            .context("failed to queue refresh topic subscription")?;

        if let Some(prefix) = self.config.discovery_prefix.clone() {
            self.publish_discovery(&prefix).await?;
        }

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let next_publish = sleep(Duration::ZERO);
        tokio::pin!(next_publish);

        // Queries and forced refreshes can block on a download, so they run off
        // the loop and the event loop keeps answering broker pings meanwhile.
        let mut queries: JoinSet<QueryResult> = JoinSet::new();
        let mut refreshes: JoinSet<crate::Result<()>> = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = &mut next_publish, if queries.is_empty() => {
                    let service = self.service.clone();
                    let stop_code = self.config.stop_code;
                    let now = local_now();
                    queries.spawn_blocking(move || service.get_next_stop(stop_code, now));
                }
                Some(joined) = queries.join_next() => {
                    let result = joined.context("next stop query panicked")?;
                    if !self.publish_result(&result).await? {
                        break;
                    }
                    let interval = self.timer.next_interval(local_now());
                    info!(interval_secs = interval.as_secs(), "Waiting before next publish");
                    next_publish.as_mut().reset(Instant::now() + interval);
                }
                Some(joined) = refreshes.join_next() => {
                    match joined {
                        Ok(Ok(())) => info!("Feed refreshed"),
                        Ok(Err(e)) => warn!(error = %e, "Feed refresh failed, keeping the previous feed"),
                        Err(e) => error!(error = %e, "Feed refresh task panicked"),
                    }
                    self.timer.start_burst(local_now());
                    next_publish.as_mut().reset(Instant::now());
                }
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(message)))
                        if message.topic == self.config.refresh_topic =>
                    {
                        info!(topic = %message.topic, "Refresh action received");
                        if !spawn_refresh(&mut refreshes, &self.service) {
                            debug!("Feed refresh already running, ignoring the request");
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                    }
                    Ok(event) => debug!(?event, "MQTT event"),
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error, retrying");
                        sleep(RECONNECT_DELAY).await;
                    }
                },
            }
        }

        self.disconnect().await;
        Ok(())
    }

    async fn publish_discovery(&self, prefix: &str) -> Result<()> {
        let topic = discovery::discovery_topic(prefix, self.config.stop_code);
        let payload = serde_json::to_vec(&discovery::discovery_config(
            self.config.stop_code,
            &self.config.state_topic,
        ))
        .context("failed to serialize discovery config")?;

        self.client
            .publish(topic.clone(), QoS::AtLeastOnce, true, payload)
            .await
            .context("failed to queue discovery config")?;
        info!(%topic, "Published Home Assistant discovery configuration");
        Ok(())
    }

    /// Returns false when publishing should stop.
    async fn publish_result(&self, result: &QueryResult) -> Result<bool> {
        match tick_for(result, self.config.stop_code)? {
            Tick::Publish(payload) => {
                let topic = self.config.state_topic.clone();
                match self
                    .client
                    .publish(topic.clone(), QoS::AtLeastOnce, false, payload)
                    .await
                {
                    Ok(()) => info!(%topic, "Published next stop"),
                    Err(e) => warn!(%topic, error = %e, "Failed to queue state message"),
                }
                Ok(true)
            }
            Tick::Skip => Ok(true),
            Tick::Stop => Ok(false),
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "Failed to queue MQTT disconnect");
            return;
        }
        // Drive the event loop until the disconnect has gone out.
        while let Ok(event) = self.eventloop.poll().await {
            if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
                break;
            }
        }
        info!("Disconnected from MQTT broker");
    }
}
