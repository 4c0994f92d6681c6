//! Alert delivery: the event log and an optional Discord webhook

use crate::alerts::{Alert, AlertKind};
use crate::model::ClusterSnapshot;
use crate::store::{EventRecord, EventSink, StoreError};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task;

/// Environment variable holding the webhook URL
pub const WEBHOOK_ENV: &str = "DISCORD_WEBHOOK_URL";
/// Embed colour for offline servers (red)
pub const OFFLINE_COLOR: u32 = 15158332;
/// Embed colour for every other alert (yellow)
pub const WARNING_COLOR: u32 = 16776960;

const FOOTER: &str = "Fleet Monitor";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    embeds: [Embed<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: String,
    description: &'a str,
    color: u32,
    timestamp: String,
    footer: Footer,
}

#[derive(Debug, Serialize)]
struct Footer {
    text: &'static str,
}

impl<'a> WebhookPayload<'a> {
    fn for_alert(alert: &'a Alert) -> Self {
        let color = match alert.kind {
            AlertKind::ServerOffline => OFFLINE_COLOR,
            _ => WARNING_COLOR,
        };

        Self {
            embeds: [Embed {
                title: format!("🚨 {} Alert", alert.kind),
                description: &alert.message,
                color,
                timestamp: alert.timestamp.to_rfc3339(),
                footer: Footer { text: FOOTER },
            }],
        }
    }
}

/// Posts alerts to a Discord webhook as embeds
#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: reqwest::Client,
    url: String,
}

impl DiscordNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, url: url.into() })
    }

    /// Notifier for `DISCORD_WEBHOOK_URL`, if it is set and non-empty
    pub fn from_vars<I>(vars: I) -> Option<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let url = vars.get(WEBHOOK_ENV).map(|url| url.trim()).filter(|url| !url.is_empty())?;

        match Self::new(url) {
            Ok(notifier) => Some(notifier),
            Err(e) => {
                error!("Webhook disabled: {}", e);
                None
            }
        }
    }

    pub async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(&WebhookPayload::for_alert(alert))
            .send()
            .await?
            .error_for_status()?;
        debug!("Delivered {} alert for {}", alert.kind, alert.server_key);
        Ok(())
    }

    /// Sends each alert in turn; failures are logged and skipped
    pub async fn send_all(&self, alerts: &[Alert]) -> usize {
        let mut delivered = 0;
        for alert in alerts {
            match self.send(alert).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Could not deliver alert for {}: {}", alert.server_key, e),
            }
        }
        delivered
    }
}

/// Records each cycle's metrics and alerts, then forwards the alerts
pub struct AlertDispatcher {
    events: Arc<dyn EventSink>,
    webhook: Option<DiscordNotifier>,
}

impl AlertDispatcher {
    pub fn new(events: Arc<dyn EventSink>, webhook: Option<DiscordNotifier>) -> Self {
        if webhook.is_none() {
            info!("No {} set, alerts go to the event log only", WEBHOOK_ENV);
        }
        Self { events, webhook }
    }

    pub async fn dispatch(&self, cluster: &ClusterSnapshot, alerts: &[Alert]) {
        let mut records = Vec::with_capacity(alerts.len() + 1);
        records.push(EventRecord::Metrics(cluster.metrics()));
        records.extend(alerts.iter().cloned().map(EventRecord::Alert));

        let events = Arc::clone(&self.events);
        let written = task::spawn_blocking(move || {
            for record in &records {
                events.record(record)?;
            }
            Ok::<_, StoreError>(())
        });
        match written.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to write event log: {}", e),
            Err(e) => error!("Event log task failed: {}", e),
        }

        if let Some(webhook) = &self.webhook {
            if !alerts.is_empty() {
                let delivered = webhook.send_all(alerts).await;
                debug!("Delivered {}/{} alerts to webhook", delivered, alerts.len());
            }
        }
    }
}
