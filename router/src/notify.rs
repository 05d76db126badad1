//! Webhook delivery of fleet events.
//!
//! Events arrive on a bounded queue fed by [`EventBus`](crate::events::EventBus)
//! and are POSTed as JSON to every configured URL. Each URL has its own
//! circuit breaker, keyed by the URL itself.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc;

use fleet_common::FleetEvent;

use crate::config::WebhookConfig;
use crate::metrics::FleetMetrics;
use crate::resilience::CircuitBreaker;

/// Create the queue between the event bus and the dispatcher.
pub fn webhook_queue(config: &WebhookConfig) -> (mpsc::Sender<FleetEvent>, mpsc::Receiver<FleetEvent>) {
    mpsc::channel(config.queue_size.max(1))
}

/// Outcome of delivering one event to one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Failed(String),
    /// The URL's breaker is open; no request was made.
    Skipped,
}

pub struct WebhookDispatcher {
    urls: Vec<String>,
    http_client: Client,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<FleetMetrics>,
}

impl WebhookDispatcher {
    pub fn new(
        config: &WebhookConfig,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<FleetMetrics>,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            urls: config.urls.clone(),
            http_client,
            breaker,
            metrics,
        })
    }

    /// Drain the queue until every sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<FleetEvent>) {
        tracing::info!(urls = self.urls.len(), "Webhook dispatcher started");
        while let Some(event) = rx.recv().await {
            self.dispatch(&event).await;
        }
        tracing::info!("Webhook dispatcher stopped");
    }

    /// Deliver one event to every URL, in order.
    pub async fn dispatch(&self, event: &FleetEvent) -> Vec<Delivery> {
        let mut results = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            results.push(self.deliver(url, event).await);
        }
        results
    }

    async fn deliver(&self, url: &str, event: &FleetEvent) -> Delivery {
        if !self.breaker.allow(url).await {
            self.metrics.inc_breaker_rejections();
            tracing::debug!(url = %url, event = event.kind(), "Webhook circuit open, skipping");
            return Delivery::Skipped;
        }

        let result = self.http_client.post(url).json(event).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                self.breaker.success(url).await;
                Delivery::Delivered
            }
            Ok(response) => {
                let status = response.status();
                self.breaker.fail(url).await;
                tracing::warn!(url = %url, status = %status, "Webhook rejected event");
                Delivery::Failed(format!("HTTP {}", status.as_u16()))
            }
            Err(e) => {
                self.breaker.fail(url).await;
                tracing::warn!(url = %url, error = %e, "Webhook delivery failed");
                Delivery::Failed(e.to_string())
            }
        }
    }
}
