//! Stateless event-bus subscriber that fans events out to configured webhook URLs.
//! Dispatch is best-effort: a failing POST is logged and never affects engine state.

use crate::event::record::{Event, EventType};
use crate::event::{EventBus, EventPriority};
use crate::util::threads::spawn_named_thread;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_USER_AGENT: &str = "TSPM-Webhook/1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    /// Empty means "all events".
    pub events: Vec<EventType>,
    pub headers: HashMap<String, String>,
    pub enabled: bool,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    ts: u128,
    event: &'a str,
    data: serde_json::Value,
}

/// Subscribes to the bus and POSTs matching events to every enabled, matching webhook.
pub struct WebhookDispatcher {
    client: reqwest::blocking::Client,
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        Self { client: reqwest::blocking::Client::builder().timeout(REQUEST_TIMEOUT).build().expect("failed to build http client") }
    }

    /// Spawns a thread that polls `event_bus` for every event and fans matches out to
    /// `webhooks`, one spawned dispatch thread per webhook so a slow endpoint can't
    /// delay delivery to the others.
    pub fn spawn(self: Arc<Self>, event_bus: Arc<EventBus>, webhooks: Vec<WebhookConfig>) -> JoinHandle<()> {
        let (_id, consumer) = event_bus.on_any(EventPriority::Low);
        let dispatcher = self;

        spawn_named_thread("webhook-dispatcher", move || {
            while let Ok(event) = consumer.as_ref().recv() {
                let event = Arc::new(event);
                let mut handles = Vec::with_capacity(webhooks.len());
                for webhook in &webhooks {
                    if !webhook.enabled || (!webhook.events.is_empty() && !webhook.events.contains(&event.event_type)) {
                        continue;
                    }
                    let dispatcher = dispatcher.clone();
                    let webhook = webhook.clone();
                    let event = event.clone();
                    handles.push(spawn_named_thread("webhook-post", move || {
                        dispatcher.post(&webhook, &event);
                    }));
                }
                for handle in handles {
                    let _ = handle.join();
                }
            }
        })
    }

    fn post(&self, webhook: &WebhookConfig, event: &Event) {
        let payload = WebhookPayload {
            ts: now_ms(),
            event: event.event_type.wire(),
            data: serde_json::to_value(&event.data).unwrap_or(serde_json::Value::Null),
        };

        let mut request = self
            .client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", DEFAULT_USER_AGENT)
            .json(&payload);

        for (key, value) in &webhook.headers {
            request = request.header(key, value);
        }

        if let Err(err) = request.send() {
            tracing::warn!(url = %webhook.url, error = %err, "webhook dispatch failed");
        }
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}
