//! Periodic broker publisher.
//!
//! Owns the broker connection and drives a three-state machine:
//! `Disconnected → Connecting → Connected`, falling back to `Disconnected`
//! on any I/O failure. Each service tick reconnects if needed (respecting a
//! fixed backoff, no exponential growth — the device runs forever), drains
//! inbound commands to the registered [`CommandHandler`], and on the publish
//! interval reads the shared slot and sends the latest reading as a JSON
//! record. Publish is best-effort: nothing is buffered or replayed.

use crate::broker::BrokerClient;
use crate::config::BrokerSettings;
use crate::slot::SharedSlot;
use crate::source::Reading;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Receiver for inbound control messages, dispatched by topic and payload.
pub trait CommandHandler: Send {
    fn on_command(&mut self, topic: &str, payload: &[u8]);
}

pub struct Publisher<H: CommandHandler> {
    cfg: BrokerSettings,
    slot: Arc<SharedSlot<Reading>>,
    handler: H,
    client: Option<BrokerClient>,
    state: ConnectionState,
    last_attempt: Option<Instant>,
    last_publish: Option<Instant>,
    publish_count: u64,
}

impl<H: CommandHandler> Publisher<H> {
    pub fn new(cfg: BrokerSettings, slot: Arc<SharedSlot<Reading>>, handler: H) -> Self {
        Self {
            cfg,
            slot,
            handler,
            client: None,
            state: ConnectionState::Disconnected,
            last_attempt: None,
            last_publish: None,
            publish_count: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of successful publishes. Increments only while `Connected`.
    pub fn publish_count(&self) -> u64 {
        self.publish_count
    }

    /// One service tick: reconnect, drain commands, publish on interval.
    pub async fn tick(&mut self) {
        if self.client.is_none() {
            self.try_connect().await;
            return;
        }
        self.service_inbound();
        if self.client.is_some() && self.publish_due() {
            self.publish_latest().await;
        }
    }

    fn backoff_elapsed(&self) -> bool {
        self.last_attempt
            .map_or(true, |t| t.elapsed() >= self.cfg.reconnect_backoff)
    }

    fn publish_due(&self) -> bool {
        self.last_publish
            .map_or(true, |t| t.elapsed() >= self.cfg.publish_interval)
    }

    async fn try_connect(&mut self) {
        if !self.backoff_elapsed() {
            return;
        }
        self.state = ConnectionState::Connecting;
        self.last_attempt = Some(Instant::now());
        match BrokerClient::connect(&self.cfg).await {
            Ok(client) => {
                info!(
                    "Connected to broker {}:{} as '{}'",
                    self.cfg.host,
                    self.cfg.port,
                    client.client_id()
                );
                self.client = Some(client);
                self.state = ConnectionState::Connected;
            }
            Err(e) => {
                warn!(
                    "Broker connect failed ({e}); retrying in {:?}",
                    self.cfg.reconnect_backoff
                );
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    fn service_inbound(&mut self) {
        loop {
            let Some(client) = self.client.as_mut() else {
                return;
            };
            match client.try_recv() {
                Ok(Some((topic, payload))) => self.handler.on_command(&topic, &payload),
                Ok(None) => return,
                Err(_) => {
                    warn!("Broker connection lost while servicing commands");
                    self.disconnect();
                    return;
                }
            }
        }
    }

    async fn publish_latest(&mut self) {
        let reading = match self.slot.read_latest().await {
            Ok(Some(reading)) => reading,
            Ok(None) => {
                debug!("No telemetry to publish this interval");
                return;
            }
            Err(e) => {
                warn!("Skipping publish: {e}");
                return;
            }
        };

        let payload = match serde_json::to_vec(&reading) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize reading: {e}");
                return;
            }
        };

        let Some(client) = self.client.as_mut() else {
            return;
        };
        match client.publish(&self.cfg.tx_topic, &payload).await {
            Ok(()) => {
                self.publish_count += 1;
                self.last_publish = Some(Instant::now());
                debug!(
                    "Published reading #{} to '{}'",
                    self.publish_count, self.cfg.tx_topic
                );
            }
            Err(e) => {
                // A failed write means the TCP connection is dead; the next
                // tick re-enters the connect path after the backoff.
                warn!("Publish failed ({e}); dropping broker connection");
                self.disconnect();
            }
        }
    }

    fn disconnect(&mut self) {
        self.client = None;
        self.state = ConnectionState::Disconnected;
        self.last_attempt = Some(Instant::now());
        self.last_publish = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NullHandler;
    impl CommandHandler for NullHandler {
        fn on_command(&mut self, _topic: &str, _payload: &[u8]) {}
    }

    fn test_cfg(port: u16) -> BrokerSettings {
        BrokerSettings {
            host: "127.0.0.1".into(),
            port,
            client_id: "edgecap-test".into(),
            tx_topic: "edgecap/test/tx".into(),
            rx_topic: "edgecap/test/rx".into(),
            username: "admin".into(),
            password: "admin".into(),
            publish_interval: Duration::from_millis(50),
            reconnect_backoff: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn failed_connect_respects_backoff() {
        // Port 1 is never listening.
        let slot = Arc::new(SharedSlot::new(Duration::from_millis(100)));
        let mut publisher = Publisher::new(test_cfg(1), slot, NullHandler);

        publisher.tick().await;
        assert_eq!(publisher.state(), ConnectionState::Disconnected);
        assert_eq!(publisher.publish_count(), 0);

        // Immediately afterwards the backoff has not elapsed; the tick must
        // not attempt another connect (observable as last_attempt unchanged).
        let first_attempt = publisher.last_attempt;
        publisher.tick().await;
        assert_eq!(publisher.last_attempt, first_attempt);
    }

    #[tokio::test]
    async fn never_publishes_while_disconnected() {
        let slot = Arc::new(SharedSlot::new(Duration::from_millis(100)));
        slot.write(Reading {
            ax: 1.0,
            ay: 2.0,
            az: 3.0,
            gx: 0.0,
            gy: 0.0,
            gz: 0.0,
            temp_c: 25.0,
            timestamp: chrono::Utc::now(),
        })
        .await
        .unwrap();

        let mut publisher = Publisher::new(test_cfg(1), slot, NullHandler);
        for _ in 0..5 {
            publisher.tick().await;
        }
        assert_eq!(publisher.publish_count(), 0);
    }
}
