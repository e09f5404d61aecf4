//! # Publish/Subscribe Transport
//!
//! The renderer talks to the clock through a [`Transport`] handle passed in
//! at construction. Connecting and disconnecting belong to whoever built the
//! handle (the binary), not to the renderer.
//!
//! Two implementations:
//! - [`MqttTransport`]: rumqttc client talking to the broker the clock uses
//! - [`MemoryTransport`]: records publications in memory and lets callers
//!   inject inbound messages; used by `--stdout` development mode and tests

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BrokerConfig;

/// Failures talking to the broker. Always fatal to the process.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Request could not be queued to the MQTT event loop
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Broker connection failed or dropped
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// Payload could not be serialized
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// A transport-driven task panicked or was cancelled
    #[error("transport task failed: {0}")]
    Task(String),
}

/// Delivery guarantee requested for a publication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    AtMostOnce,
    ExactlyOnce,
}

impl From<Delivery> for QoS {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::AtMostOnce => QoS::AtMostOnce,
            Delivery::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Inbound messages for one subscribed topic.
pub type Inbox = mpsc::UnboundedReceiver<Vec<u8>>;

/// Handle to a publish/subscribe broker.
pub trait Transport: Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        delivery: Delivery,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Start receiving messages on `topic`. A second subscription to the same
    /// topic replaces the first.
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<Inbox, TransportError>> + Send;

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Topic layout of an AWTRIX clock under a configurable prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Topics {
            prefix: prefix.into(),
        }
    }

    /// Custom app backing slot `index`.
    pub fn slot(&self, index: usize) -> String {
        format!("{}/custom/arrivals{index}", self.prefix)
    }

    /// Publishing an empty body here removes every `arrivals*` app.
    pub fn clear(&self) -> String {
        format!("{}/custom/arrivals", self.prefix)
    }

    pub fn switch(&self) -> String {
        format!("{}/switch", self.prefix)
    }

    /// Where the clock reports which app is on screen.
    pub fn current_app(&self) -> String {
        format!("{}/stats/currentApp", self.prefix)
    }
}

type Routes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>>;

fn lock_routes(routes: &Routes) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<Vec<u8>>>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MQTT transport backed by rumqttc.
pub struct MqttTransport {
    client: AsyncClient,
    routes: Routes,
}

impl MqttTransport {
    /// Create the client and spawn its event loop.
    ///
    /// The returned task ends with an error when the broker connection fails,
    /// which the caller treats as fatal, and with `Ok` once a disconnect has
    /// been written.
    pub fn connect(config: &BrokerConfig) -> (Self, JoinHandle<Result<(), TransportError>>) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let routes = Routes::default();
        let driver = tokio::spawn(drive(eventloop, Arc::clone(&routes)));

        log::info!(
            "connecting to MQTT broker {}:{} as {}",
            config.host,
            config.port,
            config.client_id
        );
        (MqttTransport { client, routes }, driver)
    }
}

async fn drive(mut eventloop: EventLoop, routes: Routes) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::Publish(publish)) => {
                if let Some(inbox) = lock_routes(&routes).get(&publish.topic) {
                    // Receiver gone means the subscriber stopped listening
                    let _ = inbox.send(publish.payload.to_vec());
                }
            }
            Event::Incoming(Packet::ConnAck(_)) => log::info!("MQTT connected"),
            // Requests are sent in order, so everything queued before the
            // disconnect is already on the wire
            Event::Outgoing(Outgoing::Disconnect) => return Ok(()),
            _ => {}
        }
    }
}

impl Transport for MqttTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, delivery.into(), false, payload)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Inbox, TransportError> {
        let (sender, inbox) = mpsc::unbounded_channel();
        lock_routes(&self.routes).insert(topic.to_string(), sender);
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(inbox)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        lock_routes(&self.routes).remove(topic);
        self.client.unsubscribe(topic).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client.disconnect().await?;
        Ok(())
    }
}

/// One message handed to [`MemoryTransport::publish`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: Vec<u8>,
    pub delivery: Delivery,
}

/// In-process transport that keeps every publication (or prints it, see
/// [`MemoryTransport::echoing`]).
#[derive(Default)]
pub struct MemoryTransport {
    echo: bool,
    published: Mutex<Vec<Publication>>,
    routes: Routes,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prints each publication to stdout instead of recording it.
    pub fn echoing() -> Self {
        MemoryTransport {
            echo: true,
            ..Self::default()
        }
    }

    /// Everything published so far, oldest first.
    pub fn published(&self) -> Vec<Publication> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Payloads published to `topic`, oldest first.
    pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload)
            .collect()
    }

    /// Deliver an inbound message. Returns `false` if nobody subscribed to `topic`.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        lock_routes(&self.routes)
            .get(topic)
            .is_some_and(|inbox| inbox.send(payload.into()).is_ok())
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        lock_routes(&self.routes).contains_key(topic)
    }
}

impl Transport for MemoryTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        if self.echo {
            println!("{topic} {}", String::from_utf8_lossy(&payload));
            return Ok(());
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Publication {
                topic: topic.to_string(),
                payload,
                delivery,
            });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Inbox, TransportError> {
        let (sender, inbox) = mpsc::unbounded_channel();
        lock_routes(&self.routes).insert(topic.to_string(), sender);
        Ok(inbox)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        lock_routes(&self.routes).remove(topic);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        lock_routes(&self.routes).clear();
        Ok(())
    }
}
