//! ZeroMQ transport to the rover.
//!
//! The rover binds a PUB socket for its sensor stream and a SUB socket for
//! motor commands. [`ZmqGateway`] connects one SUB and one PUB socket to them
//! and is built exactly once per process; every session shares it through an
//! `Arc<dyn BusGateway>`.
//!
//! PUB sockets are not safe for concurrent senders, so publishes from the
//! command routers and the session supervisors are serialised through a
//! mutex around the socket.
//!
//! Open subscription streams hold the SUB socket while they wait for the next
//! message. The registered filters live behind their own lock, so a session
//! subscribing to an already registered topic never waits on another
//! session's pending receive.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use lunar_types::{BridgeError, Envelope, Topic};
use tokio::sync::Mutex;
use tracing::{debug, info};
use zeromq::{PubSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::gateway::{BusGateway, EnvelopeStream};

/// SUB + PUB socket pair connected to the rover.
pub struct ZmqGateway {
    subscriber: Arc<Mutex<SubSocket>>,
    // Prefixes already registered on the SUB socket.
    filters: std::sync::Mutex<HashSet<Topic>>,
    publisher: Mutex<PubSocket>,
}

impl ZmqGateway {
    /// Connect the SUB socket to `sensors_endpoint` and the PUB socket to
    /// `motors_endpoint` (e.g. `"tcp://lunar-rover-0.eec:5555"`).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if either socket cannot connect.
    pub async fn connect(sensors_endpoint: &str, motors_endpoint: &str) -> Result<Self, BridgeError> {
        let mut sub = SubSocket::new();
        sub.connect(sensors_endpoint).await.map_err(|e| {
            BridgeError::Transport(format!("SUB connect to {sensors_endpoint}: {e}"))
        })?;

        let mut publisher = PubSocket::new();
        publisher.connect(motors_endpoint).await.map_err(|e| {
            BridgeError::Transport(format!("PUB connect to {motors_endpoint}: {e}"))
        })?;

        info!(
            sensors = sensors_endpoint,
            motors = motors_endpoint,
            "connected to rover bus"
        );

        Ok(Self {
            subscriber: Arc::new(Mutex::new(sub)),
            filters: std::sync::Mutex::new(HashSet::new()),
            publisher: Mutex::new(publisher),
        })
    }

    fn is_registered(&self, topic: &Topic) -> bool {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(topic)
    }
}

#[async_trait]
impl BusGateway for ZmqGateway {
    async fn publish(&self, envelope: Envelope) -> Result<(), BridgeError> {
        let Envelope { topic, payload } = envelope;
        let mut message = ZmqMessage::from(Bytes::copy_from_slice(topic.as_bytes()));
        message.push_back(payload);

        self.publisher
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| BridgeError::Transport(format!("publish on {topic}: {e}")))
    }

    async fn subscribe(&self, topic: &Topic) -> Result<EnvelopeStream, BridgeError> {
        if !self.is_registered(topic) {
            self.subscriber
                .lock()
                .await
                .subscribe(topic.as_str())
                .await
                .map_err(|e| BridgeError::Transport(format!("subscribe to {topic}: {e}")))?;
            self.filters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(topic.clone());
            debug!(topic = %topic, "SUB filter registered");
        }

        let subscriber = Arc::clone(&self.subscriber);
        let messages = stream::unfold(Some(subscriber), |state| async move {
            let subscriber = state?;
            let received = subscriber.lock().await.recv().await;
            match received {
                Ok(message) => Some((Ok(message.into_vec()), Some(subscriber))),
                Err(e) => {
                    let fault = BridgeError::Transport(format!("SUB receive: {e}"));
                    Some((Err(fault), None))
                }
            }
        });
        Ok(Box::pin(messages))
    }
}
