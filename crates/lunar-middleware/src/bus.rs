//! In-process publish/subscribe bus.
//!
//! [`LocalBus`] mimics a ZeroMQ PUB/SUB pair inside one process: every
//! message is a list of frames, subscribers filter on a prefix of the first
//! frame, and publishing with nobody listening silently drops the message.
//! It backs the test suites and any loopback run without a rover attached.
//!
//! Built on [`tokio::sync::broadcast`] so a slow subscriber never blocks the
//! publisher; it lags and is told how many messages it missed.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use lunar_types::{BridgeError, Envelope, Topic};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::gateway::{BusGateway, EnvelopeStream};

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// In-memory bus. Wrap it in an `Arc` to share between sessions.
#[derive(Debug)]
pub struct LocalBus {
    // `None` once the bus has been shut down.
    sender: RwLock<Option<broadcast::Sender<Vec<Bytes>>>>,
}

impl LocalBus {
    /// Create a new bus buffering at most `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Publish a raw multi-part message, bypassing [`Envelope`] validation.
    ///
    /// Returns the number of receivers that were handed the message; zero is
    /// not an error.
    pub fn inject(&self, frames: Vec<Bytes>) -> Result<usize, BridgeError> {
        match self.sender()?.send(frames) {
            Ok(n) => Ok(n),
            Err(broadcast::error::SendError(_)) => {
                debug!("local bus message dropped: no subscribers");
                Ok(0)
            }
        }
    }

    /// Tap every message on the bus regardless of topic.
    pub fn watch(&self) -> Result<broadcast::Receiver<Vec<Bytes>>, BridgeError> {
        Ok(self.sender()?.subscribe())
    }

    /// Tear the bus down.
    ///
    /// Every open subscription yields a transport fault and every later
    /// publish fails.
    pub fn shutdown(&self) {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn sender(&self) -> Result<broadcast::Sender<Vec<Bytes>>, BridgeError> {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BridgeError::Transport("local bus is shut down".to_string()))
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl BusGateway for LocalBus {
    async fn publish(&self, envelope: Envelope) -> Result<(), BridgeError> {
        self.inject(envelope.into_frames()).map(|_| ())
    }

    async fn subscribe(&self, topic: &Topic) -> Result<EnvelopeStream, BridgeError> {
        let receiver = self.sender()?.subscribe();
        let prefix = Bytes::copy_from_slice(topic.as_bytes());

        let messages = stream::unfold(Some(receiver), move |state| {
            let prefix = prefix.clone();
            async move {
                let mut receiver = state?;
                loop {
                    match receiver.recv().await {
                        Ok(frames) if frames.first().is_some_and(|f| f.starts_with(&prefix[..])) => {
                            return Some((Ok(frames), Some(receiver)));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged_by = n, "local bus subscriber lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            let fault = BridgeError::Transport("local bus is shut down".to_string());
                            return Some((Err(fault), None));
                        }
                    }
                }
            }
        });
        Ok(Box::pin(messages))
    }
}
