//! The Bus Gateway seam.
//!
//! The bridge never talks to a pub/sub transport directly. It holds an
//! `Arc<dyn BusGateway>` built once at process start and shared by every
//! session, so tests can swap the ZeroMQ sockets for a [`LocalBus`].
//!
//! [`LocalBus`]: crate::bus::LocalBus

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use lunar_types::{BridgeError, Envelope, Topic};
use serde::Serialize;

/// Lazy, infinite, non-restartable sequence of raw multi-part messages.
///
/// Each item is the full list of frames of one message; checking the part
/// count and topic is left to the consumer. The stream yields a single
/// `Err(BridgeError::Transport)` when the underlying socket is torn down and
/// then ends.
pub type EnvelopeStream = BoxStream<'static, Result<Vec<Bytes>, BridgeError>>;

/// Thin wrapper around a pub/sub transport.
///
/// # Contract
///
/// * `publish` – send one two-part envelope. There is no retry: any error is
///   fatal to the caller's session.
/// * `subscribe` – register `topic` as a filter and return the stream of
///   matching messages. Transports may filter by prefix, so consumers must
///   still compare the topic frame exactly.
#[async_trait]
pub trait BusGateway: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> Result<(), BridgeError>;

    async fn subscribe(&self, topic: &Topic) -> Result<EnvelopeStream, BridgeError>;
}

/// Encode `value` as JSON and publish it on `topic`.
pub async fn publish_json<T>(
    gateway: &dyn BusGateway,
    topic: &Topic,
    value: &T,
) -> Result<(), BridgeError>
where
    T: Serialize + Sync + ?Sized,
{
    let payload = serde_json::to_vec(value)
        .map_err(|e| BridgeError::Transport(format!("cannot encode payload for {topic}: {e}")))?;
    gateway.publish(Envelope::new(topic.clone(), payload)).await
}
