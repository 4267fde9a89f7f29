//! Telemetry direction: rover bus → client.
//!
//! [`TelemetryRelay`] drains the telemetry subscription, drops anything that
//! is not a well-formed two-part envelope on the exact telemetry topic, checks
//! that the payload is valid JSON, and forwards the payload text untouched to
//! the client.
//!
//! The relay never retries. It returns as soon as one of these happens:
//!
//! | Cause | Result |
//! |---|---|
//! | subscription ends | `Ok(())` |
//! | subscription faults | `Err(Transport)` |
//! | payload is not JSON | `Err(TelemetryDecode)` |
//! | client send fails | `Err(Client)` |
//! | idle timeout elapses | `Err(TelemetryTimeout)` |

use std::time::Duration;

use futures_util::StreamExt;
use lunar_types::{BridgeError, Envelope, Topic};
use serde::de::IgnoredAny;
use tracing::{debug, trace};

use crate::client::ClientSink;
use crate::gateway::EnvelopeStream;

/// Forwards telemetry envelopes matching one topic to the client.
#[derive(Debug, Clone)]
pub struct TelemetryRelay {
    filter: Topic,
    idle_timeout: Option<Duration>,
}

impl TelemetryRelay {
    pub fn new(filter: Topic) -> Self {
        Self {
            filter,
            idle_timeout: None,
        }
    }

    /// Give up when no envelope at all arrives within `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Run the relay loop until the first terminating event.
    pub async fn run<K>(&self, telemetry: &mut EnvelopeStream, sink: &mut K) -> Result<(), BridgeError>
    where
        K: ClientSink + ?Sized,
    {
        loop {
            let next = match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, telemetry.next())
                    .await
                    .map_err(|_| BridgeError::TelemetryTimeout(limit))?,
                None => telemetry.next().await,
            };

            let Some(frames) = next.transpose()? else {
                debug!(topic = %self.filter, "telemetry subscription ended");
                return Ok(());
            };

            let Some(envelope) = Envelope::from_frames(frames, &self.filter) else {
                trace!(topic = %self.filter, "discarding envelope that does not match the filter");
                continue;
            };

            let text = decode(&envelope.payload)?;
            sink.send_text(text).await?;
        }
    }
}

/// Check that `payload` is one JSON document and return it as text.
fn decode(payload: &[u8]) -> Result<String, BridgeError> {
    serde_json::from_slice::<IgnoredAny>(payload)
        .map_err(|e| BridgeError::TelemetryDecode(e.to_string()))?;
    String::from_utf8(payload.to_vec()).map_err(|e| BridgeError::TelemetryDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::client::test_support::client_pair;
    use crate::gateway::BusGateway;
    use bytes::Bytes;

    const SENSORS: &str = "lunar-rover-sensors";

    fn frames(parts: &[&'static str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect()
    }

    async fn setup() -> Result<(LocalBus, EnvelopeStream), BridgeError> {
        let bus = LocalBus::default();
        let telemetry = bus.subscribe(&Topic::new(SENSORS)).await?;
        Ok((bus, telemetry))
    }

    #[tokio::test]
    async fn forwards_payloads_in_arrival_order() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, mut telemetry) = setup().await?;
        let (mut client, mut sink, _source) = client_pair();

        bus.inject(frames(&[SENSORS, r#"{"battery":80}"#]))?;
        bus.inject(frames(&[SENSORS, r#"{"battery":79,"tilt":0.5}"#]))?;
        bus.shutdown();

        let relay = TelemetryRelay::new(Topic::new(SENSORS));
        let result = relay.run(&mut telemetry, &mut sink).await;
        assert!(matches!(result, Err(BridgeError::Transport(_))));

        assert_eq!(client.from_bridge.recv().await.as_deref(), Some(r#"{"battery":80}"#));
        assert_eq!(
            client.from_bridge.recv().await.as_deref(),
            Some(r#"{"battery":79,"tilt":0.5}"#)
        );
        Ok(())
    }

    #[tokio::test]
    async fn discards_mismatched_envelopes_without_stopping() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, mut telemetry) = setup().await?;
        let (mut client, mut sink, _source) = client_pair();

        // Prefix cross-talk, wrong part counts, then one good envelope.
        bus.inject(frames(&["lunar-rover-sensors-debug", r#"{"x":1}"#]))?;
        bus.inject(frames(&[SENSORS]))?;
        bus.inject(frames(&[SENSORS, "{}", "{}"]))?;
        bus.inject(frames(&[SENSORS, r#"{"ok":true}"#]))?;
        bus.shutdown();

        let relay = TelemetryRelay::new(Topic::new(SENSORS));
        let _ = relay.run(&mut telemetry, &mut sink).await;

        assert_eq!(client.from_bridge.recv().await.as_deref(), Some(r#"{"ok":true}"#));
        assert!(client.from_bridge.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_payload_terminates_relay() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, mut telemetry) = setup().await?;
        let (mut client, mut sink, _source) = client_pair();

        bus.inject(frames(&[SENSORS, "{battery: 80"]))?;
        bus.inject(frames(&[SENSORS, r#"{"battery":80}"#]))?;

        let relay = TelemetryRelay::new(Topic::new(SENSORS));
        let result = relay.run(&mut telemetry, &mut sink).await;

        assert!(matches!(result, Err(BridgeError::TelemetryDecode(_))));
        assert!(client.from_bridge.try_recv().is_err(), "nothing may be forwarded");
        Ok(())
    }

    #[tokio::test]
    async fn client_send_failure_terminates_relay() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, mut telemetry) = setup().await?;
        let (client, mut sink, _source) = client_pair();
        drop(client);

        bus.inject(frames(&[SENSORS, "{}"]))?;

        let relay = TelemetryRelay::new(Topic::new(SENSORS));
        let result = relay.run(&mut telemetry, &mut sink).await;
        assert!(matches!(result, Err(BridgeError::Client(_))));
        Ok(())
    }

    #[tokio::test]
    async fn idle_timeout_ends_a_silent_relay() -> Result<(), Box<dyn std::error::Error>> {
        let (_bus, mut telemetry) = setup().await?;
        let (_client, mut sink, _source) = client_pair();

        let limit = Duration::from_millis(30);
        let relay = TelemetryRelay::new(Topic::new(SENSORS)).with_idle_timeout(Some(limit));
        let result = relay.run(&mut telemetry, &mut sink).await;

        assert!(matches!(result, Err(BridgeError::TelemetryTimeout(d)) if d == limit));
        Ok(())
    }

    #[test]
    fn decode_passes_raw_text_through() {
        let raw = br#"{ "battery" : 80 }"#;
        assert_eq!(decode(raw).unwrap(), r#"{ "battery" : 80 }"#);
    }

    #[test]
    fn decode_rejects_trailing_garbage() {
        assert!(decode(br#"{"a":1} trailing"#).is_err());
    }
}
