//! Command direction: client → rover bus.
//!
//! Each client message is decoded as a JSON object and fanned out by field:
//!
//! | Field present | Publish |
//! |---|---|
//! | `v` | the whole record on the motion topic |
//! | `alpha` | `{"alpha": ..}` on the tilt topic |
//!
//! Both publishes may come from one message, motion first. Other fields are
//! forwarded inside the motion record but never trigger a publish on their
//! own; in particular `w` without `v` is consumed silently.

use std::sync::Arc;

use lunar_types::{
    ANGULAR_VELOCITY_BAND, BridgeError, CommandPayload, Envelope, LINEAR_VELOCITY_BAND, TopicSet,
};
use tracing::{debug, warn};

use crate::client::ClientSource;
use crate::gateway::{BusGateway, publish_json};

/// Routes client commands onto the motion and tilt topics.
#[derive(Clone)]
pub struct CommandRouter {
    gateway: Arc<dyn BusGateway>,
    topics: TopicSet,
}

impl CommandRouter {
    pub fn new(gateway: Arc<dyn BusGateway>, topics: TopicSet) -> Self {
        Self { gateway, topics }
    }

    /// Decode one client message and publish what it asks for.
    ///
    /// Returns the number of envelopes published (0, 1 or 2).
    ///
    /// # Errors
    ///
    /// [`BridgeError::CommandDecode`] for malformed input and
    /// [`BridgeError::Transport`] when a publish fails.
    pub async fn route(&self, text: &str) -> Result<usize, BridgeError> {
        let command = CommandPayload::parse(text)?;
        let mut published = 0;

        if command.has_velocity() {
            warn_outside_band(&command);
            let envelope = Envelope::new(self.topics.motion.clone(), command.encode()?);
            self.gateway.publish(envelope).await?;
            published += 1;
        } else if command.angular_velocity().is_some() {
            debug!("`w` without `v` does not trigger a motion command");
        }

        if let Some(tilt) = command.tilt() {
            publish_json(self.gateway.as_ref(), &self.topics.tilt, &tilt).await?;
            published += 1;
        }

        Ok(published)
    }

    /// Route client messages in arrival order until the client disconnects
    /// (`Ok(())`) or a message cannot be decoded or published.
    pub async fn run<S>(&self, source: &mut S) -> Result<(), BridgeError>
    where
        S: ClientSource + ?Sized,
    {
        while let Some(text) = source.next_text().await? {
            self.route(&text).await?;
        }
        debug!("client closed the command stream");
        Ok(())
    }
}

/// The platform ignores velocities outside its bands; say so, but forward
/// them anyway.
fn warn_outside_band(command: &CommandPayload) {
    if let Some(v) = command.linear_velocity()
        && !LINEAR_VELOCITY_BAND.accepts(v)
    {
        warn!(v, "linear velocity outside the platform band");
    }
    if let Some(w) = command.angular_velocity()
        && !ANGULAR_VELOCITY_BAND.accepts(w)
    {
        warn!(w, "angular velocity outside the platform band");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::client::test_support::client_pair;
    use bytes::Bytes;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn make_router() -> (Arc<LocalBus>, CommandRouter) {
        let bus = Arc::new(LocalBus::default());
        let router = CommandRouter::new(bus.clone(), TopicSet::default());
        (bus, router)
    }

    async fn next_publish(
        watch: &mut broadcast::Receiver<Vec<Bytes>>,
    ) -> Result<(String, Value), Box<dyn std::error::Error>> {
        let frames = watch.recv().await?;
        let topic = String::from_utf8(frames[0].to_vec())?;
        let payload = serde_json::from_slice(&frames[1])?;
        Ok((topic, payload))
    }

    #[tokio::test]
    async fn velocity_command_goes_to_motion_topic() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, router) = make_router();
        let mut watch = bus.watch()?;

        assert_eq!(router.route(r#"{"v":0.2,"w":0}"#).await?, 1);

        let (topic, payload) = next_publish(&mut watch).await?;
        assert_eq!(topic, "motors-commands");
        assert_eq!(payload, json!({"v": 0.2, "w": 0}));
        assert!(watch.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn velocity_without_w_is_still_forwarded() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, router) = make_router();
        let mut watch = bus.watch()?;

        router.route(r#"{"v":-0.3}"#).await?;

        let (topic, payload) = next_publish(&mut watch).await?;
        assert_eq!(topic, "motors-commands");
        assert_eq!(payload, json!({"v": -0.3}));
        Ok(())
    }

    #[tokio::test]
    async fn alpha_only_goes_to_tilt_topic() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, router) = make_router();
        let mut watch = bus.watch()?;

        assert_eq!(router.route(r#"{"alpha":0.5,"note":"look up"}"#).await?, 1);

        let (topic, payload) = next_publish(&mut watch).await?;
        assert_eq!(topic, "tilt-motor-command");
        assert_eq!(payload, json!({"alpha": 0.5}));
        assert!(watch.try_recv().is_err(), "no motion command expected");
        Ok(())
    }

    #[tokio::test]
    async fn combined_message_publishes_motion_then_tilt() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, router) = make_router();
        let mut watch = bus.watch()?;

        assert_eq!(router.route(r#"{"v":0.2,"w":1.5,"alpha":1.0}"#).await?, 2);

        let (first, motion) = next_publish(&mut watch).await?;
        let (second, tilt) = next_publish(&mut watch).await?;
        assert_eq!(first, "motors-commands");
        assert_eq!(motion, json!({"v": 0.2, "w": 1.5, "alpha": 1.0}));
        assert_eq!(second, "tilt-motor-command");
        assert_eq!(tilt, json!({"alpha": 1.0}));
        Ok(())
    }

    #[tokio::test]
    async fn w_alone_and_unknown_fields_publish_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, router) = make_router();
        let mut watch = bus.watch()?;

        assert_eq!(router.route(r#"{"w":2.0}"#).await?, 0);
        assert_eq!(router.route(r#"{"lights":"on"}"#).await?, 0);
        assert_eq!(router.route("{}").await?, 0);

        assert!(watch.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn out_of_band_velocity_is_not_clamped() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, router) = make_router();
        let mut watch = bus.watch()?;

        router.route(r#"{"v":0.05,"w":9.0}"#).await?;

        let (_, payload) = next_publish(&mut watch).await?;
        assert_eq!(payload, json!({"v": 0.05, "w": 9.0}));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_message_is_a_decode_fault() {
        let (_bus, router) = make_router();
        assert!(matches!(
            router.route("v=0.2").await,
            Err(BridgeError::CommandDecode(_))
        ));
        assert!(matches!(
            router.route("0.2").await,
            Err(BridgeError::CommandDecode(_))
        ));
    }

    #[tokio::test]
    async fn run_preserves_client_order() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, router) = make_router();
        let mut watch = bus.watch()?;
        let (mut client, _sink, mut source) = client_pair();

        client.send(r#"{"alpha":0.5}"#);
        client.send(r#"{"v":0.3,"w":2.0}"#);
        client.disconnect();

        router.run(&mut source).await?;

        let (first, tilt) = next_publish(&mut watch).await?;
        let (second, motion) = next_publish(&mut watch).await?;
        assert_eq!((first.as_str(), tilt), ("tilt-motor-command", json!({"alpha": 0.5})));
        assert_eq!((second.as_str(), motion), ("motors-commands", json!({"v": 0.3, "w": 2.0})));
        assert!(watch.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn run_stops_at_first_malformed_message() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, router) = make_router();
        let mut watch = bus.watch()?;
        let (client, _sink, mut source) = client_pair();

        client.send("not json");
        client.send(r#"{"v":0.3}"#);

        let result = tokio::time::timeout(Duration::from_secs(1), router.run(&mut source)).await?;
        assert!(matches!(result, Err(BridgeError::CommandDecode(_))));
        assert!(watch.try_recv().is_err(), "later commands must not be routed");
        Ok(())
    }

    #[tokio::test]
    async fn run_surfaces_publish_fault() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, router) = make_router();
        let (client, _sink, mut source) = client_pair();
        bus.shutdown();

        client.send(r#"{"v":0.3}"#);

        let result = tokio::time::timeout(Duration::from_secs(1), router.run(&mut source)).await?;
        assert!(matches!(result, Err(BridgeError::Transport(_))));
        Ok(())
    }
}
