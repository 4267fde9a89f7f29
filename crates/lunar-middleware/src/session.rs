//! [`SessionSupervisor`] – owns one client connection from accept to close.
//!
//! ```text
//!   Idle ──run + initial tilt published──▶ Active ──either direction ends──▶ Stopped
//! ```
//!
//! While `Active` the [`TelemetryRelay`] and the [`CommandRouter`] are polled
//! concurrently. The first one to return is the teardown trigger; the other
//! one's future is dropped on the spot, which cancels whatever receive or
//! send it was blocked in, so nothing from the session outlives it. The
//! supervisor then publishes `{"state":"stop"}` exactly once and closes the
//! client connection.

use std::sync::Arc;

use lunar_types::{BridgeError, SessionConfig, SessionSignal, SessionState, TiltCommand};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::client::{ClientSink, ClientSource};
use crate::command_router::CommandRouter;
use crate::gateway::{BusGateway, publish_json};
use crate::telemetry_relay::TelemetryRelay;

/// Which direction ended a session, and how.
#[derive(Debug)]
pub enum SessionEnd {
    /// The bus → client relay returned first.
    Telemetry(Result<(), BridgeError>),
    /// The client → bus router returned first.
    Commands(Result<(), BridgeError>),
}

impl SessionEnd {
    /// The fault that ended the session, if it did not end normally.
    pub fn fault(&self) -> Option<&BridgeError> {
        match self {
            SessionEnd::Telemetry(result) | SessionEnd::Commands(result) => result.as_ref().err(),
        }
    }

    /// Short human-readable cause for logs.
    pub fn describe(&self) -> &'static str {
        match self {
            SessionEnd::Telemetry(_) => "rover connection broken",
            SessionEnd::Commands(_) => "websocket connection broken",
        }
    }
}

/// Lifecycle bookkeeping for one session.
#[derive(Debug)]
struct Session {
    id: Uuid,
    state: SessionState,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
        }
    }

    /// Move to `next`. Returns `false` when the session already left the
    /// states from which `next` is reachable.
    fn advance(&mut self, next: SessionState) -> bool {
        let allowed = matches!(
            (self.state, next),
            (SessionState::Idle, SessionState::Active)
                | (SessionState::Idle, SessionState::Stopped)
                | (SessionState::Active, SessionState::Stopped)
        );
        if allowed {
            debug!(from = %self.state, to = %next, "session state change");
            self.state = next;
        }
        allowed
    }
}

/// Starts, supervises and stops client sessions against a shared bus.
#[derive(Clone)]
pub struct SessionSupervisor {
    gateway: Arc<dyn BusGateway>,
    config: SessionConfig,
}

impl SessionSupervisor {
    pub fn new(gateway: Arc<dyn BusGateway>, config: SessionConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one session over the two halves of a freshly accepted connection.
    ///
    /// Returns which direction ended the session. Faults inside a direction
    /// are reported through [`SessionEnd`], not as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when the telemetry subscription,
    /// the start signals, or the final `stop` signal cannot be published.
    pub async fn run<K, S>(&self, sink: K, source: S) -> Result<SessionEnd, BridgeError>
    where
        K: ClientSink,
        S: ClientSource,
    {
        let mut session = Session::new();
        let span = info_span!("session", id = %session.id);
        self.drive(&mut session, sink, source).instrument(span).await
    }

    async fn drive<K, S>(
        &self,
        session: &mut Session,
        mut sink: K,
        mut source: S,
    ) -> Result<SessionEnd, BridgeError>
    where
        K: ClientSink,
        S: ClientSource,
    {
        let topics = &self.config.topics;

        // Subscribe before signalling `run` so no early telemetry is lost.
        let mut telemetry = self.gateway.subscribe(&topics.telemetry).await?;

        publish_json(self.gateway.as_ref(), &topics.setup, &SessionSignal::Run).await?;
        let initial_tilt = TiltCommand::radians(self.config.initial_tilt_rad);
        if let Err(e) = publish_json(self.gateway.as_ref(), &topics.tilt, &initial_tilt).await {
            // `run` already went out: do not leave the platform running.
            warn!(error = %e, "initial tilt publish failed");
            if let Err(stop_err) = self.stop(session).await {
                warn!(error = %stop_err, "stop after failed start not delivered");
            }
            return Err(e);
        }
        session.advance(SessionState::Active);
        info!(initial_tilt_rad = self.config.initial_tilt_rad, "session active");

        let relay = TelemetryRelay::new(topics.telemetry.clone())
            .with_idle_timeout(self.config.telemetry_timeout);
        let router = CommandRouter::new(Arc::clone(&self.gateway), topics.clone());

        let end = tokio::select! {
            result = relay.run(&mut telemetry, &mut sink) => SessionEnd::Telemetry(result),
            result = router.run(&mut source) => SessionEnd::Commands(result),
        };
        drop(telemetry);

        match end.fault() {
            Some(fault) => warn!(cause = end.describe(), error = %fault, "session ending"),
            None => info!(cause = end.describe(), "session ending"),
        }

        let stopped = self.stop(session).await;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "client close failed");
        }
        stopped?;
        Ok(end)
    }

    /// Publish the `stop` signal unless this session already stopped.
    async fn stop(&self, session: &mut Session) -> Result<(), BridgeError> {
        if !session.advance(SessionState::Stopped) {
            return Ok(());
        }
        publish_json(
            self.gateway.as_ref(),
            &self.config.topics.setup,
            &SessionSignal::Stop,
        )
        .await?;
        info!("session stopped");
        Ok(())
    }
}
