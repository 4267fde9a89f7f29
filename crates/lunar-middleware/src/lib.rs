//! `lunar-middleware` – the bridge between one client and the rover bus.
//!
//! Routes telemetry from the rover's pub/sub bus to the client and client
//! commands back onto the bus, bounded by a supervised session.
//!
//! # Modules
//!
//! - [`gateway`] – the [`BusGateway`] trait every pub/sub transport implements.
//! - [`bus`] – in-memory [`LocalBus`] with ZeroMQ-style prefix filtering.
//! - [`zmq_gateway`] – [`ZmqGateway`], the SUB + PUB sockets talking to the rover.
//! - [`client`] – the duplex client connection as a sink and a source.
//! - [`telemetry_relay`] – bus → client forwarding.
//! - [`command_router`] – client → bus forwarding with per-field routing.
//! - [`session`] – the [`SessionSupervisor`] that starts, races and stops both
//!   directions.

pub mod bus;
pub mod client;
pub mod command_router;
pub mod gateway;
pub mod session;
pub mod telemetry_relay;
pub mod zmq_gateway;

pub use bus::LocalBus;
pub use client::{ClientSink, ClientSource};
pub use command_router::CommandRouter;
pub use gateway::{BusGateway, EnvelopeStream};
pub use session::{SessionEnd, SessionSupervisor};
pub use telemetry_relay::TelemetryRelay;
pub use zmq_gateway::ZmqGateway;
