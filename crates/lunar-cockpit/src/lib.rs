//! `lunar-cockpit` – the rover control page and its WebSocket bridge.
//!
//! Boots a lightweight HTTP + WebSocket server (default port `8000`) that:
//!
//! 1. **Serves** the control page (HTML/CSS/JS) at `GET /`.
//!
//! 2. **Upgrades** `/ws` into a supervised rover session: the client receives
//!    every telemetry record the rover publishes and its `{v, w, alpha}`
//!    commands are routed onto the rover's motor topics.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lunar_middleware::LocalBus;
//! use lunar_cockpit::CockpitServer;
//! use lunar_types::SessionConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = Arc::new(LocalBus::default());
//!     CockpitServer::new(bus, SessionConfig::default())
//!         .run()
//!         .await
//!         .expect("cockpit server failed");
//! }
//! ```

pub mod server;

pub use server::{CockpitServer, DEFAULT_PORT};
