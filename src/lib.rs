//! Live aircraft feed enriched with route data, fanned out over WebSockets.
//!
//! This library provides functionality to:
//! - Fetch live state vectors for a bounding box from OpenSky
//! - Look up each callsign's route in a Virtual Radar reference database
//! - Merge both into one JSON snapshot per poll
//! - Broadcast snapshots to every connected subscriber, evicting slow ones
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐
//! │   Client    │───▶│  Protocol   │
//! │   (HTTP)    │    │  (Decoder)  │
//! └─────────────┘    └──────┬──────┘
//!                           ▼
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │   Routes    │───▶│   Merger    │───▶│     Hub     │───▶│   Server    │
//! │  (SQLite)   │    │  (Enrich)   │    │ (Registry)  │    │ (WebSocket) │
//! └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use planecast::{
//!     client::{BoundingBox, ClientConfig, OpenSkyClient},
//!     hub::{Hub, HubConfig},
//!     merger::Merger,
//!     report::TracingReporter,
//!     routes::RouteDatabase,
//!     server::{Server, ServerConfig},
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reporter = Arc::new(TracingReporter);
//!
//!     let client = OpenSkyClient::new(ClientConfig::new(BoundingBox::LONDON))?;
//!     let routes = RouteDatabase::open("data/StandingData.sqb")?;
//!     let merger = Merger::new(client, routes, reporter.clone());
//!
//!     let hub = Hub::new(merger, reporter, HubConfig::default());
//!     let server = Server::bind(ServerConfig::default(), hub.handle()).await?;
//!
//!     tokio::spawn(hub.run());
//!     server.run().await;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod hub;
pub mod merger;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod routes;
pub mod server;
pub mod types;

pub use client::{BoundingBox, ClientConfig, OpenSkyClient, StateFeed};
pub use hub::{Hub, HubConfig, HubHandle, HubStats, SnapshotSource};
pub use merger::{MergeError, Merger};
pub use registry::{ClientHandle, ClientId, Registry};
pub use report::{Reporter, TracingReporter};
pub use routes::{RouteDatabase, RouteLookup, RouteTable};
pub use server::{Server, ServerConfig};
pub use types::{Airport, EnrichedAircraft, LiveRecord, Route, Snapshot};
