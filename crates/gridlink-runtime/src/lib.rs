//! `gridlink-runtime` – the three timing domains of the obstacle service.
//!
//! # Modules
//!
//! - [`heartbeat`] – [`HeartbeatEmitter`][heartbeat::HeartbeatEmitter]:
//!   1 Hz link keep-alive on its own task and clock.
//! - [`dispatcher`] – [`ObstacleDispatcher`][dispatcher::ObstacleDispatcher]:
//!   sweeps the latest grid into rate-limited `OBSTACLE_DISTANCE_3D` messages.
//! - [`ingest`] – [`PerceptionIngest`][ingest::PerceptionIngest]: blocking
//!   perception loop that feeds the grid buffer from a dedicated thread.
//! - [`service`] – [`ObstacleService`][service::ObstacleService]: the context
//!   object that owns the shared buffer, link writer and shutdown flag.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console or
//!   JSON logs plus optional OTLP span export.
//!
//! # Shutdown
//!
//! All loops observe one shared `Arc<AtomicBool>`.  The heartbeat checks it
//! at every tick, the dispatcher before every wait and sweep, and the ingest
//! loop before every frame.  Nothing is cancelled mid-operation.

pub mod dispatcher;
pub mod heartbeat;
pub mod ingest;
pub mod service;
pub mod telemetry;
mod throttle;

pub use dispatcher::{ObstacleDispatcher, SweepReport};
pub use heartbeat::{EmitterState, HEARTBEAT_PERIOD, HeartbeatEmitter, HeartbeatHandle};
pub use ingest::{IngestStats, PerceptionIngest};
pub use service::{ObstacleService, RunningService, resolve_projection};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
