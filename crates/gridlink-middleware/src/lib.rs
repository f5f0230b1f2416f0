//! `gridlink-middleware` – plumbing between perception and the flight
//! controller.
//!
//! Moves grids and frames around without interpreting them.
//!
//! # Modules
//!
//! - [`grid_buffer`] – [`GridBuffer`]: the single-slot, drop-old mailbox
//!   between the perception producer and the obstacle dispatcher.
//! - [`mavlink`] – MAVLink v2 framing for `HEARTBEAT` and
//!   `OBSTACLE_DISTANCE_3D`.
//! - [`link`] – the [`TelemetryLink`] trait, its serial / UDP / dry-run /
//!   recording implementations, and the sequencing [`MavlinkWriter`].

pub mod grid_buffer;
pub mod link;
pub mod mavlink;

pub use grid_buffer::{GridBuffer, TakenGrid};
pub use link::{LogLink, MavlinkWriter, RecordingLink, SerialLink, TelemetryLink, UdpLink};
pub use mavlink::{MavIdentity, MavMessage};
