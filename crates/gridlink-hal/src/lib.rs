//! `gridlink-hal` – perception sources feeding the obstacle grid.
//!
//! # Modules
//!
//! - [`device`] – the [`PerceptionDevice`][device::PerceptionDevice] trait,
//!   [`Calibration`][device::Calibration] and
//!   [`PerceptionFrame`][device::PerceptionFrame].
//! - [`sim`] – [`SimDevice`][sim::SimDevice]: a synthetic source that sweeps
//!   an obstacle band across the grid.
//! - [`replay`] – [`ReplayDevice`][replay::ReplayDevice]: replays a recorded
//!   NDJSON session from a file or stdin.

pub mod device;
pub mod replay;
pub mod sim;

pub use device::{Calibration, PerceptionDevice, PerceptionFrame};
pub use replay::{ReplayDevice, ReplayRecord};
pub use sim::SimDevice;
