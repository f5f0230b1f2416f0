//! `gridlink-perception` – grid geometry and the host-side classifier.
//!
//! Both modules are pure: no I/O, no shared state, deterministic outputs.
//!
//! # Modules
//!
//! - [`projection`] – [`GridLayout`][projection::GridLayout] and
//!   [`ProjectionCoefficients`][projection::ProjectionCoefficients]: per-cell
//!   scale factors that turn a cell's depth into lateral and vertical offsets,
//!   built once from either a 3×3 intrinsic matrix or a horizontal FOV.
//! - [`classifier`] – [`HostClassifier`][classifier::HostClassifier]: derives
//!   the obstacle [`Grid`][gridlink_types::Grid] from a raw mask and depth map
//!   when the device cannot classify on-board.

pub mod classifier;
pub mod projection;

pub use classifier::HostClassifier;
pub use projection::{CellCoefficient, GridLayout, Intrinsics, ProjectionCoefficients};
