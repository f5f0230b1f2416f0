//! `gridlink-types` – shared data model for the obstacle telemetry pipeline.
//!
//! Every other crate in the workspace speaks in these types: the perception
//! side produces a [`Grid`], the dispatcher turns obstacle cells into
//! [`ObstacleVector`]s, and every fallible operation reports a [`GridError`].
//!
//! # Modules
//!
//! - [`grid`] – [`Grid`], [`GridCell`], [`GridShape`], [`ObstacleVector`],
//!   [`FrameConvention`] and [`GridThreshold`].
//! - [`config`] – [`GridlinkConfig`]: the full, validated configuration
//!   surface, deserialised from TOML by the CLI.

use thiserror::Error;

pub mod config;
pub mod grid;

pub use config::{
    ClassifierConfig, DispatchConfig, GridConfig, GridlinkConfig, LinkConfig, LinkKind,
    ProjectionConfig, SourceConfig, SourceKind, period_from_rate,
};
pub use grid::{FrameConvention, Grid, GridCell, GridShape, GridThreshold, ObstacleVector};

/// Global error type spanning startup validation, calibration, transport
/// and perception-frame failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    /// Invalid configuration (grid dims, thresholds, rates). Fatal at startup.
    #[error("Config Error: {0}")]
    Config(String),

    /// Calibration data unavailable or unusable. Fatal at startup.
    #[error("Calibration Error: {0}")]
    Calibration(String),

    /// The telemetry link could not deliver a frame. Reported, never fatal.
    #[error("Transport Error on {link}: {details}")]
    Transport { link: String, details: String },

    /// A perception frame did not match the configured grid contract.
    #[error("Frame Error: {0}")]
    Frame(String),
}

impl GridError {
    /// Convenience constructor for [`GridError::Transport`].
    pub fn transport(link: impl Into<String>, details: impl ToString) -> Self {
        GridError::Transport {
            link: link.into(),
            details: details.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_error_display() {
        let err = GridError::Config("grid_num_h must divide 360".to_string());
        assert!(err.to_string().contains("Config Error"));

        let err2 = GridError::transport("serial:/dev/ttyAMA0", "broken pipe");
        assert!(err2.to_string().contains("/dev/ttyAMA0"));
        assert!(err2.to_string().contains("broken pipe"));
    }

    #[test]
    fn calibration_error_is_distinct_from_config() {
        let err = GridError::Calibration("no intrinsics".to_string());
        assert!(matches!(err, GridError::Calibration(_)));
        assert!(err.to_string().starts_with("Calibration Error"));
    }
}
