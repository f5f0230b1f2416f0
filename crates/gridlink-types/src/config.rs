//! [`GridlinkConfig`] – the complete configuration surface.
//!
//! Each section is a plain `serde` struct with per-field defaults, so a
//! partial TOML file (or none at all) yields a usable configuration.  Loading
//! the file and applying environment overrides is the CLI's job; this module
//! only owns the shape and [`GridlinkConfig::validate`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::GridError;
use crate::grid::{FrameConvention, GridShape, GridThreshold};

/// Period of a `rate_hz` cadence.
///
/// # Errors
///
/// Returns [`GridError::Config`] naming `field` when the rate is not a
/// positive finite number, or so small that its period does not fit in a
/// [`Duration`].
pub fn period_from_rate(rate_hz: f64, field: &str) -> Result<Duration, GridError> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        return Err(GridError::Config(format!(
            "{field} must be a positive number of Hz, got {rate_hz}"
        )));
    }
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .map_err(|e| GridError::Config(format!("{field} of {rate_hz} Hz is unusable: {e}")))
}

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

/// Sensor resolution and grid partitioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_image_width")]
    pub image_width: u32,
    #[serde(default = "default_image_height")]
    pub image_height: u32,
    /// Number of grid columns; must evenly divide `image_width`.
    #[serde(default = "default_grid_num")]
    pub grid_num_w: u32,
    /// Number of grid rows; must evenly divide `image_height`.
    #[serde(default = "default_grid_num")]
    pub grid_num_h: u32,
}

impl GridConfig {
    pub fn shape(&self) -> GridShape {
        GridShape::new(self.grid_num_h as usize, self.grid_num_w as usize)
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            image_width: default_image_width(),
            image_height: default_image_height(),
            grid_num_w: default_grid_num(),
            grid_num_h: default_grid_num(),
        }
    }
}

/// Obstacle dispatch timing and range limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Ceiling on outbound obstacle messages, in Hz.
    #[serde(default = "default_message_rate_max")]
    pub message_rate_max: f64,
    /// Minimum sensed distance reported to the flight controller (metres).
    #[serde(default = "default_min_distance")]
    pub min_distance: f32,
    /// Maximum sensed distance reported to the flight controller (metres).
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
    #[serde(default)]
    pub frame_mode: FrameConvention,
    /// Upper bound on how long the dispatcher waits for a grid before it
    /// re-checks the shutdown flag.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl DispatchConfig {
    /// Minimum spacing between consecutive obstacle messages.
    ///
    /// # Errors
    ///
    /// See [`period_from_rate`].
    pub fn message_interval(&self) -> Result<Duration, GridError> {
        period_from_rate(self.message_rate_max, "message_rate_max")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject non-positive rates and inverted distance limits.
    pub fn validate(&self) -> Result<(), GridError> {
        self.message_interval()?;
        if !self.min_distance.is_finite() || !self.max_distance.is_finite() {
            return Err(GridError::Config(
                "min_distance and max_distance must be finite".to_string(),
            ));
        }
        if self.min_distance < 0.0 {
            return Err(GridError::Config(format!(
                "min_distance must not be negative, got {}",
                self.min_distance
            )));
        }
        if self.min_distance >= self.max_distance {
            return Err(GridError::Config(format!(
                "min_distance ({}) must be below max_distance ({})",
                self.min_distance, self.max_distance
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(GridError::Config("poll_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            message_rate_max: default_message_rate_max(),
            min_distance: default_min_distance(),
            max_distance: default_max_distance(),
            frame_mode: FrameConvention::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Host-side mask + depth classifier thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Mask probability above which a pixel counts as occupied, in `[0, 1]`.
    #[serde(default = "default_mask_threshold")]
    pub mask_threshold: f32,
    /// Float = fraction of the block area, integer = absolute pixel count.
    #[serde(default)]
    pub grid_threshold: GridThreshold,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mask_threshold: default_mask_threshold(),
            grid_threshold: GridThreshold::default(),
        }
    }
}

/// Projection mode and optional calibration overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// `true` = use the 3×3 intrinsic matrix, `false` = horizontal FOV only.
    #[serde(default = "default_true")]
    pub use_intrinsic: bool,
    /// Overrides the device-reported intrinsic matrix when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsic_matrix: Option<[[f64; 3]; 3]>,
    /// Overrides the device-reported horizontal FOV (degrees) when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hfov: Option<f64>,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            use_intrinsic: true,
            intrinsic_matrix: None,
            hfov: None,
        }
    }
}

/// Telemetry transport choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Serial device (UART to the flight controller).
    #[default]
    Serial,
    /// UDP datagrams to a MAVLink endpoint.
    Udp,
    /// Dry run: frames are encoded and logged, nothing is sent.
    Log,
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkKind::Serial => write!(f, "serial"),
            LinkKind::Udp => write!(f, "udp"),
            LinkKind::Log => write!(f, "log"),
        }
    }
}

/// Telemetry link settings and MAVLink identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub kind: LinkKind,
    /// Serial device path.
    #[serde(default = "default_device")]
    pub device: String,
    /// Serial line speed.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// `host:port` of the UDP MAVLink endpoint.
    #[serde(default = "default_udp_target")]
    pub udp_target: String,
    #[serde(default = "default_system_id")]
    pub system_id: u8,
    #[serde(default = "default_component_id")]
    pub component_id: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: LinkKind::default(),
            device: default_device(),
            baud_rate: default_baud_rate(),
            udp_target: default_udp_target(),
            system_id: default_system_id(),
            component_id: default_component_id(),
        }
    }
}

/// Where perception frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Built-in synthetic device.
    #[default]
    Sim,
    /// Newline-delimited JSON records from a file or stdin.
    Replay,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Sim => write!(f, "sim"),
            SourceKind::Replay => write!(f, "replay"),
        }
    }
}

/// Perception source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    /// Replay file; stdin when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Pace replayed frames at this rate; unset replays as fast as records
    /// can be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_rate_hz: Option<f64>,
    /// Frame rate of the synthetic device.
    #[serde(default = "default_sim_rate_hz")]
    pub sim_rate_hz: f64,
    /// Synthetic device emits raw mask + depth frames for the host-side
    /// classifier instead of ready grids.
    #[serde(default)]
    pub sim_mask_depth: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            path: None,
            replay_rate_hz: None,
            sim_rate_hz: default_sim_rate_hz(),
            sim_mask_depth: false,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Top level
// ────────────────────────────────────────────────────────────────────────────

/// Complete configuration, one TOML table per section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GridlinkConfig {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

impl GridlinkConfig {
    /// Check every startup invariant.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Config`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), GridError> {
        let g = &self.grid;
        if g.grid_num_w == 0 || g.grid_num_h == 0 {
            return Err(GridError::Config("grid_num_w and grid_num_h must be > 0".to_string()));
        }
        if g.image_width % g.grid_num_w != 0 {
            return Err(GridError::Config(format!(
                "grid_num_w ({}) does not evenly divide image_width ({})",
                g.grid_num_w, g.image_width
            )));
        }
        if g.image_height % g.grid_num_h != 0 {
            return Err(GridError::Config(format!(
                "grid_num_h ({}) does not evenly divide image_height ({})",
                g.grid_num_h, g.image_height
            )));
        }

        self.dispatch.validate()?;

        let c = &self.classifier;
        if !(0.0..=1.0).contains(&c.mask_threshold) {
            return Err(GridError::Config(format!(
                "mask_threshold must be in [0, 1], got {}",
                c.mask_threshold
            )));
        }
        if let GridThreshold::Fraction(f) = c.grid_threshold
            && !(0.0..=1.0).contains(&f)
        {
            return Err(GridError::Config(format!(
                "fractional grid_threshold must be in [0, 1], got {f}"
            )));
        }

        if let Some(hfov) = self.projection.hfov
            && !(hfov > 0.0 && hfov < 180.0)
        {
            return Err(GridError::Config(format!(
                "hfov must be in (0, 180) degrees, got {hfov}"
            )));
        }

        period_from_rate(self.source.sim_rate_hz, "sim_rate_hz")?;
        if let Some(rate) = self.source.replay_rate_hz {
            period_from_rate(rate, "replay_rate_hz")?;
        }
        if self.link.baud_rate == 0 {
            return Err(GridError::Config("baud_rate must be > 0".to_string()));
        }
        Ok(())
    }
}

fn default_image_width() -> u32 {
    640
}
fn default_image_height() -> u32 {
    360
}
fn default_grid_num() -> u32 {
    10
}
fn default_message_rate_max() -> f64 {
    30.0
}
fn default_min_distance() -> f32 {
    0.35
}
fn default_max_distance() -> f32 {
    35.0
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_mask_threshold() -> f32 {
    0.5
}
fn default_true() -> bool {
    true
}
fn default_device() -> String {
    "/dev/ttyAMA0".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_udp_target() -> String {
    "127.0.0.1:14550".to_string()
}
fn default_system_id() -> u8 {
    1
}
fn default_component_id() -> u8 {
    93
}
fn default_sim_rate_hz() -> f64 {
    10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = GridlinkConfig::default();
        cfg.validate().expect("defaults must validate");
        assert_eq!(cfg.grid.shape(), GridShape::new(10, 10));
        assert_eq!(cfg.dispatch.frame_mode, FrameConvention::BodyFrd);
        assert_eq!(cfg.link.component_id, 93);
    }

    #[test]
    fn grid_that_does_not_divide_resolution_is_rejected() {
        let mut cfg = GridlinkConfig::default();
        cfg.grid.grid_num_h = 7; // 360 % 7 != 0
        assert!(matches!(cfg.validate(), Err(GridError::Config(_))));

        let mut cfg = GridlinkConfig::default();
        cfg.grid.grid_num_w = 0;
        assert!(matches!(cfg.validate(), Err(GridError::Config(_))));
    }

    #[test]
    fn non_positive_rate_is_rejected() {
        let mut cfg = GridlinkConfig::default();
        cfg.dispatch.message_rate_max = 0.0;
        assert!(cfg.validate().is_err());
        cfg.dispatch.message_rate_max = -5.0;
        assert!(cfg.validate().is_err());
        cfg.dispatch.message_rate_max = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_distances_are_rejected() {
        let mut cfg = GridlinkConfig::default();
        cfg.dispatch.min_distance = 10.0;
        cfg.dispatch.max_distance = 10.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn thresholds_out_of_range_are_rejected() {
        let mut cfg = GridlinkConfig::default();
        cfg.classifier.mask_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = GridlinkConfig::default();
        cfg.classifier.grid_threshold = GridThreshold::Fraction(1.2);
        assert!(cfg.validate().is_err());

        // Absolute counts are not bounded by 1.
        let mut cfg = GridlinkConfig::default();
        cfg.classifier.grid_threshold = GridThreshold::Count(500);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn hfov_override_must_be_a_real_angle() {
        let mut cfg = GridlinkConfig::default();
        cfg.projection.hfov = Some(180.0);
        assert!(cfg.validate().is_err());
        cfg.projection.hfov = Some(69.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn message_interval_is_reciprocal_of_rate() {
        let d = DispatchConfig {
            message_rate_max: 20.0,
            ..DispatchConfig::default()
        };
        assert_eq!(d.message_interval().unwrap(), Duration::from_millis(50));
    }

    #[test]
    fn vanishing_rates_are_rejected_without_panicking() {
        let mut cfg = GridlinkConfig::default();
        cfg.dispatch.message_rate_max = 1e-20;
        assert!(matches!(cfg.dispatch.message_interval(), Err(GridError::Config(_))));
        assert!(matches!(cfg.validate(), Err(GridError::Config(_))));

        let mut cfg = GridlinkConfig::default();
        cfg.source.sim_rate_hz = 1e-20;
        assert!(matches!(cfg.validate(), Err(GridError::Config(_))));

        let mut cfg = GridlinkConfig::default();
        cfg.source.replay_rate_hz = Some(0.0);
        assert!(matches!(cfg.validate(), Err(GridError::Config(_))));

        // Slow but representable rates stay valid.
        let mut cfg = GridlinkConfig::default();
        cfg.dispatch.message_rate_max = 0.25;
        assert_eq!(cfg.dispatch.message_interval().unwrap(), Duration::from_secs(4));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_baud_rate_is_rejected() {
        let mut cfg = GridlinkConfig::default();
        assert_eq!(cfg.link.baud_rate, 115_200);
        cfg.link.baud_rate = 0;
        assert!(matches!(cfg.validate(), Err(GridError::Config(_))));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let raw = r#"
            [grid]
            grid_num_w = 8

            [dispatch]
            frame_mode = "global"

            [classifier]
            grid_threshold = 120

            [link]
            kind = "udp"
        "#;
        let cfg: GridlinkConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.grid.grid_num_w, 8);
        assert_eq!(cfg.grid.grid_num_h, 10);
        assert_eq!(cfg.dispatch.frame_mode, FrameConvention::Global);
        assert_eq!(cfg.classifier.grid_threshold, GridThreshold::Count(120));
        assert_eq!(cfg.link.kind, LinkKind::Udp);
        assert_eq!(cfg.link.udp_target, "127.0.0.1:14550");
        cfg.validate().unwrap();
    }

    #[test]
    fn fractional_threshold_and_intrinsic_matrix_parse_from_toml() {
        let raw = r#"
            [classifier]
            grid_threshold = 0.25

            [projection]
            use_intrinsic = true
            intrinsic_matrix = [[492.24, 0.0, 320.58], [0.0, 492.24, 181.68], [0.0, 0.0, 1.0]]
        "#;
        let cfg: GridlinkConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.classifier.grid_threshold, GridThreshold::Fraction(0.25));
        let k = cfg.projection.intrinsic_matrix.unwrap();
        assert!((k[0][2] - 320.58).abs() < 1e-9);
    }
}
