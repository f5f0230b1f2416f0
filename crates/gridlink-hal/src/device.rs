//! Generic `PerceptionDevice` trait and supporting types for the on-board
//! perception pipeline.

use gridlink_types::GridError;
use serde::{Deserialize, Serialize};

/// Calibration reported once at startup by the perception device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Lens focus position of the colour camera.
    #[serde(default)]
    pub lens_position: u8,
    /// Row-major 3×3 intrinsic matrix at the network input resolution.
    #[serde(default)]
    pub intrinsic_matrix: Option<[[f64; 3]; 3]>,
    /// Horizontal field of view in degrees.
    #[serde(default)]
    pub hfov_deg: Option<f64>,
}

/// One perception cycle's output.
#[derive(Debug, Clone, PartialEq)]
pub enum PerceptionFrame {
    /// On-device classification: flat row-major `(label, depth_m)` pairs.
    Grid(Vec<f32>),
    /// Raw mask probabilities and depth in millimetres, to be classified on
    /// the host.
    MaskDepth { mask: Vec<f32>, depth_mm: Vec<u16> },
}

/// A perception source (stereo + neural network device, replay file, …).
///
/// Implementations block in [`next_frame`][Self::next_frame] until the next
/// cycle is available, so callers drive them from a dedicated thread.
pub trait PerceptionDevice: Send {
    /// Stable identifier for this device, e.g. `"oak-d"` or `"sim"`.
    fn id(&self) -> &str;

    /// Read the calibration.  Called exactly once, before any frame.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Calibration`] if the device cannot provide it.
    fn calibration(&mut self) -> Result<Calibration, GridError>;

    /// Block until the next frame.  `Ok(None)` means the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Frame`] for a malformed frame; the caller may
    /// keep reading.
    fn next_frame(&mut self) -> Result<Option<PerceptionFrame>, GridError>;
}
