//! In-process simulated perception device for bench testing without a
//! camera attached.
//!
//! [`SimDevice`] sweeps a vertical obstacle band across the grid, one column
//! per frame, and emits an obstacle-free frame at the end of every pass so the
//! "no obstacle" path is exercised too.  It can produce either on-device style
//! grid frames or raw mask + depth frames for the host-side classifier.
//!
//! # Example
//!
//! ```rust
//! use gridlink_hal::device::{PerceptionDevice, PerceptionFrame};
//! use gridlink_hal::sim::SimDevice;
//! use gridlink_types::GridConfig;
//!
//! let mut dev = SimDevice::new(&GridConfig::default(), 1000.0).with_frame_limit(1);
//! assert!(dev.calibration().is_ok());
//! assert!(matches!(dev.next_frame().unwrap(), Some(PerceptionFrame::Grid(_))));
//! assert!(dev.next_frame().unwrap().is_none());
//! ```

use std::time::Duration;

use gridlink_types::{GridConfig, GridError, period_from_rate};

use crate::device::{Calibration, PerceptionDevice, PerceptionFrame};

/// Reference intrinsics of a 640×360 colour stream.
pub const REFERENCE_INTRINSICS: [[f64; 3]; 3] = [
    [492.238_220_21, 0.0, 320.578_552_25],
    [0.0, 492.238_220_21, 181.677_093_51],
    [0.0, 0.0, 1.0],
];

/// Reference horizontal FOV in degrees.
pub const REFERENCE_HFOV_DEG: f64 = 69.0;

/// A simulated stereo + NN device.
pub struct SimDevice {
    id: String,
    image_width: usize,
    image_height: usize,
    rows: usize,
    cols: usize,
    period: Duration,
    mask_depth: bool,
    frame: u64,
    frame_limit: Option<u64>,
}

impl SimDevice {
    /// Create a device producing grid frames for `grid` at `rate_hz`.
    ///
    /// A rate with no representable period produces the first frame and
    /// then sleeps indefinitely.
    pub fn new(grid: &GridConfig, rate_hz: f64) -> Self {
        Self {
            id: "sim".to_string(),
            image_width: grid.image_width as usize,
            image_height: grid.image_height as usize,
            rows: grid.grid_num_h as usize,
            cols: grid.grid_num_w as usize,
            period: period_from_rate(rate_hz, "sim_rate_hz").unwrap_or(Duration::MAX),
            mask_depth: false,
            frame: 0,
            frame_limit: None,
        }
    }

    /// Emit raw mask + depth frames instead of classified grids.
    pub fn with_mask_depth(mut self) -> Self {
        self.mask_depth = true;
        self
    }

    /// End the stream after `limit` frames.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Column carrying the obstacle band for `frame`, or `None` on the
    /// obstacle-free frame that closes each pass.
    fn band(&self, frame: u64) -> Option<usize> {
        let pos = (frame % (self.cols as u64 + 1)) as usize;
        (pos < self.cols).then_some(pos)
    }

    fn grid_frame(&self, band: Option<usize>) -> PerceptionFrame {
        let mut flat = Vec::with_capacity(self.rows * self.cols * 2);
        for row in 0..self.rows {
            for col in 0..self.cols {
                let obstacle = band == Some(col);
                flat.push(if obstacle { 1.0 } else { 0.0 });
                flat.push(2.0 + row as f32 * 0.5);
            }
        }
        PerceptionFrame::Grid(flat)
    }

    fn mask_depth_frame(&self, band: Option<usize>) -> PerceptionFrame {
        let cell_w = self.image_width / self.cols;
        let pixels = self.image_width * self.image_height;
        let mut mask = vec![0.0f32; pixels];
        for (i, m) in mask.iter_mut().enumerate() {
            if band == Some((i % self.image_width) / cell_w) {
                *m = 1.0;
            }
        }
        PerceptionFrame::MaskDepth {
            mask,
            depth_mm: vec![3000; pixels],
        }
    }
}

impl PerceptionDevice for SimDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn calibration(&mut self) -> Result<Calibration, GridError> {
        Ok(Calibration {
            lens_position: 120,
            intrinsic_matrix: Some(REFERENCE_INTRINSICS),
            hfov_deg: Some(REFERENCE_HFOV_DEG),
        })
    }

    fn next_frame(&mut self) -> Result<Option<PerceptionFrame>, GridError> {
        if self.frame_limit.is_some_and(|limit| self.frame >= limit) {
            return Ok(None);
        }
        if self.frame > 0 {
            std::thread::sleep(self.period);
        }
        let band = self.band(self.frame);
        self.frame += 1;
        Ok(Some(if self.mask_depth {
            self.mask_depth_frame(band)
        } else {
            self.grid_frame(band)
        }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> GridConfig {
        GridConfig {
            image_width: 8,
            image_height: 4,
            grid_num_w: 4,
            grid_num_h: 2,
        }
    }

    #[test]
    fn sim_calibration_reports_reference_values() {
        let mut dev = SimDevice::new(&small_grid(), 1000.0);
        let cal = dev.calibration().unwrap();
        assert_eq!(cal.intrinsic_matrix, Some(REFERENCE_INTRINSICS));
        assert_eq!(cal.hfov_deg, Some(REFERENCE_HFOV_DEG));
    }

    #[test]
    fn sim_grid_frames_sweep_band_then_go_clear() {
        let mut dev = SimDevice::new(&small_grid(), 1000.0).with_frame_limit(5);
        for expected_band in [Some(0), Some(1), Some(2), Some(3), None] {
            let Some(PerceptionFrame::Grid(flat)) = dev.next_frame().unwrap() else {
                panic!("expected a grid frame");
            };
            assert_eq!(flat.len(), 2 * 4 * 2);
            let labelled: Vec<usize> = flat
                .chunks_exact(2)
                .enumerate()
                .filter(|(_, pair)| pair[0] > 0.0)
                .map(|(i, _)| i % 4)
                .collect();
            match expected_band {
                Some(col) => assert_eq!(labelled, vec![col, col]),
                None => assert!(labelled.is_empty()),
            }
        }
        assert!(dev.next_frame().unwrap().is_none());
    }

    #[test]
    fn vanishing_rate_does_not_panic() {
        let mut dev = SimDevice::new(&small_grid(), 1e-20);
        assert!(matches!(dev.next_frame().unwrap(), Some(PerceptionFrame::Grid(_))));
    }

    #[test]
    fn sim_mask_depth_frame_has_full_resolution() {
        let mut dev = SimDevice::new(&small_grid(), 1000.0).with_mask_depth();
        let Some(PerceptionFrame::MaskDepth { mask, depth_mm }) = dev.next_frame().unwrap() else {
            panic!("expected a mask/depth frame");
        };
        assert_eq!(mask.len(), 32);
        assert_eq!(depth_mm.len(), 32);
        // Band at block column 0 → pixel columns 0 and 1 of every row.
        assert_eq!(mask[0], 1.0);
        assert_eq!(mask[1], 1.0);
        assert_eq!(mask[2], 0.0);
        assert_eq!(mask[8], 1.0);
    }
}
