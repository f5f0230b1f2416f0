//! Host-side grid classifier.
//!
//! Fallback producer used when the perception device cannot classify the
//! grid itself: it derives the same `(label, depth)` [`Grid`] from a raw
//! occupancy mask and a co-registered depth map.
//!
//! # Algorithm
//!
//! 1. Binarise the mask: a pixel is occupied when `mask > mask_threshold`.
//! 2. Convert depth from millimetres to metres and keep only occupied pixels.
//! 3. Partition the image into `grid_num_h × grid_num_w` blocks.
//! 4. A block is an obstacle when its count of non-zero depth pixels exceeds
//!    the grid threshold; its depth is the mean of those pixels.
//!
//! A block with no non-zero pixels has no defined mean.  It is reported as
//! background with a depth of `0.0`, never as NaN.

use gridlink_types::{ClassifierConfig, Grid, GridCell, GridError, GridThreshold};
use tracing::trace;

use crate::projection::GridLayout;

/// Mask + depth → [`Grid`] classifier.
#[derive(Debug, Clone)]
pub struct HostClassifier {
    layout: GridLayout,
    mask_threshold: f32,
    grid_threshold: GridThreshold,
}

impl HostClassifier {
    /// Build a classifier for `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Config`] if `mask_threshold` or a fractional
    /// `grid_threshold` lies outside `[0, 1]`.
    pub fn new(
        layout: GridLayout,
        mask_threshold: f32,
        grid_threshold: GridThreshold,
    ) -> Result<Self, GridError> {
        if !(0.0..=1.0).contains(&mask_threshold) {
            return Err(GridError::Config(format!(
                "mask_threshold must be in [0, 1], got {mask_threshold}"
            )));
        }
        if let GridThreshold::Fraction(f) = grid_threshold
            && !(0.0..=1.0).contains(&f)
        {
            return Err(GridError::Config(format!(
                "fractional grid_threshold must be in [0, 1], got {f}"
            )));
        }
        Ok(Self {
            layout,
            mask_threshold,
            grid_threshold,
        })
    }

    pub fn from_config(layout: GridLayout, cfg: &ClassifierConfig) -> Result<Self, GridError> {
        Self::new(layout, cfg.mask_threshold, cfg.grid_threshold)
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Classify one frame.
    ///
    /// `mask` holds per-pixel occupancy probabilities and `depth_mm` the depth
    /// in millimetres, both row-major `image_height × image_width`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Frame`] if either input has the wrong length.
    pub fn classify(&self, mask: &[f32], depth_mm: &[u16]) -> Result<Grid, GridError> {
        let width = self.layout.image_width() as usize;
        let height = self.layout.image_height() as usize;
        let pixels = width * height;
        if mask.len() != pixels || depth_mm.len() != pixels {
            return Err(GridError::Frame(format!(
                "expected {pixels} mask and depth pixels, got {} and {}",
                mask.len(),
                depth_mm.len()
            )));
        }

        let shape = self.layout.shape();
        let cell_w = self.layout.cell_width() as usize;
        let cell_h = self.layout.cell_height() as usize;
        let threshold_px = self.grid_threshold.pixels(cell_w * cell_h);

        let mut counts = vec![0u32; shape.cell_count()];
        let mut sums = vec![0.0f64; shape.cell_count()];

        for (row_px, (mask_row, depth_row)) in mask
            .chunks_exact(width)
            .zip(depth_mm.chunks_exact(width))
            .enumerate()
        {
            let block_row = row_px / cell_h;
            for (col_px, (&m, &d)) in mask_row.iter().zip(depth_row).enumerate() {
                if m > self.mask_threshold && d > 0 {
                    let idx = block_row * shape.cols + col_px / cell_w;
                    counts[idx] += 1;
                    sums[idx] += f64::from(d) / 1000.0;
                }
            }
        }

        let cells = counts
            .iter()
            .zip(&sums)
            .enumerate()
            .map(|(idx, (&count, &sum))| {
                if count == 0 {
                    trace!(block = idx, "block has no valid depth; reporting background");
                    return GridCell::background();
                }
                GridCell {
                    label: f64::from(count) > threshold_px,
                    depth_m: (sum / f64::from(count)) as f32,
                }
            })
            .collect();

        Grid::new(shape, cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(w: u32, h: u32, nw: u32, nh: u32, threshold: GridThreshold) -> HostClassifier {
        HostClassifier::new(GridLayout::new(w, h, nw, nh).unwrap(), 0.5, threshold).unwrap()
    }

    #[test]
    fn uniform_occupied_frame_marks_every_block() {
        let c = classifier(4, 4, 2, 2, GridThreshold::Fraction(0.5));
        let grid = c.classify(&[0.9; 16], &[2000; 16]).unwrap();
        assert_eq!(grid.cells().len(), 4);
        for cell in grid.cells() {
            assert!(cell.label);
            assert!((cell.depth_m - 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn block_below_mask_threshold_is_background_with_finite_depth() {
        let c = classifier(4, 4, 2, 2, GridThreshold::Count(0));
        let mut mask = vec![0.9f32; 16];
        // Top-left 2x2 block entirely below the mask threshold.
        for (row, col) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            mask[row * 4 + col] = 0.1;
        }
        let grid = c.classify(&mask, &[1500; 16]).unwrap();

        let tl = grid.cell(0, 0).unwrap();
        assert!(!tl.label);
        assert!(tl.depth_m.is_finite());
        assert!(grid.cell(1, 1).unwrap().label);
    }

    #[test]
    fn occupied_block_with_all_zero_depth_is_recovered_as_background() {
        let c = classifier(4, 4, 2, 2, GridThreshold::Count(0));
        let grid = c.classify(&[1.0; 16], &[0; 16]).unwrap();
        for cell in grid.cells() {
            assert!(!cell.label);
            assert!(cell.depth_m.is_finite());
        }
    }

    #[test]
    fn depth_is_mean_of_nonzero_pixels_only() {
        let c = classifier(2, 2, 1, 1, GridThreshold::Count(1));
        // Two valid pixels (1 m, 3 m), one zero-depth, one masked out.
        let mask = [0.9, 0.9, 0.9, 0.0];
        let depth = [1000, 3000, 0, 9000];
        let grid = c.classify(&mask, &depth).unwrap();
        let cell = grid.cell(0, 0).unwrap();
        assert!(cell.label, "2 non-zero pixels exceed a count of 1");
        assert!((cell.depth_m - 2.0).abs() < 1e-6);
    }

    #[test]
    fn fractional_threshold_scales_with_block_area() {
        // 4x4 block, fraction 0.5 → needs more than 8 pixels.
        let c = classifier(4, 4, 1, 1, GridThreshold::Fraction(0.5));
        let mut mask = vec![0.0f32; 16];
        for m in mask.iter_mut().take(8) {
            *m = 1.0;
        }
        let grid = c.classify(&mask, &[1000; 16]).unwrap();
        assert!(!grid.cell(0, 0).unwrap().label, "exactly 8 is not above 8");

        mask[8] = 1.0;
        let grid = c.classify(&mask, &[1000; 16]).unwrap();
        assert!(grid.cell(0, 0).unwrap().label);
    }

    #[test]
    fn absolute_threshold_is_used_as_is() {
        let c = classifier(4, 4, 1, 1, GridThreshold::Count(3));
        let mut mask = vec![0.0f32; 16];
        mask[..4].copy_from_slice(&[1.0; 4]);
        let grid = c.classify(&mask, &[1000; 16]).unwrap();
        assert!(grid.cell(0, 0).unwrap().label);
    }

    #[test]
    fn blocks_are_partitioned_row_major() {
        // 4 wide x 2 tall, grid 2 cols x 1 row: only the right block is occupied.
        let c = classifier(4, 2, 2, 1, GridThreshold::Count(0));
        let mask = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0];
        let grid = c.classify(&mask, &[4000; 8]).unwrap();
        assert!(!grid.cell(0, 0).unwrap().label);
        assert!(grid.cell(0, 1).unwrap().label);
        assert!((grid.cell(0, 1).unwrap().depth_m - 4.0).abs() < 1e-6);
    }

    #[test]
    fn wrong_input_length_is_frame_error() {
        let c = classifier(4, 4, 2, 2, GridThreshold::Count(0));
        assert!(matches!(c.classify(&[0.0; 15], &[0; 16]), Err(GridError::Frame(_))));
        assert!(matches!(c.classify(&[0.0; 16], &[0; 17]), Err(GridError::Frame(_))));
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let layout = GridLayout::new(4, 4, 2, 2).unwrap();
        assert!(HostClassifier::new(layout, 1.1, GridThreshold::Count(0)).is_err());
        assert!(HostClassifier::new(layout, 0.5, GridThreshold::Fraction(-0.1)).is_err());
    }
}
