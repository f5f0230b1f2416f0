//! Geometry projector.
//!
//! Converts a grid cell's depth reading into lateral and vertical offsets
//! using per-cell scale coefficients that are computed once at startup from
//! the camera calibration.
//!
//! For a cell whose pixel centre is `(u, v)` the pinhole model gives:
//!
//! ```text
//! x = (u - cx) / fx * z        (right of the optical axis)
//! y = (cy - v) / fy * z        (above the optical axis; image rows grow down)
//! ```
//!
//! so the coefficients `x_coeff = (u - cx) / fx` and `y_coeff = (cy - v) / fy`
//! depend only on the calibration and the grid layout.
//!
//! # Example
//!
//! ```rust
//! use gridlink_perception::projection::{GridLayout, Intrinsics, ProjectionCoefficients};
//!
//! let layout = GridLayout::new(640, 360, 10, 10).unwrap();
//! let k = Intrinsics { fx: 492.24, fy: 492.24, cx: 320.58, cy: 181.68 };
//! let coeffs = ProjectionCoefficients::from_intrinsics(&layout, &k);
//!
//! // A cell left of centre projects to a negative x.
//! let (x, _y, z) = coeffs.project(5, 0, 2.0).unwrap();
//! assert!(x < 0.0);
//! assert_eq!(z, 2.0);
//! ```

use gridlink_types::{GridConfig, GridError, GridShape};

// ────────────────────────────────────────────────────────────────────────────
// Grid layout
// ────────────────────────────────────────────────────────────────────────────

/// Sensor resolution partitioned into `grid_num_h × grid_num_w` equal cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    image_width: u32,
    image_height: u32,
    grid_num_w: u32,
    grid_num_h: u32,
}

impl GridLayout {
    /// Validate and build a layout.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Config`] if a grid count is zero or does not
    /// evenly divide the matching image dimension.
    pub fn new(
        image_width: u32,
        image_height: u32,
        grid_num_w: u32,
        grid_num_h: u32,
    ) -> Result<Self, GridError> {
        if grid_num_w == 0 || grid_num_h == 0 || image_width == 0 || image_height == 0 {
            return Err(GridError::Config(format!(
                "degenerate layout {image_width}x{image_height} / {grid_num_w}x{grid_num_h}"
            )));
        }
        if image_width % grid_num_w != 0 {
            return Err(GridError::Config(format!(
                "grid_num_w ({grid_num_w}) does not evenly divide image width ({image_width})"
            )));
        }
        if image_height % grid_num_h != 0 {
            return Err(GridError::Config(format!(
                "grid_num_h ({grid_num_h}) does not evenly divide image height ({image_height})"
            )));
        }
        Ok(Self {
            image_width,
            image_height,
            grid_num_w,
            grid_num_h,
        })
    }

    pub fn from_config(cfg: &GridConfig) -> Result<Self, GridError> {
        Self::new(cfg.image_width, cfg.image_height, cfg.grid_num_w, cfg.grid_num_h)
    }

    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    /// Cell width in pixels.
    pub fn cell_width(&self) -> u32 {
        self.image_width / self.grid_num_w
    }

    /// Cell height in pixels.
    pub fn cell_height(&self) -> u32 {
        self.image_height / self.grid_num_h
    }

    pub fn shape(&self) -> GridShape {
        GridShape::new(self.grid_num_h as usize, self.grid_num_w as usize)
    }

    /// Pixel x of the centre of column `col`.
    fn center_u(&self, col: u32) -> f64 {
        let w = f64::from(self.cell_width());
        (w - 1.0) / 2.0 + f64::from(col) * w
    }

    /// Pixel y of the centre of row `row`.
    fn center_v(&self, row: u32) -> f64 {
        let h = f64::from(self.cell_height());
        (h - 1.0) / 2.0 + f64::from(row) * h
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Intrinsics
// ────────────────────────────────────────────────────────────────────────────

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// Extract intrinsics from a row-major 3×3 camera matrix.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Calibration`] when a focal length is not a
    /// positive finite number or the principal point is not finite.
    pub fn from_matrix(m: [[f64; 3]; 3]) -> Result<Self, GridError> {
        let k = Self {
            fx: m[0][0],
            fy: m[1][1],
            cx: m[0][2],
            cy: m[1][2],
        };
        if !(k.fx.is_finite() && k.fx > 0.0 && k.fy.is_finite() && k.fy > 0.0) {
            return Err(GridError::Calibration(format!(
                "focal lengths must be positive, got fx={} fy={}",
                k.fx, k.fy
            )));
        }
        if !(k.cx.is_finite() && k.cy.is_finite()) {
            return Err(GridError::Calibration(
                "principal point is not finite".to_string(),
            ));
        }
        Ok(k)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Coefficients
// ────────────────────────────────────────────────────────────────────────────

/// Scale factors for one cell: world offset = coefficient × depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellCoefficient {
    pub x: f64,
    pub y: f64,
}

/// Row-major per-cell projection coefficients, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionCoefficients {
    shape: GridShape,
    cells: Vec<CellCoefficient>,
}

impl ProjectionCoefficients {
    /// Coefficients from a full intrinsic calibration.
    pub fn from_intrinsics(layout: &GridLayout, k: &Intrinsics) -> Self {
        Self::build(layout, k.cx, k.cy, 1.0 / k.fx, 1.0 / k.fy)
    }

    /// Coefficients from the horizontal field of view alone, assuming square
    /// pixels (`fx == fy`) and a principal point at the image centre.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Config`] unless `0 < hfov_deg < 180`.
    pub fn from_hfov(layout: &GridLayout, hfov_deg: f64) -> Result<Self, GridError> {
        if !(hfov_deg > 0.0 && hfov_deg < 180.0) {
            return Err(GridError::Config(format!(
                "hfov must be in (0, 180) degrees, got {hfov_deg}"
            )));
        }
        let width = f64::from(layout.image_width());
        let height = f64::from(layout.image_height());
        let f_r = (hfov_deg.to_radians() / 2.0).tan() / (width / 2.0);
        Ok(Self::build(layout, width / 2.0, height / 2.0, f_r, f_r))
    }

    fn build(layout: &GridLayout, cx: f64, cy: f64, fx_r: f64, fy_r: f64) -> Self {
        let shape = layout.shape();
        let mut cells = Vec::with_capacity(shape.cell_count());
        for row in 0..shape.rows as u32 {
            let v = layout.center_v(row);
            for col in 0..shape.cols as u32 {
                let u = layout.center_u(col);
                cells.push(CellCoefficient {
                    x: (u - cx) * fx_r,
                    y: (cy - v) * fy_r,
                });
            }
        }
        Self { shape, cells }
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn get(&self, row: usize, col: usize) -> Option<CellCoefficient> {
        if row >= self.shape.rows || col >= self.shape.cols {
            return None;
        }
        self.cells.get(row * self.shape.cols + col).copied()
    }

    /// Camera-space `(x right, y up, z forward)` in metres for a cell at
    /// `depth_m`.  `None` when `(row, col)` is outside the grid.
    pub fn project(&self, row: usize, col: usize, depth_m: f32) -> Option<(f32, f32, f32)> {
        let c = self.get(row, col)?;
        let z = f64::from(depth_m);
        Some(((c.x * z) as f32, (c.y * z) as f32, depth_m))
    }
}
