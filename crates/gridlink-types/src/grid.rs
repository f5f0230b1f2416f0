//! Grid-shaped obstacle representation exchanged between perception and
//! dispatch, and the obstacle vector sent over the telemetry link.

use serde::{Deserialize, Serialize};

use crate::GridError;

// ────────────────────────────────────────────────────────────────────────────
// Grid
// ────────────────────────────────────────────────────────────────────────────

/// Number of grid rows (`grid_num_h`) and columns (`grid_num_w`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Length of the flat `(label, depth)` sequence delivered by perception.
    pub fn flat_len(&self) -> usize {
        self.cell_count() * 2
    }
}

/// One grid cell: obstacle flag plus the cell's depth in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GridCell {
    /// `true` when the cell contains an obstacle.
    pub label: bool,
    /// Depth (camera z) in metres. Only meaningful when `label` is set.
    pub depth_m: f32,
}

impl GridCell {
    pub fn obstacle(depth_m: f32) -> Self {
        Self {
            label: true,
            depth_m,
        }
    }

    pub fn background() -> Self {
        Self::default()
    }
}

/// A fixed-shape, row-major grid of [`GridCell`]s produced once per
/// perception cycle.
///
/// The cell count always equals `shape.cell_count()`; the constructors reject
/// anything else, so a `Grid` can never be observed half-filled.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    shape: GridShape,
    cells: Vec<GridCell>,
}

impl Grid {
    /// Build a grid from row-major cells.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Frame`] if `cells.len()` does not match `shape`.
    pub fn new(shape: GridShape, cells: Vec<GridCell>) -> Result<Self, GridError> {
        if cells.len() != shape.cell_count() {
            return Err(GridError::Frame(format!(
                "expected {} cells for a {}x{} grid, got {}",
                shape.cell_count(),
                shape.rows,
                shape.cols,
                cells.len()
            )));
        }
        Ok(Self { shape, cells })
    }

    /// A grid with every cell marked as background.
    pub fn empty(shape: GridShape) -> Self {
        Self {
            shape,
            cells: vec![GridCell::background(); shape.cell_count()],
        }
    }

    /// Decode the perception output: a flat sequence of row-major
    /// `(label, depth_m)` pairs. Any label above zero marks an obstacle.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Frame`] if `flat.len() != shape.flat_len()`.
    pub fn from_flat(shape: GridShape, flat: &[f32]) -> Result<Self, GridError> {
        if flat.len() != shape.flat_len() {
            return Err(GridError::Frame(format!(
                "expected {} values for a {}x{} grid, got {}",
                shape.flat_len(),
                shape.rows,
                shape.cols,
                flat.len()
            )));
        }
        let cells = flat
            .chunks_exact(2)
            .map(|pair| GridCell {
                label: pair[0] > 0.0,
                depth_m: pair[1],
            })
            .collect();
        Ok(Self { shape, cells })
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    /// The cell at `(row, col)`, or `None` when out of bounds.
    pub fn cell(&self, row: usize, col: usize) -> Option<&GridCell> {
        if row >= self.shape.rows || col >= self.shape.cols {
            return None;
        }
        self.cells.get(row * self.shape.cols + col)
    }

    /// Iterate `(row, col, cell)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &GridCell)> {
        let cols = self.shape.cols;
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, cell)| (i / cols, i % cols, cell))
    }

    /// Number of cells flagged as obstacles.
    pub fn obstacle_count(&self) -> usize {
        self.cells.iter().filter(|c| c.label).count()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Thresholds
// ────────────────────────────────────────────────────────────────────────────

/// Occupancy threshold used by the host-side classifier.
///
/// A float in the config file is read as a fraction of the block area, an
/// integer as an absolute pixel count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GridThreshold {
    /// Absolute number of non-zero pixels, used as-is.
    Count(u32),
    /// Fraction in `[0, 1]` of the block area.
    Fraction(f64),
}

impl GridThreshold {
    /// Resolve to a pixel count for a block of `block_area` pixels.
    pub fn pixels(&self, block_area: usize) -> f64 {
        match *self {
            GridThreshold::Count(n) => f64::from(n),
            GridThreshold::Fraction(f) => f * block_area as f64,
        }
    }
}

impl Default for GridThreshold {
    fn default() -> Self {
        GridThreshold::Fraction(0.3)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Obstacle output
// ────────────────────────────────────────────────────────────────────────────

/// Coordinate convention used when reporting an obstacle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameConvention {
    /// Body frame, forward / right / down (MAV_FRAME_BODY_FRD).
    #[default]
    BodyFrd,
    /// Flat frame, camera `(x, y, z)` unchanged (MAV_FRAME_GLOBAL).
    Global,
}

impl FrameConvention {
    /// MAVLink `MAV_FRAME` identifier for this convention.
    pub fn mav_frame(&self) -> u8 {
        match self {
            FrameConvention::BodyFrd => 12,
            FrameConvention::Global => 0,
        }
    }

    /// Map camera-space `(x right, y up, z forward)` into this convention.
    pub fn apply(&self, x: f32, y: f32, z: f32) -> (f32, f32, f32) {
        match self {
            FrameConvention::BodyFrd => (z, x, -y),
            FrameConvention::Global => (x, y, z),
        }
    }
}

impl std::fmt::Display for FrameConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameConvention::BodyFrd => write!(f, "body_frd"),
            FrameConvention::Global => write!(f, "global"),
        }
    }
}

impl std::str::FromStr for FrameConvention {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "body_frd" => Ok(FrameConvention::BodyFrd),
            "global" => Ok(FrameConvention::Global),
            other => Err(GridError::Config(format!(
                "unknown frame_mode '{other}' (expected body_frd or global)"
            ))),
        }
    }
}

/// One obstacle report, already expressed in `frame`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstacleVector {
    /// Milliseconds since the dispatcher started.
    pub timestamp_ms: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub min_range: f32,
    pub max_range: f32,
    pub frame: FrameConvention,
}

impl ObstacleVector {
    /// The "no obstacle" report: every spatial field is set one metre past
    /// `max_range`.
    pub fn sentinel(timestamp_ms: u32, min_range: f32, max_range: f32, frame: FrameConvention) -> Self {
        let out = max_range + 1.0;
        Self {
            timestamp_ms,
            x: out,
            y: out,
            z: out,
            min_range,
            max_range,
            frame,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        let out = self.max_range + 1.0;
        self.x == out && self.y == out && self.z == out
    }
}
