//! Replay a recorded perception session from newline-delimited JSON.
//!
//! The first record must be a calibration record; every following record is
//! one frame.  Blank lines are skipped.
//!
//! ```text
//! {"type":"calibration","lens_position":120,"hfov_deg":69.0}
//! {"type":"grid","cells":[1.0,2.5,0.0,0.0]}
//! {"type":"mask_depth","mask":[0.9,0.1],"depth_mm":[1500,0]}
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Stdin};
use std::path::Path;
use std::time::Duration;

use gridlink_types::GridError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::{Calibration, PerceptionDevice, PerceptionFrame};

/// One line of a replay file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    Calibration(Calibration),
    Grid { cells: Vec<f32> },
    MaskDepth { mask: Vec<f32>, depth_mm: Vec<u16> },
}

/// A [`PerceptionDevice`] backed by a recorded NDJSON stream.
pub struct ReplayDevice<R: BufRead + Send> {
    id: String,
    reader: R,
    line: usize,
    frame_period: Option<Duration>,
    frames_read: u64,
}

impl<R: BufRead + Send> ReplayDevice<R> {
    pub fn new(id: impl Into<String>, reader: R) -> Self {
        Self {
            id: id.into(),
            reader,
            line: 0,
            frame_period: None,
            frames_read: 0,
        }
    }

    /// Sleep `period` between frames to reproduce the recorded cadence.
    pub fn with_frame_period(mut self, period: Duration) -> Self {
        self.frame_period = Some(period);
        self
    }

    /// Read the next non-blank record, or `None` at end of stream.
    fn next_record(&mut self) -> Result<Option<ReplayRecord>, GridError> {
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = self
                .reader
                .read_line(&mut buf)
                .map_err(|e| GridError::Frame(format!("{}: read failed: {e}", self.id)))?;
            if n == 0 {
                return Ok(None);
            }
            self.line += 1;
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed).map(Some).map_err(|e| {
                GridError::Frame(format!("{} line {}: {e}", self.id, self.line))
            });
        }
    }
}

impl ReplayDevice<BufReader<File>> {
    /// Open a replay file.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Config`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GridError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| GridError::Config(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self::new(
            format!("replay:{}", path.display()),
            BufReader::new(file),
        ))
    }
}

impl ReplayDevice<BufReader<Stdin>> {
    /// Replay from standard input.
    pub fn stdin() -> Self {
        Self::new("replay:stdin", BufReader::new(std::io::stdin()))
    }
}

impl<R: BufRead + Send> PerceptionDevice for ReplayDevice<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn calibration(&mut self) -> Result<Calibration, GridError> {
        match self.next_record() {
            Ok(Some(ReplayRecord::Calibration(cal))) => Ok(cal),
            Ok(Some(_)) => Err(GridError::Calibration(format!(
                "{}: first record is not a calibration record",
                self.id
            ))),
            Ok(None) => Err(GridError::Calibration(format!(
                "{}: stream is empty",
                self.id
            ))),
            Err(e) => Err(GridError::Calibration(e.to_string())),
        }
    }

    fn next_frame(&mut self) -> Result<Option<PerceptionFrame>, GridError> {
        let record = match self.next_record()? {
            Some(r) => r,
            None => {
                debug!(device = %self.id, frames = self.frames_read, "replay finished");
                return Ok(None);
            }
        };
        if let Some(period) = self.frame_period
            && self.frames_read > 0
        {
            std::thread::sleep(period);
        }
        self.frames_read += 1;
        match record {
            ReplayRecord::Grid { cells } => Ok(Some(PerceptionFrame::Grid(cells))),
            ReplayRecord::MaskDepth { mask, depth_mm } => {
                Ok(Some(PerceptionFrame::MaskDepth { mask, depth_mm }))
            }
            ReplayRecord::Calibration(_) => Err(GridError::Frame(format!(
                "{} line {}: unexpected calibration record",
                self.id, self.line
            ))),
        }
    }
}
