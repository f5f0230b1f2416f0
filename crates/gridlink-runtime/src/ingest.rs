//! Perception ingest loop.
//!
//! Pulls frames from a blocking [`PerceptionDevice`] on a dedicated OS
//! thread, turns each one into a [`Grid`] and publishes it to the shared
//! [`GridBuffer`].  Raw mask + depth frames go through the
//! [`HostClassifier`] first.
//!
//! Malformed frames are dropped with a throttled warning.  Any other device
//! error, or the end of the stream, raises the shared shutdown flag so the
//! rest of the service winds down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use gridlink_hal::{PerceptionDevice, PerceptionFrame};
use gridlink_middleware::GridBuffer;
use gridlink_perception::HostClassifier;
use gridlink_types::{Grid, GridError};
use tracing::{debug, error, info, warn};

use crate::throttle::WarnThrottle;

/// Counters reported when the ingest loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub frames: u64,
    pub published: u64,
    pub classified: u64,
    pub dropped: u64,
}

pub struct PerceptionIngest {
    device: Box<dyn PerceptionDevice>,
    classifier: HostClassifier,
    buffer: Arc<GridBuffer>,
    shutdown: Arc<AtomicBool>,
}

impl PerceptionIngest {
    pub fn new(
        device: Box<dyn PerceptionDevice>,
        classifier: HostClassifier,
        buffer: Arc<GridBuffer>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            device,
            classifier,
            buffer,
            shutdown,
        }
    }

    /// Run [`run`][Self::run] on a named OS thread.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Config`] if the thread cannot be spawned.
    pub fn spawn(self) -> Result<JoinHandle<IngestStats>, GridError> {
        std::thread::Builder::new()
            .name("gridlink-ingest".to_string())
            .spawn(move || self.run())
            .map_err(|e| GridError::Config(format!("cannot spawn ingest thread: {e}")))
    }

    fn to_grid(&self, frame: PerceptionFrame, stats: &mut IngestStats) -> Result<Grid, GridError> {
        match frame {
            PerceptionFrame::Grid(flat) => Grid::from_flat(self.buffer.shape(), &flat),
            PerceptionFrame::MaskDepth { mask, depth_mm } => {
                let grid = self.classifier.classify(&mask, &depth_mm)?;
                stats.classified += 1;
                Ok(grid)
            }
        }
    }

    /// Blocking loop; returns when the stream ends, the device fails or the
    /// shutdown flag is raised.
    pub fn run(mut self) -> IngestStats {
        let mut stats = IngestStats::default();
        let throttle = WarnThrottle::per_second();
        let device_id = self.device.id().to_string();
        info!(device = %device_id, "perception ingest started");

        while !self.shutdown.load(Ordering::SeqCst) {
            let frame = match self.device.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!(device = %device_id, "perception stream ended");
                    self.shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                Err(GridError::Frame(details)) => {
                    stats.dropped += 1;
                    if let Some(suppressed) = throttle.allow() {
                        warn!(device = %device_id, %details, suppressed, "dropping malformed frame");
                    }
                    continue;
                }
                Err(e) => {
                    error!(device = %device_id, error = %e, "perception device failed");
                    self.shutdown.store(true, Ordering::SeqCst);
                    break;
                }
            };
            stats.frames += 1;

            let published = self
                .to_grid(frame, &mut stats)
                .and_then(|grid| {
                    let obstacles = grid.obstacle_count();
                    self.buffer.publish(grid).map(|()| obstacles)
                });
            match published {
                Ok(obstacles) => {
                    stats.published += 1;
                    debug!(frame = stats.frames, obstacles, "grid published");
                }
                Err(e) => {
                    stats.dropped += 1;
                    if let Some(suppressed) = throttle.allow() {
                        warn!(device = %device_id, error = %e, suppressed, "dropping frame");
                    }
                }
            }
        }

        info!(
            frames = stats.frames,
            published = stats.published,
            dropped = stats.dropped,
            "perception ingest stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlink_hal::{Calibration, ReplayDevice, SimDevice};
    use gridlink_perception::GridLayout;
    use gridlink_types::{GridConfig, GridThreshold};
    use std::io::Cursor;

    fn small_config() -> GridConfig {
        GridConfig {
            image_width: 4,
            image_height: 2,
            grid_num_w: 2,
            grid_num_h: 1,
        }
    }

    fn ingest(device: Box<dyn PerceptionDevice>) -> (PerceptionIngest, Arc<GridBuffer>, Arc<AtomicBool>) {
        let layout = GridLayout::from_config(&small_config()).unwrap();
        let classifier = HostClassifier::new(layout, 0.5, GridThreshold::Count(0)).unwrap();
        let buffer = Arc::new(GridBuffer::new(layout.shape()));
        let shutdown = Arc::new(AtomicBool::new(false));
        (
            PerceptionIngest::new(device, classifier, buffer.clone(), shutdown.clone()),
            buffer,
            shutdown,
        )
    }

    fn replay(lines: &[&str]) -> Box<dyn PerceptionDevice> {
        let mut dev = ReplayDevice::new("test", Cursor::new(lines.join("\n").into_bytes()));
        let _: Calibration = dev.calibration().unwrap();
        Box::new(dev)
    }

    #[test]
    fn grid_and_mask_frames_are_published_until_stream_ends() {
        let device = replay(&[
            r#"{"type":"calibration","hfov_deg":69.0}"#,
            r#"{"type":"grid","cells":[1.0,2.0,0.0,0.0]}"#,
            r#"{"type":"mask_depth","mask":[0,0,1,1,0,0,1,1],"depth_mm":[0,0,3000,3000,0,0,3000,3000]}"#,
        ]);
        let (ingest, buffer, shutdown) = ingest(device);
        let stats = ingest.run();

        assert_eq!(stats.frames, 2);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.classified, 1);
        assert!(shutdown.load(Ordering::SeqCst), "end of stream raises the flag");

        // The mask frame was the last one: right block occupied at 3 m.
        let latest = buffer.peek().unwrap();
        assert_eq!(latest.generation, 2);
        assert!(!latest.grid.cell(0, 0).unwrap().label);
        assert!(latest.grid.cell(0, 1).unwrap().label);
        assert!((latest.grid.cell(0, 1).unwrap().depth_m - 3.0).abs() < 1e-6);
    }

    #[test]
    fn malformed_and_wrong_sized_frames_are_dropped() {
        let device = replay(&[
            r#"{"type":"calibration"}"#,
            "garbage",
            r#"{"type":"grid","cells":[1.0,2.0]}"#,
            r#"{"type":"grid","cells":[0.0,0.0,1.0,5.0]}"#,
        ]);
        let (ingest, buffer, _) = ingest(device);
        let stats = ingest.run();

        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.published, 1);
        assert!(buffer.peek().unwrap().grid.cell(0, 1).unwrap().label);
    }

    #[test]
    fn raised_flag_stops_before_reading() {
        let device = Box::new(SimDevice::new(&small_config(), 1000.0));
        let (ingest, buffer, shutdown) = ingest(device);
        shutdown.store(true, Ordering::SeqCst);
        let stats = ingest.run();
        assert_eq!(stats, IngestStats::default());
        assert!(buffer.is_empty());
    }

    #[test]
    fn spawned_thread_drains_sim_device() {
        let device = Box::new(SimDevice::new(&small_config(), 1000.0).with_frame_limit(3));
        let (ingest, buffer, shutdown) = ingest(device);
        let stats = ingest.spawn().unwrap().join().unwrap();
        assert_eq!(stats.published, 3);
        assert_eq!(buffer.generation(), 3);
        assert!(shutdown.load(Ordering::SeqCst));
    }
}
