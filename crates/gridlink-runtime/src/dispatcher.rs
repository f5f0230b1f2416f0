//! [`ObstacleDispatcher`] – turns the latest grid into a rate-limited burst
//! of `OBSTACLE_DISTANCE_3D` messages.
//!
//! # Sweep
//!
//! Cells are visited in row-major order.  Every obstacle cell is projected
//! with the precomputed coefficients, mapped into the configured frame
//! convention and sent.  Consecutive messages, including those of
//! consecutive sweeps, are at least `1 / message_rate_max` apart.
//!
//! A sweep that finds no obstacle cell sends exactly one sentinel message
//! whose position lies one metre beyond `max_distance`, so the flight
//! controller learns that the view is clear.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gridlink_middleware::{GridBuffer, MavlinkWriter};
use gridlink_perception::ProjectionCoefficients;
use gridlink_types::{DispatchConfig, FrameConvention, Grid, GridError, ObstacleVector};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval};
use tracing::{debug, info, trace, warn};

use crate::throttle::WarnThrottle;

/// Outcome of one [`ObstacleDispatcher::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Cells labelled as obstacles.
    pub obstacles: usize,
    /// Obstacle cells dropped because their depth was not finite.
    pub skipped: usize,
    /// Messages the link accepted.
    pub sent: usize,
    /// Messages the link rejected.
    pub failed: usize,
    /// Whether the "no obstacle" sentinel was sent.
    pub sentinel: bool,
}

/// Round the message interval up to whole milliseconds.  Timers fire on
/// millisecond boundaries, so a fractional period could otherwise yield gaps
/// slightly shorter than the rate ceiling allows.  Never zero.
fn pacing_period(interval: Duration) -> Duration {
    let ms = u64::try_from(interval.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);
    Duration::from_millis(ms.max(1))
}

pub struct ObstacleDispatcher {
    coefficients: Arc<ProjectionCoefficients>,
    buffer: Arc<GridBuffer>,
    writer: Arc<MavlinkWriter>,
    frame: FrameConvention,
    min_distance: f32,
    max_distance: f32,
    message_interval: Duration,
    poll_interval: Duration,
    pacer: Option<Interval>,
    started: Instant,
    throttle: WarnThrottle,
}

impl ObstacleDispatcher {
    /// Build a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Config`] for an invalid rate or distance range,
    /// or when the coefficients and the buffer disagree on the grid shape.
    pub fn new(
        cfg: &DispatchConfig,
        frame: FrameConvention,
        coefficients: Arc<ProjectionCoefficients>,
        buffer: Arc<GridBuffer>,
        writer: Arc<MavlinkWriter>,
    ) -> Result<Self, GridError> {
        cfg.validate()?;
        if coefficients.shape() != buffer.shape() {
            return Err(GridError::Config(format!(
                "projection grid {}x{} does not match buffer grid {}x{}",
                coefficients.shape().rows,
                coefficients.shape().cols,
                buffer.shape().rows,
                buffer.shape().cols
            )));
        }
        Ok(Self {
            coefficients,
            buffer,
            writer,
            frame,
            min_distance: cfg.min_distance,
            max_distance: cfg.max_distance,
            message_interval: pacing_period(cfg.message_interval()?),
            poll_interval: cfg.poll_interval(),
            pacer: None,
            started: Instant::now(),
            throttle: WarnThrottle::per_second(),
        })
    }

    /// Milliseconds since construction, wrapping at `u32::MAX`.
    fn timestamp_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Send one grid's worth of obstacle messages.
    pub async fn sweep(&mut self, grid: &Grid) -> SweepReport {
        let mut report = SweepReport::default();

        for (row, col, cell) in grid.iter() {
            if !cell.label {
                continue;
            }
            report.obstacles += 1;
            if !cell.depth_m.is_finite() {
                trace!(row, col, depth = cell.depth_m, "skipping obstacle with non-finite depth");
                report.skipped += 1;
                continue;
            }
            let Some((x, y, z)) = self.coefficients.project(row, col, cell.depth_m) else {
                report.skipped += 1;
                continue;
            };
            let (x, y, z) = self.frame.apply(x, y, z);
            let obstacle = ObstacleVector {
                timestamp_ms: 0,
                x,
                y,
                z,
                min_range: self.min_distance,
                max_range: self.max_distance,
                frame: self.frame,
            };
            self.emit(obstacle, &mut report).await;
        }

        if report.obstacles == 0 {
            let sentinel =
                ObstacleVector::sentinel(0, self.min_distance, self.max_distance, self.frame);
            self.emit(sentinel, &mut report).await;
            report.sentinel = true;
        }

        debug!(
            obstacles = report.obstacles,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            sentinel = report.sentinel,
            "sweep complete"
        );
        report
    }

    /// Wait for the pacing slot, stamp the time and send.
    async fn emit(&mut self, mut obstacle: ObstacleVector, report: &mut SweepReport) {
        let period = self.message_interval;
        let pacer = self.pacer.get_or_insert_with(|| {
            let mut pacer = interval(period);
            pacer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            pacer
        });
        pacer.tick().await;

        obstacle.timestamp_ms = self.timestamp_ms();
        match self.writer.send_obstacle(&obstacle).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                report.failed += 1;
                if let Some(suppressed) = self.throttle.allow() {
                    warn!(error = %e, suppressed, "obstacle send failed");
                }
            }
        }
    }

    /// Sweep every grid that reaches the buffer until `shutdown` is set.
    ///
    /// The buffer is cleared after each sweep, so the next sweep starts from
    /// a grid published after the previous one finished.  The flag is checked
    /// before each wait and each sweep; a sweep in progress always runs to
    /// completion.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) {
        info!(
            link = self.writer.link_name(),
            frame = %self.frame,
            interval_ms = self.message_interval.as_millis() as u64,
            "obstacle dispatcher started"
        );
        let mut sweeps: u64 = 0;
        while !shutdown.load(Ordering::SeqCst) {
            let Some(taken) = self.buffer.take_or_wait(self.poll_interval).await else {
                continue;
            };
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.sweep(&taken.grid).await;
            // Grids that arrived mid-sweep are stale by now.
            self.buffer.invalidate();
            sweeps += 1;
        }
        info!(sweeps, "obstacle dispatcher stopped");
    }
}
