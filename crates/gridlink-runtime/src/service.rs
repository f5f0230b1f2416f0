//! [`ObstacleService`] – the context object that owns everything the
//! pipeline shares: the grid buffer, the link writer, the projection
//! coefficients and the shutdown flag.
//!
//! # Startup order
//!
//! 1. [`ObstacleService::new`] validates the configuration and resolves the
//!    projection from the config overrides or the device calibration.
//! 2. [`ObstacleService::start`] spawns the heartbeat and dispatcher tasks.
//! 3. [`ObstacleService::ingest`] (called before `start`) builds the
//!    perception loop, which the caller runs on its own thread.
//!
//! Shutdown is cooperative: raise the flag, then
//! [`RunningService::shutdown`] joins each task with a bounded wait.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use gridlink_hal::{Calibration, PerceptionDevice};
use gridlink_middleware::{GridBuffer, MavIdentity, MavlinkWriter, TelemetryLink};
use gridlink_perception::{GridLayout, HostClassifier, Intrinsics, ProjectionCoefficients};
use gridlink_types::{GridError, GridlinkConfig, ProjectionConfig};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dispatcher::ObstacleDispatcher;
use crate::heartbeat::{EmitterState, HeartbeatEmitter, load_state};
use crate::ingest::PerceptionIngest;

/// Build the projection coefficients.
///
/// With `use_intrinsic` the config's `intrinsic_matrix` wins over the
/// device's; otherwise the config's `hfov` wins over the device's.
///
/// # Errors
///
/// Returns [`GridError::Calibration`] when neither source provides the value
/// the selected mode needs, or the matrix is unusable.
pub fn resolve_projection(
    layout: &GridLayout,
    projection: &ProjectionConfig,
    calibration: &Calibration,
) -> Result<ProjectionCoefficients, GridError> {
    if projection.use_intrinsic {
        let matrix = projection
            .intrinsic_matrix
            .or(calibration.intrinsic_matrix)
            .ok_or_else(|| {
                GridError::Calibration(
                    "use_intrinsic is set but no intrinsic matrix is available".to_string(),
                )
            })?;
        let k = Intrinsics::from_matrix(matrix)?;
        info!(fx = k.fx, fy = k.fy, cx = k.cx, cy = k.cy, "projection from intrinsics");
        Ok(ProjectionCoefficients::from_intrinsics(layout, &k))
    } else {
        let hfov = projection.hfov.or(calibration.hfov_deg).ok_or_else(|| {
            GridError::Calibration("no horizontal field of view is available".to_string())
        })?;
        info!(hfov_deg = hfov, "projection from horizontal FOV");
        ProjectionCoefficients::from_hfov(layout, hfov)
    }
}

pub struct ObstacleService {
    config: GridlinkConfig,
    layout: GridLayout,
    coefficients: Arc<ProjectionCoefficients>,
    buffer: Arc<GridBuffer>,
    writer: Arc<MavlinkWriter>,
    shutdown: Arc<AtomicBool>,
}

impl ObstacleService {
    /// # Errors
    ///
    /// [`GridError::Config`] for an invalid configuration and
    /// [`GridError::Calibration`] when the projection cannot be resolved.
    pub fn new(
        config: GridlinkConfig,
        calibration: &Calibration,
        link: Arc<dyn TelemetryLink>,
    ) -> Result<Self, GridError> {
        config.validate()?;
        let layout = GridLayout::from_config(&config.grid)?;
        let coefficients = Arc::new(resolve_projection(&layout, &config.projection, calibration)?);
        let identity = MavIdentity {
            system_id: config.link.system_id,
            component_id: config.link.component_id,
        };
        let writer = Arc::new(MavlinkWriter::new(link, identity));
        Ok(Self {
            buffer: Arc::new(GridBuffer::new(layout.shape())),
            config,
            layout,
            coefficients,
            writer,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn buffer(&self) -> Arc<GridBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Build the perception loop feeding this service's buffer.
    pub fn ingest(&self, device: Box<dyn PerceptionDevice>) -> Result<PerceptionIngest, GridError> {
        let classifier = HostClassifier::from_config(self.layout, &self.config.classifier)?;
        Ok(PerceptionIngest::new(
            device,
            classifier,
            self.buffer(),
            self.shutdown_flag(),
        ))
    }

    /// Spawn the heartbeat and dispatcher tasks on the current runtime.
    pub fn start(self) -> Result<RunningService, GridError> {
        let dispatch = &self.config.dispatch;
        let dispatcher = ObstacleDispatcher::new(
            dispatch,
            dispatch.frame_mode,
            Arc::clone(&self.coefficients),
            Arc::clone(&self.buffer),
            Arc::clone(&self.writer),
        )?;

        let heartbeat = HeartbeatEmitter::new(Arc::clone(&self.writer), self.shutdown_flag()).spawn();
        let heartbeat_state = heartbeat.state_cell();
        let dispatcher = tokio::spawn(dispatcher.run(self.shutdown_flag()));

        info!(
            link = self.writer.link_name(),
            rows = self.layout.shape().rows,
            cols = self.layout.shape().cols,
            rate_hz = dispatch.message_rate_max,
            "obstacle service started"
        );
        Ok(RunningService {
            buffer: self.buffer,
            shutdown: self.shutdown,
            heartbeat_state,
            heartbeat: heartbeat.into_task(),
            dispatcher,
        })
    }
}

/// Handles to the tasks of a started [`ObstacleService`].
pub struct RunningService {
    buffer: Arc<GridBuffer>,
    shutdown: Arc<AtomicBool>,
    heartbeat_state: Arc<AtomicU8>,
    heartbeat: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl RunningService {
    pub fn buffer(&self) -> Arc<GridBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn heartbeat_state(&self) -> EmitterState {
        load_state(&self.heartbeat_state)
    }

    /// Raise the shutdown flag and wait up to `grace` for each task.
    ///
    /// Tasks still running after `grace` are aborted.  Returns `true` when
    /// every task stopped on its own.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.shutdown.store(true, Ordering::SeqCst);
        let heartbeat = join_or_abort("heartbeat", self.heartbeat, grace).await;
        let dispatcher = join_or_abort("dispatcher", self.dispatcher, grace).await;
        heartbeat && dispatcher
    }
}

async fn join_or_abort(task: &str, mut handle: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(task, error = %e, "task ended abnormally");
            false
        }
        Err(_) => {
            warn!(task, grace_ms = grace.as_millis() as u64, "task did not stop in time; aborting");
            handle.abort();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlink_middleware::RecordingLink;
    use gridlink_types::{Grid, GridCell, GridShape};

    fn calibration() -> Calibration {
        Calibration {
            lens_position: 0,
            intrinsic_matrix: Some([
                [492.24, 0.0, 320.58],
                [0.0, 492.24, 181.68],
                [0.0, 0.0, 1.0],
            ]),
            hfov_deg: Some(69.0),
        }
    }

    fn full_grid(shape: GridShape) -> Grid {
        Grid::new(shape, vec![GridCell::obstacle(3.0); shape.cell_count()]).unwrap()
    }

    #[test]
    fn projection_prefers_config_overrides() {
        let layout = GridLayout::new(640, 360, 10, 10).unwrap();
        let from_device =
            resolve_projection(&layout, &ProjectionConfig::default(), &calibration()).unwrap();

        let overridden = ProjectionConfig {
            use_intrinsic: true,
            intrinsic_matrix: Some([[600.0, 0.0, 320.0], [0.0, 600.0, 180.0], [0.0, 0.0, 1.0]]),
            hfov: None,
        };
        let from_config = resolve_projection(&layout, &overridden, &calibration()).unwrap();
        assert_ne!(from_device, from_config);

        let hfov = ProjectionConfig {
            use_intrinsic: false,
            intrinsic_matrix: None,
            hfov: Some(90.0),
        };
        let expected = ProjectionCoefficients::from_hfov(&layout, 90.0).unwrap();
        assert_eq!(resolve_projection(&layout, &hfov, &calibration()).unwrap(), expected);
    }

    #[test]
    fn missing_calibration_is_fatal() {
        let layout = GridLayout::new(640, 360, 10, 10).unwrap();
        let empty = Calibration {
            lens_position: 0,
            intrinsic_matrix: None,
            hfov_deg: None,
        };
        let intrinsic = ProjectionConfig::default();
        assert!(matches!(
            resolve_projection(&layout, &intrinsic, &empty),
            Err(GridError::Calibration(_))
        ));
        let fov = ProjectionConfig {
            use_intrinsic: false,
            ..ProjectionConfig::default()
        };
        assert!(matches!(
            resolve_projection(&layout, &fov, &empty),
            Err(GridError::Calibration(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected_before_start() {
        let mut config = GridlinkConfig::default();
        config.grid.grid_num_w = 7;
        let result = ObstacleService::new(config, &calibration(), Arc::new(RecordingLink::new()));
        assert!(matches!(result, Err(GridError::Config(_))));
    }

    /// Five seconds of saturated obstacle traffic must not disturb the 1 Hz
    /// heartbeat.
    #[tokio::test(start_paused = true)]
    async fn heartbeat_cadence_is_independent_of_dispatch_load() {
        let link = Arc::new(RecordingLink::new());
        let service =
            ObstacleService::new(GridlinkConfig::default(), &calibration(), link.clone()).unwrap();
        let running = service.start().unwrap();
        assert_eq!(running.heartbeat_state(), EmitterState::Running);

        let buffer = running.buffer();
        let shape = buffer.shape();
        let publisher = tokio::spawn(async move {
            for _ in 0..100 {
                buffer.publish(full_grid(shape)).unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        let heartbeats = link.heartbeats().len();
        assert!((4..=6).contains(&heartbeats), "got {heartbeats} heartbeats");

        // The rate ceiling (30 Hz) was saturated the whole time.
        let obstacles = link.obstacles();
        assert!(obstacles.len() >= 140, "got {} obstacle messages", obstacles.len());
        for pair in obstacles.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_secs_f64(1.0 / 30.0));
        }

        publisher.abort();
        // A sweep in progress runs to completion (100 cells at 34 ms each).
        assert!(running.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_outliving_grace_is_aborted() {
        let link = Arc::new(RecordingLink::new());
        let mut config = GridlinkConfig::default();
        config.dispatch.message_rate_max = 1.0;
        let service = ObstacleService::new(config, &calibration(), link.clone()).unwrap();
        let running = service.start().unwrap();

        // 100 obstacle cells at 1 Hz: a sweep of about 100 s.
        let buffer = running.buffer();
        buffer.publish(full_grid(buffer.shape())).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(link.obstacles().len() >= 2);

        let state = Arc::clone(&running.heartbeat_state);
        let requested = tokio::time::Instant::now();
        assert!(!running.shutdown(Duration::from_secs(1)).await);
        assert!(requested.elapsed() <= Duration::from_secs(2));
        assert_eq!(load_state(&state), EmitterState::Stopped);

        let sent = link.obstacles().len();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(link.obstacles().len(), sent, "aborted dispatcher sends nothing more");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_tasks_and_reports_stopped_state() {
        let link = Arc::new(RecordingLink::new());
        let service =
            ObstacleService::new(GridlinkConfig::default(), &calibration(), link.clone()).unwrap();
        let running = service.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = Arc::clone(&running.heartbeat_state);
        assert!(running.shutdown(Duration::from_secs(2)).await);
        assert_eq!(load_state(&state), EmitterState::Stopped);
    }
}
