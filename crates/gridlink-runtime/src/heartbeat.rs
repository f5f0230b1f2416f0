//! [`HeartbeatEmitter`] – fixed-cadence link keep-alive.
//!
//! Runs on its own tokio task and its own clock, so obstacle traffic can
//! never delay or starve the heartbeat.  A failed send is logged and the
//! emitter carries on with the next tick.
//!
//! # Lifecycle
//!
//! ```text
//! Running ──(shutdown flag seen at a tick)──▶ Stopping ──▶ Stopped
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use gridlink_middleware::MavlinkWriter;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::throttle::WarnThrottle;

/// Heartbeat cadence.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EmitterState {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

impl EmitterState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => EmitterState::Running,
            1 => EmitterState::Stopping,
            _ => EmitterState::Stopped,
        }
    }
}

pub struct HeartbeatEmitter {
    writer: Arc<MavlinkWriter>,
    shutdown: Arc<AtomicBool>,
}

impl HeartbeatEmitter {
    pub fn new(writer: Arc<MavlinkWriter>, shutdown: Arc<AtomicBool>) -> Self {
        Self { writer, shutdown }
    }

    /// Start the emitter on the current tokio runtime.
    pub fn spawn(self) -> HeartbeatHandle {
        let state = Arc::new(AtomicU8::new(EmitterState::Running as u8));
        let task = tokio::spawn(self.run(Arc::clone(&state)));
        HeartbeatHandle { state, task }
    }

    async fn run(self, state: Arc<AtomicU8>) {
        let mut ticker = interval(HEARTBEAT_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let throttle = WarnThrottle::per_second();
        let mut sent: u64 = 0;

        info!(link = self.writer.link_name(), period_ms = HEARTBEAT_PERIOD.as_millis() as u64, "heartbeat started");
        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                state.store(EmitterState::Stopping as u8, Ordering::SeqCst);
                break;
            }
            match self.writer.send_heartbeat().await {
                Ok(()) => {
                    sent += 1;
                    debug!(sent, "heartbeat sent");
                }
                Err(e) => {
                    if let Some(suppressed) = throttle.allow() {
                        warn!(error = %e, suppressed, "heartbeat send failed");
                    }
                }
            }
        }
        state.store(EmitterState::Stopped as u8, Ordering::SeqCst);
        info!(sent, "heartbeat stopped");
    }
}

/// Handle to a running [`HeartbeatEmitter`].
pub struct HeartbeatHandle {
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn state(&self) -> EmitterState {
        EmitterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Shared view of the state, for observers that outlive the handle.
    pub fn state_cell(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.state)
    }

    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

/// Read a state published through [`HeartbeatHandle::state_cell`].
pub fn load_state(cell: &AtomicU8) -> EmitterState {
    EmitterState::from_u8(cell.load(Ordering::SeqCst))
}
