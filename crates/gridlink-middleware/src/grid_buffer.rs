//! Single-slot mailbox between the perception producer and the telemetry
//! consumer.
//!
//! Built on a [`tokio::sync::watch`] channel: the slot holds at most one
//! [`Grid`] behind an [`Arc`], so a publish is a pointer swap and a take is a
//! reference-count bump.  A reader can never observe a half-written grid.
//!
//! # Semantics
//!
//! | Operation | Behaviour |
//! |---|---|
//! | [`GridBuffer::publish`] | Replaces whatever is in the slot (drop-old). Never blocks. |
//! | [`GridBuffer::take_or_wait`] | Returns the current grid, or waits up to a timeout for one. Does not clear the slot. |
//! | [`GridBuffer::invalidate`] | Clears the slot, including any grid published since the last take. |
//!
//! # Example
//!
//! ```rust
//! use gridlink_middleware::GridBuffer;
//! use gridlink_types::{Grid, GridShape};
//!
//! let buffer = GridBuffer::new(GridShape::new(2, 2));
//! buffer.publish(Grid::empty(GridShape::new(2, 2))).unwrap();
//!
//! assert_eq!(buffer.peek().unwrap().generation, 1);
//! buffer.invalidate();
//! assert!(buffer.is_empty());
//! ```

use std::sync::Arc;
use std::time::Duration;

use gridlink_types::{Grid, GridError, GridShape};
use tokio::sync::watch;
use tracing::trace;

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u64,
    grid: Option<Arc<Grid>>,
}

/// A grid handed out by [`GridBuffer::take_or_wait`].
#[derive(Debug, Clone)]
pub struct TakenGrid {
    /// Monotonic publish counter of the grid.
    pub generation: u64,
    pub grid: Arc<Grid>,
}

/// Shared single-slot grid buffer.  Wrap in an [`Arc`] to share.
#[derive(Debug)]
pub struct GridBuffer {
    shape: GridShape,
    tx: watch::Sender<Slot>,
}

impl GridBuffer {
    /// Create an empty buffer accepting grids of `shape`.
    pub fn new(shape: GridShape) -> Self {
        let (tx, _) = watch::channel(Slot::default());
        Self { shape, tx }
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    /// Overwrite the slot with `grid` and wake any waiting reader.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Frame`] if `grid` does not have the configured
    /// shape; the slot is left untouched.
    pub fn publish(&self, grid: Grid) -> Result<(), GridError> {
        if grid.shape() != self.shape {
            return Err(GridError::Frame(format!(
                "grid shape {}x{} does not match buffer shape {}x{}",
                grid.shape().rows,
                grid.shape().cols,
                self.shape.rows,
                self.shape.cols
            )));
        }
        let grid = Arc::new(grid);
        self.tx.send_modify(|slot| {
            if slot.grid.is_some() {
                trace!(generation = slot.generation, "dropping unconsumed grid");
            }
            slot.generation += 1;
            slot.grid = Some(grid);
        });
        Ok(())
    }

    /// Return the current grid, waiting up to `timeout` for one to be
    /// published if the slot is empty.
    ///
    /// Returns `None` on timeout so the caller can re-check its shutdown flag.
    pub async fn take_or_wait(&self, timeout: Duration) -> Option<TakenGrid> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(taken) = current(&mut rx) {
                return Some(taken);
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                // Timed out, or the sender is gone (cannot happen while
                // `self` is alive).
                _ => return None,
            }
        }
    }

    /// Return a copy of the current grid without waiting.
    pub fn peek(&self) -> Option<TakenGrid> {
        let slot = self.tx.borrow();
        slot.grid.clone().map(|grid| TakenGrid {
            generation: slot.generation,
            grid,
        })
    }

    /// Clear the slot.  The next [`take_or_wait`][Self::take_or_wait] only
    /// returns a grid published after this call.
    pub fn invalidate(&self) {
        self.tx.send_if_modified(|slot| slot.grid.take().is_some());
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().grid.is_none()
    }

    /// Number of grids published so far.
    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }
}

fn current(rx: &mut watch::Receiver<Slot>) -> Option<TakenGrid> {
    let slot = rx.borrow_and_update();
    slot.grid.clone().map(|grid| TakenGrid {
        generation: slot.generation,
        grid,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gridlink_types::GridCell;

    fn uniform(shape: GridShape, depth: f32) -> Grid {
        Grid::new(
            shape,
            vec![
                GridCell {
                    label: true,
                    depth_m: depth
                };
                shape.cell_count()
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn publish_then_take_returns_grid() {
        let shape = GridShape::new(2, 3);
        let buffer = GridBuffer::new(shape);
        assert!(buffer.is_empty());

        buffer.publish(uniform(shape, 1.5)).unwrap();
        let taken = buffer
            .take_or_wait(Duration::from_millis(10))
            .await
            .expect("grid must be available");
        assert_eq!(taken.generation, 1);
        assert_eq!(taken.grid.cell(1, 2).unwrap().depth_m, 1.5);
        assert!(!buffer.is_empty(), "take does not clear the slot");
    }

    #[tokio::test]
    async fn publish_overwrites_unconsumed_grid() {
        let shape = GridShape::new(1, 1);
        let buffer = GridBuffer::new(shape);
        buffer.publish(uniform(shape, 1.0)).unwrap();
        buffer.publish(uniform(shape, 2.0)).unwrap();

        let taken = buffer.peek().unwrap();
        assert_eq!(taken.generation, 2);
        assert_eq!(taken.grid.cells()[0].depth_m, 2.0);
    }

    #[test]
    fn wrong_shape_is_rejected_and_slot_untouched() {
        let buffer = GridBuffer::new(GridShape::new(2, 2));
        let err = buffer.publish(Grid::empty(GridShape::new(3, 2))).unwrap_err();
        assert!(matches!(err, GridError::Frame(_)));
        assert!(buffer.is_empty());
        assert_eq!(buffer.generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_drops_grid_published_after_take() {
        let shape = GridShape::new(1, 1);
        let buffer = GridBuffer::new(shape);
        buffer.publish(uniform(shape, 1.0)).unwrap();
        let taken = buffer.take_or_wait(Duration::from_millis(10)).await.unwrap();
        assert_eq!(taken.generation, 1);

        // A grid lands while the first one is still in use.
        buffer.publish(uniform(shape, 2.0)).unwrap();
        buffer.invalidate();
        assert!(buffer.take_or_wait(Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn take_or_wait_times_out_on_empty_slot() {
        let buffer = GridBuffer::new(GridShape::new(1, 1));
        let started = tokio::time::Instant::now();
        assert!(buffer.take_or_wait(Duration::from_millis(100)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn waiting_reader_is_woken_by_publish() {
        let shape = GridShape::new(1, 1);
        let buffer = Arc::new(GridBuffer::new(shape));

        let reader = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.take_or_wait(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        buffer.publish(uniform(shape, 3.0)).unwrap();

        let taken = reader.await.unwrap().expect("reader must be woken");
        assert_eq!(taken.grid.cells()[0].depth_m, 3.0);
    }

    #[test]
    fn invalidate_clears_slot() {
        let shape = GridShape::new(1, 1);
        let buffer = GridBuffer::new(shape);
        buffer.publish(uniform(shape, 1.0)).unwrap();
        buffer.invalidate();
        assert!(buffer.is_empty());
        assert!(buffer.peek().is_none());
        assert_eq!(buffer.generation(), 1);
        // Clearing an empty slot is a no-op.
        buffer.invalidate();
        assert!(buffer.is_empty());
    }

    /// Concurrent publishers each write grids of one uniform depth; readers
    /// must only ever see uniform grids.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_access_never_yields_torn_grid() {
        let shape = GridShape::new(10, 10);
        let buffer = Arc::new(GridBuffer::new(shape));

        let mut publishers = Vec::new();
        for p in 0..4u32 {
            let buffer = Arc::clone(&buffer);
            publishers.push(tokio::spawn(async move {
                for _ in 0..500 {
                    buffer.publish(uniform(shape, p as f32 + 1.0)).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }

        let mut readers = Vec::new();
        for _ in 0..4 {
            let buffer = Arc::clone(&buffer);
            readers.push(tokio::spawn(async move {
                let mut seen = 0usize;
                for _ in 0..500 {
                    if let Some(taken) = buffer.take_or_wait(Duration::from_millis(5)).await {
                        let first = taken.grid.cells()[0].depth_m;
                        assert!(taken.grid.cells().iter().all(|c| c.depth_m == first));
                        assert_eq!(taken.grid.shape(), shape);
                        buffer.invalidate();
                        seen += 1;
                    }
                }
                seen
            }));
        }

        for p in publishers {
            p.await.unwrap();
        }
        let mut total = 0;
        for r in readers {
            total += r.await.unwrap();
        }
        assert!(total > 0);
    }
}
