//! Batch accounting that decides when the store checkpoints.
//!
//! ```text
//! Open ──stage──▶ Accumulating ──batch_size──▶ (batch complete)
//!   ▲                                              │
//!   │                          num_sync_batches reached
//!   │                                              ▼
//!   └──────────── finish_flush ◀────────────── Flushing
//!
//! any state ──close──▶ Closed
//! ```

use crate::error::{CoreError, CoreResult};

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Nothing staged since the last completed batch.
    Open,
    /// Updates are staged in the current batch.
    Accumulating,
    /// A checkpoint is being written.
    Flushing,
    /// The store is closed; nothing more may be staged.
    Closed,
}

/// What the store must do after staging an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    /// Keep accumulating.
    None,
    /// A batch completed, but no checkpoint is due yet.
    BatchComplete,
    /// Enough batches completed; the store must checkpoint now.
    Checkpoint,
}

/// Groups updates into batches and batches into checkpoints.
#[derive(Debug)]
pub struct BatchController {
    batch_size: usize,
    num_sync_batches: usize,
    staged: usize,
    complete_batches: usize,
    total_batches: u64,
    state: BatchState,
}

impl BatchController {
    /// Creates a controller. `total_batches` continues the persisted count.
    #[must_use]
    pub fn new(batch_size: usize, num_sync_batches: usize, total_batches: u64) -> Self {
        Self {
            batch_size: batch_size.max(1),
            num_sync_batches: num_sync_batches.max(1),
            staged: 0,
            complete_batches: 0,
            total_batches,
            state: BatchState::Open,
        }
    }

    /// Counts one index update toward the current batch.
    ///
    /// # Errors
    ///
    /// `StoreClosed` after [`BatchController::close`].
    pub fn stage(&mut self) -> CoreResult<BatchAction> {
        if self.state == BatchState::Closed {
            return Err(CoreError::StoreClosed);
        }

        self.staged += 1;
        self.state = BatchState::Accumulating;
        if self.staged < self.batch_size {
            return Ok(BatchAction::None);
        }

        self.staged = 0;
        self.complete_batches += 1;
        self.total_batches += 1;
        self.state = BatchState::Open;

        if self.complete_batches >= self.num_sync_batches {
            Ok(BatchAction::Checkpoint)
        } else {
            Ok(BatchAction::BatchComplete)
        }
    }

    /// Enters `Flushing`.
    pub fn begin_flush(&mut self) -> CoreResult<()> {
        if self.state == BatchState::Closed {
            return Err(CoreError::StoreClosed);
        }
        self.state = BatchState::Flushing;
        Ok(())
    }

    /// Leaves `Flushing` after a durable checkpoint; every staged update is
    /// now covered.
    pub fn finish_flush(&mut self) {
        self.staged = 0;
        self.complete_batches = 0;
        if self.state == BatchState::Flushing {
            self.state = BatchState::Open;
        }
    }

    /// Leaves `Flushing` after a failed checkpoint, keeping the counters so
    /// the next trigger retries.
    pub fn abort_flush(&mut self) {
        if self.state == BatchState::Flushing {
            self.state = if self.staged == 0 {
                BatchState::Open
            } else {
                BatchState::Accumulating
            };
        }
    }

    /// Drops staged updates and batch counters, for a full clear.
    pub fn reset(&mut self) {
        self.staged = 0;
        self.complete_batches = 0;
        if self.state != BatchState::Closed {
            self.state = BatchState::Open;
        }
    }

    /// Enters `Closed`.
    pub fn close(&mut self) {
        self.state = BatchState::Closed;
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Updates staged in the current, incomplete batch.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged
    }

    /// Complete batches since the last checkpoint.
    #[must_use]
    pub fn complete_batches(&self) -> usize {
        self.complete_batches
    }

    /// Complete batches over the life of the store.
    #[must_use]
    pub fn total_batches(&self) -> u64 {
        self.total_batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_after_configured_batches() {
        let mut ctl = BatchController::new(2, 3, 0);
        let mut actions = Vec::new();
        for _ in 0..6 {
            actions.push(ctl.stage().unwrap());
        }
        assert_eq!(
            actions,
            vec![
                BatchAction::None,
                BatchAction::BatchComplete,
                BatchAction::None,
                BatchAction::BatchComplete,
                BatchAction::None,
                BatchAction::Checkpoint,
            ]
        );
        assert_eq!(ctl.total_batches(), 3);
    }

    #[test]
    fn flush_resets_counters() {
        let mut ctl = BatchController::new(1, 1, 5);
        assert_eq!(ctl.stage().unwrap(), BatchAction::Checkpoint);

        ctl.begin_flush().unwrap();
        assert_eq!(ctl.state(), BatchState::Flushing);
        ctl.finish_flush();

        assert_eq!(ctl.state(), BatchState::Open);
        assert_eq!(ctl.complete_batches(), 0);
        assert_eq!(ctl.total_batches(), 6);
    }

    #[test]
    fn failed_flush_retries_on_next_batch() {
        let mut ctl = BatchController::new(1, 1, 0);
        ctl.stage().unwrap();
        ctl.begin_flush().unwrap();
        ctl.abort_flush();

        assert_eq!(ctl.complete_batches(), 1);
        assert_eq!(ctl.stage().unwrap(), BatchAction::Checkpoint);
    }

    #[test]
    fn accumulating_until_batch_completes() {
        let mut ctl = BatchController::new(10, 1, 0);
        ctl.stage().unwrap();
        assert_eq!(ctl.state(), BatchState::Accumulating);
        assert_eq!(ctl.staged_len(), 1);

        ctl.reset();
        assert_eq!(ctl.state(), BatchState::Open);
        assert_eq!(ctl.staged_len(), 0);
    }

    #[test]
    fn staging_only_counts_updates() {
        let mut ctl = BatchController::new(100_000, 1, 0);
        for _ in 0..50_000 {
            assert_eq!(ctl.stage().unwrap(), BatchAction::None);
        }
        assert_eq!(ctl.staged_len(), 50_000);

        ctl.begin_flush().unwrap();
        ctl.abort_flush();
        assert_eq!(ctl.state(), BatchState::Accumulating);
        assert_eq!(ctl.staged_len(), 50_000);
    }

    #[test]
    fn closed_rejects_updates() {
        let mut ctl = BatchController::new(10, 1, 0);
        ctl.close();
        assert!(matches!(
            ctl.stage(),
            Err(CoreError::StoreClosed)
        ));
        assert!(ctl.begin_flush().is_err());
    }
}
