//! Rendezvous primitives shared by the execution units of one role within a run.
//!
//! - [`SharedAggregate`] collects one value per party index.
//! - [`SyncBarrier`] gates a phase transition and lets exactly one elected participant run a
//!   hook while all others wait.
//! - [`PairBarrier`] singles out two participants per cycle, following a fixed round-robin
//!   schedule that visits every unordered pair exactly once.
//!
//! The barriers are the only source of ordering between execution units: every write made
//! before arriving at a barrier is visible to the elected hook, and the hook's effects are
//! visible to every participant once it is released.

use std::time::Duration;

use tokio::{sync::watch, time::timeout};

mod aggregate;
mod barrier;
mod pair;

pub use aggregate::{AggregateError, SharedAggregate};
pub use barrier::SyncBarrier;
pub use pair::{PairBarrier, PairRole, Paired, round_robin};

/// Errors raised while waiting at a barrier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarrierError {
    /// Not all participants arrived before the timeout elapsed.
    #[error("barrier '{barrier}' timed out after {waited:?}")]
    Timeout {
        /// The name of the barrier.
        barrier: &'static str,
        /// How long the participant waited.
        waited: Duration,
    },
    /// More participants arrived in a single round than the barrier admits.
    #[error("barrier '{barrier}' admits only {threshold} participants per round")]
    Overfull {
        /// The name of the barrier.
        barrier: &'static str,
        /// The number of participants per round.
        threshold: usize,
    },
    /// A second participant claimed to be elected in the same round.
    #[error("barrier '{barrier}' already has an elected participant in this round")]
    ElectedTwice {
        /// The name of the barrier.
        barrier: &'static str,
    },
    /// The party has no remaining turn in the pairing schedule.
    #[error("party {party} has no remaining turn at pair barrier '{barrier}'")]
    ScheduleExhausted {
        /// The name of the barrier.
        barrier: &'static str,
        /// The party that asked for another turn.
        party: usize,
    },
    /// The barrier state was dropped while a participant was waiting.
    #[error("barrier '{barrier}' was closed")]
    Closed {
        /// The name of the barrier.
        barrier: &'static str,
    },
}

/// Waits until `done` holds for the current barrier state, bounded by `limit`.
async fn wait_until<S>(
    barrier: &'static str,
    rx: &mut watch::Receiver<S>,
    limit: Option<Duration>,
    mut done: impl FnMut(&S) -> bool,
) -> Result<(), BarrierError> {
    let wait = async {
        loop {
            let ready = done(&*rx.borrow_and_update());
            if ready {
                return Ok(());
            }
            rx.changed()
                .await
                .map_err(|_| BarrierError::Closed { barrier })?;
        }
    };
    match limit {
        Some(waited) => timeout(waited, wait)
            .await
            .map_err(|_| BarrierError::Timeout { barrier, waited })?,
        None => wait.await,
    }
}
