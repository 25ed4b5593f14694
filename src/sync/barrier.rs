use std::time::Duration;

use tokio::sync::watch;
use tracing::trace;

use super::{BarrierError, wait_until};

#[derive(Debug, Clone, Copy, Default)]
struct Phase {
    generation: u64,
    arrived: usize,
    elected: bool,
}

/// A reusable rendezvous point for a fixed number of participants.
///
/// Each round admits exactly `threshold` participants. Exactly one of them is elected: once all
/// have arrived it runs the round's hook, then advances the barrier to the next generation,
/// which releases everyone else. No participant leaves a round before the hook has completed,
/// and a participant can only enter round `k + 1` after round `k` was released.
#[derive(Debug)]
pub struct SyncBarrier {
    name: &'static str,
    threshold: usize,
    phase: watch::Sender<Phase>,
    timeout: Option<Duration>,
}

impl SyncBarrier {
    /// Creates a barrier for `threshold` participants per round.
    pub fn new(name: &'static str, threshold: usize) -> Self {
        let (phase, _) = watch::channel(Phase::default());
        Self {
            name,
            threshold,
            phase,
            timeout: None,
        }
    }

    /// Bounds every wait at this barrier by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The number of participants per round.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The number of rounds released so far.
    pub fn generation(&self) -> u64 {
        self.phase.borrow().generation
    }

    /// Arrives at the barrier and waits for the round to be released.
    ///
    /// The elected participant runs `hook` after all `threshold` participants arrived and
    /// returns its result; all other participants return `None` once the hook has completed.
    pub async fn await_all<R>(
        &self,
        elected: bool,
        hook: impl FnOnce() -> R,
    ) -> Result<Option<R>, BarrierError> {
        let mut rx = self.phase.subscribe();
        let mut admission = Err(BarrierError::Overfull {
            barrier: self.name,
            threshold: self.threshold,
        });
        self.phase.send_modify(|p| {
            if p.arrived >= self.threshold {
                return;
            }
            if elected && p.elected {
                admission = Err(BarrierError::ElectedTwice { barrier: self.name });
                return;
            }
            p.arrived += 1;
            p.elected |= elected;
            admission = Ok(p.generation);
        });
        let generation = admission?;
        trace!(barrier = self.name, generation, elected, "arrived");

        let threshold = self.threshold;
        if elected {
            wait_until(self.name, &mut rx, self.timeout, |p| {
                p.generation == generation && p.arrived == threshold
            })
            .await?;
            let result = hook();
            self.phase.send_modify(|p| {
                p.generation += 1;
                p.arrived = 0;
                p.elected = false;
            });
            trace!(barrier = self.name, generation, "released");
            Ok(Some(result))
        } else {
            wait_until(self.name, &mut rx, self.timeout, |p| {
                p.generation > generation
            })
            .await?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use futures::future::try_join_all;

    use super::SyncBarrier;
    use crate::sync::{BarrierError, SharedAggregate};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn hook_observes_all_writes_and_everyone_observes_hook() {
        let n = 5;
        let barrier = Arc::new(SyncBarrier::new("test", n));
        let aggregate = Arc::new(SharedAggregate::new());
        let total = Arc::new(AtomicUsize::new(0));
        let parties = (0..n).map(|i| {
            let (barrier, aggregate, total) = (barrier.clone(), aggregate.clone(), total.clone());
            tokio::spawn(async move {
                aggregate.add(i + 1, i).unwrap();
                let sum = barrier
                    .await_all(i == n - 1, || {
                        let sum: usize = aggregate.data().iter().sum();
                        total.store(sum, Ordering::SeqCst);
                        sum
                    })
                    .await?;
                // the hook has completed before anybody is released
                assert_eq!(total.load(Ordering::SeqCst), 15);
                Ok::<_, BarrierError>(sum)
            })
        });
        let results: Vec<_> = try_join_all(parties).await.unwrap();
        let results: Vec<_> = results.into_iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(results.iter().flatten().copied().collect::<Vec<_>>(), vec![15]);
        assert_eq!(barrier.generation(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reused_across_rounds() {
        let n = 4;
        let rounds = 10;
        let barrier = Arc::new(SyncBarrier::new("rounds", n));
        let counter = Arc::new(AtomicUsize::new(0));
        let parties = (0..n).map(|i| {
            let (barrier, counter) = (barrier.clone(), counter.clone());
            tokio::spawn(async move {
                for round in 0..rounds {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let seen = barrier
                        .await_all(i == round % n, || counter.load(Ordering::SeqCst))
                        .await
                        .unwrap();
                    if let Some(seen) = seen {
                        assert_eq!(seen, (round + 1) * n);
                    }
                    assert!(counter.load(Ordering::SeqCst) >= (round + 1) * n);
                }
            })
        });
        try_join_all(parties).await.unwrap();
        assert_eq!(barrier.generation(), rounds as u64);
    }

    #[tokio::test]
    async fn missing_participant_times_out() {
        let barrier = SyncBarrier::new("short", 2).with_timeout(Some(Duration::from_millis(20)));
        let err = barrier.await_all(true, || ()).await.unwrap_err();
        assert_eq!(
            err,
            BarrierError::Timeout {
                barrier: "short",
                waited: Duration::from_millis(20)
            }
        );
    }

    #[tokio::test]
    async fn second_election_is_rejected() {
        let barrier = Arc::new(
            SyncBarrier::new("elect", 3).with_timeout(Some(Duration::from_millis(50))),
        );
        let first = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.await_all(true, || ()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let err = barrier.await_all(true, || ()).await.unwrap_err();
        assert_eq!(err, BarrierError::ElectedTwice { barrier: "elect" });
        assert!(first.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn single_participant_runs_hook_immediately() {
        let barrier = SyncBarrier::new("solo", 1);
        assert_eq!(barrier.await_all(true, || 42).await, Ok(Some(42)));
        assert_eq!(barrier.await_all(true, || 43).await, Ok(Some(43)));
    }
}
