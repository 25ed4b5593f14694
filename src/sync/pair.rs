use std::{sync::Mutex, time::Duration};

use tokio::sync::watch;
use tracing::trace;

use super::{BarrierError, wait_until};

/// All unordered pairs of `0..n`, grouped into rounds of disjoint pairs (circle method).
///
/// There are `n - 1` rounds for even `n` and `n` rounds for odd `n`; every pair occurs in
/// exactly one round and is listed as `(smaller, larger)`.
pub fn round_robin(n: usize) -> Vec<Vec<(usize, usize)>> {
    if n < 2 {
        return vec![];
    }
    let m = n + n % 2;
    let fixed = m - 1;
    (0..fixed)
        .map(|r| {
            let mut round = Vec::with_capacity(m / 2);
            round.push((fixed, r));
            for i in 1..m / 2 {
                round.push(((r + i) % fixed, (r + fixed - i) % fixed));
            }
            round
                .into_iter()
                .filter(|&(a, b)| a < n && b < n)
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect()
        })
        .collect()
}

/// Which of the two admitted participants a caller turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairRole {
    /// Arrived first and produced the cycle's value.
    First,
    /// Arrived second and consumed the cycle's value.
    Second,
}

/// The outcome of one [`PairBarrier::await_pair`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paired<T> {
    /// The other participant of the pair.
    pub peer: usize,
    /// The role this participant played.
    pub role: PairRole,
    /// The value produced by the first participant.
    pub value: T,
}

#[derive(Debug)]
struct Cycle<T> {
    index: usize,
    first: Option<usize>,
    second: Option<usize>,
    value: Option<T>,
}

/// A barrier that admits two participants per cycle.
///
/// Cycles follow the flattened [`round_robin`] schedule, so every unordered pair of the `n`
/// participants is admitted exactly once and each participant takes part in exactly `n - 1`
/// cycles. Of the two scheduled participants, whoever arrives first waits for the other, then
/// runs the `first` action and hands its value to the second, which runs the `second` action
/// and releases the next cycle. Participants that are not scheduled in the current cycle wait for their turn.
#[derive(Debug)]
pub struct PairBarrier<T> {
    name: &'static str,
    schedule: Vec<(usize, usize)>,
    turns: Vec<Vec<usize>>,
    next_turn: Mutex<Vec<usize>>,
    cycle: watch::Sender<Cycle<T>>,
    timeout: Option<Duration>,
}

impl<T: Clone> PairBarrier<T> {
    /// Creates a pair barrier for `n` participants.
    pub fn new(name: &'static str, n: usize) -> Self {
        let schedule: Vec<_> = round_robin(n).into_iter().flatten().collect();
        let mut turns = vec![vec![]; n];
        for (c, &(a, b)) in schedule.iter().enumerate() {
            turns[a].push(c);
            turns[b].push(c);
        }
        let (cycle, _) = watch::channel(Cycle {
            index: 0,
            first: None,
            second: None,
            value: None,
        });
        Self {
            name,
            schedule,
            turns,
            next_turn: Mutex::new(vec![0; n]),
            cycle,
            timeout: None,
        }
    }

    /// Bounds every wait at this barrier by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The pairs in the order in which they are admitted.
    pub fn schedule(&self) -> &[(usize, usize)] {
        &self.schedule
    }

    /// Waits for the next cycle that admits `me`, then runs the action of the role `me` plays.
    ///
    /// `first` receives the peer index and returns the value handed to the peer; `second`
    /// receives the peer index and that value. Both actions operate on the caller's `state`.
    pub async fn await_pair<S>(
        &self,
        me: usize,
        state: &mut S,
        first: impl FnOnce(&mut S, usize) -> T,
        second: impl FnOnce(&mut S, usize, &T),
    ) -> Result<Paired<T>, BarrierError> {
        let cycle = {
            let mut next_turn = self.next_turn.lock().expect("poison");
            let cycle = next_turn
                .get(me)
                .and_then(|&turn| self.turns[me].get(turn))
                .copied()
                .ok_or(BarrierError::ScheduleExhausted {
                    barrier: self.name,
                    party: me,
                })?;
            next_turn[me] += 1;
            cycle
        };
        let (a, b) = self.schedule[cycle];
        let peer = if a == me { b } else { a };

        let mut rx = self.cycle.subscribe();
        wait_until(self.name, &mut rx, self.timeout, |c| c.index == cycle).await?;

        let mut is_first = false;
        self.cycle.send_modify(|c| {
            if c.first.is_none() {
                c.first = Some(me);
                is_first = true;
            } else {
                c.second = Some(me);
            }
        });

        if is_first {
            trace!(barrier = self.name, cycle, me, peer, "first of pair");
            wait_until(self.name, &mut rx, self.timeout, |c| c.second.is_some()).await?;
            let value = first(state, peer);
            self.cycle.send_modify(|c| c.value = Some(value.clone()));
            Ok(Paired {
                peer,
                role: PairRole::First,
                value,
            })
        } else {
            trace!(barrier = self.name, cycle, me, peer, "second of pair");
            wait_until(self.name, &mut rx, self.timeout, |c| c.value.is_some()).await?;
            let mut value = None;
            self.cycle.send_modify(|c| value = c.value.take());
            let value = value.ok_or(BarrierError::Closed { barrier: self.name })?;
            second(state, peer, &value);
            self.cycle.send_modify(|c| {
                c.index += 1;
                c.first = None;
                c.second = None;
            });
            Ok(Paired {
                peer,
                role: PairRole::Second,
                value,
            })
        }
    }
}
