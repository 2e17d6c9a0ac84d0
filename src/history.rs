use crate::models::SimulationSnapshot;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 120;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    /// Appended, and the oldest entry was dropped to stay within capacity.
    Evicted,
    /// Same step as the newest entry; the newest entry was overwritten.
    Replaced,
    /// The step is older than the newest buffered snapshot.
    OutOfOrder,
}

impl PushOutcome {
    pub fn accepted(self) -> bool {
        self != PushOutcome::OutOfOrder
    }
}

/// Sliding window of the most recent snapshots, oldest first.
///
/// Ingestion is idempotent on the step counter: a snapshot for the newest
/// step overwrites it (last write wins), so re-reading the same server state
/// never produces duplicate chart points. The backend reports its first
/// post-reset step with the same counter as the reset itself, and that value
/// must win over the reset value.
#[derive(Clone, Debug)]
pub struct SimulationHistory {
    capacity: usize,
    entries: VecDeque<SimulationSnapshot>,
}

impl SimulationHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, snapshot: SimulationSnapshot) -> PushOutcome {
        if let Some(last) = self.entries.back_mut() {
            if snapshot.step < last.step {
                return PushOutcome::OutOfOrder;
            }
            // Steps are non-decreasing, so an equal step can only sit at the back.
            if snapshot.step == last.step {
                *last = snapshot;
                return PushOutcome::Replaced;
            }
        }

        self.entries.push_back(snapshot);
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
            PushOutcome::Evicted
        } else {
            PushOutcome::Appended
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&SimulationSnapshot> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimulationSnapshot> {
        self.entries.iter()
    }

    pub fn steps(&self) -> Vec<u64> {
        self.entries.iter().map(|s| s.step).collect()
    }

    /// Change in portfolio value between the two most recent snapshots.
    pub fn last_change(&self) -> f64 {
        let n = self.entries.len();
        if n < 2 {
            return 0.0;
        }
        self.entries[n - 1].portfolio_value - self.entries[n - 2].portfolio_value
    }

    /// `(step, portfolio_value)` pairs for charting.
    pub fn value_points(&self) -> Vec<(f64, f64)> {
        self.entries
            .iter()
            .map(|s| (s.step as f64, s.portfolio_value))
            .collect()
    }
}

impl Default for SimulationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
