use std::time::Duration;

/// Exponentially weighted moving average of round-trip latency
///
/// A freshly created estimate is unmeasured. An unmeasured estimate carries no
/// comparable value: either nothing has been measured yet or the last attempt
/// against the remote failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyEstimate {
    value: Duration,
    measured: bool,
}

impl LatencyEstimate {
    /// Create an unmeasured estimate
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a new sample into the average with a fixed smoothing factor of 0.5
    pub fn update(&mut self, sample: Duration) {
        self.value = self.value / 2 + sample / 2;
        self.measured = true;
    }

    /// Forget the running average and return to the unmeasured state
    pub fn reset(&mut self) {
        self.value = Duration::ZERO;
        self.measured = false;
    }

    /// Ordering predicate used by the group heap.
    ///
    /// Not a total order: two unmeasured estimates are never better than each
    /// other, so callers must break that tie themselves.
    pub fn better_than(&self, other: &LatencyEstimate) -> bool {
        if !self.measured {
            return false;
        }

        if !other.measured {
            return true;
        }

        self.value < other.value
    }

    /// Current average, `None` when unmeasured
    pub fn value(&self) -> Option<Duration> {
        self.measured.then_some(self.value)
    }

    pub fn is_measured(&self) -> bool {
        self.measured
    }
}
