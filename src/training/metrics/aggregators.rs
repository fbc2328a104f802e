//! Running aggregators over scalar statistics

/// Weighted running average of a scalar statistic
///
/// Each observation contributes `value * weight` to the running sum and
/// `weight` to the running count, so batches of different sizes are
/// averaged per sample rather than per batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsAccumulator {
    last: f64,
    sum: f64,
    count: f64,
    observations: usize,
}

impl MetricsAccumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the running totals
    pub fn update(&mut self, value: f64, weight: f64) {
        self.last = value;
        self.sum += value * weight;
        self.count += weight;
        self.observations += 1;
    }

    /// Weighted mean of everything seen so far, 0 when empty
    pub fn average(&self) -> f64 {
        if self.count == 0.0 {
            0.0
        } else {
            self.sum / self.count
        }
    }

    /// Most recently submitted value, 0 when empty
    pub fn last_value(&self) -> f64 {
        self.last
    }

    /// Accumulated weight
    pub fn total_weight(&self) -> f64 {
        self.count
    }

    /// Number of `update` calls
    pub fn observations(&self) -> usize {
        self.observations
    }

    /// Forget every observation
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_average_is_zero() {
        let meter = MetricsAccumulator::new();
        assert_eq!(meter.average(), 0.0);
        assert_eq!(meter.last_value(), 0.0);
        assert_eq!(meter.observations(), 0);
    }

    #[test]
    fn test_weighted_mean() {
        let mut meter = MetricsAccumulator::new();
        let observations = [(0.5, 32.0), (0.25, 32.0), (1.0, 8.0), (0.1, 1.0)];
        for (value, weight) in observations {
            meter.update(value, weight);
        }

        let expected_sum: f64 = observations.iter().map(|(v, w)| v * w).sum();
        let expected_count: f64 = observations.iter().map(|(_, w)| w).sum();
        assert_relative_eq!(meter.average(), expected_sum / expected_count, epsilon = 1e-12);
        assert_eq!(meter.last_value(), 0.1);
        assert_eq!(meter.total_weight(), 73.0);
        assert_eq!(meter.observations(), 4);
    }

    #[test]
    fn test_reset() {
        let mut meter = MetricsAccumulator::new();
        meter.update(3.0, 2.0);
        meter.reset();
        assert_eq!(meter, MetricsAccumulator::new());
    }
}
