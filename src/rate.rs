//! Rate Estimator & Controller (C4, §4.4): smooths ingress/egress counters
//! into a two-period average and derives a target RAM-message count from a
//! caller-supplied drain-duration target.

/// Seconds-to-drain target. `None` means unset/infinite: no paging pressure.
pub type DurationTarget = Option<f64>;

#[derive(Debug)]
pub struct RateEstimator {
    window_start_micros: u64,
    in_count: u64,
    out_count: u64,
    in_count_prev: u64,
    out_count_prev: u64,
    avg_ingress: f64,
    avg_egress: f64,
    ram_msg_count_prev: u64,
    duration_target: DurationTarget,
    target_ram_msg_count: Option<u64>,
}

impl RateEstimator {
    pub fn new(now_micros: u64) -> Self {
        Self {
            window_start_micros: now_micros,
            in_count: 0,
            out_count: 0,
            in_count_prev: 0,
            out_count_prev: 0,
            avg_ingress: 0.0,
            avg_egress: 0.0,
            ram_msg_count_prev: 0,
            duration_target: None,
            target_ram_msg_count: None,
        }
    }

    pub fn record_ingress(&mut self) {
        self.in_count += 1;
    }

    pub fn record_egress(&mut self) {
        self.out_count += 1;
    }

    pub fn target_ram_msg_count(&self) -> Option<u64> {
        self.target_ram_msg_count
    }

    /// Updates the smoothed rates and returns the current drain-duration
    /// estimate, `None` meaning infinite (both rates zero).
    pub fn ram_duration(&mut self, now_micros: u64, ram_msg_count: u64) -> DurationTarget {
        let elapsed = now_micros.saturating_sub(self.window_start_micros).max(1);
        self.avg_ingress = 1e6 * (self.in_count + self.in_count_prev) as f64 / elapsed as f64;
        self.avg_egress = 1e6 * (self.out_count + self.out_count_prev) as f64 / elapsed as f64;

        self.in_count_prev = self.in_count;
        self.in_count = 0;
        self.out_count_prev = self.out_count;
        self.out_count = 0;
        self.window_start_micros = now_micros;

        let rate = self.avg_ingress + self.avg_egress;
        let duration = if rate > 0.0 {
            Some((ram_msg_count + self.ram_msg_count_prev) as f64 / (2.0 * rate))
        } else {
            None
        };
        self.ram_msg_count_prev = ram_msg_count;
        self.recompute_target();
        duration
    }

    /// Sets a new duration target, immediately recomputing the derived
    /// RAM-message target. Returns `true` when the new target is strictly
    /// lower than the previous one, signalling the caller must run
    /// `reduce_memory_use`.
    pub fn set_ram_duration_target(&mut self, target: DurationTarget) -> bool {
        let old = self.target_ram_msg_count;
        self.duration_target = target;
        self.recompute_target();
        match (self.target_ram_msg_count, old) {
            (Some(new), Some(old)) => new < old,
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn recompute_target(&mut self) {
        self.target_ram_msg_count = match self.duration_target {
            None => None,
            Some(d) if !d.is_finite() => None,
            Some(d) => Some((d * (self.avg_ingress + self.avg_egress)).floor().max(0.0) as u64),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_target_is_unset() {
        let mut rec = RateEstimator::new(0);
        assert!(!rec.set_ram_duration_target(Some(f64::INFINITY)));
        assert_eq!(rec.target_ram_msg_count(), None);
    }

    #[test]
    fn lowering_target_signals_reduction() {
        let mut rec = RateEstimator::new(0);
        rec.record_ingress();
        rec.record_ingress();
        rec.ram_duration(1_000_000, 0);
        rec.set_ram_duration_target(Some(10.0));
        let triggered = rec.set_ram_duration_target(Some(0.0));
        assert!(triggered || rec.target_ram_msg_count() == Some(0));
    }

    #[test]
    fn zero_rate_means_infinite_duration() {
        let mut rec = RateEstimator::new(0);
        let duration = rec.ram_duration(1_000_000, 5);
        assert_eq!(duration, None);
    }
}
