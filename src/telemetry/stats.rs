//! Running step statistics

use std::time::Duration;

/// Step timing accumulated over one episode
#[derive(Debug, Default, Clone)]
pub struct StepStats {
    pub steps: u64,
    pub total: Duration,
    pub slowest: Duration,
    /// Running mean of per-step rates
    pub avg_step_rate: f64,
}

impl StepStats {
    pub fn record(&mut self, dt: Duration) {
        self.steps += 1;
        self.total += dt;
        self.slowest = self.slowest.max(dt);

        let rate = if dt.is_zero() { 0.0 } else { 1.0 / dt.as_secs_f64() };
        let n = self.steps as f64;
        self.avg_step_rate = self.avg_step_rate * ((n - 1.0) / n) + rate / n;
    }

    /// Steps per second over the whole episode
    pub fn throughput(&self) -> f64 {
        let secs = self.total.as_secs_f64();
        if secs > 0.0 {
            self.steps as f64 / secs
        } else {
            0.0
        }
    }
}
