use std::time::Duration;

/// Exponentially weighted moving average of the download rate.
#[derive(Debug, Clone)]
pub struct BandwidthEstimator {
    ewma: f64,
    initialized: bool,
    alpha: f64,
}

impl BandwidthEstimator {
    pub fn new(alpha: f64) -> Self {
        Self {
            ewma: 0.0,
            initialized: false,
            alpha,
        }
    }

    /// Records `bytes` downloaded in `elapsed`.
    ///
    /// Samples with no measurable elapsed time carry no rate information and are ignored.
    pub fn record(&mut self, bytes: usize, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 || bytes == 0 {
            return;
        }

        let sample = (bytes as f64 * 8.0) / secs;
        self.ewma = if self.initialized {
            self.alpha * sample + (1.0 - self.alpha) * self.ewma
        } else {
            self.initialized = true;
            sample
        };
    }

    /// Estimated bandwidth in bits per second, `None` until the first sample.
    pub fn estimate(&self) -> Option<u64> {
        self.initialized.then(|| self.ewma.round() as u64)
    }
}
