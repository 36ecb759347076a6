use std::time::{Duration, Instant};

const RATE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub up_bytes_per_sec: f32,
    pub down_bytes_per_sec: f32,
    pub rtt_ms: Option<u32>,
}

/// Up/down rates recomputed over half-second windows.
#[derive(Debug)]
pub struct BandwidthMonitor {
    window_start: Instant,
    sent_at_window: u64,
    received_at_window: u64,
    up: f32,
    down: f32,
}

impl BandwidthMonitor {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            sent_at_window: 0,
            received_at_window: 0,
            up: 0.0,
            down: 0.0,
        }
    }

    pub fn update(&mut self, now: Instant, sent_total: u64, received_total: u64) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed <= RATE_WINDOW {
            return;
        }

        let secs = elapsed.as_secs_f32();
        self.up = sent_total.saturating_sub(self.sent_at_window) as f32 / secs;
        self.down = received_total.saturating_sub(self.received_at_window) as f32 / secs;
        self.sent_at_window = sent_total;
        self.received_at_window = received_total;
        self.window_start = now;
    }

    pub fn up_bytes_per_sec(&self) -> f32 {
        self.up
    }

    pub fn down_bytes_per_sec(&self) -> f32 {
        self.down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_refresh_after_window() {
        let start = Instant::now();
        let mut monitor = BandwidthMonitor::new(start);

        monitor.update(start + Duration::from_millis(200), 500, 1000);
        assert_eq!(monitor.up_bytes_per_sec(), 0.0);

        monitor.update(start + Duration::from_secs(1), 500, 1000);
        assert_eq!(monitor.up_bytes_per_sec(), 500.0);
        assert_eq!(monitor.down_bytes_per_sec(), 1000.0);

        monitor.update(start + Duration::from_secs(3), 700, 1000);
        assert_eq!(monitor.up_bytes_per_sec(), 100.0);
        assert_eq!(monitor.down_bytes_per_sec(), 0.0);
    }
}
