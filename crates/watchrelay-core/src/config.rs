use std::time::Duration;

/// Tuning knobs for the log follower and publisher.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often the follower polls the log table when no notify arrives.
    /// Default: 1s
    pub poll_interval: Duration,

    /// Maximum number of log rows fetched per poll.
    /// Default: 512
    pub poll_batch_size: u64,

    /// A poll returning at least this many rows is assumed to have more
    /// pending; the follower loops again without waiting.
    /// Default: 128
    pub fast_path_threshold: usize,

    /// Per-subscriber channel capacity, in event batches. A subscriber that
    /// falls this far behind is dropped.
    /// Default: 128
    pub subscriber_buffer: usize,

    /// How long the follower waits on a missing revision before inserting a
    /// synthetic gap filler.
    /// Default: 500ms
    pub gap_fill_delay: Duration,

    /// Capacity of the writer-to-follower notify channel. Overflowing
    /// notifies are dropped; the poll ticker catches up.
    /// Default: 1024
    pub notify_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_batch_size: 512,
            fast_path_threshold: 128,
            subscriber_buffer: 128,
            gap_fill_delay: Duration::from_millis(500),
            notify_buffer: 1024,
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_batch_size(mut self, size: u64) -> Self {
        self.poll_batch_size = size;
        self
    }

    pub fn with_fast_path_threshold(mut self, threshold: usize) -> Self {
        self.fast_path_threshold = threshold;
        self
    }

    pub fn with_subscriber_buffer(mut self, capacity: usize) -> Self {
        self.subscriber_buffer = capacity;
        self
    }

    pub fn with_gap_fill_delay(mut self, delay: Duration) -> Self {
        self.gap_fill_delay = delay;
        self
    }

    pub fn with_notify_buffer(mut self, capacity: usize) -> Self {
        self.notify_buffer = capacity;
        self
    }
}
