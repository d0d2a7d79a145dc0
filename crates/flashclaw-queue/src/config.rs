/// Tuning knobs for [`crate::MessageQueue`] (§4.5, §6.6).
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Global backpressure limit — `enqueue` fails fast past this.
    pub max_queue_size: usize,
    /// At most this many dispatches run across the whole process at once.
    pub max_concurrent: usize,
    /// Per-dispatch deadline; firing marks the attempt failed and allows retry.
    pub processing_timeout_ms: u64,
    /// Per-message retry budget; failures beyond this are logged and dropped.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1_000,
            max_concurrent: 10,
            processing_timeout_ms: 300_000,
            max_retries: 3,
        }
    }
}
