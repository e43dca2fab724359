//! Control and event message shapes crossing the capture boundary.

use duplex_aec::{ConfigUpdate, DtState};

/// Messages from the control thread to the block processor.
///
/// Drained at the top of each block; a message sent during block `i` takes
/// effect no later than block `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMessage {
    /// Begin cancelling; until then the microphone passes through unchanged.
    Start,
    /// Stop cancelling and return to passthrough.
    Stop,
    /// Clear all adaptive state at the next block boundary.
    Reset,
    /// Request an immediate metrics report.
    GetMetrics,
    /// Retune the live-updatable configuration subset.
    SetConfig(ConfigUpdate),
}

/// Aggregated metrics pushed on the reporting cadence and on demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsReport {
    /// Samples processed since construction or the last reset.
    pub processed_samples: u64,
    /// Mean ERLE across processed blocks, in dB.
    pub average_erle_db: f32,
    /// Whether cancellation is currently running.
    pub is_processing: bool,
    /// Current bulk delay estimate in samples.
    pub estimated_delay: usize,
    /// Wall-clock cost of the most recent block, in microseconds.
    pub processing_latency_us: u64,
    /// Current double-talk detector state.
    pub dt_state: DtState,
    /// Events lost to a full outbound queue since the last report.
    pub dropped_events: u64,
}

/// Messages from the block processor back to the control thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamEvent {
    /// Cancellation engaged.
    Started,
    /// Cancellation stopped; the processor is in passthrough.
    Stopped,
    /// Periodic or requested metrics.
    Metrics(MetricsReport),
    /// A `SetConfig` carried out-of-range values; they were clamped.
    ConfigClamped,
}
