//! Fixed-block driver running on the real-time capture thread.
//!
//! Receives interleaved stereo frames (left = microphone, right = reference),
//! drives the canceller, and exchanges control and metric messages with the
//! rest of the application over lock-free single-producer/single-consumer
//! queues. The frame path never allocates, takes no locks and performs no
//! I/O; its only side channel is the bounded event queue.

use std::time::Instant;

use duplex_aec::{AecConfig, BlockMetrics, ConfigError, EchoCanceller};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};

use crate::messages::{ControlMessage, MetricsReport, StreamEvent};

/// Capacity of the inbound control queue (messages).
const CONTROL_QUEUE_CAPACITY: usize = 32;

/// Capacity of the outbound event queue (events).
const EVENT_QUEUE_CAPACITY: usize = 64;

/// The capture source renegotiated its sample rate under a live session.
///
/// Fatal: the session must be rebuilt at the new rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateMismatch {
    pub expected_hz: usize,
    pub actual_hz: usize,
}

impl std::fmt::Display for RateMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "capture produced {} Hz, session fixed at {} Hz",
            self.actual_hz, self.expected_hz
        )
    }
}

impl std::error::Error for RateMismatch {}

/// Error returned to a control sender when the bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlQueueFull(pub ControlMessage);

impl std::fmt::Display for ControlQueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "control queue full, message not delivered")
    }
}

impl std::error::Error for ControlQueueFull {}

/// Control-thread half of a processing session: sends control messages and
/// drains events at its own cadence.
pub struct StreamHandle {
    control_tx: HeapProd<ControlMessage>,
    event_rx: HeapCons<StreamEvent>,
}

impl StreamHandle {
    /// Enqueues a control message; observed at the next block boundary.
    ///
    /// The queue is bounded; a full queue applies backpressure by returning
    /// the message to the caller.
    pub fn send(&mut self, message: ControlMessage) -> Result<(), ControlQueueFull> {
        self.control_tx
            .try_push(message)
            .map_err(ControlQueueFull)
    }

    /// Removes and returns the next pending event, if any.
    pub fn poll_event(&mut self) -> Option<StreamEvent> {
        self.event_rx.try_pop()
    }
}

/// Block-rate driver owning the canceller on the capture thread.
pub struct BlockProcessor {
    canceller: EchoCanceller,
    running: bool,

    control_rx: HeapCons<ControlMessage>,
    event_tx: HeapProd<StreamEvent>,

    mic: Vec<f32>,
    reference: Vec<f32>,
    clean: Vec<f32>,

    metrics_interval_samples: usize,
    samples_until_report: usize,
    last_block_metrics: BlockMetrics,
    dropped_events: u64,
}

impl BlockProcessor {
    /// Builds a processor and its control-thread handle.
    ///
    /// The processor starts stopped (microphone passthrough) until a
    /// [`ControlMessage::Start`] arrives.
    pub fn new(config: AecConfig) -> Result<(Self, StreamHandle), ConfigError> {
        let canceller = EchoCanceller::new(config)?;
        let block_size = config.block_size;

        let (control_tx, control_rx) = HeapRb::new(CONTROL_QUEUE_CAPACITY).split();
        let (event_tx, event_rx) = HeapRb::new(EVENT_QUEUE_CAPACITY).split();

        let processor = Self {
            canceller,
            running: false,
            control_rx,
            event_tx,
            mic: vec![0.0; block_size],
            reference: vec![0.0; block_size],
            clean: vec![0.0; block_size],
            metrics_interval_samples: config.metrics_interval_samples,
            samples_until_report: config.metrics_interval_samples,
            last_block_metrics: BlockMetrics::default(),
            dropped_events: 0,
        };
        let handle = StreamHandle {
            control_tx,
            event_rx,
        };
        Ok((processor, handle))
    }

    /// Number of interleaved samples expected per frame (2 × block size).
    pub fn frame_len(&self) -> usize {
        2 * self.mic.len()
    }

    /// Metrics of the most recently processed block, with the wall-clock
    /// latency stamped in. The capture layer watches this to react to
    /// blocks running over their real-time deadline.
    pub fn last_block_metrics(&self) -> BlockMetrics {
        self.last_block_metrics
    }

    /// Verifies the capture source still runs at the session rate.
    pub fn ensure_sample_rate(&self, actual_hz: usize) -> Result<(), RateMismatch> {
        let expected_hz = self.canceller.config().sample_rate_hz;
        if actual_hz != expected_hz {
            return Err(RateMismatch {
                expected_hz,
                actual_hz,
            });
        }
        Ok(())
    }

    /// Processes one interleaved stereo frame into one mono output block.
    ///
    /// `interleaved` carries block-size pairs of (microphone, reference)
    /// samples; `out` receives the cleaned microphone. While stopped the
    /// microphone passes through unchanged so the capture path keeps its
    /// timing. Malformed frame lengths yield silence, never a panic.
    pub fn process_frame(&mut self, interleaved: &[f32], out: &mut [f32]) {
        self.drain_control();

        let block = self.mic.len();
        if interleaved.len() != 2 * block || out.len() != block {
            tracing::error!(
                "capture frame of {} samples does not match the {}-sample session",
                interleaved.len(),
                2 * block
            );
            out.fill(0.0);
            return;
        }

        for (n, pair) in interleaved.chunks_exact(2).enumerate() {
            self.mic[n] = pair[0];
            self.reference[n] = pair[1];
        }

        if !self.running {
            out.copy_from_slice(&self.mic);
            return;
        }

        let started = Instant::now();
        let mut metrics = self
            .canceller
            .process_block(&self.mic, &self.reference, &mut self.clean);
        metrics.processing_latency_us = started.elapsed().as_micros() as u64;
        self.last_block_metrics = metrics;

        out.copy_from_slice(&self.clean);

        self.samples_until_report = self.samples_until_report.saturating_sub(block);
        if self.samples_until_report == 0 {
            self.samples_until_report = self.metrics_interval_samples;
            let report = self.metrics_report();
            self.push_event(StreamEvent::Metrics(report));
        }
    }

    fn drain_control(&mut self) {
        while let Some(message) = self.control_rx.try_pop() {
            match message {
                ControlMessage::Start => {
                    self.running = true;
                    self.samples_until_report = self.metrics_interval_samples;
                    self.push_event(StreamEvent::Started);
                }
                ControlMessage::Stop => {
                    self.running = false;
                    self.push_event(StreamEvent::Stopped);
                }
                ControlMessage::Reset => {
                    self.canceller.reset();
                }
                ControlMessage::GetMetrics => {
                    let report = self.metrics_report();
                    self.push_event(StreamEvent::Metrics(report));
                }
                ControlMessage::SetConfig(update) => {
                    if !self.canceller.apply_config(&update) {
                        self.push_event(StreamEvent::ConfigClamped);
                    }
                }
            }
        }
    }

    fn metrics_report(&mut self) -> MetricsReport {
        let snapshot = self.canceller.metrics_snapshot();
        let dropped_events = std::mem::take(&mut self.dropped_events);
        MetricsReport {
            processed_samples: snapshot.processed_samples,
            average_erle_db: snapshot.average_erle_db,
            is_processing: self.running,
            estimated_delay: snapshot.estimated_delay,
            processing_latency_us: self.last_block_metrics.processing_latency_us,
            dt_state: snapshot.dt_state,
            dropped_events,
        }
    }

    /// Enqueues an event; a full queue drops the event and counts the loss
    /// into the next successful report rather than blocking the frame path.
    fn push_event(&mut self, event: StreamEvent) {
        if self.event_tx.try_push(event).is_err() {
            self.dropped_events += 1;
        }
    }
}
