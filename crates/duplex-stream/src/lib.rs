//! Real-time driver and control plane for the echo canceller.
//!
//! [`BlockProcessor`] runs on the capture thread and consumes fixed-size
//! interleaved stereo frames (left = microphone, right = reference);
//! [`StreamHandle`] lives with the rest of the application and exchanges
//! control messages and metric reports over bounded lock-free queues.

pub mod block_processor;
pub mod messages;

pub use block_processor::{BlockProcessor, ControlQueueFull, RateMismatch, StreamHandle};
pub use messages::{ControlMessage, MetricsReport, StreamEvent};
