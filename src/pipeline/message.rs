//! Controller <-> worker message protocol (spec §6)
//!
//! Two typed, one-directional message enums carried over `tokio::sync::mpsc`
//! channels (see `pipeline::worker`). The controller never touches codec or
//! muxer state directly; everything crosses this boundary as a message,
//! mirroring `WorkerThreadCommand` from the donor worker-thread pattern but
//! widened to round-trip progress/output back to the controller.

use crate::pipeline::config::PipelineConfig;
use crate::pipeline::error::PipelineError;
use crate::pipeline::frame::{AudioBlockHandle, PlanarAudioData, VideoFrameHandle};
use std::sync::Arc;

/// Sent controller -> worker.
pub enum ControllerMessage {
  Initialize {
    config: PipelineConfig,
  },
  SubmitVideoFrame {
    frame: Arc<VideoFrameHandle>,
  },
  SubmitAudioBlock {
    block: Arc<AudioBlockHandle>,
  },
  SubmitPlanarAudio {
    audio: PlanarAudioData,
  },
  Finalize,
  Cancel,
}

/// A byte range delivered back for realtime (fragmented) output (spec §4.4,
/// wire name `dataChunk`).
#[derive(Debug, Clone)]
pub struct StreamingChunk {
  pub data: Vec<u8>,
  /// Monotonically increasing sequence number, one per emitted fragment.
  pub sequence: u64,
  /// True for the first, structural fragment only (spec §4.4: "header
  /// fragment is emitted exactly once and before any media fragment").
  pub is_header: bool,
}

/// EWMA-smoothed throughput/progress snapshot (spec §4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressRecord {
  pub frames_submitted: u64,
  pub frames_encoded: u64,
  pub audio_blocks_submitted: u64,
  /// Exponentially-weighted moving average of encode throughput, in frames
  /// per second of wall-clock time.
  pub ewma_fps: f64,
  /// Current depth of the worker's pending-encode queue.
  pub queue_depth: u32,
}

/// A single video-queue-depth sample used to drive backpressure decisions in
/// the scheduler (spec §4.2 "source is paused once the queue exceeds
/// max_queue_depth"). Distinct from `codec_manager::QueueDepth`, which
/// carries both streams' depths for the `queueSize` message to the
/// controller.
#[derive(Debug, Clone, Copy)]
pub struct BackpressureSample {
  pub depth: u32,
  pub max_depth: u32,
}

impl BackpressureSample {
  pub fn should_pause(&self) -> bool {
    self.depth >= self.max_depth
  }

  pub fn should_resume(&self) -> bool {
    self.depth <= self.max_depth / 2
  }
}

/// Sent worker -> controller.
///
/// `progress` is conspicuously absent here: spec §4.2 places the Frame
/// Scheduler (and therefore progress reporting) on the controller side, so
/// `PipelineController` emits `ProgressRecord`s to the caller directly from
/// `add_video_frame`/`add_audio`, without a worker round-trip. `queueSize` is
/// the Codec Manager's signal (worker side, spec §4.3) and does cross the
/// channel.
pub enum WorkerMessage {
  /// `initialized`: negotiation is complete, pipeline is ready.
  Initialized {
    actual_video_codec: Option<String>,
    actual_audio_codec: Option<String>,
  },
  /// `queueSize`: per-encoder backpressure signal.
  QueueSize(crate::pipeline::codec_manager::QueueDepth),
  /// `dataChunk`: realtime mode only.
  StreamingChunk(StreamingChunk),
  /// `finalized`: terminal success. The final buffer for batch mode, or
  /// empty for realtime mode (the bytes already went out via `StreamingChunk`).
  Finalized(Option<Vec<u8>>),
  Cancelled,
  Error(PipelineError),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn queue_depth_pauses_at_threshold() {
    let sample = BackpressureSample {
      depth: 10,
      max_depth: 10,
    };
    assert!(sample.should_pause());
  }

  #[test]
  fn queue_depth_resumes_at_half() {
    let sample = BackpressureSample {
      depth: 5,
      max_depth: 10,
    };
    assert!(sample.should_resume());
  }

  #[test]
  fn queue_depth_does_not_resume_above_half() {
    let sample = BackpressureSample {
      depth: 6,
      max_depth: 10,
    };
    assert!(!sample.should_resume());
  }
}
