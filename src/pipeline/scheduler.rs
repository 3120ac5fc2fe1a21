//! Frame Scheduler (spec §4.2)
//!
//! Sits between the Source Adapter and the Message Loop. Assigns monotonic
//! timestamps when a source doesn't supply its own, paces submission against
//! backpressure in realtime mode, and tracks an EWMA throughput estimate for
//! `Progress` reporting. Mirrors the "queue depth signals feed back into the
//! caller" shape the donor's `ThreadsafeFunction` backpressure callback uses
//! in `video_encoder.rs`, generalized into a plain, synchronously-driven
//! counter rather than a callback (the scheduler runs inside the worker's own
//! loop, not across the NAPI boundary).

use crate::pipeline::config::{FirstTimestampBehavior, PipelineLatencyMode};
use crate::pipeline::error::{PipelineError, PipelineErrorKind};
use crate::pipeline::message::{BackpressureSample, ProgressRecord};

/// Per-stream monotonic timestamp counters (spec §3). Used both to assign
/// timestamps to sources that don't supply their own and to validate
/// caller-supplied timestamps never run backwards.
#[derive(Debug, Clone, Copy, Default)]
struct TimestampCounters {
  next_video_ts: i64,
  next_audio_ts: i64,
  video_offset: Option<i64>,
  audio_offset: Option<i64>,
}

/// EWMA smoothing factor for the fps estimate. Chosen to react within a
/// handful of frames without being noisy on a single slow tick.
const EWMA_ALPHA: f64 = 0.2;

/// Paces frame/audio submission and assigns/validates timestamps.
pub struct FrameScheduler {
  ts: TimestampCounters,
  first_timestamp_behavior: FirstTimestampBehavior,
  latency_mode: PipelineLatencyMode,
  max_queue_depth: u32,
  frame_rate: f64,
  progress: ProgressRecord,
  last_tick_instant: Option<std::time::Instant>,
  frames_dropped: u64,
  paused: bool,
}

impl FrameScheduler {
  pub fn new(
    first_timestamp_behavior: FirstTimestampBehavior,
    latency_mode: PipelineLatencyMode,
    max_queue_depth: u32,
    frame_rate: f64,
  ) -> Self {
    Self {
      ts: TimestampCounters::default(),
      first_timestamp_behavior,
      latency_mode,
      max_queue_depth,
      frame_rate,
      progress: ProgressRecord::default(),
      last_tick_instant: None,
      frames_dropped: 0,
      paused: false,
    }
  }

  /// Resolve the timestamp to stamp a submitted video frame with, applying
  /// `first_timestamp_behavior` and rejecting non-monotonic input (spec §4.2
  /// "rejecting decreasing timestamps").
  pub fn resolve_video_timestamp(&mut self, explicit_us: Option<i64>) -> Result<i64, PipelineError> {
    let resolved = self.resolve_timestamp(explicit_us, true)?;
    self.progress.frames_submitted += 1;
    Ok(resolved)
  }

  /// Resolve the timestamp to stamp a submitted audio block with.
  pub fn resolve_audio_timestamp(&mut self, explicit_us: Option<i64>) -> Result<i64, PipelineError> {
    let resolved = self.resolve_timestamp(explicit_us, false)?;
    self.progress.audio_blocks_submitted += 1;
    Ok(resolved)
  }

  fn resolve_timestamp(&mut self, explicit_us: Option<i64>, is_video: bool) -> Result<i64, PipelineError> {
    let next_ts = if is_video { self.ts.next_video_ts } else { self.ts.next_audio_ts };
    let offset = if is_video { self.ts.video_offset } else { self.ts.audio_offset };

    let candidate = match explicit_us {
      Some(raw) => match self.first_timestamp_behavior {
        FirstTimestampBehavior::Passthrough => raw,
        FirstTimestampBehavior::Strict => {
          if offset.is_none() && raw != 0 {
            return Err(PipelineError::new(
              PipelineErrorKind::TimestampOrdering,
              "strict mode requires the first timestamp to be zero",
            ));
          }
          raw
        }
        FirstTimestampBehavior::Offset => {
          let base = match offset {
            Some(b) => b,
            None => {
              if is_video {
                self.ts.video_offset = Some(raw);
              } else {
                self.ts.audio_offset = Some(raw);
              }
              raw
            }
          };
          raw - base
        }
      },
      // No explicit timestamp: assign one from the running counter, advanced
      // by a nominal frame duration (video) or left to the caller to advance
      // via `advance_audio` for variable-length audio blocks.
      None => next_ts,
    };

    if candidate < next_ts {
      return Err(PipelineError::new(
        PipelineErrorKind::TimestampOrdering,
        format!("timestamp {} precedes previous timestamp {}", candidate, next_ts),
      ));
    }

    if is_video {
      let frame_duration_us = (1_000_000.0 / self.frame_rate).round() as i64;
      self.ts.next_video_ts = candidate + frame_duration_us;
    } else {
      self.ts.next_audio_ts = candidate;
    }

    Ok(candidate)
  }

  /// Advance the audio counter by a block's actual duration, once it's known
  /// (spec §3: durations vary per audio block, unlike fixed-cadence video).
  pub fn advance_audio(&mut self, duration_us: i64) {
    self.ts.next_audio_ts += duration_us;
  }

  /// Record that one more frame has finished encoding, updating the EWMA fps
  /// estimate (spec §4.2).
  pub fn record_encoded_frame(&mut self) {
    self.progress.frames_encoded += 1;
    let now = std::time::Instant::now();
    if let Some(last) = self.last_tick_instant {
      let dt = now.duration_since(last).as_secs_f64();
      if dt > 0.0 {
        let instantaneous_fps = 1.0 / dt;
        self.progress.ewma_fps = if self.progress.ewma_fps == 0.0 {
          instantaneous_fps
        } else {
          EWMA_ALPHA * instantaneous_fps + (1.0 - EWMA_ALPHA) * self.progress.ewma_fps
        };
      }
    }
    self.last_tick_instant = Some(now);
  }

  /// Record a frame dropped under realtime backpressure (spec §4.2 "frame
  /// drops... are recorded and reported", §6 backpressure policy).
  pub fn record_dropped_frame(&mut self) {
    self.frames_dropped += 1;
  }

  pub fn frames_dropped(&self) -> u64 {
    self.frames_dropped
  }

  /// Current progress snapshot, with `queue_depth` overlaid by the caller
  /// (the scheduler doesn't own the codec manager's queue).
  pub fn progress(&self, queue_depth: u32) -> ProgressRecord {
    ProgressRecord {
      queue_depth,
      ..self.progress
    }
  }

  /// Update pause/resume state from a fresh queue-depth sample and report
  /// whether the source should be paused (quality mode never pauses: spec
  /// §4.2 "batch mode has no backpressure ceiling", only realtime does).
  pub fn should_pause_for(&mut self, depth: u32) -> bool {
    if self.latency_mode != PipelineLatencyMode::Realtime {
      return false;
    }
    let sample = BackpressureSample {
      depth,
      max_depth: self.max_queue_depth,
    };
    if self.paused {
      if sample.should_resume() {
        self.paused = false;
      }
    } else if sample.should_pause() {
      self.paused = true;
    }
    self.paused
  }

  pub fn is_paused(&self) -> bool {
    self.paused
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scheduler(behavior: FirstTimestampBehavior, mode: PipelineLatencyMode) -> FrameScheduler {
    FrameScheduler::new(behavior, mode, 10, 30.0)
  }

  #[test]
  fn offset_mode_rebases_first_timestamp_to_zero() {
    let mut s = scheduler(FirstTimestampBehavior::Offset, PipelineLatencyMode::Quality);
    assert_eq!(s.resolve_video_timestamp(Some(5_000)).unwrap(), 0);
    assert_eq!(s.resolve_video_timestamp(Some(38_333)).unwrap(), 33_333);
  }

  #[test]
  fn strict_mode_rejects_nonzero_first_timestamp() {
    let mut s = scheduler(FirstTimestampBehavior::Strict, PipelineLatencyMode::Quality);
    assert!(s.resolve_video_timestamp(Some(100)).is_err());
  }

  #[test]
  fn passthrough_mode_uses_raw_value() {
    let mut s = scheduler(FirstTimestampBehavior::Passthrough, PipelineLatencyMode::Quality);
    assert_eq!(s.resolve_video_timestamp(Some(1_000)).unwrap(), 1_000);
  }

  #[test]
  fn rejects_decreasing_timestamps() {
    let mut s = scheduler(FirstTimestampBehavior::Passthrough, PipelineLatencyMode::Quality);
    s.resolve_video_timestamp(Some(10_000)).unwrap();
    assert!(s.resolve_video_timestamp(Some(5_000)).is_err());
  }

  #[test]
  fn missing_timestamp_uses_running_counter() {
    let mut s = scheduler(FirstTimestampBehavior::Offset, PipelineLatencyMode::Quality);
    assert_eq!(s.resolve_video_timestamp(None).unwrap(), 0);
    assert_eq!(s.resolve_video_timestamp(None).unwrap(), 33_333);
  }

  #[test]
  fn quality_mode_never_pauses() {
    let mut s = scheduler(FirstTimestampBehavior::Offset, PipelineLatencyMode::Quality);
    assert!(!s.should_pause_for(1_000));
  }

  #[test]
  fn realtime_mode_pauses_at_threshold_and_resumes_at_half() {
    let mut s = scheduler(FirstTimestampBehavior::Offset, PipelineLatencyMode::Realtime);
    assert!(!s.should_pause_for(5));
    assert!(s.should_pause_for(10));
    assert!(s.should_pause_for(6));
    assert!(!s.should_pause_for(5));
  }

  #[test]
  fn dropped_frames_are_counted() {
    let mut s = scheduler(FirstTimestampBehavior::Offset, PipelineLatencyMode::Realtime);
    s.record_dropped_frame();
    s.record_dropped_frame();
    assert_eq!(s.frames_dropped(), 2);
  }
}
