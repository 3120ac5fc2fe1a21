//! Frame and audio sample block ownership (spec §3)
//!
//! A `VideoFrameHandle`/`AudioBlockHandle` is owned exclusively by the
//! pipeline once submitted and must be released (closed) exactly once after
//! the worker has consumed it (invariant #4, spec §8). Both wrap the
//! existing `webcodecs::VideoFrame`/`AudioData` NAPI types rather than
//! reinventing frame storage — `close()` on those types is already
//! idempotent (see `video_frame.rs`/`audio_data.rs`), so the handle only
//! needs to guarantee the worker calls it exactly once, not zero-or-many.

use crate::pipeline::error::{PipelineError, PipelineErrorKind};
use crate::webcodecs::{AudioData, VideoFrame};
use std::sync::atomic::{AtomicBool, Ordering};

/// An owned, pipeline-tracked video frame with a caller- or scheduler-assigned
/// presentation timestamp in microseconds.
pub struct VideoFrameHandle {
  frame: VideoFrame,
  /// Explicit timestamp supplied by the caller, if any (spec §4.2: "submitted
  /// explicit timestamps always win").
  pub explicit_timestamp_us: Option<i64>,
  released: AtomicBool,
}

impl VideoFrameHandle {
  pub fn new(frame: VideoFrame, explicit_timestamp_us: Option<i64>) -> Self {
    Self {
      frame,
      explicit_timestamp_us,
      released: AtomicBool::new(false),
    }
  }

  pub fn frame(&self) -> &VideoFrame {
    &self.frame
  }

  /// Release the frame. Idempotent: a second call is a no-op, matching
  /// `VideoFrame::close`'s own idempotence and spec invariant #4 ("released
  /// exactly once") without panicking on a defensive double-release.
  pub fn release(&self) {
    if !self.released.swap(true, Ordering::AcqRel) {
      let _ = self.frame.close();
    }
  }
}

impl Drop for VideoFrameHandle {
  fn drop(&mut self) {
    self.release();
  }
}

/// An owned, pipeline-tracked audio sample block.
pub struct AudioBlockHandle {
  data: AudioData,
  pub explicit_timestamp_us: Option<i64>,
  released: AtomicBool,
}

impl AudioBlockHandle {
  pub fn new(data: AudioData, explicit_timestamp_us: Option<i64>) -> Self {
    Self {
      data,
      explicit_timestamp_us,
      released: AtomicBool::new(false),
    }
  }

  pub fn data(&self) -> &AudioData {
    &self.data
  }

  pub fn release(&self) {
    if !self.released.swap(true, Ordering::AcqRel) {
      let _ = self.data.close();
    }
  }
}

impl Drop for AudioBlockHandle {
  fn drop(&mut self) {
    self.release();
  }
}

/// Planar `f32` audio, the non-native-handle half of spec §3's "Audio sample
/// block" union (the other half is a platform-native `AudioData` handle,
/// represented by `AudioBlockHandle` above).
#[derive(Debug, Clone)]
pub struct PlanarAudioData {
  pub sample_rate: u32,
  pub channels: u32,
  pub frame_count: u32,
  /// One `Vec<f32>` per channel, each of length `frame_count`.
  pub planes: Vec<Vec<f32>>,
  pub timestamp_us: Option<i64>,
}

impl PlanarAudioData {
  pub fn validate(&self) -> Result<(), PipelineError> {
    if self.sample_rate == 0 || self.channels == 0 {
      return Err(PipelineError::new(
        PipelineErrorKind::InvalidInput,
        "planar audio requires sample_rate > 0 and channels > 0",
      ));
    }
    if self.planes.len() != self.channels as usize {
      return Err(PipelineError::new(
        PipelineErrorKind::InvalidInput,
        format!(
          "expected {} channel planes, got {}",
          self.channels,
          self.planes.len()
        ),
      ));
    }
    if self.planes.iter().any(|p| p.len() != self.frame_count as usize) {
      return Err(PipelineError::new(
        PipelineErrorKind::InvalidInput,
        "each channel plane must have frame_count samples",
      ));
    }
    Ok(())
  }

  /// Duration in microseconds, used to advance `next_audio_ts` (spec §3).
  pub fn duration_us(&self) -> i64 {
    (self.frame_count as i64) * 1_000_000 / self.sample_rate as i64
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_mismatched_plane_count() {
    let audio = PlanarAudioData {
      sample_rate: 48_000,
      channels: 2,
      frame_count: 10,
      planes: vec![vec![0.0; 10]],
      timestamp_us: None,
    };
    assert!(audio.validate().is_err());
  }

  #[test]
  fn rejects_mismatched_frame_count() {
    let audio = PlanarAudioData {
      sample_rate: 48_000,
      channels: 1,
      frame_count: 10,
      planes: vec![vec![0.0; 5]],
      timestamp_us: None,
    };
    assert!(audio.validate().is_err());
  }

  #[test]
  fn duration_us_matches_sample_rate() {
    let audio = PlanarAudioData {
      sample_rate: 48_000,
      channels: 1,
      frame_count: 48_000,
      planes: vec![vec![0.0; 48_000]],
      timestamp_us: None,
    };
    assert_eq!(audio.duration_us(), 1_000_000);
  }
}
