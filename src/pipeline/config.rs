//! Pipeline configuration
//!
//! `PipelineConfig` is the encoder configuration described in spec §3: it is
//! created by the caller, validated once at `initialize`, and frozen for the
//! lifetime of the pipeline. Nothing downstream of `initialize` may mutate it.

use crate::codec::muxer::ContainerFormat;
use crate::pipeline::error::{PipelineError, PipelineErrorKind};
use napi::bindgen_prelude::*;
use napi_derive::napi;

/// Codec family tag used for negotiation (§4.3).
#[napi(string_enum)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
  Avc,
  Hevc,
  Vp8,
  Vp9,
  Av1,
  Aac,
  Opus,
}

impl CodecFamily {
  pub fn is_video(&self) -> bool {
    matches!(
      self,
      CodecFamily::Avc | CodecFamily::Hevc | CodecFamily::Vp8 | CodecFamily::Vp9 | CodecFamily::Av1
    )
  }

  pub fn is_audio(&self) -> bool {
    matches!(self, CodecFamily::Aac | CodecFamily::Opus)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      CodecFamily::Avc => "avc",
      CodecFamily::Hevc => "hevc",
      CodecFamily::Vp8 => "vp8",
      CodecFamily::Vp9 => "vp9",
      CodecFamily::Av1 => "av1",
      CodecFamily::Aac => "aac",
      CodecFamily::Opus => "opus",
    }
  }
}

/// `quality` (batch) or `realtime` (streaming); fixed at init (spec §3).
#[napi(string_enum)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineLatencyMode {
  #[default]
  Quality,
  Realtime,
}

/// Container selection (spec §3/§6).
#[napi(string_enum)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineContainer {
  Mp4,
  WebM,
}

impl PipelineContainer {
  pub fn to_internal(self) -> ContainerFormat {
    match self {
      PipelineContainer::Mp4 => ContainerFormat::Mp4,
      PipelineContainer::WebM => ContainerFormat::WebM,
    }
  }
}

/// First-timestamp handling (spec §6, §9 open question).
///
/// The open question in spec §9 is resolved here: the default is `Offset`,
/// matching the documented current default of the source repository.
#[napi(string_enum)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstTimestampBehavior {
  /// Reject a non-zero first timestamp with `TimestampOrdering`.
  Strict,
  /// Rebase the first accepted timestamp (per stream) to zero.
  #[default]
  Offset,
  /// Use submitted timestamps verbatim.
  Passthrough,
}

/// Per-codec-family preference pair (spec §3 `codec.video`/`codec.audio`).
#[napi(object)]
#[derive(Debug, Clone, Default)]
pub struct CodecPreference {
  pub video: Option<CodecFamily>,
  pub audio: Option<CodecFamily>,
}

/// Encoder configuration, immutable after `initialize` (spec §3).
#[napi(object)]
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub width: u32,
  pub height: u32,
  pub frame_rate: f64,
  /// 0 disables video.
  pub video_bitrate: i64,
  /// 0 disables audio.
  pub audio_bitrate: i64,
  pub sample_rate: Option<u32>,
  pub channels: Option<u32>,
  pub container: PipelineContainer,
  pub latency_mode: PipelineLatencyMode,
  pub codec: CodecPreference,
  pub first_timestamp_behavior: Option<FirstTimestampBehavior>,
  /// Realtime backpressure threshold; default 10 (spec §4.2/§6).
  pub max_queue_depth: Option<u32>,
}

impl PipelineConfig {
  pub fn video_enabled(&self) -> bool {
    self.video_bitrate > 0
  }

  pub fn audio_enabled(&self) -> bool {
    self.audio_bitrate > 0
  }

  pub fn first_timestamp_behavior(&self) -> FirstTimestampBehavior {
    self.first_timestamp_behavior.unwrap_or_default()
  }

  pub fn max_queue_depth(&self) -> u32 {
    self.max_queue_depth.unwrap_or(10)
  }

  /// Validate the invariants listed in spec §3. Called once, eagerly, at
  /// `initialize`, before any platform codec is touched — mirrors
  /// `video_encoder.rs::configure`'s "parse before construct" ordering.
  pub fn validate(&self) -> Result<(), PipelineError> {
    if self.width == 0 || self.height == 0 {
      return Err(PipelineError::new(
        PipelineErrorKind::ConfigurationError,
        "width and height must be > 0",
      ));
    }
    if self.width % 2 != 0 || self.height % 2 != 0 {
      return Err(PipelineError::new(
        PipelineErrorKind::ConfigurationError,
        "width and height must be even",
      ));
    }
    if self.frame_rate <= 0.0 {
      return Err(PipelineError::new(
        PipelineErrorKind::ConfigurationError,
        "frame_rate must be > 0",
      ));
    }
    if self.video_bitrate < 0 || self.audio_bitrate < 0 {
      return Err(PipelineError::new(
        PipelineErrorKind::ConfigurationError,
        "bitrates must be >= 0",
      ));
    }
    if self.audio_enabled() {
      let sample_rate = self.sample_rate.unwrap_or(0);
      let channels = self.channels.unwrap_or(0);
      if sample_rate == 0 || channels == 0 {
        return Err(PipelineError::new(
          PipelineErrorKind::ConfigurationError,
          "sample_rate and channels must be > 0 when audio is enabled",
        ));
      }
    }
    if !self.video_enabled() && !self.audio_enabled() {
      return Err(PipelineError::new(
        PipelineErrorKind::ConfigurationError,
        "at least one of video or audio must be enabled",
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base_config() -> PipelineConfig {
    PipelineConfig {
      width: 320,
      height: 240,
      frame_rate: 30.0,
      video_bitrate: 1_000_000,
      audio_bitrate: 0,
      sample_rate: None,
      channels: None,
      container: PipelineContainer::Mp4,
      latency_mode: PipelineLatencyMode::Quality,
      codec: CodecPreference {
        video: Some(CodecFamily::Avc),
        audio: None,
      },
      first_timestamp_behavior: None,
      max_queue_depth: None,
    }
  }

  #[test]
  fn rejects_odd_dimensions() {
    let mut config = base_config();
    config.width = 321;
    assert!(config.validate().is_err());
  }

  #[test]
  fn rejects_audio_enabled_without_sample_rate() {
    let mut config = base_config();
    config.audio_bitrate = 128_000;
    assert!(config.validate().is_err());
  }

  #[test]
  fn default_first_timestamp_behavior_is_offset() {
    let config = base_config();
    assert_eq!(config.first_timestamp_behavior(), FirstTimestampBehavior::Offset);
  }

  #[test]
  fn default_max_queue_depth_is_ten() {
    let config = base_config();
    assert_eq!(config.max_queue_depth(), 10);
  }

  #[test]
  fn accepts_valid_config() {
    assert!(base_config().validate().is_ok());
  }
}
